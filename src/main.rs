//! balancerd: TCP load balancer for a line-oriented command protocol
//!
//! Backends register themselves on the registration channel and report
//! their connected clients; clients handshake on the client channel and are
//! redirected to a backend chosen by weighted round-robin or lowest probe
//! RTT; an operator console on stdin inspects and steers the whole thing.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

use balancerd::{config::ConfigError, console, probe, AppConfig, BalancerServer, Mode};

#[derive(Parser)]
#[command(name = "balancerd")]
#[command(version = "0.1.0")]
#[command(about = "TCP load balancer for a line-oriented command protocol")]
#[command(long_about = "
balancerd sits between clients and a fleet of self-registering backend
workers:
  - backends join and report connected clients on the registration channel
  - clients handshake and are redirected by weighted round-robin or RTT
  - an operator console on stdin imposes weights, drains, caps, and bans

Example usage:
  balancerd run --config balancerd.yaml
  balancerd probe 127.0.0.1:9000
")]
struct Cli {
    /// Path to config file (optional; defaults apply without one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the balancer
    Run {
        /// Override the client channel port
        #[arg(long)]
        client_port: Option<u16>,
        /// Override the registration channel port
        #[arg(long)]
        registration_port: Option<u16>,
        /// Override the default selection mode (static, dynamic)
        #[arg(long, value_name = "MODE")]
        default_mode: Option<String>,
    },

    /// Validate the configuration file and print the effective settings
    CheckConfig,

    /// Send one ping to a backend and report the RTT
    Probe {
        /// Backend address, host:port
        target: String,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level_filter = if let Some(level) = cli.log_level {
        level.to_string()
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            .to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&level_filter))
        .init();

    match cli.command {
        Commands::Run {
            client_port,
            registration_port,
            default_mode,
        } => {
            run_balancer(cli.config, client_port, registration_port, default_mode).await?;
        }
        Commands::CheckConfig => {
            check_config(cli.config)?;
        }
        Commands::Probe { target, timeout_ms } => {
            probe_once(&target, timeout_ms).await?;
        }
    }

    Ok(())
}

/// Run the balancer until killed
async fn run_balancer(
    config_path: Option<PathBuf>,
    client_port_override: Option<u16>,
    registration_port_override: Option<u16>,
    default_mode_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config_or_exit(config_path.as_deref());

    // Apply CLI overrides
    if let Some(port) = client_port_override {
        config.server.client_port = port;
    }
    if let Some(port) = registration_port_override {
        config.server.registration_port = port;
    }
    if let Some(mode_str) = default_mode_override {
        config.balancer.default_mode = match mode_str.to_lowercase().parse::<Mode>() {
            Ok(mode) => mode,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };
    }

    log_config_settings(&config);

    let server = BalancerServer::bind(&config).await?;
    tracing::info!(
        addr = %server.client_addr()?,
        "client channel listening"
    );
    tracing::info!(
        addr = %server.registration_addr()?,
        "registration channel listening"
    );

    tokio::spawn(console::run_console(server.state()));

    server.serve().await;
    Ok(())
}

/// Log all configuration settings at startup
fn log_config_settings(config: &AppConfig) {
    tracing::info!("=== Configuration ===");
    tracing::info!(
        host = %config.server.host,
        client_port = config.server.client_port,
        registration_port = config.server.registration_port,
        "Server"
    );
    tracing::info!(
        default_mode = %config.balancer.default_mode,
        max_per_backend = ?config.balancer.max_per_backend,
        ping_interval_ms = config.balancer.ping_interval_ms,
        "Balancer"
    );
    tracing::info!(format = ?config.console.format, "Console");
    tracing::info!(capacity = config.history.capacity, "History");
    tracing::info!("=== End Configuration ===");
}

/// Validate configuration and print the effective settings
fn check_config(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::load_or_default(config_path.as_deref()) {
        Ok(config) => {
            println!("✓ Configuration is valid\n");
            println!("Server:");
            println!(
                "  Client channel:       {}:{}",
                config.server.host, config.server.client_port
            );
            println!(
                "  Registration channel: {}:{}",
                config.server.host, config.server.registration_port
            );
            println!("\nBalancer:");
            println!("  Default mode:    {}", config.balancer.default_mode);
            match config.balancer.max_per_backend {
                Some(max) => println!("  Max per backend: {}", max),
                None => println!("  Max per backend: unlimited"),
            }
            println!("  Ping interval:   {} ms", config.balancer.ping_interval_ms);
            println!("\nConsole:");
            println!("  Format: {:?}", config.console.format);
            println!("\nHistory:");
            println!("  Capacity: {}", config.history.capacity);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// One-shot connectivity check against a backend
async fn probe_once(target: &str, timeout_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = match target.parse() {
        Ok(addr) => addr,
        Err(_) => {
            eprintln!("{:?} is not host:port", target);
            std::process::exit(1);
        }
    };

    println!("Probing {}...", addr);
    match probe::probe_backend(addr, Duration::from_millis(timeout_ms)).await {
        Ok(rtt_ms) => {
            println!("✓ pong from {} in {} ms", addr, rtt_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ probe failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load configuration or exit with error
fn load_config_or_exit(config_path: Option<&std::path::Path>) -> AppConfig {
    match AppConfig::load_or_default(config_path) {
        Ok(config) => config,
        Err(e @ ConfigError::NotFound(_)) => {
            eprintln!("Error loading configuration: {}", e);
            eprintln!("\nYou can copy balancerd.yaml.default and modify it:");
            eprintln!("  cp balancerd.yaml.default balancerd.yaml");
            eprintln!("or run without --config to use the built-in defaults.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    }
}
