mod loader;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::scheduler::Mode;

pub use loader::load_config;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub balancer: BalancerConfig,
    pub console: ConsoleConfig,
    pub history: HistoryConfig,
}

/// Listening sockets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Client handshake channel.
    pub client_port: u16,
    /// Backend join/report channel.
    pub registration_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            client_port: 11114,
            registration_port: 11115,
        }
    }
}

/// Scheduling policy defaults; all of these stay operator-tunable at runtime
/// from the console.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub default_mode: Mode,
    /// Per-backend live-client cap; absent means unlimited.
    pub max_per_backend: Option<u64>,
    pub ping_interval_ms: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::Static,
            max_per_backend: None,
            ping_interval_ms: 1000,
        }
    }
}

/// Operator console settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub format: ConsoleFormat,
}

/// Output format for console listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    #[default]
    Pretty,
    Json,
}

/// Assignment history settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 500 }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Load from an explicit path, from a default location, or fall back to
    /// built-in defaults when no file exists (the wire ports are fixed by
    /// the protocol, so running without a file is normal).
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::from_file(path),
            None => {
                let default_paths = ["balancerd.yaml", "balancerd.yml", "./config/balancerd.yaml"];
                for p in default_paths {
                    let path = Path::new(p);
                    if path.exists() {
                        return Self::from_file(path);
                    }
                }
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
