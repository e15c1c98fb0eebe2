//! Listener wiring and shared runtime state

mod clients;
mod registration;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::{AppConfig, ConsoleFormat};
use crate::probe;
use crate::registry::{Policy, Registry};
use crate::stats::AssignmentLog;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {channel} listener on {addr}: {source}")]
    Bind {
        channel: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// State shared by the channels, the probe loop, and the console.
pub struct BalancerState {
    pub registry: Arc<Registry>,
    pub assignments: AssignmentLog,
    pub console_format: ConsoleFormat,
    /// Feeds `Client-<N>` names for handshakes that carry none.
    client_counter: AtomicU64,
}

impl BalancerState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(Policy {
                default_mode: config.balancer.default_mode,
                max_per_backend: config.balancer.max_per_backend,
                ping_interval_ms: config.balancer.ping_interval_ms,
            })),
            assignments: AssignmentLog::new(config.history.capacity),
            console_format: config.console.format,
            client_counter: AtomicU64::new(0),
        }
    }

    /// Next generated client name; the counter is process-wide.
    pub fn next_client_name(&self) -> String {
        let n = self.client_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("Client-{}", n)
    }
}

/// The balancer with its listeners bound but not yet serving.
pub struct BalancerServer {
    state: Arc<BalancerState>,
    client_listener: TcpListener,
    registration_listener: TcpListener,
}

impl BalancerServer {
    /// Bind both channels. Bind failures are fatal at startup.
    pub async fn bind(config: &AppConfig) -> Result<Self, ServerError> {
        let state = Arc::new(BalancerState::new(config));

        let client_addr = format!("{}:{}", config.server.host, config.server.client_port);
        let client_listener =
            TcpListener::bind(&client_addr)
                .await
                .map_err(|e| ServerError::Bind {
                    channel: "client",
                    addr: client_addr,
                    source: e,
                })?;

        let registration_addr =
            format!("{}:{}", config.server.host, config.server.registration_port);
        let registration_listener =
            TcpListener::bind(&registration_addr)
                .await
                .map_err(|e| ServerError::Bind {
                    channel: "registration",
                    addr: registration_addr,
                    source: e,
                })?;

        Ok(Self {
            state,
            client_listener,
            registration_listener,
        })
    }

    pub fn state(&self) -> Arc<BalancerState> {
        Arc::clone(&self.state)
    }

    pub fn client_addr(&self) -> std::io::Result<SocketAddr> {
        self.client_listener.local_addr()
    }

    pub fn registration_addr(&self) -> std::io::Result<SocketAddr> {
        self.registration_listener.local_addr()
    }

    /// Run the probe loop and both accept loops. Runs until the process is
    /// killed; there is no graceful shutdown.
    pub async fn serve(self) {
        let Self {
            state,
            client_listener,
            registration_listener,
        } = self;

        probe::spawn_probe_loop(Arc::clone(&state.registry));

        futures::future::join(
            registration::run_registration_listener(registration_listener, Arc::clone(&state)),
            clients::run_client_listener(client_listener, state),
        )
        .await;
    }
}

/// Bind and serve with the given configuration.
pub async fn run_server(config: &AppConfig) -> Result<(), ServerError> {
    let server = BalancerServer::bind(config).await?;
    server.serve().await;
    Ok(())
}
