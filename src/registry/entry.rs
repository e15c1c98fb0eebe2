//! Per-backend registry state

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One client a backend reported as currently connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveClient {
    pub name: String,
    pub ip: String,
    pub reported_at: DateTime<Utc>,
}

/// Registry state for a single backend.
///
/// Identity is the full socket address (peer IP plus advertised port); the
/// registry holds at most one entry per address. `rtt_ms` is absent until the
/// first successful probe, `live_clients` until the first report.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub backend: SocketAddr,
    pub weight: u32,
    pub drained: bool,
    pub rtt_ms: Option<u64>,
    pub live_clients: Option<Vec<LiveClient>>,
}

impl RegistryEntry {
    pub fn new(backend: SocketAddr) -> Self {
        Self {
            backend,
            weight: 1,
            drained: false,
            rtt_ms: None,
            live_clients: None,
        }
    }

    /// Reported live-client count; zero before the first report.
    pub fn live_count(&self) -> usize {
        self.live_clients.as_ref().map(Vec::len).unwrap_or(0)
    }
}
