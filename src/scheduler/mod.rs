//! Backend selection policies
//!
//! The scheduler works over a registry snapshot: candidate filtering,
//! weighted round-robin, and latency-based selection all see one consistent
//! point-in-time view of the backend set.

mod latency;
mod weighted;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;

use serde::{Deserialize, Serialize};

use crate::registry::{RegistryEntry, RegistrySnapshot};

pub use weighted::build_schedule;

/// Client selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Weighted round-robin over the registered backends.
    #[default]
    Static,
    /// Lowest known probe RTT, falling back to round-robin.
    Dynamic,
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Mode::Static),
            "dynamic" => Ok(Mode::Dynamic),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Static => write!(f, "static"),
            Mode::Dynamic => write!(f, "dynamic"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode: {0:?} (expected 'static' or 'dynamic')")]
pub struct UnknownMode(pub String);

/// Select a backend for one client, or `None` when nothing is schedulable.
///
/// `cursor` is the process-wide rotating index shared by all static
/// selections; it advances once per inspected schedule slot so concurrent
/// selections interleave.
pub fn select(snapshot: &RegistrySnapshot, mode: Mode, cursor: &AtomicUsize) -> Option<SocketAddr> {
    match mode {
        Mode::Static => weighted::select_static(snapshot, cursor),
        Mode::Dynamic => latency::select_dynamic(snapshot, cursor),
    }
}

/// A backend is schedulable when it is not drained and its reported live
/// count is under the per-backend cap (when one is set).
pub(crate) fn is_candidate(entry: &RegistryEntry, max_per_backend: Option<u64>) -> bool {
    if entry.drained {
        return false;
    }
    match max_per_backend {
        Some(max) => (entry.live_count() as u64) < max,
        None => true,
    }
}

/// Schedulable backends in snapshot order.
pub(crate) fn candidates(snapshot: &RegistrySnapshot) -> Vec<SocketAddr> {
    snapshot
        .entries
        .iter()
        .filter(|e| is_candidate(e, snapshot.policy.max_per_backend))
        .map(|e| e.backend)
        .collect()
}
