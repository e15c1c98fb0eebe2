//! balancerd: TCP load balancer for a line-oriented command protocol
//!
//! Features:
//! - Backend self-registration and periodic live-client reports
//! - Weighted round-robin and latency-based client dispatch
//! - Background ping/pong RTT probing
//! - Operator console on stdin (drain, weights, caps, bans)

pub mod config;
pub mod console;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod stats;

pub use config::AppConfig;
pub use registry::Registry;
pub use scheduler::Mode;
pub use server::{run_server, BalancerServer};
