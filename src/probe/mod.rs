//! Background RTT probing
//!
//! A single timer task fans out one detached probe per backend each tick.
//! Probes open a fresh TCP connection, send `ping`, and expect `pong`
//! within the timeout; the elapsed wall-clock time becomes the backend's
//! RTT. A failed probe changes nothing, so the previous RTT survives until
//! the next successful one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;

use crate::registry::{Registry, MIN_PING_INTERVAL_MS};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("connection closed before reply")]
    Closed,

    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

/// Connect/read deadline for one probe: half the period, floored at 200 ms.
pub fn probe_timeout(interval_ms: u64) -> Duration {
    Duration::from_millis((interval_ms / 2).max(MIN_PING_INTERVAL_MS))
}

/// Spawn the periodic probe loop. The task re-arms its timer whenever the
/// operator changes the period and runs until the registry is dropped.
pub fn spawn_probe_loop(registry: Arc<Registry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = registry.ping_receiver();
        loop {
            let period = *rx.borrow_and_update();
            let mut ticker = time::interval(Duration::from_millis(period));
            // The first tick of a fresh interval fires immediately; skip it
            // so a period change does not trigger a burst.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        probe_all(&registry, probe_timeout(period));
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            // Registry gone; nothing left to probe.
                            return;
                        }
                        break;
                    }
                }
            }
        }
    })
}

/// Fan out one detached probe per backend. Nothing joins these tasks; their
/// only side effect is an RTT cache write, and late results from a previous
/// period are still valid measurements.
fn probe_all(registry: &Arc<Registry>, timeout: Duration) {
    for backend in registry.backends() {
        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            match probe_backend(backend, timeout).await {
                Ok(rtt_ms) => {
                    registry.set_rtt(backend, rtt_ms);
                    tracing::debug!(backend = %backend, rtt_ms, "probe ok");
                }
                Err(e) => {
                    tracing::debug!(backend = %backend, error = %e, "probe failed");
                }
            }
        });
    }
}

/// One ping/pong exchange against a backend, measuring wall-clock time from
/// connect to reply.
pub async fn probe_backend(backend: SocketAddr, timeout: Duration) -> Result<u64, ProbeError> {
    let start = Instant::now();

    let stream = time::timeout(timeout, TcpStream::connect(backend))
        .await
        .map_err(|_| ProbeError::Timeout)??;

    let mut reader = BufReader::new(stream);
    reader.get_mut().write_all(b"ping\n").await?;

    let mut line = String::new();
    let n = time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ProbeError::Timeout)??;
    if n == 0 {
        return Err(ProbeError::Closed);
    }

    let reply = line.trim();
    if reply.eq_ignore_ascii_case("pong") {
        Ok(start.elapsed().as_millis() as u64)
    } else {
        Err(ProbeError::UnexpectedReply(reply.to_string()))
    }
}
