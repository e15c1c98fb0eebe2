//! Client channel: handshake, selection, redirect
//!
//! A client connection is short-lived: one optional `HELLO` line in, one
//! line out (either the chosen backend's `host:port` or the
//! `NO_SERVER_AVAILABLE` sentinel), then close. The client reconnects to
//! the backend on its own; the balancer plays no further part.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time;

use crate::protocol::{ClientHello, NO_SERVER_AVAILABLE};
use crate::scheduler;
use crate::stats::AssignmentRecord;

use super::BalancerState;

/// A client that sends nothing within this window is still served with a
/// generated name and the default mode.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) async fn run_client_listener(listener: TcpListener, state: Arc<BalancerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_client(stream, peer, &state).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "client accept failed");
                time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Handle one client handshake to completion.
pub(crate) async fn handle_client<S>(stream: S, peer: SocketAddr, state: &BalancerState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    match time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::debug!(remote = %peer, error = %e, "handshake read failed");
            return;
        }
        Err(_) => {
            tracing::debug!(remote = %peer, "silent client, using defaults");
        }
    }

    let hello = ClientHello::parse(&line);
    let mode = hello.mode.unwrap_or_else(|| state.registry.default_mode());
    let name = hello.name.unwrap_or_else(|| state.next_client_name());

    let stream = reader.get_mut();

    if state.registry.is_banned(peer.ip(), &name) {
        tracing::info!(client = %name, remote = %peer, "banned client refused");
        write_line(stream, NO_SERVER_AVAILABLE, peer).await;
        return;
    }

    let snapshot = state.registry.snapshot();
    match scheduler::select(&snapshot, mode, state.registry.cursor()) {
        Some(backend) => {
            write_line(stream, &backend.to_string(), peer).await;
            state
                .assignments
                .push(AssignmentRecord::new(name.clone(), mode, backend, peer));
            tracing::info!(client = %name, mode = %mode, backend = %backend, "client assigned");
        }
        None => {
            tracing::info!(client = %name, mode = %mode, "no schedulable backend");
            write_line(stream, NO_SERVER_AVAILABLE, peer).await;
        }
    }
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, reply: &str, peer: SocketAddr) {
    if let Err(e) = stream.write_all(format!("{}\n", reply).as_bytes()).await {
        tracing::debug!(remote = %peer, error = %e, "client reply failed");
    }
}
