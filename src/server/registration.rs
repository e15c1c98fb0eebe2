//! Registration channel: backend joins and live-client reports
//!
//! Each accepted connection carries exactly one request; the reply (when the
//! request has one) goes back on the same connection, which is then closed.
//! The backend's address is always the peer IP from the socket, never
//! anything inside the message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time;

use crate::protocol::{BackendRequest, ACK, ERR};
use crate::registry::LiveClient;

use super::BalancerState;

/// A backend that connects and then stalls gets this long to produce its
/// one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run_registration_listener(listener: TcpListener, state: Arc<BalancerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_registration(stream, peer, &state).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration accept failed");
                time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Handle one registration-channel connection. One bad peer never takes the
/// channel down: every failure path logs and returns.
pub(crate) async fn handle_registration<S>(stream: S, peer: SocketAddr, state: &BalancerState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    match time::timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => {
            tracing::debug!(peer = %peer, "registration peer closed without a request");
            return;
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "registration read failed");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer, "registration peer timed out");
            return;
        }
    }

    match BackendRequest::parse(&line) {
        Ok(BackendRequest::Join { port }) => {
            let backend = SocketAddr::new(peer.ip(), port);
            if state.registry.add_backend(backend) {
                tracing::info!(backend = %backend, "backend joined");
            } else {
                tracing::debug!(backend = %backend, "backend re-joined, entry preserved");
            }
            write_line(reader.get_mut(), ACK, peer).await;
        }
        Ok(BackendRequest::Report { port, clients }) => {
            let backend = SocketAddr::new(peer.ip(), port);
            let now = Utc::now();
            let live: Vec<LiveClient> = clients
                .into_iter()
                .map(|c| LiveClient {
                    name: c.name,
                    ip: c.ip,
                    reported_at: now,
                })
                .collect();
            let count = live.len();
            if state.registry.set_report(backend, live) {
                tracing::debug!(backend = %backend, clients = count, "live-client report");
            } else {
                tracing::warn!(backend = %backend, "report for unregistered backend dropped");
            }
            // Reports are fire-and-forget; no reply.
        }
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "bad registration request");
            // A malformed report is swallowed (reports never get replies);
            // everything else is answered with the error sentinel.
            if !line.trim_start().starts_with("!report") {
                write_line(reader.get_mut(), ERR, peer).await;
            }
        }
    }
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, reply: &str, peer: SocketAddr) {
    if let Err(e) = stream.write_all(format!("{}\n", reply).as_bytes()).await {
        tracing::debug!(peer = %peer, error = %e, "registration reply failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tokio::io::AsyncReadExt;

    fn state() -> BalancerState {
        BalancerState::new(&AppConfig::default())
    }

    fn peer(ip: &str) -> SocketAddr {
        format!("{}:50000", ip).parse().unwrap()
    }

    async fn roundtrip(state: &BalancerState, peer_addr: SocketAddr, request: &str) -> String {
        let (mut local, remote) = tokio::io::duplex(1024);
        local.write_all(request.as_bytes()).await.unwrap();

        handle_registration(remote, peer_addr, state).await;

        let mut reply = String::new();
        local.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_join_registers_peer_ip_with_advertised_port() {
        let state = state();
        let reply = roundtrip(&state, peer("192.168.0.5"), "!join foo bar 7777\n").await;

        assert_eq!(reply, "!ack\n");
        assert_eq!(
            state.registry.backends(),
            vec!["192.168.0.5:7777".parse().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_second_join_does_not_duplicate() {
        let state = state();
        roundtrip(&state, peer("192.168.0.5"), "!join 7777\n").await;
        let reply = roundtrip(&state, peer("192.168.0.5"), "!join 7777\n").await;

        assert_eq!(reply, "!ack\n");
        assert_eq!(state.registry.backends().len(), 1);
    }

    #[tokio::test]
    async fn test_report_replaces_live_list() {
        let state = state();
        roundtrip(&state, peer("10.1.1.1"), "!join 9000\n").await;

        let reply = roundtrip(
            &state,
            peer("10.1.1.1"),
            "!report 9000 clients 2 alice@1.2.3.4 bob@5.6.7.8\n",
        )
        .await;
        assert_eq!(reply, "");

        let backend: SocketAddr = "10.1.1.1:9000".parse().unwrap();
        let snap = state.registry.snapshot();
        assert_eq!(snap.entry(backend).unwrap().live_count(), 2);

        roundtrip(&state, peer("10.1.1.1"), "!report 9000 clients 0\n").await;
        let snap = state.registry.snapshot();
        assert_eq!(snap.entry(backend).unwrap().live_count(), 0);
    }

    #[tokio::test]
    async fn test_report_before_join_is_dropped() {
        let state = state();
        roundtrip(&state, peer("10.1.1.1"), "!report 9000 clients 1 x@1.1.1.1\n").await;
        assert!(state.registry.backends().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request_gets_err() {
        let state = state();
        let reply = roundtrip(&state, peer("10.1.1.1"), "!leave 9000\n").await;
        assert_eq!(reply, "!err\n");
    }

    #[tokio::test]
    async fn test_join_with_bad_port_gets_err() {
        let state = state();
        let reply = roundtrip(&state, peer("10.1.1.1"), "!join banana\n").await;
        assert_eq!(reply, "!err\n");
        assert!(state.registry.backends().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_report_is_silent() {
        let state = state();
        let reply = roundtrip(&state, peer("10.1.1.1"), "!report nine clients 0\n").await;
        assert_eq!(reply, "");
    }
}
