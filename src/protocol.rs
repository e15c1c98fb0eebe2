//! Wire formats for the registration and client channels
//!
//! Both channels speak newline-terminated UTF-8 text. Parsing here is
//! deliberately lenient: backends built at different times pad `!join` with
//! extra tokens, and reports may carry more or fewer client tokens than the
//! announced count.

use crate::scheduler::Mode;

/// Reply to a successful `!join`.
pub const ACK: &str = "!ack";

/// Reply to an unrecognized registration-channel request.
pub const ERR: &str = "!err";

/// Reply to a client that cannot be assigned a backend.
pub const NO_SERVER_AVAILABLE: &str = "NO_SERVER_AVAILABLE";

/// A request received on the registration channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
    /// `!join <any tokens> <port>` — the advertised port is the last token.
    Join { port: u16 },
    /// `!report <port> clients <n> <name>@<ip>…` — full replacement of the
    /// backend's live-client list.
    Report {
        port: u16,
        clients: Vec<ReportedClient>,
    },
}

/// One `name@ip` token from a `!report` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedClient {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unrecognized request: {0:?}")]
    UnknownRequest(String),

    #[error("missing port token")]
    MissingPort,

    #[error("invalid port: {0:?}")]
    BadPort(String),

    #[error("malformed report: {0}")]
    BadReport(&'static str),
}

impl BackendRequest {
    /// Parse one registration-channel line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            Some("!join") => parse_join(&tokens),
            Some("!report") => parse_report(&tokens),
            _ => Err(ProtocolError::UnknownRequest(line.trim().to_string())),
        }
    }
}

fn parse_join(tokens: &[&str]) -> Result<BackendRequest, ProtocolError> {
    if tokens.len() < 2 {
        return Err(ProtocolError::MissingPort);
    }
    // Backends pad the message with flags ("!join -v dynamic 9000"); only the
    // trailing port token is meaningful.
    let last = tokens[tokens.len() - 1];
    let port = last
        .parse::<u16>()
        .map_err(|_| ProtocolError::BadPort(last.to_string()))?;
    Ok(BackendRequest::Join { port })
}

fn parse_report(tokens: &[&str]) -> Result<BackendRequest, ProtocolError> {
    let port_token = tokens.get(1).ok_or(ProtocolError::MissingPort)?;
    let port = port_token
        .parse::<u16>()
        .map_err(|_| ProtocolError::BadPort(port_token.to_string()))?;

    if tokens.get(2).copied() != Some("clients") {
        return Err(ProtocolError::BadReport("expected 'clients' keyword"));
    }
    let count_token = tokens
        .get(3)
        .ok_or(ProtocolError::BadReport("missing client count"))?;
    let count = count_token
        .parse::<usize>()
        .map_err(|_| ProtocolError::BadReport("client count is not a number"))?;

    // The count is a hint: read up to `count` tokens, stop at end of line.
    let clients = tokens
        .iter()
        .skip(4)
        .take(count)
        .map(|token| parse_client_token(token))
        .collect();

    Ok(BackendRequest::Report { port, clients })
}

/// Split a `name@ip` token on the last `@`; a token without `@` is a bare
/// name from an address-less backend.
fn parse_client_token(token: &str) -> ReportedClient {
    match token.rsplit_once('@') {
        Some((name, ip)) => ReportedClient {
            name: name.to_string(),
            ip: ip.to_string(),
        },
        None => ReportedClient {
            name: token.to_string(),
            ip: "unknown".to_string(),
        },
    }
}

/// A client handshake, as much of it as the client sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub name: Option<String>,
    pub mode: Option<Mode>,
}

impl ClientHello {
    /// Parse a handshake line. Handshakes never fail: anything that is not a
    /// `HELLO` line (including an empty read) yields an empty hello and the
    /// caller falls back to generated name and default mode.
    pub fn parse(line: &str) -> Self {
        if !line.trim_start().to_uppercase().starts_with("HELLO") {
            return Self::default();
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let name = tokens
            .get(1)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string());
        let mode = tokens.get(2).and_then(|t| t.to_lowercase().parse().ok());
        Self { name, mode }
    }
}
