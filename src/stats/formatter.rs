//! Console view rendering
//!
//! Each operator-facing listing renders either as an aligned text table or
//! as JSON, selected by the `console.format` setting.

use std::net::SocketAddr;

use serde::Serialize;

use crate::config::ConsoleFormat;
use crate::registry::RegistrySnapshot;

use super::{AssignmentLog, AssignmentRecord};

/// One row of the `servers` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ServerRow {
    pub backend: SocketAddr,
    pub rtt_ms: Option<u64>,
    pub weight: u32,
    pub drained: bool,
    pub live: usize,
    pub assigned: usize,
}

/// Join registry entries with assignment counts.
pub fn server_rows(snapshot: &RegistrySnapshot, log: &AssignmentLog) -> Vec<ServerRow> {
    snapshot
        .entries
        .iter()
        .map(|e| ServerRow {
            backend: e.backend,
            rtt_ms: e.rtt_ms,
            weight: e.weight,
            drained: e.drained,
            live: e.live_count(),
            assigned: log.assigned_count(e.backend),
        })
        .collect()
}

pub fn format_servers(rows: &[ServerRow], format: ConsoleFormat) -> String {
    match format {
        ConsoleFormat::Json => to_json(rows),
        ConsoleFormat::Pretty => {
            if rows.is_empty() {
                return "no backends registered".to_string();
            }
            let mut out = format!(
                "{:<24} {:>8} {:>7} {:>8} {:>6} {:>9}\n",
                "BACKEND", "RTT", "WEIGHT", "DRAINED", "LIVE", "ASSIGNED"
            );
            for row in rows {
                let rtt = row
                    .rtt_ms
                    .map(|ms| format!("{} ms", ms))
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&format!(
                    "{:<24} {:>8} {:>7} {:>8} {:>6} {:>9}\n",
                    row.backend,
                    rtt,
                    row.weight,
                    if row.drained { "yes" } else { "no" },
                    row.live,
                    row.assigned,
                ));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_live(snapshot: &RegistrySnapshot, format: ConsoleFormat) -> String {
    match format {
        ConsoleFormat::Json => to_json(&snapshot.entries),
        ConsoleFormat::Pretty => {
            if snapshot.entries.is_empty() {
                return "no backends registered".to_string();
            }
            let mut out = String::new();
            for entry in &snapshot.entries {
                match &entry.live_clients {
                    None => out.push_str(&format!("{}  (no report yet)\n", entry.backend)),
                    Some(clients) if clients.is_empty() => {
                        out.push_str(&format!("{}  0 clients\n", entry.backend))
                    }
                    Some(clients) => {
                        out.push_str(&format!("{}  {} clients\n", entry.backend, clients.len()));
                        for client in clients {
                            out.push_str(&format!(
                                "  {}@{}  reported {}\n",
                                client.name,
                                client.ip,
                                client.reported_at.format("%H:%M:%S UTC"),
                            ));
                        }
                    }
                }
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_assignments(records: &[AssignmentRecord], format: ConsoleFormat) -> String {
    match format {
        ConsoleFormat::Json => to_json(records),
        ConsoleFormat::Pretty => {
            if records.is_empty() {
                return "no assignments recorded".to_string();
            }
            let mut out = String::new();
            for rec in records {
                out.push_str(&format!(
                    "[{}] {:<20} {:<7} {} -> {}\n",
                    rec.assigned_at.format("%H:%M:%S"),
                    truncate(&rec.client_name, 20),
                    rec.mode,
                    rec.remote,
                    rec.backend,
                ));
            }
            out.trim_end().to_string()
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Truncate a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Policy, Registry};
    use crate::scheduler::Mode;

    fn snapshot_with_backend() -> RegistrySnapshot {
        let reg = Registry::new(Policy::default());
        reg.add_backend("10.0.0.1:9000".parse().unwrap());
        reg.set_rtt("10.0.0.1:9000".parse().unwrap(), 7);
        reg.snapshot()
    }

    #[test]
    fn test_format_servers_pretty() {
        let snap = snapshot_with_backend();
        let log = AssignmentLog::new(10);
        let rows = server_rows(&snap, &log);
        let out = format_servers(&rows, ConsoleFormat::Pretty);

        assert!(out.contains("BACKEND"));
        assert!(out.contains("10.0.0.1:9000"));
        assert!(out.contains("7 ms"));
    }

    #[test]
    fn test_format_servers_json() {
        let snap = snapshot_with_backend();
        let log = AssignmentLog::new(10);
        let rows = server_rows(&snap, &log);
        let out = format_servers(&rows, ConsoleFormat::Json);

        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["backend"], "10.0.0.1:9000");
        assert_eq!(parsed[0]["rtt_ms"], 7);
    }

    #[test]
    fn test_format_servers_empty() {
        let out = format_servers(&[], ConsoleFormat::Pretty);
        assert_eq!(out, "no backends registered");
    }

    #[test]
    fn test_format_live_before_first_report() {
        let snap = snapshot_with_backend();
        let out = format_live(&snap, ConsoleFormat::Pretty);
        assert!(out.contains("no report yet"));
    }

    #[test]
    fn test_format_assignments_pretty() {
        let rec = AssignmentRecord::new(
            "alice".to_string(),
            Mode::Dynamic,
            "10.0.0.1:9000".parse().unwrap(),
            "127.0.0.1:55555".parse().unwrap(),
        );
        let out = format_assignments(&[rec], ConsoleFormat::Pretty);
        assert!(out.contains("alice"));
        assert!(out.contains("dynamic"));
        assert!(out.contains("-> 10.0.0.1:9000"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("a-very-long-client-name", 10), "a-very-...");
    }
}
