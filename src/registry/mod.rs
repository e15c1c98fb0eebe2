//! Authoritative in-memory backend state
//!
//! One coarse lock guards the backend entries, the derived weighted
//! schedule, the ban sets, and the policy knobs: any mutation and the
//! schedule rebuild it triggers are atomic with respect to every snapshot,
//! so readers never see a schedule that disagrees with the entries it was
//! built from. Critical sections are short and never span I/O.

mod entry;

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicUsize;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::watch;

use crate::scheduler::{build_schedule, Mode};

pub use entry::{LiveClient, RegistryEntry};

/// Floor for the probe period; `set ping` clamps to this.
pub const MIN_PING_INTERVAL_MS: u64 = 200;

/// Operator-tunable global policy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Policy {
    pub default_mode: Mode,
    /// `None` means unlimited.
    pub max_per_backend: Option<u64>,
    pub ping_interval_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            default_mode: Mode::Static,
            max_per_backend: None,
            ping_interval_ms: 1000,
        }
    }
}

/// Consistent point-in-time view handed to the scheduler and the console.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Entries in registration order.
    pub entries: Vec<RegistryEntry>,
    /// Weighted schedule agreeing with `entries`.
    pub schedule: Vec<SocketAddr>,
    pub policy: Policy,
}

impl RegistrySnapshot {
    pub fn entry(&self, backend: SocketAddr) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.backend == backend)
    }
}

struct Inner {
    entries: Vec<RegistryEntry>,
    schedule: Vec<SocketAddr>,
    banned_ips: HashSet<IpAddr>,
    banned_names: HashSet<String>,
    policy: Policy,
}

/// The balancer's backend registry.
pub struct Registry {
    inner: RwLock<Inner>,
    /// Rotating round-robin cursor; modulo is applied at read time.
    cursor: AtomicUsize,
    /// Publishes probe-period changes to the probe loop.
    ping_tx: watch::Sender<u64>,
}

impl Registry {
    pub fn new(policy: Policy) -> Self {
        let policy = Policy {
            ping_interval_ms: policy.ping_interval_ms.max(MIN_PING_INTERVAL_MS),
            ..policy
        };
        let (ping_tx, _) = watch::channel(policy.ping_interval_ms);
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                schedule: Vec::new(),
                banned_ips: HashSet::new(),
                banned_names: HashSet::new(),
                policy,
            }),
            cursor: AtomicUsize::new(0),
            ping_tx,
        }
    }

    /// Register a backend. Returns `true` if it was new; re-joining an
    /// existing backend preserves its weight, drain flag, RTT, and live list.
    pub fn add_backend(&self, backend: SocketAddr) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.entries.iter().any(|e| e.backend == backend) {
            return false;
        }
        inner.entries.push(RegistryEntry::new(backend));
        let schedule = build_schedule(&inner.entries);
        inner.schedule = schedule;
        true
    }

    /// Drop a backend entirely. Returns `false` for unknown backends.
    pub fn remove(&self, backend: SocketAddr) -> bool {
        let mut inner = self.inner.write().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.backend != backend);
        if inner.entries.len() == before {
            return false;
        }
        let schedule = build_schedule(&inner.entries);
        inner.schedule = schedule;
        true
    }

    /// Set a backend's round-robin weight, clamped to at least 1. Returns the
    /// applied weight, or `None` for unknown backends.
    pub fn set_weight(&self, backend: SocketAddr, weight: u32) -> Option<u32> {
        let weight = weight.max(1);
        let mut inner = self.inner.write().unwrap();
        let entry = inner.entries.iter_mut().find(|e| e.backend == backend)?;
        entry.weight = weight;
        let schedule = build_schedule(&inner.entries);
        inner.schedule = schedule;
        Some(weight)
    }

    pub fn drain(&self, backend: SocketAddr) -> bool {
        self.set_drained(backend, true)
    }

    pub fn undrain(&self, backend: SocketAddr) -> bool {
        self.set_drained(backend, false)
    }

    fn set_drained(&self, backend: SocketAddr, drained: bool) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.entries.iter_mut().find(|e| e.backend == backend) {
            Some(entry) => {
                entry.drained = drained;
                true
            }
            None => false,
        }
    }

    pub fn drain_all(&self) {
        self.set_drained_all(true)
    }

    pub fn undrain_all(&self) {
        self.set_drained_all(false)
    }

    fn set_drained_all(&self, drained: bool) {
        let mut inner = self.inner.write().unwrap();
        for entry in &mut inner.entries {
            entry.drained = drained;
        }
    }

    /// Replace a backend's live-client list wholesale. Reports for backends
    /// that never joined are rejected: only `!join` creates entries.
    pub fn set_report(&self, backend: SocketAddr, clients: Vec<LiveClient>) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.entries.iter_mut().find(|e| e.backend == backend) {
            Some(entry) => {
                entry.live_clients = Some(clients);
                true
            }
            None => false,
        }
    }

    /// Record a probe round-trip time. Failed probes never call this, so a
    /// backend keeps its previous RTT across probe failures.
    pub fn set_rtt(&self, backend: SocketAddr, rtt_ms: u64) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.entries.iter_mut().find(|e| e.backend == backend) {
            Some(entry) => {
                entry.rtt_ms = Some(rtt_ms);
                true
            }
            None => false,
        }
    }

    pub fn ban_ip(&self, ip: IpAddr) -> bool {
        self.inner.write().unwrap().banned_ips.insert(ip)
    }

    pub fn unban_ip(&self, ip: IpAddr) -> bool {
        self.inner.write().unwrap().banned_ips.remove(&ip)
    }

    pub fn ban_name(&self, name: &str) -> bool {
        self.inner.write().unwrap().banned_names.insert(name.to_string())
    }

    pub fn unban_name(&self, name: &str) -> bool {
        self.inner.write().unwrap().banned_names.remove(name)
    }

    /// True when either the source IP or the client name is banned.
    pub fn is_banned(&self, ip: IpAddr, name: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.banned_ips.contains(&ip) || inner.banned_names.contains(name)
    }

    /// Both ban sets, sorted for display.
    pub fn bans(&self) -> (Vec<IpAddr>, Vec<String>) {
        let inner = self.inner.read().unwrap();
        let mut ips: Vec<IpAddr> = inner.banned_ips.iter().copied().collect();
        ips.sort();
        let mut names: Vec<String> = inner.banned_names.iter().cloned().collect();
        names.sort();
        (ips, names)
    }

    pub fn default_mode(&self) -> Mode {
        self.inner.read().unwrap().policy.default_mode
    }

    pub fn set_default_mode(&self, mode: Mode) {
        self.inner.write().unwrap().policy.default_mode = mode;
    }

    pub fn set_max_per_backend(&self, max: Option<u64>) {
        self.inner.write().unwrap().policy.max_per_backend = max;
    }

    /// Change the probe period, clamped to [`MIN_PING_INTERVAL_MS`], and
    /// notify the probe loop. Returns the applied value.
    pub fn set_ping_interval(&self, ms: u64) -> u64 {
        let ms = ms.max(MIN_PING_INTERVAL_MS);
        self.inner.write().unwrap().policy.ping_interval_ms = ms;
        let _ = self.ping_tx.send(ms);
        ms
    }

    pub fn ping_interval_ms(&self) -> u64 {
        self.inner.read().unwrap().policy.ping_interval_ms
    }

    /// Subscribe to probe-period changes.
    pub fn ping_receiver(&self) -> watch::Receiver<u64> {
        self.ping_tx.subscribe()
    }

    pub fn policy(&self) -> Policy {
        self.inner.read().unwrap().policy
    }

    /// Shared round-robin cursor.
    pub fn cursor(&self) -> &AtomicUsize {
        &self.cursor
    }

    /// Backend addresses in registration order (probe fan-out input).
    pub fn backends(&self) -> Vec<SocketAddr> {
        self.inner
            .read()
            .unwrap()
            .entries
            .iter()
            .map(|e| e.backend)
            .collect()
    }

    /// Consistent copy of entries, schedule, and policy.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().unwrap();
        RegistrySnapshot {
            entries: inner.entries.clone(),
            schedule: inner.schedule.clone(),
            policy: inner.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn addr(last_octet: u8, port: u16) -> SocketAddr {
        format!("10.0.0.{}:{}", last_octet, port).parse().unwrap()
    }

    fn registry() -> Registry {
        Registry::new(Policy::default())
    }

    fn client(name: &str) -> LiveClient {
        LiveClient {
            name: name.to_string(),
            ip: "1.2.3.4".to_string(),
            reported_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_backend_once() {
        let reg = registry();
        assert!(reg.add_backend(addr(1, 9000)));
        assert!(!reg.add_backend(addr(1, 9000)));
        assert_eq!(reg.backends(), vec![addr(1, 9000)]);
    }

    #[test]
    fn test_identity_is_address_and_port() {
        let reg = registry();
        assert!(reg.add_backend(addr(1, 9000)));
        assert!(reg.add_backend(addr(1, 9001)));
        assert!(reg.add_backend(addr(2, 9000)));
        assert_eq!(reg.backends().len(), 3);
    }

    #[test]
    fn test_rejoin_preserves_state() {
        let reg = registry();
        let a = addr(1, 9000);
        reg.add_backend(a);
        reg.set_weight(a, 5);
        reg.drain(a);
        reg.set_rtt(a, 42);
        reg.set_report(a, vec![client("alice")]);

        assert!(!reg.add_backend(a));

        let snap = reg.snapshot();
        let entry = snap.entry(a).unwrap();
        assert_eq!(entry.weight, 5);
        assert!(entry.drained);
        assert_eq!(entry.rtt_ms, Some(42));
        assert_eq!(entry.live_count(), 1);
    }

    #[test]
    fn test_schedule_tracks_weights() {
        let reg = registry();
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        reg.add_backend(a);
        reg.add_backend(b);
        reg.set_weight(a, 3);

        let snap = reg.snapshot();
        assert_eq!(snap.schedule.iter().filter(|&&x| x == a).count(), 3);
        assert_eq!(snap.schedule.iter().filter(|&&x| x == b).count(), 1);

        reg.remove(a);
        let snap = reg.snapshot();
        assert!(!snap.schedule.contains(&a));
        assert_eq!(snap.schedule, vec![b]);
    }

    #[test]
    fn test_set_weight_clamps_to_one() {
        let reg = registry();
        let a = addr(1, 9000);
        reg.add_backend(a);
        assert_eq!(reg.set_weight(a, 0), Some(1));
        assert_eq!(reg.snapshot().entry(a).unwrap().weight, 1);
    }

    #[test]
    fn test_set_weight_unknown_backend() {
        let reg = registry();
        assert_eq!(reg.set_weight(addr(1, 9000), 2), None);
    }

    #[test]
    fn test_drain_undrain_round_trip() {
        let reg = registry();
        let a = addr(1, 9000);
        reg.add_backend(a);

        assert!(reg.drain(a));
        assert!(reg.snapshot().entry(a).unwrap().drained);
        assert!(reg.undrain(a));
        assert!(!reg.snapshot().entry(a).unwrap().drained);
    }

    #[test]
    fn test_drain_all() {
        let reg = registry();
        reg.add_backend(addr(1, 9000));
        reg.add_backend(addr(2, 9000));
        reg.drain_all();
        assert!(reg.snapshot().entries.iter().all(|e| e.drained));
        reg.undrain_all();
        assert!(reg.snapshot().entries.iter().all(|e| !e.drained));
    }

    #[test]
    fn test_report_replaces_wholesale() {
        let reg = registry();
        let a = addr(1, 9000);
        reg.add_backend(a);

        reg.set_report(a, vec![client("alice"), client("bob")]);
        assert_eq!(reg.snapshot().entry(a).unwrap().live_count(), 2);

        reg.set_report(a, vec![client("carol")]);
        let snap = reg.snapshot();
        let live = snap.entry(a).unwrap().live_clients.as_ref().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "carol");
    }

    #[test]
    fn test_report_for_unknown_backend_rejected() {
        let reg = registry();
        assert!(!reg.set_report(addr(1, 9000), vec![client("ghost")]));
        assert!(reg.backends().is_empty());
    }

    #[test]
    fn test_rtt_for_unknown_backend_rejected() {
        let reg = registry();
        assert!(!reg.set_rtt(addr(1, 9000), 10));
    }

    #[test]
    fn test_bans() {
        let reg = registry();
        let ip: IpAddr = "192.168.0.9".parse().unwrap();

        assert!(reg.ban_ip(ip));
        assert!(!reg.ban_ip(ip));
        assert!(reg.ban_name("Eve"));

        assert!(reg.is_banned(ip, "anyone"));
        assert!(reg.is_banned("127.0.0.1".parse().unwrap(), "Eve"));
        assert!(!reg.is_banned("127.0.0.1".parse().unwrap(), "alice"));

        assert!(reg.unban_ip(ip));
        assert!(reg.unban_name("Eve"));
        assert!(!reg.is_banned(ip, "Eve"));
    }

    #[test]
    fn test_ping_interval_clamped_and_published() {
        let reg = registry();
        let rx = reg.ping_receiver();

        assert_eq!(reg.set_ping_interval(50), MIN_PING_INTERVAL_MS);
        assert_eq!(reg.ping_interval_ms(), MIN_PING_INTERVAL_MS);
        assert_eq!(*rx.borrow(), MIN_PING_INTERVAL_MS);

        assert_eq!(reg.set_ping_interval(2500), 2500);
        assert_eq!(*rx.borrow(), 2500);
    }

    #[test]
    fn test_policy_defaults() {
        let reg = registry();
        let policy = reg.policy();
        assert_eq!(policy.default_mode, Mode::Static);
        assert_eq!(policy.max_per_backend, None);
        assert_eq!(policy.ping_interval_ms, 1000);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let reg = registry();
        let a = addr(1, 9000);
        reg.add_backend(a);
        let snap = reg.snapshot();
        reg.remove(a);

        // The old snapshot still holds the backend; the registry does not.
        assert!(snap.entry(a).is_some());
        assert!(reg.snapshot().entry(a).is_none());
    }
}
