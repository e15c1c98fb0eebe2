//! Weighted round-robin selection
//!
//! The weighted schedule is a flattened sequence in which each backend
//! appears `weight` times in registration order. The registry rebuilds it
//! under its write lock on every add, remove, or weight change, so a
//! snapshot's schedule always agrees with its entries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::registry::{RegistryEntry, RegistrySnapshot};

use super::{candidates, is_candidate};

/// Flatten registry entries into the weighted schedule.
pub fn build_schedule(entries: &[RegistryEntry]) -> Vec<SocketAddr> {
    entries
        .iter()
        .flat_map(|e| std::iter::repeat(e.backend).take(e.weight as usize))
        .collect()
}

/// Weighted round-robin over the snapshot's schedule.
///
/// The cursor advances unconditionally for every inspected slot. The scan is
/// bounded at `2 * |schedule|` slots; if no slot holds a schedulable backend
/// (weights racing with drains can produce that), the first candidate wins
/// outright.
pub(super) fn select_static(
    snapshot: &RegistrySnapshot,
    cursor: &AtomicUsize,
) -> Option<SocketAddr> {
    let schedule = &snapshot.schedule;
    let max = snapshot.policy.max_per_backend;

    if !schedule.is_empty() {
        for _ in 0..schedule.len() * 2 {
            let slot = cursor.fetch_add(1, Ordering::Relaxed) % schedule.len();
            let backend = schedule[slot];
            let schedulable = snapshot
                .entries
                .iter()
                .find(|e| e.backend == backend)
                .map(|e| is_candidate(e, max))
                .unwrap_or(false);
            if schedulable {
                return Some(backend);
            }
        }
    }

    candidates(snapshot).first().copied()
}

#[cfg(test)]
mod tests {
    use super::super::testing::{addr, entry, snapshot_of};
    use super::super::{select, Mode};
    use super::*;
    use crate::registry::Policy;
    use std::collections::HashMap;

    #[test]
    fn test_build_schedule_repeats_by_weight() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.weight = 3;
        let schedule = build_schedule(&[ea, entry(b)]);
        assert_eq!(schedule, vec![a, a, a, b]);
    }

    #[test]
    fn test_build_schedule_empty() {
        assert!(build_schedule(&[]).is_empty());
    }

    #[test]
    fn test_round_robin_alternates() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let snap = snapshot_of(vec![entry(a), entry(b)], Policy::default());
        let cursor = AtomicUsize::new(0);

        let picks: Vec<_> = (0..4)
            .map(|_| select(&snap, Mode::Static, &cursor).unwrap())
            .collect();
        assert_eq!(picks, vec![a, b, a, b]);
    }

    #[test]
    fn test_round_robin_skips_drained() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.drained = true;
        let snap = snapshot_of(vec![ea, entry(b)], Policy::default());
        let cursor = AtomicUsize::new(0);

        for _ in 0..4 {
            assert_eq!(select(&snap, Mode::Static, &cursor), Some(b));
        }
    }

    #[test]
    fn test_weighted_fairness_window() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.weight = 3;
        let snap = snapshot_of(vec![ea, entry(b)], Policy::default());
        let cursor = AtomicUsize::new(0);

        // Over one full cycle each backend is picked exactly weight times.
        let mut counts: HashMap<SocketAddr, usize> = HashMap::new();
        for _ in 0..snap.schedule.len() {
            let picked = select(&snap, Mode::Static, &cursor).unwrap();
            *counts.entry(picked).or_default() += 1;
        }
        assert_eq!(counts[&a], 3);
        assert_eq!(counts[&b], 1);
    }

    #[test]
    fn test_fallback_to_first_candidate() {
        // Schedule only holds a drained backend; the candidate fallback must
        // still find the schedulable one. (Reachable when the schedule and
        // drain flags race in a torn-free but stale snapshot.)
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.drained = true;
        let eb = entry(b);
        let mut snap = snapshot_of(vec![ea, eb], Policy::default());
        snap.schedule = vec![a];

        let cursor = AtomicUsize::new(0);
        assert_eq!(select(&snap, Mode::Static, &cursor), Some(b));
    }

    #[test]
    fn test_cursor_position_is_shared() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let snap = snapshot_of(vec![entry(a), entry(b)], Policy::default());

        // A cursor that starts mid-schedule keeps rotating from there.
        let cursor = AtomicUsize::new(1);
        assert_eq!(select(&snap, Mode::Static, &cursor), Some(b));
        assert_eq!(select(&snap, Mode::Static, &cursor), Some(a));
    }
}
