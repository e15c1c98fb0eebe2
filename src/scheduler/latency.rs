//! Latency-based selection
//!
//! Picks the candidate with the smallest probe RTT. Backends the probe loop
//! has not reached yet have no RTT and are invisible to this pass; when no
//! candidate has a known RTT the selection falls through to weighted
//! round-robin over the same candidate set.

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;

use crate::registry::RegistrySnapshot;

use super::{is_candidate, weighted};

pub(super) fn select_dynamic(
    snapshot: &RegistrySnapshot,
    cursor: &AtomicUsize,
) -> Option<SocketAddr> {
    let max = snapshot.policy.max_per_backend;

    let best = snapshot
        .entries
        .iter()
        .filter(|e| is_candidate(e, max))
        .filter_map(|e| e.rtt_ms.map(|rtt| (rtt, e.backend)))
        // min_by_key keeps the first of equal minima: ties break to snapshot
        // order deterministically.
        .min_by_key(|(rtt, _)| *rtt);

    match best {
        Some((_, backend)) => Some(backend),
        None => weighted::select_static(snapshot, cursor),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{addr, entry, snapshot_of};
    use super::super::{select, Mode};
    use super::*;
    use crate::registry::Policy;

    #[test]
    fn test_picks_lowest_rtt() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.rtt_ms = Some(50);
        let mut eb = entry(b);
        eb.rtt_ms = Some(5);
        let snap = snapshot_of(vec![ea, eb], Policy::default());
        let cursor = AtomicUsize::new(0);

        assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(b));
    }

    #[test]
    fn test_tie_breaks_to_snapshot_order() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.rtt_ms = Some(7);
        let mut eb = entry(b);
        eb.rtt_ms = Some(7);
        let snap = snapshot_of(vec![ea, eb], Policy::default());
        let cursor = AtomicUsize::new(0);

        for _ in 0..3 {
            assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(a));
        }
    }

    #[test]
    fn test_ignores_drained_even_if_fastest() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut ea = entry(a);
        ea.rtt_ms = Some(1);
        ea.drained = true;
        let mut eb = entry(b);
        eb.rtt_ms = Some(100);
        let snap = snapshot_of(vec![ea, eb], Policy::default());
        let cursor = AtomicUsize::new(0);

        assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(b));
    }

    #[test]
    fn test_unknown_rtts_fall_back_to_static() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let snap = snapshot_of(vec![entry(a), entry(b)], Policy::default());
        let cursor = AtomicUsize::new(0);

        // No RTT anywhere: behaves exactly like round-robin.
        assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(a));
        assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(b));
    }

    #[test]
    fn test_partial_rtt_knowledge_prefers_known() {
        let a = addr(1, 9000);
        let b = addr(2, 9000);
        let mut eb = entry(b);
        eb.rtt_ms = Some(500);
        let snap = snapshot_of(vec![entry(a), eb], Policy::default());
        let cursor = AtomicUsize::new(0);

        // Slow but measured beats unmeasured.
        assert_eq!(select(&snap, Mode::Dynamic, &cursor), Some(b));
    }
}
