//! Process-wide per-arc speed aggregate.
//!
//! Partial results from any number of workers are merged concurrently. Each
//! arc lives in its own `DashMap` entry, so a merge locks only the shard that
//! holds the key and sum/count always move together.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use tracing::{info, warn};

use crate::model::{ArcAccumulator, ArcKey, PartialResult};

/// What [`Aggregator::merge`] did with a partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied { arcs: usize },
    /// The batch id was already merged and duplicates are rejected.
    Duplicate,
}

pub struct Aggregator {
    arcs: DashMap<ArcKey, ArcAccumulator>,
    merged_batches: DashSet<i64>,
    reject_duplicates: bool,
    batches_merged: AtomicU64,
    results_received: AtomicU64,
    duplicates_rejected: AtomicU64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Aggregator {
    /// With `reject_duplicates` off, re-submitting a batch counts it twice.
    pub fn new(reject_duplicates: bool) -> Self {
        Self {
            arcs: DashMap::with_capacity(1024),
            merged_batches: DashSet::new(),
            reject_duplicates,
            batches_merged: AtomicU64::new(0),
            results_received: AtomicU64::new(0),
            duplicates_rejected: AtomicU64::new(0),
        }
    }

    /// Adds every arc of `result` into the running sums.
    pub fn merge(&self, result: &PartialResult) -> MergeOutcome {
        if self.reject_duplicates
            && result.batch_id >= 0
            && !self.merged_batches.insert(result.batch_id)
        {
            self.duplicates_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                batch_id = result.batch_id,
                worker_id = %result.worker_id,
                "Duplicate partial result ignored"
            );
            return MergeOutcome::Duplicate;
        }

        for arc in &result.arcs {
            *self.arcs.entry(arc.arc_key).or_default() += arc.accumulator();
        }

        self.results_received
            .fetch_add(result.arcs.len() as u64, Ordering::Relaxed);
        let merged = self.batches_merged.fetch_add(1, Ordering::Relaxed) + 1;
        if merged % 10 == 0 {
            info!(
                batches = merged,
                arcs = self.arcs.len(),
                results = self.results_received.load(Ordering::Relaxed),
                "Aggregator progress"
            );
        }

        MergeOutcome::Applied {
            arcs: result.arcs.len(),
        }
    }

    /// Consistent copy of one arc's sum and count.
    pub fn accumulator(&self, key: &ArcKey) -> Option<ArcAccumulator> {
        self.arcs.get(key).map(|entry| *entry.value())
    }

    /// Average speed in km/h, `None` when the arc has no observations.
    pub fn average_speed(&self, key: &ArcKey) -> Option<f64> {
        self.accumulator(key).and_then(|acc| acc.average())
    }

    pub fn sum(&self, key: &ArcKey) -> f64 {
        self.accumulator(key).unwrap_or_default().sum_speeds_kmh
    }

    pub fn count(&self, key: &ArcKey) -> u64 {
        self.accumulator(key).unwrap_or_default().observation_count
    }

    pub fn arc_keys(&self) -> Vec<ArcKey> {
        self.arcs.iter().map(|entry| *entry.key()).collect()
    }

    /// Per-key consistent copy of all arcs. Not a point-in-time view across keys.
    pub fn snapshot(&self) -> Vec<(ArcKey, ArcAccumulator)> {
        self.arcs
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    pub fn batches_merged(&self) -> u64 {
        self.batches_merged.load(Ordering::Relaxed)
    }

    pub fn results_received(&self) -> u64 {
        self.results_received.load(Ordering::Relaxed)
    }

    pub fn duplicates_rejected(&self) -> u64 {
        self.duplicates_rejected.load(Ordering::Relaxed)
    }

    /// Administrative wipe of all state. Not reachable over RPC.
    pub fn reset(&self) {
        self.arcs.clear();
        self.merged_batches.clear();
        self.batches_merged.store(0, Ordering::Relaxed);
        self.results_received.store(0, Ordering::Relaxed);
        self.duplicates_rejected.store(0, Ordering::Relaxed);
        info!("Aggregator reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArcResult, NO_BATCH_ID};

    fn result(batch_id: i64, arcs: &[(ArcKey, f64, u64)]) -> PartialResult {
        PartialResult {
            batch_id,
            worker_id: "test-worker".to_string(),
            arcs: arcs
                .iter()
                .map(|&(arc_key, sum_speeds, count)| ArcResult {
                    arc_key,
                    sum_speeds,
                    count,
                })
                .collect(),
        }
    }

    fn sorted_snapshot(agg: &Aggregator) -> Vec<(ArcKey, ArcAccumulator)> {
        let mut snap = agg.snapshot();
        snap.sort_by_key(|(k, _)| *k);
        snap
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let a = ArcKey::new(1, 10, 20);
        let b = ArcKey::new(1, 20, 30);
        let c = ArcKey::new(2, 5, 6);
        let p1 = result(1, &[(a, 30.5, 1), (b, 40.0, 2)]);
        let p2 = result(2, &[(a, 12.25, 3), (c, 18.0, 1)]);

        let forward = Aggregator::new(true);
        forward.merge(&p1);
        forward.merge(&p2);

        let backward = Aggregator::new(true);
        backward.merge(&p2);
        backward.merge(&p1);

        assert_eq!(sorted_snapshot(&forward), sorted_snapshot(&backward));
        assert_eq!(forward.count(&a), 4);
        assert_eq!(forward.sum(&a), 42.75);
    }

    #[test]
    fn test_repeated_observation_average_is_exact() {
        let key = ArcKey::new(3, 1, 2);
        let agg = Aggregator::new(false);
        for i in 0..500 {
            agg.merge(&result(i, &[(key, 10.0, 1)]));
        }
        assert_eq!(agg.average_speed(&key), Some(10.0));
        assert_eq!(agg.count(&key), 500);
    }

    #[test]
    fn test_unknown_arc_has_no_data() {
        let agg = Aggregator::default();
        let key = ArcKey::new(9, 9, 9);
        assert_eq!(agg.average_speed(&key), None);
        assert_eq!(agg.count(&key), 0);
        assert_eq!(agg.sum(&key), 0.0);
    }

    #[test]
    fn test_duplicate_batch_rejected() {
        let key = ArcKey::new(1, 1, 2);
        let agg = Aggregator::new(true);
        let p = result(5, &[(key, 20.0, 1)]);

        assert_eq!(agg.merge(&p), MergeOutcome::Applied { arcs: 1 });
        assert_eq!(agg.merge(&p), MergeOutcome::Duplicate);
        assert_eq!(agg.count(&key), 1);
        assert_eq!(agg.duplicates_rejected(), 1);
        assert_eq!(agg.batches_merged(), 1);
    }

    #[test]
    fn test_duplicates_double_count_when_allowed() {
        let key = ArcKey::new(1, 1, 2);
        let agg = Aggregator::new(false);
        let p = result(5, &[(key, 20.0, 1)]);
        agg.merge(&p);
        agg.merge(&p);
        assert_eq!(agg.count(&key), 2);
        assert_eq!(agg.average_speed(&key), Some(20.0));
    }

    #[test]
    fn test_sentinel_batch_ids_are_never_deduplicated() {
        let key = ArcKey::new(1, 1, 2);
        let agg = Aggregator::new(true);
        let p = result(NO_BATCH_ID, &[(key, 20.0, 1)]);

        assert_eq!(agg.merge(&p), MergeOutcome::Applied { arcs: 1 });
        assert_eq!(agg.merge(&p), MergeOutcome::Applied { arcs: 1 });
        assert_eq!(agg.count(&key), 2);
        assert_eq!(agg.sum(&key), 40.0);
        assert_eq!(agg.duplicates_rejected(), 0);
    }

    #[test]
    fn test_arc_keys_lists_every_merged_arc() {
        let agg = Aggregator::default();
        assert!(agg.arc_keys().is_empty());

        let a = ArcKey::new(1, 1, 2);
        let b = ArcKey::new(4, 2, 3);
        agg.merge(&result(1, &[(a, 10.0, 1), (b, 20.0, 1)]));
        agg.merge(&result(2, &[(a, 15.0, 1)]));

        let mut keys = agg.arc_keys();
        keys.sort();
        assert_eq!(keys, vec![a, b]);
        assert_eq!(agg.arc_count(), 2);
    }

    #[test]
    fn test_concurrent_merges_lose_nothing() {
        let agg = Aggregator::new(true);
        let keys = [ArcKey::new(1, 1, 2), ArcKey::new(1, 2, 3), ArcKey::new(2, 7, 8)];

        std::thread::scope(|scope| {
            for worker in 0..8i64 {
                let agg = &agg;
                scope.spawn(move || {
                    for i in 0..250i64 {
                        let batch_id = worker * 1000 + i;
                        agg.merge(&result(
                            batch_id,
                            &[(keys[0], 10.0, 1), (keys[1], 20.0, 2), (keys[2], 30.0, 1)],
                        ));
                    }
                });
            }
        });

        assert_eq!(agg.batches_merged(), 2000);
        assert_eq!(agg.count(&keys[0]), 2000);
        assert_eq!(agg.sum(&keys[0]), 20_000.0);
        assert_eq!(agg.count(&keys[1]), 4000);
        assert_eq!(agg.average_speed(&keys[1]), Some(10.0));
        assert_eq!(agg.average_speed(&keys[2]), Some(30.0));
    }

    #[test]
    fn test_reset_clears_everything() {
        let agg = Aggregator::new(true);
        let p = result(1, &[(ArcKey::new(1, 2, 3), 5.0, 1)]);
        agg.merge(&p);
        agg.reset();
        assert_eq!(agg.arc_count(), 0);
        assert_eq!(agg.batches_merged(), 0);
        assert_eq!(agg.merge(&p), MergeOutcome::Applied { arcs: 1 });
    }
}
