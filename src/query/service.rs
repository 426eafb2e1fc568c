//! Read-only rankings and statistics over the aggregate.
//!
//! Every call works on a fresh per-key snapshot of the [`Aggregator`], so
//! answers are eventually consistent with merges running alongside.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use super::types::{ArcInfo, GlobalStatistics, LineInfo};
use crate::aggregator::Aggregator;
use crate::model::{ArcAccumulator, ArcKey};

#[derive(Clone)]
pub struct QueryService {
    aggregator: Arc<Aggregator>,
}

impl QueryService {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    /// Never fails: unknown or malformed keys come back with zero speed and count.
    pub fn arc_info(&self, arc_key: &str) -> ArcInfo {
        match arc_key.parse::<ArcKey>() {
            Ok(key) => ArcInfo::new(key, self.aggregator.accumulator(&key).unwrap_or_default()),
            Err(e) => {
                debug!(arc_key, error = %e, "Arc lookup with invalid key");
                ArcInfo::unknown(arc_key)
            }
        }
    }

    /// Arcs of one line, fastest first.
    pub fn arcs_for_line(&self, line_id: i64) -> Vec<ArcInfo> {
        let mut arcs: Vec<ArcInfo> = self
            .aggregator
            .snapshot()
            .into_iter()
            .filter(|(key, _)| key.line_id == line_id)
            .map(|(key, acc)| ArcInfo::new(key, acc))
            .collect();
        arcs.sort_by(|a, b| {
            b.avg_speed
                .total_cmp(&a.avg_speed)
                .then_with(|| a.arc_key.cmp(&b.arc_key))
        });
        arcs
    }

    /// Observation-weighted average over the line's arcs.
    pub fn line_average_speed(&self, line_id: i64) -> Option<f64> {
        self.aggregator
            .snapshot()
            .into_iter()
            .filter(|(key, _)| key.line_id == line_id)
            .map(|(_, acc)| acc)
            .fold(ArcAccumulator::default(), |total, acc| total + acc)
            .average()
    }

    /// One entry per line seen in any arc key, ordered by line id.
    pub fn all_lines(&self) -> Vec<LineInfo> {
        let mut lines: BTreeMap<i64, (usize, ArcAccumulator)> = BTreeMap::new();
        for (key, acc) in self.aggregator.snapshot() {
            let entry = lines.entry(key.line_id).or_default();
            entry.0 += 1;
            entry.1 += acc;
        }

        lines
            .into_iter()
            .map(|(line_id, (arc_count, total))| LineInfo {
                line_id,
                name: format!("Line {line_id}"),
                arc_count,
                avg_speed: total.average(),
            })
            .collect()
    }

    /// Arcs with data, slowest first. `limit <= 0` returns all of them.
    pub fn slowest_arcs(&self, limit: i64) -> Vec<ArcInfo> {
        self.ranked(limit, false)
    }

    /// Arcs with data, fastest first. `limit <= 0` returns all of them.
    pub fn fastest_arcs(&self, limit: i64) -> Vec<ArcInfo> {
        self.ranked(limit, true)
    }

    pub fn global_statistics(&self) -> GlobalStatistics {
        let snapshot = self.aggregator.snapshot();
        let line_count = snapshot
            .iter()
            .map(|(key, _)| key.line_id)
            .collect::<BTreeSet<_>>()
            .len();
        let total = snapshot
            .iter()
            .fold(ArcAccumulator::default(), |total, (_, acc)| total + *acc);

        GlobalStatistics {
            line_count,
            arc_count: snapshot.len(),
            total_observations: total.observation_count,
            global_avg_speed: total.average(),
            batches_merged: self.aggregator.batches_merged(),
        }
    }

    fn ranked(&self, limit: i64, fastest_first: bool) -> Vec<ArcInfo> {
        let mut arcs: Vec<ArcInfo> = self
            .aggregator
            .snapshot()
            .into_iter()
            .filter(|(_, acc)| acc.observation_count > 0)
            .map(|(key, acc)| ArcInfo::new(key, acc))
            .collect();

        arcs.sort_by(|a, b| {
            let order = a.avg_speed.total_cmp(&b.avg_speed);
            let order = if fastest_first { order.reverse() } else { order };
            order.then_with(|| a.arc_key.cmp(&b.arc_key))
        });

        if limit > 0 {
            arcs.truncate(limit as usize);
        }
        arcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArcResult, PartialResult};

    fn service(arcs: &[(ArcKey, f64, u64)]) -> QueryService {
        let aggregator = Arc::new(Aggregator::new(true));
        aggregator.merge(&PartialResult {
            batch_id: 1,
            worker_id: "w".to_string(),
            arcs: arcs
                .iter()
                .map(|&(arc_key, sum_speeds, count)| ArcResult {
                    arc_key,
                    sum_speeds,
                    count,
                })
                .collect(),
        });
        QueryService::new(aggregator)
    }

    #[test]
    fn test_slowest_arc_is_returned_first() {
        let a = ArcKey::new(1, 10, 20);
        let b = ArcKey::new(1, 20, 30);
        let query = service(&[(a, 10.0, 1), (b, 50.0, 1)]);

        let slowest = query.slowest_arcs(1);
        assert_eq!(slowest.len(), 1);
        assert_eq!(slowest[0].arc_key, "1-10-20");
        assert_eq!(slowest[0].avg_speed, 10.0);

        let fastest = query.fastest_arcs(1);
        assert_eq!(fastest[0].arc_key, "1-20-30");
    }

    #[test]
    fn test_non_positive_limit_returns_all() {
        let query = service(&[
            (ArcKey::new(1, 1, 2), 10.0, 1),
            (ArcKey::new(1, 2, 3), 20.0, 1),
            (ArcKey::new(2, 1, 2), 30.0, 1),
        ]);
        assert_eq!(query.slowest_arcs(0).len(), 3);
        assert_eq!(query.fastest_arcs(-5).len(), 3);
    }

    #[test]
    fn test_zero_count_arcs_are_not_ranked() {
        let query = service(&[(ArcKey::new(1, 1, 2), 0.0, 0), (ArcKey::new(1, 2, 3), 20.0, 1)]);
        let ranked = query.slowest_arcs(0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].arc_key, "1-2-3");
    }

    #[test]
    fn test_arc_info_for_unknown_and_invalid_keys() {
        let query = service(&[(ArcKey::new(241, 100, 200), 30.0, 1)]);

        let known = query.arc_info("241-100-200");
        assert_eq!(known.line_id, 241);
        assert_eq!(known.origin, 100);
        assert_eq!(known.destination, 200);
        assert_eq!(known.avg_speed, 30.0);
        assert_eq!(known.observation_count, 1);

        let missing = query.arc_info("241-200-300");
        assert_eq!(missing.destination, 300);
        assert_eq!(missing.avg_speed, 0.0);
        assert_eq!(missing.observation_count, 0);

        let invalid = query.arc_info("not-a-key");
        assert_eq!(invalid.arc_key, "not-a-key");
        assert_eq!(invalid.observation_count, 0);
    }

    #[test]
    fn test_arcs_for_line_sorted_fastest_first() {
        let query = service(&[
            (ArcKey::new(7, 1, 2), 20.0, 2),
            (ArcKey::new(7, 2, 3), 90.0, 3),
            (ArcKey::new(8, 1, 2), 99.0, 1),
        ]);
        let arcs = query.arcs_for_line(7);
        let keys: Vec<&str> = arcs.iter().map(|a| a.arc_key.as_str()).collect();
        assert_eq!(keys, vec!["7-2-3", "7-1-2"]);
        assert!(query.arcs_for_line(9).is_empty());
    }

    #[test]
    fn test_line_average_is_observation_weighted() {
        // arc averages 10 (x1) and 40 (x3): weighted (10 + 120) / 4
        let query = service(&[(ArcKey::new(5, 1, 2), 10.0, 1), (ArcKey::new(5, 2, 3), 120.0, 3)]);
        assert_eq!(query.line_average_speed(5), Some(32.5));
        assert_eq!(query.line_average_speed(6), None);
    }

    #[test]
    fn test_all_lines_sorted_by_id() {
        let query = service(&[
            (ArcKey::new(30, 1, 2), 10.0, 1),
            (ArcKey::new(4, 1, 2), 20.0, 1),
            (ArcKey::new(4, 2, 3), 40.0, 1),
        ]);
        let lines = query.all_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_id, 4);
        assert_eq!(lines[0].name, "Line 4");
        assert_eq!(lines[0].arc_count, 2);
        assert_eq!(lines[0].avg_speed, Some(30.0));
        assert_eq!(lines[1].line_id, 30);
    }

    #[test]
    fn test_global_statistics() {
        let query = service(&[
            (ArcKey::new(1, 1, 2), 30.0, 1),
            (ArcKey::new(2, 1, 2), 30.0, 2),
        ]);
        let stats = query.global_statistics();
        assert_eq!(stats.line_count, 2);
        assert_eq!(stats.arc_count, 2);
        assert_eq!(stats.total_observations, 3);
        assert_eq!(stats.global_avg_speed, Some(20.0));
        assert_eq!(stats.batches_merged, 1);
    }

    #[test]
    fn test_empty_aggregate() {
        let query = QueryService::new(Arc::new(Aggregator::default()));
        let stats = query.global_statistics();
        assert_eq!(stats.arc_count, 0);
        assert_eq!(stats.global_avg_speed, None);
        assert!(query.all_lines().is_empty());
    }
}
