//! Per-batch arc speed computation fanned out over a fixed number of tasks.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::error;

use super::speed::plausible_speed;
use crate::model::{ArcAccumulator, ArcKey, Batch, Datagram, PartialResult, TripKey};

pub type ArcMap = HashMap<ArcKey, ArcAccumulator>;

pub struct BatchProcessor {
    num_threads: usize,
}

impl BatchProcessor {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Splits the batch into contiguous chunks, computes each on the blocking
    /// pool, then merges the chunk maps on the calling task.
    ///
    /// Consecutive samples that land in different chunks are never paired.
    pub async fn process(&self, batch: Batch, worker_id: &str) -> PartialResult {
        let batch_id = batch.batch_id;
        let datagrams: Arc<[Datagram]> = batch.datagrams.into();

        let mut tasks = Vec::with_capacity(self.num_threads);
        for range in partition(datagrams.len(), self.num_threads) {
            let datagrams = datagrams.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                process_chunk(&datagrams[range])
            }));
        }

        let mut merged = ArcMap::new();
        for task in tasks {
            match task.await {
                Ok(chunk) => merge_into(&mut merged, chunk),
                Err(e) => error!(batch_id, error = %e, "Chunk task failed"),
            }
        }

        PartialResult::from_accumulators(batch_id, worker_id, merged)
    }
}

/// `parts` contiguous near-equal ranges over `0..len`; the last absorbs the
/// remainder. Fewer ranges when there are fewer items than parts.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, len);
    let chunk = len / parts;

    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == parts { len } else { start + chunk };
            start..end
        })
        .collect()
}

/// Speed observations for one chunk, keyed by arc.
///
/// Datagrams are grouped per trip, ordered by sample time, and every
/// consecutive pair at different stops yields at most one observation.
pub fn process_chunk(datagrams: &[Datagram]) -> ArcMap {
    let mut trips: HashMap<TripKey, Vec<&Datagram>> = HashMap::new();
    for d in datagrams.iter().filter(|d| d.has_route_identity()) {
        trips.entry(d.trip_key()).or_default().push(d);
    }

    let mut arcs = ArcMap::new();
    for samples in trips.values_mut() {
        if samples.len() < 2 {
            continue;
        }
        samples.sort_by_key(|d| d.sample_time);

        for pair in samples.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if prev.stop_id == curr.stop_id {
                continue;
            }
            if let Some(speed) = plausible_speed(prev, curr) {
                let key = ArcKey::new(curr.line_id, prev.stop_id, curr.stop_id);
                *arcs.entry(key).or_default() += ArcAccumulator::observation(speed);
            }
        }
    }
    arcs
}

pub fn merge_into(target: &mut ArcMap, source: ArcMap) {
    for (key, acc) in source {
        *target.entry(key).or_default() += acc;
    }
}
