use serde::{Deserialize, Serialize};

use super::arc::{ArcAccumulator, ArcKey};
use super::datagram::Datagram;

/// Batch id returned when no work is available.
pub const NO_BATCH_ID: i64 = -1;

/// A group of datagrams handed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: i64,
    pub datagrams: Vec<Datagram>,
}

impl Batch {
    pub fn new(batch_id: i64, datagrams: Vec<Datagram>) -> Self {
        Self {
            batch_id,
            datagrams,
        }
    }

    /// The "no work right now" sentinel.
    pub fn empty() -> Self {
        Self::new(NO_BATCH_ID, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.batch_id < 0 || self.datagrams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datagrams.len()
    }
}

/// One arc's contribution inside a [`PartialResult`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcResult {
    pub arc_key: ArcKey,
    pub sum_speeds: f64,
    pub count: u64,
}

impl ArcResult {
    pub fn accumulator(&self) -> ArcAccumulator {
        ArcAccumulator::new(self.sum_speeds, self.count)
    }
}

/// Per-arc sums produced by one worker for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub batch_id: i64,
    pub worker_id: String,
    pub arcs: Vec<ArcResult>,
}

impl PartialResult {
    pub fn from_accumulators(
        batch_id: i64,
        worker_id: impl Into<String>,
        accumulators: impl IntoIterator<Item = (ArcKey, ArcAccumulator)>,
    ) -> Self {
        let mut arcs: Vec<ArcResult> = accumulators
            .into_iter()
            .map(|(arc_key, acc)| ArcResult {
                arc_key,
                sum_speeds: acc.sum_speeds_kmh,
                count: acc.observation_count,
            })
            .collect();
        arcs.sort_by_key(|a| a.arc_key);

        Self {
            batch_id,
            worker_id: worker_id.into(),
            arcs,
        }
    }
}
