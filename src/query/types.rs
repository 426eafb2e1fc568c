//! Response types returned by the query service.

use serde::{Deserialize, Serialize};

use crate::model::{ArcAccumulator, ArcKey};

/// Average speed and observation count for one arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcInfo {
    pub arc_key: String,
    pub line_id: i64,
    pub origin: i64,
    pub destination: i64,
    /// km/h; `0.0` when the arc has no observations.
    pub avg_speed: f64,
    pub observation_count: u64,
}

impl ArcInfo {
    pub(crate) fn new(key: ArcKey, acc: ArcAccumulator) -> Self {
        Self {
            arc_key: key.to_string(),
            line_id: key.line_id,
            origin: key.origin,
            destination: key.destination,
            avg_speed: acc.average().unwrap_or(0.0),
            observation_count: acc.observation_count,
        }
    }

    /// Zeroed entry for a key that could not be parsed.
    pub(crate) fn unknown(raw_key: &str) -> Self {
        Self {
            arc_key: raw_key.to_string(),
            line_id: 0,
            origin: 0,
            destination: 0,
            avg_speed: 0.0,
            observation_count: 0,
        }
    }
}

/// Per-line summary across all of its arcs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineInfo {
    pub line_id: i64,
    pub name: String,
    pub arc_count: usize,
    /// Observation-weighted average; `None` when no arc of the line has data.
    pub avg_speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub line_count: usize,
    pub arc_count: usize,
    pub total_observations: u64,
    pub global_avg_speed: Option<f64>,
    pub batches_merged: u64,
}
