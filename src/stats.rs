use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregator::Aggregator;
use crate::dispatch::Dispatcher;
use crate::ingest::IngestReceiver;
use crate::pipeline::{BatchQueue, TailerStats};

/// Point-in-time counters of every server component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub timestamp: DateTime<Utc>,

    // ingestion
    pub datagrams_received: u64,
    pub datagrams_rejected: u64,
    pub records_ingested: u64,
    pub records_malformed: u64,
    pub tail_offset: u64,
    pub batches_enqueued: u64,

    // queue
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub producing: bool,

    // dispatch
    pub workers: usize,
    pub batches_served: u64,
    pub empty_pulls: u64,

    // aggregation
    pub batches_merged: u64,
    pub results_received: u64,
    pub duplicates_rejected: u64,
    pub arcs: usize,
}

impl PipelineStats {
    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn queue_fill_pct(&self) -> f64 {
        Self::pct(self.queue_len, self.queue_capacity)
    }

    pub fn log(&self) {
        info!(
            received = self.datagrams_received,
            ingested = self.records_ingested,
            malformed = self.records_malformed,
            queue = self.queue_len,
            queue_fill = %format!("{:.1}%", self.queue_fill_pct()),
            workers = self.workers,
            served = self.batches_served,
            merged = self.batches_merged,
            arcs = self.arcs,
            "Pipeline stats"
        );
    }
}

/// Handles to the live components, read by [`StatsCollector::collect`].
#[derive(Clone)]
pub struct StatsCollector {
    pub receiver: Arc<IngestReceiver>,
    pub tailer: Arc<TailerStats>,
    pub queue: Arc<BatchQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub aggregator: Arc<Aggregator>,
}

impl StatsCollector {
    pub fn collect(&self) -> PipelineStats {
        let ingest = self.receiver.snapshot();
        let tailer = self.tailer.snapshot();
        let dispatch = self.dispatcher.snapshot();

        PipelineStats {
            timestamp: Utc::now(),
            datagrams_received: ingest.received,
            datagrams_rejected: ingest.rejected,
            records_ingested: tailer.records_ingested,
            records_malformed: tailer.records_malformed,
            tail_offset: tailer.offset,
            batches_enqueued: tailer.batches_enqueued,
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            producing: self.queue.is_producing(),
            workers: dispatch.workers,
            batches_served: dispatch.batches_served,
            empty_pulls: dispatch.empty_pulls,
            batches_merged: self.aggregator.batches_merged(),
            results_received: self.aggregator.results_received(),
            duplicates_rejected: self.aggregator.duplicates_rejected(),
            arcs: self.aggregator.arc_count(),
        }
    }
}
