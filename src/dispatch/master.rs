use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::DispatchApi;
use super::registry::WorkerRegistry;
use crate::aggregator::{Aggregator, MergeOutcome};
use crate::model::{Batch, PartialResult};
use crate::pipeline::BatchQueue;

/// Hands queued batches to whichever worker asks first and forwards their
/// partial results to the aggregator.
///
/// No lease is kept on a served batch: if a worker dies before submitting,
/// that batch's observations are gone.
pub struct Dispatcher {
    queue: Arc<BatchQueue>,
    aggregator: Arc<Aggregator>,
    registry: WorkerRegistry,
    // Guards dequeue + id assignment so ids follow queue order.
    last_batch_id: Mutex<i64>,
    batches_served: AtomicU64,
    empty_pulls: AtomicU64,
    stopped: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchSnapshot {
    pub workers: usize,
    pub batches_served: u64,
    pub empty_pulls: u64,
    pub last_batch_id: i64,
}

impl Dispatcher {
    pub fn new(queue: Arc<BatchQueue>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            queue,
            aggregator,
            registry: WorkerRegistry::new(),
            last_batch_id: Mutex::new(0),
            batches_served: AtomicU64::new(0),
            empty_pulls: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Never waits: returns the sentinel batch when the queue is empty.
    pub fn pull_batch(&self) -> Batch {
        let mut last_id = self
            .last_batch_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(datagrams) = self.queue.try_dequeue() else {
            self.empty_pulls.fetch_add(1, Ordering::Relaxed);
            return Batch::empty();
        };

        *last_id += 1;
        let batch = Batch::new(*last_id, datagrams);
        drop(last_id);

        let served = self.batches_served.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(batch_id = batch.batch_id, size = batch.len(), "Batch served");
        if served % 5 == 0 {
            info!(
                served,
                size = batch.len(),
                remaining = self.queue.len(),
                "Dispatcher progress"
            );
        }
        batch
    }

    pub fn submit_partial_result(&self, result: &PartialResult) -> MergeOutcome {
        debug!(
            worker_id = %result.worker_id,
            batch_id = result.batch_id,
            arcs = result.arcs.len(),
            "Partial result received"
        );
        self.aggregator.merge(result)
    }

    /// True while ingestion is still producing or batches remain queued.
    pub fn has_more_work(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
            && (self.queue.is_producing() || !self.queue.is_empty())
    }

    pub fn register_worker(&self, worker_id: &str) -> bool {
        let added = self.registry.register(worker_id);
        if added {
            info!(worker_id, workers = self.registry.len(), "Worker registered");
        } else {
            debug!(worker_id, "Worker already registered");
        }
        added
    }

    /// Tells polling workers there is nothing more to come.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            workers: self.registry.len(),
            batches_served: self.batches_served.load(Ordering::Relaxed),
            empty_pulls: self.empty_pulls.load(Ordering::Relaxed),
            last_batch_id: *self
                .last_batch_id
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl DispatchApi for Dispatcher {
    async fn pull_batch(&self) -> Result<Batch> {
        Ok(Dispatcher::pull_batch(self))
    }

    async fn submit_partial_result(&self, result: PartialResult) -> Result<()> {
        Dispatcher::submit_partial_result(self, &result);
        Ok(())
    }

    async fn has_more_work(&self) -> Result<bool> {
        Ok(Dispatcher::has_more_work(self))
    }

    async fn register_worker(&self, worker_id: &str) -> Result<bool> {
        Ok(Dispatcher::register_worker(self, worker_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArcKey, ArcResult, Datagram, NO_BATCH_ID};

    fn dispatcher(capacity: usize) -> (Dispatcher, Arc<BatchQueue>, Arc<Aggregator>) {
        let queue = Arc::new(BatchQueue::new(capacity));
        let aggregator = Arc::new(Aggregator::new(true));
        (
            Dispatcher::new(queue.clone(), aggregator.clone()),
            queue,
            aggregator,
        )
    }

    fn datagrams(n: usize) -> Vec<Datagram> {
        let line = "E,2024-01-01 00:00:00,1,0,0,0,0,1,1,,2024-01-01 00:00:00,1";
        vec![Datagram::from_csv_line(line).unwrap(); n]
    }

    #[test]
    fn test_pull_on_empty_queue_returns_sentinel() {
        let (dispatcher, _, _) = dispatcher(2);
        let batch = dispatcher.pull_batch();
        assert_eq!(batch.batch_id, NO_BATCH_ID);
        assert!(batch.datagrams.is_empty());
        assert_eq!(dispatcher.snapshot().empty_pulls, 1);
    }

    #[tokio::test]
    async fn test_batch_ids_strictly_increase() {
        let (dispatcher, queue, _) = dispatcher(4);
        queue.enqueue(datagrams(2)).await.unwrap();
        queue.enqueue(datagrams(3)).await.unwrap();

        let first = dispatcher.pull_batch();
        let second = dispatcher.pull_batch();
        assert_eq!((first.batch_id, first.len()), (1, 2));
        assert_eq!((second.batch_id, second.len()), (2, 3));
        assert_eq!(dispatcher.pull_batch().batch_id, NO_BATCH_ID);

        queue.enqueue(datagrams(1)).await.unwrap();
        assert_eq!(dispatcher.pull_batch().batch_id, 3);
        assert_eq!(dispatcher.snapshot().batches_served, 3);
    }

    #[test]
    fn test_submit_forwards_to_aggregator() {
        let (dispatcher, _, aggregator) = dispatcher(1);
        let key = ArcKey::new(241, 100, 200);
        dispatcher.submit_partial_result(&PartialResult {
            batch_id: 1,
            worker_id: "w".to_string(),
            arcs: vec![ArcResult {
                arc_key: key,
                sum_speeds: 30.0,
                count: 1,
            }],
        });
        assert_eq!(aggregator.average_speed(&key), Some(30.0));
    }

    #[tokio::test]
    async fn test_has_more_work_tracks_producer_and_queue() {
        let (dispatcher, queue, _) = dispatcher(2);
        assert!(dispatcher.has_more_work());

        queue.enqueue(datagrams(1)).await.unwrap();
        queue.finish_producing();
        assert!(dispatcher.has_more_work());

        dispatcher.pull_batch();
        assert!(!dispatcher.has_more_work());
    }

    #[test]
    fn test_stop_ends_work() {
        let (dispatcher, _, _) = dispatcher(1);
        dispatcher.stop();
        assert!(!dispatcher.has_more_work());
    }

    #[tokio::test]
    async fn test_register_worker_through_trait() {
        let (dispatcher, _, _) = dispatcher(1);
        let api: &dyn DispatchApi = &dispatcher;
        assert!(api.register_worker("w-1").await.unwrap());
        assert!(!api.register_worker("w-1").await.unwrap());
        assert_eq!(dispatcher.registry().len(), 1);
    }
}
