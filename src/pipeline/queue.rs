//! Bounded FIFO between the ingestion tailer and the dispatcher.
//!
//! This is the only backpressure point in the pipeline: when workers stop
//! pulling, [`BatchQueue::enqueue`] parks the producer until a slot frees up.
//! Nothing is ever dropped by the queue itself.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::Datagram;

pub struct BatchQueue {
    tx: mpsc::Sender<Vec<Datagram>>,
    rx: Mutex<mpsc::Receiver<Vec<Datagram>>>,
    capacity: usize,
    producing: AtomicBool,
}

impl BatchQueue {
    /// Creates a queue holding at most `capacity` batches (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            producing: AtomicBool::new(true),
        }
    }

    /// Appends a batch, waiting for a free slot when the queue is full.
    pub async fn enqueue(&self, batch: Vec<Datagram>) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| anyhow!("batch queue receiver dropped"))
    }

    /// Like [`BatchQueue::enqueue`], but gives the batch back if `cancel`
    /// fires while waiting for a slot.
    pub async fn enqueue_until(
        &self,
        batch: Vec<Datagram>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Datagram>>> {
        let permit = tokio::select! {
            biased;
            permit = self.tx.reserve() => {
                permit.map_err(|_| anyhow!("batch queue receiver dropped"))?
            }
            _ = cancel.cancelled() => return Ok(Some(batch)),
        };
        permit.send(batch);
        Ok(None)
    }

    /// Pops the oldest batch without waiting. `None` when nothing is ready.
    pub fn try_dequeue(&self) -> Option<Vec<Datagram>> {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rx.try_recv().ok()
    }

    /// Number of buffered batches.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks the producer as finished; buffered batches stay available.
    pub fn finish_producing(&self) {
        self.producing.store(false, Ordering::Release);
    }

    pub fn is_producing(&self) -> bool {
        self.producing.load(Ordering::Acquire)
    }
}
