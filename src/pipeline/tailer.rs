//! Single producer that tails the datagram source into the batch queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::BatchQueue;
use super::source::{RecordSource, SourceRead};
use crate::model::Datagram;
use crate::model::datagram::is_header_line;

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub batch_size: usize,
    /// Sleep after a read that found nothing new.
    pub idle_backoff: Duration,
    /// Sleep while the source does not exist, and after read errors.
    pub missing_backoff: Duration,
    /// How long the final partial-batch flush may wait for queue space.
    pub flush_timeout: Duration,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            idle_backoff: Duration::from_millis(500),
            missing_backoff: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Running counters, shared with the stats reporter.
#[derive(Debug, Default)]
pub struct TailerStats {
    pub records_ingested: AtomicU64,
    pub records_malformed: AtomicU64,
    pub batches_enqueued: AtomicU64,
    pub offset: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TailerSnapshot {
    pub records_ingested: u64,
    pub records_malformed: u64,
    pub batches_enqueued: u64,
    pub offset: u64,
}

impl TailerStats {
    pub fn snapshot(&self) -> TailerSnapshot {
        TailerSnapshot {
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            records_malformed: self.records_malformed.load(Ordering::Relaxed),
            batches_enqueued: self.batches_enqueued.load(Ordering::Relaxed),
            offset: self.offset.load(Ordering::Relaxed),
        }
    }
}

/// Result of one read-and-batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Missing,
    Idle,
    Consumed { records: usize },
}

pub struct Tailer<S> {
    source: S,
    queue: Arc<BatchQueue>,
    config: TailerConfig,
    offset: u64,
    current: Vec<Datagram>,
    /// Full batches not yet accepted by the queue.
    ready: VecDeque<Vec<Datagram>>,
    stats: Arc<TailerStats>,
}

impl<S: RecordSource> Tailer<S> {
    pub fn new(source: S, queue: Arc<BatchQueue>, config: TailerConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            source,
            queue,
            config: TailerConfig {
                batch_size,
                ..config
            },
            offset: 0,
            current: Vec::with_capacity(batch_size),
            ready: VecDeque::new(),
            stats: Arc::new(TailerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<TailerStats> {
        self.stats.clone()
    }

    /// Offset just past the last consumed record. Never moves backwards.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Datagrams accumulated towards the next batch.
    pub fn pending(&self) -> usize {
        self.current.len()
    }

    /// Reads whatever complete records are available and enqueues every full batch.
    pub async fn step(&mut self) -> Result<Step> {
        self.step_until(&CancellationToken::new()).await
    }

    /// Same as [`Tailer::step`], but stops waiting on a full queue once
    /// `cancel` fires. Batches that did not fit are kept for [`Tailer::flush`].
    pub async fn step_until(&mut self, cancel: &CancellationToken) -> Result<Step> {
        if !self.drain_ready(cancel).await? {
            return Ok(Step::Consumed { records: 0 });
        }

        let (lines, next_offset) = match self.source.read_from(self.offset).await? {
            SourceRead::Missing => return Ok(Step::Missing),
            SourceRead::Idle => return Ok(Step::Idle),
            SourceRead::Lines { lines, next_offset } => (lines, next_offset),
        };

        let at_start = self.offset == 0;
        let mut records = 0;

        for (i, line) in lines.iter().enumerate() {
            if i == 0 && at_start && is_header_line(line) {
                debug!("Skipping header record");
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            match Datagram::from_csv_line(line) {
                Ok(datagram) => {
                    records += 1;
                    self.stats.records_ingested.fetch_add(1, Ordering::Relaxed);
                    self.current.push(datagram);
                    if self.current.len() >= self.config.batch_size {
                        let batch = std::mem::replace(
                            &mut self.current,
                            Vec::with_capacity(self.config.batch_size),
                        );
                        self.ready.push_back(batch);
                    }
                }
                Err(e) => {
                    let malformed = self.stats.records_malformed.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(error = %e, "Dropping malformed record");
                    if malformed == 1 || malformed % 1000 == 0 {
                        warn!(malformed, error = %e, "Malformed records dropped");
                    }
                }
            }
        }

        self.offset = next_offset;
        self.stats.offset.store(next_offset, Ordering::Relaxed);
        self.drain_ready(cancel).await?;
        Ok(Step::Consumed { records })
    }

    /// Sends ready batches in order. Returns false if `cancel` fired first.
    async fn drain_ready(&mut self, cancel: &CancellationToken) -> Result<bool> {
        while let Some(batch) = self.ready.pop_front() {
            let size = batch.len();
            if let Some(batch) = self.queue.enqueue_until(batch, cancel).await? {
                self.ready.push_front(batch);
                return Ok(false);
            }
            self.record_enqueued(size);
        }
        Ok(true)
    }

    /// Enqueues unsent full batches, then the partial batch, if any.
    pub async fn flush(&mut self) -> Result<()> {
        while let Some(batch) = self.ready.pop_front() {
            let size = batch.len();
            self.queue.enqueue(batch).await?;
            self.record_enqueued(size);
        }
        if self.current.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.current);
        let size = batch.len();
        self.queue.enqueue(batch).await?;
        self.record_enqueued(size);
        Ok(())
    }

    fn record_enqueued(&self, size: usize) {
        let batches = self.stats.batches_enqueued.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(size, "Batch enqueued");
        if batches % 10 == 0 {
            info!(
                batches,
                records = self.stats.records_ingested.load(Ordering::Relaxed),
                queued = self.queue.len(),
                capacity = self.queue.capacity(),
                "Tailer progress"
            );
        }
    }

    /// Tails the source until `cancel` fires, then flushes whatever is still
    /// unsent within `flush_timeout` and marks the queue as no longer producing.
    #[tracing::instrument(skip_all, fields(source = %self.source.describe(), batch_size = self.config.batch_size))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Tailer started");
        let mut quiet_polls: u64 = 0;

        while !cancel.is_cancelled() {
            let backoff = match self.step_until(&cancel).await {
                Ok(Step::Consumed { .. }) => {
                    quiet_polls = 0;
                    continue;
                }
                Ok(Step::Missing) => {
                    if quiet_polls % 20 == 0 {
                        info!("Waiting for source to appear");
                    }
                    quiet_polls += 1;
                    self.config.missing_backoff
                }
                Ok(Step::Idle) => {
                    quiet_polls += 1;
                    if quiet_polls % 60 == 0 {
                        info!(offset = self.offset, "Waiting for more data");
                    }
                    self.config.idle_backoff
                }
                Err(e) => {
                    warn!(error = %e, "Source read failed, retrying");
                    self.config.missing_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        let pending = self.current.len() + self.ready.iter().map(Vec::len).sum::<usize>();
        let unsent_batches = self.ready.len() + usize::from(!self.current.is_empty());
        match tokio::time::timeout(self.config.flush_timeout, self.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, pending, "Final flush failed"),
            Err(_) => warn!(
                pending,
                unsent_batches,
                "Queue stayed full during shutdown, unsent datagrams dropped"
            ),
        }
        self.queue.finish_producing();

        let stats = self.stats.snapshot();
        info!(
            records = stats.records_ingested,
            malformed = stats.records_malformed,
            batches = stats.batches_enqueued,
            "Tailer stopped"
        );
        Ok(())
    }
}
