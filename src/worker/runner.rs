//! Worker poll loop: register, pull, process, submit.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::processor::BatchProcessor;
use crate::dispatch::DispatchApi;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub threads: usize,
    /// Wait between pulls that came back empty.
    pub poll_interval: Duration,
    /// Consecutive empty pulls tolerated; the next one stops the worker.
    pub max_empty_pulls: u32,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, threads: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            threads,
            poll_interval: Duration::from_secs(1),
            max_empty_pulls: 300,
        }
    }
}

/// Random id for a worker that was not given one.
pub fn generate_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4().simple())
}

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Cancelled,
    Starved,
    NoMoreWork,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub batches: u64,
    pub datagrams: u64,
    pub arcs_submitted: u64,
    pub elapsed_secs: f64,
    pub stop_reason: StopReason,
}

impl WorkerSummary {
    pub fn datagrams_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            self.datagrams as f64 / self.elapsed_secs
        }
    }
}

pub struct Worker<D> {
    dispatcher: D,
    processor: BatchProcessor,
    config: WorkerConfig,
}

impl<D: DispatchApi> Worker<D> {
    pub fn new(dispatcher: D, config: WorkerConfig) -> Self {
        Self {
            processor: BatchProcessor::new(config.threads),
            dispatcher,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Polls until cancelled, starved, or the dispatcher reports no more work.
    ///
    /// Cancellation is checked between batches, so a batch already pulled is
    /// always processed and submitted. Transport failures end the loop with an error.
    #[tracing::instrument(skip_all, fields(worker_id = %self.config.worker_id, threads = self.processor.num_threads()))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<WorkerSummary> {
        let worker_id = self.config.worker_id.as_str();
        if self
            .dispatcher
            .register_worker(worker_id)
            .await
            .context("registering worker")?
        {
            info!("Worker registered");
        } else {
            info!("Worker id was already registered");
        }

        let started = Instant::now();
        let mut summary = WorkerSummary {
            worker_id: worker_id.to_string(),
            batches: 0,
            datagrams: 0,
            arcs_submitted: 0,
            elapsed_secs: 0.0,
            stop_reason: StopReason::Cancelled,
        };
        let mut empty_pulls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            let batch = self.dispatcher.pull_batch().await.context("pulling batch")?;

            if batch.is_empty() {
                empty_pulls += 1;
                if empty_pulls % 20 == 0 {
                    info!(empty_pulls, "Queue empty, waiting for batches");
                }
                if empty_pulls > self.config.max_empty_pulls {
                    info!(empty_pulls, "No batches for too long, stopping");
                    summary.stop_reason = StopReason::Starved;
                    break;
                }
                if !self.dispatcher.has_more_work().await.context("checking for work")? {
                    info!("Dispatcher reports no more work, stopping");
                    summary.stop_reason = StopReason::NoMoreWork;
                    break;
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.stop_reason = StopReason::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            empty_pulls = 0;
            let batch_id = batch.batch_id;
            let size = batch.len();
            debug!(batch_id, size, "Batch received");

            let result = self.processor.process(batch, worker_id).await;
            let arcs = result.arcs.len();
            self.dispatcher
                .submit_partial_result(result)
                .await
                .with_context(|| format!("submitting batch {batch_id}"))?;

            summary.batches += 1;
            summary.datagrams += size as u64;
            summary.arcs_submitted += arcs as u64;
            debug!(batch_id, arcs, "Batch processed");

            if summary.batches % 5 == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                info!(
                    batches = summary.batches,
                    datagrams = summary.datagrams,
                    rate = %format!("{:.0}", summary.datagrams as f64 / elapsed.max(f64::EPSILON)),
                    "Worker progress"
                );
            }
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            batches = summary.batches,
            datagrams = summary.datagrams,
            elapsed_secs = summary.elapsed_secs,
            reason = ?summary.stop_reason,
            "Worker stopped"
        );
        Ok(summary)
    }
}
