use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::TailerConfig;

/// Runtime settings for every role of the pipeline.
///
/// Stored as a JSON object on disk; omitted fields take their defaults:
/// ```json
/// {
///   "dispatch_addr": "0.0.0.0:10001",
///   "batch_size": 5000,
///   "worker_threads": 8
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingest_addr: String,
    pub dispatch_addr: String,
    pub query_addr: String,
    pub data_file: PathBuf,

    pub batch_size: usize,
    pub queue_capacity: usize,
    pub worker_threads: usize,

    pub poll_interval_ms: u64,
    pub max_empty_pulls: u32,
    pub tail_idle_ms: u64,
    pub tail_missing_ms: u64,
    pub flush_timeout_secs: u64,
    pub stats_interval_secs: u64,
    /// Upper bound on any single RPC made by workers, replay and queries.
    pub request_timeout_secs: u64,

    pub reject_duplicate_batches: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_addr: "127.0.0.1:10000".to_string(),
            dispatch_addr: "127.0.0.1:10001".to_string(),
            query_addr: "127.0.0.1:10002".to_string(),
            data_file: PathBuf::from("data/received_datagrams.csv"),
            batch_size: 10_000,
            queue_capacity: 100,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_interval_ms: 1_000,
            max_empty_pulls: 300,
            tail_idle_ms: 500,
            tail_missing_ms: 1_000,
            flush_timeout_secs: 5,
            stats_interval_secs: 15,
            request_timeout_secs: 30,
            reject_duplicate_batches: true,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than zero");
        }
        if self.worker_threads == 0 {
            bail!("worker_threads must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tailer(&self) -> TailerConfig {
        TailerConfig {
            batch_size: self.batch_size,
            idle_backoff: Duration::from_millis(self.tail_idle_ms),
            missing_backoff: Duration::from_millis(self.tail_missing_ms),
            flush_timeout: Duration::from_secs(self.flush_timeout_secs),
        }
    }
}
