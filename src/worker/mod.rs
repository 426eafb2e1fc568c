//! Batch processing side: speed math, the chunked processor and the poll loop.

pub mod processor;
pub mod runner;
pub mod speed;

pub use processor::BatchProcessor;
pub use runner::{StopReason, Worker, WorkerConfig, WorkerSummary, generate_worker_id};
