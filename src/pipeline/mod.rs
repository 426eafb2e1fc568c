//! Ingestion side of the pipeline: the bounded batch queue, the record source
//! abstraction and the tailer that feeds one into the other.

pub mod queue;
pub mod source;
pub mod tailer;

pub use queue::BatchQueue;
pub use source::{FileSource, RecordSource, SourceRead};
pub use tailer::{Step, Tailer, TailerConfig, TailerStats};
