//! Receiving side: datagrams pushed by vehicles land in the append-only file.

pub mod receiver;
pub mod replay;
pub mod repository;

pub use receiver::{IngestReceiver, IngestSnapshot};
pub use replay::{ReplaySummary, replay};
pub use repository::DatagramRepository;
