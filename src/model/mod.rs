//! Shared data model: datagrams, batches, arc keys and partial results.

pub mod arc;
pub mod batch;
pub mod datagram;

pub use arc::{ArcAccumulator, ArcKey, ArcKeyParseError};
pub use batch::{ArcResult, Batch, NO_BATCH_ID, PartialResult};
pub use datagram::{Datagram, DatagramParseError, TripKey};
