use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use super::repository::DatagramRepository;
use crate::model::Datagram;

/// Accepts datagrams pushed by vehicles and persists them.
///
/// Failures are reported to the caller as `false`, never as errors.
pub struct IngestReceiver {
    repository: Arc<DatagramRepository>,
    received: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub persisted: u64,
}

impl IngestReceiver {
    pub fn new(repository: Arc<DatagramRepository>) -> Self {
        Self {
            repository,
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn submit_datagram(&self, datagram: &Datagram) -> bool {
        match self.repository.save(datagram) {
            Ok(()) => {
                let received = self.received.fetch_add(1, Ordering::Relaxed) + 1;
                if received % 1000 == 0 {
                    info!(
                        received,
                        persisted = self.repository.total_saved(),
                        "Ingest progress"
                    );
                }
                true
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(bus_id = datagram.bus_id, error = %e, "Failed to persist datagram");
                false
            }
        }
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            persisted: self.repository.total_saved(),
        }
    }
}
