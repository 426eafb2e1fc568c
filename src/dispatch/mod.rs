//! Pull-based batch dispatch.
//!
//! [`DispatchApi`] is the whole pull/ack protocol a worker sees. The in-process
//! [`Dispatcher`] and the HTTP [`crate::rpc::RemoteDispatcher`] both implement
//! it, so the worker loop never knows which side of the wire it is on.

mod master;
mod registry;

pub use master::{DispatchSnapshot, Dispatcher};
pub use registry::WorkerRegistry;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Batch, PartialResult};

#[async_trait]
pub trait DispatchApi: Send + Sync {
    /// Next batch, or the sentinel (`batch_id == -1`) when none is ready.
    async fn pull_batch(&self) -> Result<Batch>;

    async fn submit_partial_result(&self, result: PartialResult) -> Result<()>;

    async fn has_more_work(&self) -> Result<bool>;

    /// Returns `false` when the id was already registered.
    async fn register_worker(&self, worker_id: &str) -> Result<bool>;
}

#[async_trait]
impl<T: DispatchApi + ?Sized> DispatchApi for Arc<T> {
    async fn pull_batch(&self) -> Result<Batch> {
        (**self).pull_batch().await
    }

    async fn submit_partial_result(&self, result: PartialResult) -> Result<()> {
        (**self).submit_partial_result(result).await
    }

    async fn has_more_work(&self) -> Result<bool> {
        (**self).has_more_work().await
    }

    async fn register_worker(&self, worker_id: &str) -> Result<bool> {
        (**self).register_worker(worker_id).await
    }
}
