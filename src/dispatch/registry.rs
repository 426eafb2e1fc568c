use dashmap::DashSet;

/// Ids of workers that have announced themselves. Insert-only, used for
/// observability; workers pick their own work by pulling.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashSet<String>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not registered before.
    pub fn register(&self, worker_id: &str) -> bool {
        self.workers.insert(worker_id.to_string())
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains(worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Registered ids in lexical order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }
}
