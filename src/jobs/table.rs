//! Job Table
//!
//! In-memory registry of running jobs.

use crate::domain::ports::{JobId, JobRegistry, OperationTag, PendingJob};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of running jobs keyed by id
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<BTreeMap<JobId, Arc<PendingJob>>>,
    next_id: AtomicU64,
}

impl JobTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new job and return it
    pub fn start(&self, operation: OperationTag, objects: Vec<String>) -> Arc<PendingJob> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let job = Arc::new(PendingJob::new(id, operation, objects));
        self.jobs.write().insert(id, job.clone());
        job
    }

    /// Remove a finished job
    pub fn finish(&self, id: JobId) -> Option<Arc<PendingJob>> {
        self.jobs.write().remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<Arc<PendingJob>> {
        self.jobs.read().get(&id).cloned()
    }

    /// Every running job, oldest first
    pub fn running(&self) -> Vec<Arc<PendingJob>> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl JobRegistry for JobTable {
    fn active_jobs(&self, operation: OperationTag) -> Vec<Arc<PendingJob>> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.operation == operation)
            .cloned()
            .collect()
    }
}
