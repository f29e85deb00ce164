//! Manager Context
//!
//! The collaborators the manager works through, passed explicitly instead of
//! being looked up from process-wide state.

use crate::domain::ports::{
    BlockDeviceDirectory, InventorySource, JobLauncher, JobRegistry, NameCodec, ObjectPublisher,
    PassthroughNames,
};
use crate::metrics::ManagerMetrics;
use std::sync::Arc;

/// Collaborators shared by the manager and its spawned tasks
#[derive(Clone)]
pub struct Context {
    pub inventory: Arc<dyn InventorySource>,
    pub launcher: Arc<dyn JobLauncher>,
    pub jobs: Arc<dyn JobRegistry>,
    pub publisher: Arc<dyn ObjectPublisher>,
    pub blocks: Arc<dyn BlockDeviceDirectory>,
    pub names: Arc<dyn NameCodec>,
    pub metrics: Arc<ManagerMetrics>,
}

impl Context {
    /// Build a context with pass-through name encoding and fresh metrics
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        launcher: Arc<dyn JobLauncher>,
        jobs: Arc<dyn JobRegistry>,
        publisher: Arc<dyn ObjectPublisher>,
        blocks: Arc<dyn BlockDeviceDirectory>,
    ) -> Self {
        Self {
            inventory,
            launcher,
            jobs,
            publisher,
            blocks,
            names: Arc::new(PassthroughNames),
            metrics: Arc::new(ManagerMetrics::new()),
        }
    }

    pub fn with_names(mut self, names: Arc<dyn NameCodec>) -> Self {
        self.names = names;
        self
    }
}
