//! Shared fakes for unit tests

use crate::domain::ports::{
    BlockDevice, BlockDeviceDirectory, InventorySource, JobHandle, JobId, JobLauncher, JobOutcome,
    JobSpec, PhysicalVolumeAssociation,
};
use crate::error::{Error, Result};
use crate::inventory::{FieldMap, InventorySnapshot};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Let spawned tasks and the event loop run until they block.
///
/// Advances a paused clock by a few milliseconds.
pub async fn settle() {
    for _ in 0..5 {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Build a snapshot for `group` with the given visible volume names
pub fn snapshot_with(group: &str, volumes: &[&str]) -> InventorySnapshot {
    let mut fields = FieldMap::new();
    fields.insert("name".into(), json!(group));
    fields.insert("size".into(), json!(10737418240u64));
    let lvs = volumes
        .iter()
        .map(|name| {
            let mut record = FieldMap::new();
            record.insert("name".into(), json!(name));
            record
        })
        .collect();
    InventorySnapshot::new(fields, lvs, vec![])
}

// =============================================================================
// Block Directory
// =============================================================================

/// In-memory block directory
#[derive(Default)]
pub struct StaticBlockDirectory {
    blocks: RwLock<Vec<BlockDevice>>,
    volumes: RwLock<HashMap<String, String>>,
    in_use: RwLock<HashSet<String>>,
    wiped: Mutex<Vec<String>>,
    wipe_fails: AtomicBool,
}

impl StaticBlockDirectory {
    pub fn new(blocks: Vec<BlockDevice>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
            ..Default::default()
        }
    }

    pub fn mark_in_use(&self, object_path: &str) {
        self.in_use.write().insert(object_path.to_string());
    }

    pub fn logical_volume_of(&self, object_path: &str) -> Option<String> {
        self.volumes.read().get(object_path).cloned()
    }

    /// Make every subsequent wipe fail with an IO error
    pub fn fail_wipes(&self) {
        self.wipe_fails.store(true, Ordering::SeqCst);
    }

    pub fn wiped(&self) -> Vec<String> {
        self.wiped.lock().clone()
    }
}

#[async_trait]
impl BlockDeviceDirectory for StaticBlockDirectory {
    fn list_block_devices(&self) -> Vec<BlockDevice> {
        self.blocks.read().clone()
    }

    fn find(&self, object_path: &str) -> Option<BlockDevice> {
        self.blocks
            .read()
            .iter()
            .find(|b| b.object_path == object_path)
            .cloned()
    }

    fn set_physical_volume(&self, object_path: &str, association: Option<PhysicalVolumeAssociation>) {
        if let Some(block) = self
            .blocks
            .write()
            .iter_mut()
            .find(|b| b.object_path == object_path)
        {
            block.physical_volume_group = association.map(|a| a.group_path);
        }
    }

    fn set_logical_volume(&self, object_path: &str, volume_path: Option<&str>) {
        let mut volumes = self.volumes.write();
        match volume_path {
            Some(path) => {
                volumes.insert(object_path.to_string(), path.to_string());
            }
            None => {
                volumes.remove(object_path);
            }
        }
    }

    async fn ensure_unused(&self, block: &BlockDevice) -> Result<()> {
        if self.in_use.read().contains(&block.object_path) {
            return Err(Error::DeviceInUse {
                device: block.device.clone(),
                reason: "mounted".into(),
            });
        }
        Ok(())
    }

    async fn wipe(&self, device: &str) -> Result<()> {
        if self.wipe_fails.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        self.wiped.lock().push(device.to_string());
        Ok(())
    }
}

// =============================================================================
// Inventory Source
// =============================================================================

/// Scripted response for one fetch
pub struct ScriptedFetch {
    pub delay: Duration,
    pub result: std::result::Result<InventorySnapshot, String>,
}

/// Inventory source answering from scripts, falling back to fixed snapshots
#[derive(Default)]
pub struct ScriptedInventory {
    groups: Mutex<Vec<String>>,
    snapshots: Mutex<HashMap<String, InventorySnapshot>>,
    script: Mutex<VecDeque<ScriptedFetch>>,
    fetches: AtomicUsize,
    cancelled: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_groups(&self, groups: &[&str]) {
        *self.groups.lock() = groups.iter().map(|g| g.to_string()).collect();
    }

    pub fn set_snapshot(&self, group: &str, snapshot: InventorySnapshot) {
        self.snapshots.lock().insert(group.to_string(), snapshot);
    }

    /// Queue a response for the next fetch that is not already scripted
    pub fn push(&self, delay: Duration, result: std::result::Result<InventorySnapshot, String>) {
        self.script.lock().push_back(ScriptedFetch { delay, result });
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn fetched_groups(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl InventorySource for ScriptedInventory {
    async fn list_groups(&self) -> Result<Vec<String>> {
        Ok(self.groups.lock().clone())
    }

    async fn fetch_inventory(
        &self,
        group: &str,
        cancel: CancellationToken,
    ) -> Result<InventorySnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().push(group.to_string());

        let scripted = self.script.lock().pop_front();
        let (delay, result) = match scripted {
            Some(fetch) => (fetch.delay, fetch.result),
            None => {
                let snapshot = self.snapshots.lock().get(group).cloned();
                (
                    Duration::ZERO,
                    snapshot.ok_or_else(|| format!("volume group {} not found", group)),
                )
            }
        };

        let cancelled = if delay.is_zero() {
            cancel.is_cancelled()
        } else {
            tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = cancel.cancelled() => true,
            }
        };
        if cancelled {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            return Err(Error::FetchCancelled {
                group: group.to_string(),
            });
        }

        result.map_err(|reason| Error::FetchFailed {
            group: group.to_string(),
            reason,
        })
    }
}

// =============================================================================
// Job Launcher
// =============================================================================

/// Launcher that records specs and lets the test decide outcomes
#[derive(Default)]
pub struct RecordingLauncher {
    specs: Mutex<Vec<JobSpec>>,
    responders: Mutex<Vec<Option<oneshot::Sender<JobOutcome>>>>,
    refuse: AtomicBool,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent launch fail
    pub fn refuse_launches(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn specs(&self) -> Vec<JobSpec> {
        self.specs.lock().clone()
    }

    /// Deliver the outcome of the job launched `index`-th
    pub fn complete(&self, index: usize, outcome: JobOutcome) -> bool {
        let sender = self
            .responders
            .lock()
            .get_mut(index)
            .and_then(Option::take);
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl JobLauncher for RecordingLauncher {
    fn spawn_job(&self, spec: JobSpec) -> Result<JobHandle> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::JobLaunch {
                operation: spec.operation.to_string(),
                reason: "launcher refused".into(),
            });
        }
        let (tx, rx) = oneshot::channel();
        let mut specs = self.specs.lock();
        let id = JobId(specs.len() as u64 + 1);
        specs.push(spec);
        self.responders.lock().push(Some(tx));
        Ok(JobHandle { id, completion: rx })
    }
}
