//! Domain Ports - Collaborator contracts consumed by the core
//!
//! These traits define the boundaries between reconciliation/job logic and the
//! services around it. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use crate::inventory::{FieldMap, InventorySnapshot};
use crate::jobs::LvmCommand;
use crate::publish::{PublicationEvent, PublishedEntity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Operation Tags
// =============================================================================

/// Tag identifying the kind of a long-running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationTag {
    #[serde(rename = "lvm-vg-delete")]
    DeleteGroup,
    #[serde(rename = "lvm-vg-rename")]
    RenameGroup,
    #[serde(rename = "lvm-vg-add-device")]
    AddDevice,
    #[serde(rename = "lvm-vg-rem-device")]
    RemoveDevice,
    #[serde(rename = "lvm-vg-empty-device")]
    EmptyDevice,
    #[serde(rename = "lvm-vg-create-volume")]
    CreateVolume,
}

impl OperationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationTag::DeleteGroup => "lvm-vg-delete",
            OperationTag::RenameGroup => "lvm-vg-rename",
            OperationTag::AddDevice => "lvm-vg-add-device",
            OperationTag::RemoveDevice => "lvm-vg-rem-device",
            OperationTag::EmptyDevice => "lvm-vg-empty-device",
            OperationTag::CreateVolume => "lvm-vg-create-volume",
        }
    }

    /// Prefix used when reporting a failure of this operation to the caller
    pub fn failure_context(&self) -> &'static str {
        match self {
            OperationTag::DeleteGroup => "Error deleting volume group",
            OperationTag::RenameGroup => "Error renaming volume group",
            OperationTag::AddDevice => "Error adding device to volume group",
            OperationTag::RemoveDevice => "Error removing device from volume group",
            OperationTag::EmptyDevice => "Error emptying device in volume group",
            OperationTag::CreateVolume => "Error creating logical volume",
        }
    }
}

impl std::fmt::Display for OperationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Identity of the caller on whose behalf a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub uid: u32,
}

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Request to run a mutating operation out of process
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub operation: OperationTag,
    /// Object path of the entity the job acts on
    pub target_owner: String,
    pub caller: CallerIdentity,
    /// Object paths of the block devices the job targets
    pub objects: Vec<String>,
    pub command: LvmCommand,
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub success: bool,
    pub message: String,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Handle to a spawned job; yields exactly one outcome
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    pub completion: oneshot::Receiver<JobOutcome>,
}

/// Progress of a job
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobProgress {
    /// Fraction complete in [0.0, 1.0]
    pub fraction: f64,
    /// Whether `fraction` has ever been set
    pub valid: bool,
}

/// An outstanding, externally visible long-running operation
#[derive(Debug)]
pub struct PendingJob {
    pub id: JobId,
    pub operation: OperationTag,
    /// Object paths of the block devices the job targets
    pub objects: Vec<String>,
    pub started_at: DateTime<Utc>,
    progress: Mutex<JobProgress>,
}

impl PendingJob {
    pub fn new(id: JobId, operation: OperationTag, objects: Vec<String>) -> Self {
        Self {
            id,
            operation,
            objects,
            started_at: Utc::now(),
            progress: Mutex::new(JobProgress::default()),
        }
    }

    /// Set progress, clamped to [0.0, 1.0], and mark it valid
    pub fn set_progress(&self, fraction: f64) {
        let mut progress = self.progress.lock();
        progress.fraction = fraction.clamp(0.0, 1.0);
        progress.valid = true;
    }

    pub fn progress(&self) -> JobProgress {
        *self.progress.lock()
    }
}

// =============================================================================
// Block Devices
// =============================================================================

/// A block device known to the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Object path the block is exposed at
    pub object_path: String,
    /// Primary device path, e.g. `/dev/sda`
    pub device: String,
    /// Alias paths for the same device
    pub symlinks: Vec<String>,
    /// Device-mapper volume group name, for LVM-backed blocks
    pub dm_vg_name: Option<String>,
    /// Device-mapper logical volume name, for LVM-backed blocks
    pub dm_lv_name: Option<String>,
    /// Object path of the volume group this block is a member of
    pub physical_volume_group: Option<String>,
}

impl BlockDevice {
    /// Check whether `path` names this device, by primary path or alias
    pub fn matches_path(&self, path: &str) -> bool {
        self.device == path || self.symlinks.iter().any(|s| s == path)
    }

    /// Primary path followed by aliases
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.device.as_str()).chain(self.symlinks.iter().map(String::as_str))
    }
}

/// Association of a block with a volume group as a physical volume
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalVolumeAssociation {
    /// Object path of the owning volume group
    pub group_path: String,
    /// Physical volume record from the latest snapshot
    pub record: FieldMap,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Source of inventory snapshots
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// List the names of all volume groups
    async fn list_groups(&self) -> Result<Vec<String>>;

    /// Fetch a snapshot of one volume group. The fetch should stop early
    /// once `cancel` fires.
    async fn fetch_inventory(
        &self,
        group: &str,
        cancel: CancellationToken,
    ) -> Result<InventorySnapshot>;
}

/// Spawns jobs off the event loop
pub trait JobLauncher: Send + Sync {
    fn spawn_job(&self, spec: JobSpec) -> Result<JobHandle>;
}

/// Registry of currently running jobs
pub trait JobRegistry: Send + Sync {
    fn active_jobs(&self, operation: OperationTag) -> Vec<Arc<PendingJob>>;
}

/// Publishes entities to clients
pub trait ObjectPublisher: Send + Sync {
    fn publish(&self, entity: PublishedEntity, properties: FieldMap);

    /// Replace the properties of a published entity
    fn update_properties(&self, object_path: &str, properties: FieldMap);

    fn unpublish(&self, object_path: &str);

    fn subscribe(&self) -> broadcast::Receiver<PublicationEvent>;
}

/// Directory of known block devices
#[async_trait]
pub trait BlockDeviceDirectory: Send + Sync {
    fn list_block_devices(&self) -> Vec<BlockDevice>;

    /// Find a block by object path
    fn find(&self, object_path: &str) -> Option<BlockDevice>;

    /// Associate a block with a volume group, or clear the association
    fn set_physical_volume(&self, object_path: &str, association: Option<PhysicalVolumeAssociation>);

    /// Associate a block with the logical volume it exposes, or clear it
    fn set_logical_volume(&self, object_path: &str, volume_path: Option<&str>);

    /// Fail unless the block is unused (not mounted, no holders, not a member)
    async fn ensure_unused(&self, block: &BlockDevice) -> Result<()>;

    /// Remove all signatures from a device
    async fn wipe(&self, device: &str) -> Result<()>;
}

/// LVM name encoding rules
pub trait NameCodec: Send + Sync {
    /// Encode a user-supplied name; `for_volume` selects logical volume rules
    fn encode(&self, name: &str, for_volume: bool) -> String;

    fn decode(&self, name: &str) -> String;
}

/// Name codec that leaves names untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughNames;

impl NameCodec for PassthroughNames {
    fn encode(&self, name: &str, _for_volume: bool) -> String {
        name.to_string()
    }

    fn decode(&self, name: &str) -> String {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_matches_alias() {
        let block = BlockDevice {
            object_path: "/block/sdb".into(),
            device: "/dev/sdb".into(),
            symlinks: vec!["/dev/disk/by-id/ata-DISK_B".into()],
            ..Default::default()
        };
        assert!(block.matches_path("/dev/sdb"));
        assert!(block.matches_path("/dev/disk/by-id/ata-DISK_B"));
        assert!(!block.matches_path("/dev/sdc"));
        assert_eq!(block.all_paths().count(), 2);
    }

    #[test]
    fn test_pending_job_progress_clamped() {
        let job = PendingJob::new(JobId(1), OperationTag::EmptyDevice, vec![]);
        assert!(!job.progress().valid);

        job.set_progress(1.7);
        assert_eq!(job.progress().fraction, 1.0);
        assert!(job.progress().valid);
    }

    #[test]
    fn test_operation_tag_strings() {
        assert_eq!(OperationTag::EmptyDevice.to_string(), "lvm-vg-empty-device");
        assert_eq!(
            serde_json::to_string(&OperationTag::RemoveDevice).unwrap(),
            "\"lvm-vg-rem-device\""
        );
    }
}
