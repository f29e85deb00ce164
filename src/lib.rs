//! LVM Volume Group Manager
//!
//! Reconciliation and job orchestration core for a storage management
//! daemon that exposes LVM volume groups and logical volumes as published
//! objects.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         Manager Event Loop                                  │
//! │           (owns every VolumeGroup, PollScheduler and waiter)                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  ManagerHandle  │  │  PollScheduler  │  │   JobCompletionBridge       │  │
//! │  │   (requests)    │  │  (coalescing)   │  │   (waiters + criteria)      │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                  │
//! │           │          ┌─────────┴─────────┐               │                  │
//! │           │          │ SnapshotReconciler│               │                  │
//! │           │          │  (entity tables)  │               │                  │
//! │           │          └─────────┬─────────┘               │                  │
//! ├───────────┴────────────────────┴─────────────────────────┴──────────────────┤
//! │                           Collaborators                                     │
//! │  ┌───────────────┐ ┌───────────────┐ ┌───────────────┐ ┌─────────────────┐  │
//! │  │   Inventory   │ │  Job Launcher │ │   Publisher   │ │ Block Directory │  │
//! │  │   (helper)    │ │  (processes)  │ │  (registry)   │ │    (sysfs)      │  │
//! │  └───────────────┘ └───────────────┘ └───────────────┘ └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: Event loop, request handle and configuration
//! - [`scheduler`]: Per-group poll coalescing
//! - [`reconcile`]: Snapshot reconciliation and block device bookkeeping
//! - [`volume`]: Volume group and logical volume state
//! - [`jobs`]: Job launching and completion bridging
//! - [`inventory`]: Inventory snapshots and the helper-backed source
//! - [`publish`]: Object publication and publication events
//! - [`devices`]: Block device directory
//! - [`domain`]: Collaborator contracts
//! - [`error`]: Error types and handling

pub mod devices;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod jobs;
pub mod manager;
pub mod metrics;
pub mod publish;
pub mod reconcile;
pub mod scheduler;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use manager::{
    Context, GroupSummary, Manager, ManagerConfig, ManagerHandle, VolumeGroupOperation,
};

pub use domain::ports::{
    BlockDevice, BlockDeviceDirectory, CallerIdentity, InventorySource, JobLauncher, JobRegistry,
    NameCodec, ObjectPublisher, OperationTag,
};

pub use error::{Error, Result};

pub use devices::{DirectoryConfig, SysfsBlockDirectory};
pub use inventory::{HelperConfig, HelperInventorySource, InventorySnapshot};
pub use jobs::{JobTable, ProcessJobLauncher, Resolution};
pub use metrics::{ManagerMetrics, MetricsSnapshot};
pub use publish::ObjectRegistry;
pub use reconcile::SnapshotReconciler;
pub use scheduler::{PollScheduler, PollState};
pub use volume::{LvmNames, VolumeGroup};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
