//! Manager Handle
//!
//! Request types accepted by the manager's event loop and the cloneable
//! handle RPC front ends use to submit them.

use crate::domain::ports::CallerIdentity;
use crate::error::{Error, Result};
use crate::jobs::Resolution;
use crate::scheduler::PollState;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Requests
// =============================================================================

/// A mutating operation on a volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VolumeGroupOperation {
    Delete {
        /// Wipe the member devices after the group is removed
        wipe: bool,
    },
    Rename {
        new_name: String,
    },
    AddDevice {
        /// Object path of the block to add
        block: String,
    },
    RemoveDevice {
        block: String,
        wipe: bool,
    },
    EmptyDevice {
        block: String,
        background: bool,
    },
    CreatePlainVolume {
        name: String,
        size: u64,
        /// Number of stripes, 0 for the LVM default
        stripes: u32,
        /// Stripe size in bytes, 0 for the LVM default
        stripe_size: u64,
    },
    CreateThinPoolVolume {
        name: String,
        size: u64,
    },
    CreateThinVolume {
        name: String,
        size: u64,
        /// Object path of the thin pool volume
        pool: String,
    },
}

/// Summary of a tracked volume group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub object_path: String,
    pub published: bool,
    pub needs_polling: bool,
    pub volumes: Vec<String>,
    #[serde(skip)]
    pub poll_state: PollState,
}

pub(crate) enum Command {
    Poll {
        group: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SyncGroups {
        reply: Option<oneshot::Sender<Result<Vec<String>>>>,
    },
    Groups {
        reply: oneshot::Sender<Vec<GroupSummary>>,
    },
    Operation {
        group: String,
        caller: CallerIdentity,
        operation: VolumeGroupOperation,
        reply: oneshot::Sender<Result<Resolution>>,
    },
    Shutdown,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running manager
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
}

impl ManagerHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Internal("volume group manager has stopped".into()))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| Error::RequestAbandoned)
    }

    /// Refresh a group now, or as soon as the refresh cadence allows
    pub async fn poll(&self, group: &str) -> Result<()> {
        let group = group.to_string();
        self.request(|reply| Command::Poll { group, reply }).await?
    }

    /// Re-read the list of groups. Returns the names now tracked.
    pub async fn sync_groups(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::SyncGroups { reply: Some(reply) })
            .await?
    }

    pub async fn groups(&self) -> Result<Vec<GroupSummary>> {
        self.request(|reply| Command::Groups { reply }).await
    }

    /// Submit an operation and wait until it completes
    pub async fn submit(
        &self,
        group: &str,
        caller: CallerIdentity,
        operation: VolumeGroupOperation,
    ) -> Result<Resolution> {
        let group = group.to_string();
        self.request(|reply| Command::Operation {
            group,
            caller,
            operation,
            reply,
        })
        .await?
    }

    pub async fn delete(&self, group: &str, wipe: bool, caller: CallerIdentity) -> Result<()> {
        self.submit(group, caller, VolumeGroupOperation::Delete { wipe })
            .await
            .map(|_| ())
    }

    /// Rename a group. Resolves with the object path of the renamed group.
    pub async fn rename(&self, group: &str, new_name: &str, caller: CallerIdentity) -> Result<String> {
        let operation = VolumeGroupOperation::Rename {
            new_name: new_name.to_string(),
        };
        self.submit(group, caller, operation).await.map(object_path)
    }

    pub async fn add_device(&self, group: &str, block: &str, caller: CallerIdentity) -> Result<()> {
        let operation = VolumeGroupOperation::AddDevice {
            block: block.to_string(),
        };
        self.submit(group, caller, operation).await.map(|_| ())
    }

    pub async fn remove_device(
        &self,
        group: &str,
        block: &str,
        wipe: bool,
        caller: CallerIdentity,
    ) -> Result<()> {
        let operation = VolumeGroupOperation::RemoveDevice {
            block: block.to_string(),
            wipe,
        };
        self.submit(group, caller, operation).await.map(|_| ())
    }

    pub async fn empty_device(
        &self,
        group: &str,
        block: &str,
        background: bool,
        caller: CallerIdentity,
    ) -> Result<()> {
        let operation = VolumeGroupOperation::EmptyDevice {
            block: block.to_string(),
            background,
        };
        self.submit(group, caller, operation).await.map(|_| ())
    }

    /// Create a plain volume. Resolves with the new volume's object path.
    pub async fn create_plain_volume(
        &self,
        group: &str,
        name: &str,
        size: u64,
        stripes: u32,
        stripe_size: u64,
        caller: CallerIdentity,
    ) -> Result<String> {
        let operation = VolumeGroupOperation::CreatePlainVolume {
            name: name.to_string(),
            size,
            stripes,
            stripe_size,
        };
        self.submit(group, caller, operation).await.map(object_path)
    }

    pub async fn create_thin_pool_volume(
        &self,
        group: &str,
        name: &str,
        size: u64,
        caller: CallerIdentity,
    ) -> Result<String> {
        let operation = VolumeGroupOperation::CreateThinPoolVolume {
            name: name.to_string(),
            size,
        };
        self.submit(group, caller, operation).await.map(object_path)
    }

    pub async fn create_thin_volume(
        &self,
        group: &str,
        name: &str,
        size: u64,
        pool: &str,
        caller: CallerIdentity,
    ) -> Result<String> {
        let operation = VolumeGroupOperation::CreateThinVolume {
            name: name.to_string(),
            size,
            pool: pool.to_string(),
        };
        self.submit(group, caller, operation).await.map(object_path)
    }

    /// Stop the event loop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

fn object_path(resolution: Resolution) -> String {
    match resolution {
        Resolution::Published { object_path } => object_path,
        Resolution::Completed => String::new(),
    }
}
