//! Sysfs Block Directory
//!
//! Enumerates block devices from sysfs, resolves their alias paths from the
//! `/dev` symlink farms and reads device-mapper names for LVM-backed blocks.
//! Volume group associations are held in memory and survive rescans.

use crate::domain::ports::{BlockDevice, BlockDeviceDirectory, PhysicalVolumeAssociation};
use crate::error::{Error, Result};
use crate::publish::escape_path_element;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Object path root blocks are exposed under
pub const DEFAULT_BLOCK_ROOT: &str = "/org/freedesktop/UDisks2/block_devices";

/// Alias directories under `/dev`, in lookup order
const ALIAS_DIRS: [&str; 6] = [
    "disk/by-id",
    "disk/by-path",
    "disk/by-uuid",
    "disk/by-label",
    "disk/by-partuuid",
    "mapper",
];

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the sysfs block directory
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Path to the device directory (for testing)
    pub dev_path: PathBuf,
    /// Mount table used by the unused check
    pub mounts_path: PathBuf,
    /// Include loopback devices
    pub include_loopback: bool,
    /// Object path root for blocks
    pub object_root: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            sysfs_path: PathBuf::from("/sys"),
            dev_path: PathBuf::from("/dev"),
            mounts_path: PathBuf::from("/proc/mounts"),
            include_loopback: false,
            object_root: DEFAULT_BLOCK_ROOT.to_string(),
        }
    }
}

// =============================================================================
// Device-Mapper Names
// =============================================================================

/// Split a device-mapper name like `vg--data-lv0` into `("vg-data", "lv0")`.
///
/// LVM doubles every dash inside the group and volume names, so the separator
/// is the first single dash.
pub fn split_dm_name(dm_name: &str) -> Option<(String, String)> {
    let bytes = dm_name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            if bytes.get(i + 1) == Some(&b'-') {
                i += 2;
                continue;
            }
            let vg = dm_name[..i].replace("--", "-");
            let lv = dm_name[i + 1..].replace("--", "-");
            if vg.is_empty() || lv.is_empty() {
                return None;
            }
            return Some((vg, lv));
        }
        i += 1;
    }
    None
}

// =============================================================================
// Sysfs Block Directory
// =============================================================================

/// Block directory backed by sysfs
pub struct SysfsBlockDirectory {
    config: DirectoryConfig,
    blocks: RwLock<BTreeMap<String, BlockDevice>>,
    volumes: RwLock<HashMap<String, String>>,
    members: RwLock<HashMap<String, PhysicalVolumeAssociation>>,
}

impl SysfsBlockDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            blocks: RwLock::new(BTreeMap::new()),
            volumes: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Re-read the set of block devices. Returns how many were found.
    pub fn rescan(&self) -> Result<usize> {
        let block_path = self.config.sysfs_path.join("class/block");
        if !block_path.exists() {
            return Err(Error::Configuration(format!(
                "Block device sysfs not found at {}",
                block_path.display()
            )));
        }

        let aliases = self.collect_aliases();
        let mut found = BTreeMap::new();

        for entry in fs::read_dir(&block_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.should_include_device(&name) {
                continue;
            }

            let object_path = format!(
                "{}/{}",
                self.config.object_root.trim_end_matches('/'),
                escape_path_element(&name)
            );
            let (dm_vg_name, dm_lv_name) = match self.read_dm_name(&entry.path()) {
                Some((vg, lv)) => (Some(vg), Some(lv)),
                None => (None, None),
            };

            let block = BlockDevice {
                device: self.config.dev_path.join(&name).to_string_lossy().to_string(),
                symlinks: aliases.get(&name).cloned().unwrap_or_default(),
                dm_vg_name,
                dm_lv_name,
                physical_volume_group: None,
                object_path: object_path.clone(),
            };
            found.insert(object_path, block);
        }
        let count = found.len();
        *self.blocks.write() = found;
        info!("Found {} block devices", count);
        Ok(count)
    }

    /// Logical volume a block is associated with
    pub fn logical_volume_of(&self, object_path: &str) -> Option<String> {
        self.volumes.read().get(object_path).cloned()
    }

    /// Physical volume association of a block
    pub fn member_of(&self, object_path: &str) -> Option<PhysicalVolumeAssociation> {
        self.members.read().get(object_path).cloned()
    }

    /// Fill in the membership recorded for `block`
    fn with_membership(&self, mut block: BlockDevice) -> BlockDevice {
        block.physical_volume_group = self
            .members
            .read()
            .get(&block.object_path)
            .map(|m| m.group_path.clone());
        block
    }

    /// Alias paths keyed by kernel device name
    fn collect_aliases(&self) -> HashMap<String, Vec<String>> {
        let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
        for dir in ALIAS_DIRS {
            let path = self.config.dev_path.join(dir);
            let Ok(entries) = fs::read_dir(&path) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(target) = fs::read_link(entry.path()) else {
                    continue;
                };
                if let Some(name) = target.file_name() {
                    aliases
                        .entry(name.to_string_lossy().to_string())
                        .or_default()
                        .push(entry.path().to_string_lossy().to_string());
                }
            }
        }
        for list in aliases.values_mut() {
            list.sort();
        }
        aliases
    }

    fn read_dm_name(&self, sysfs_path: &Path) -> Option<(String, String)> {
        let uuid = fs::read_to_string(sysfs_path.join("dm/uuid")).ok()?;
        if !uuid.starts_with("LVM-") {
            return None;
        }
        let name = fs::read_to_string(sysfs_path.join("dm/name")).ok()?;
        split_dm_name(name.trim())
    }

    fn should_include_device(&self, name: &str) -> bool {
        if !self.config.include_loopback && name.starts_with("loop") {
            return false;
        }
        !(name.starts_with("ram") || name.starts_with("zram"))
    }

    fn kernel_name(device: &str) -> Option<String> {
        Path::new(device)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    fn has_holders(&self, device: &str) -> bool {
        let Some(name) = Self::kernel_name(device) else {
            return false;
        };
        let holders = self.config.sysfs_path.join("class/block").join(name).join("holders");
        fs::read_dir(holders)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    fn is_mounted(&self, block: &BlockDevice) -> bool {
        let Ok(mounts) = fs::read_to_string(&self.config.mounts_path) else {
            return false;
        };
        mounts
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|source| block.matches_path(source))
    }
}

#[async_trait]
impl BlockDeviceDirectory for SysfsBlockDirectory {
    fn list_block_devices(&self) -> Vec<BlockDevice> {
        let blocks: Vec<BlockDevice> = self.blocks.read().values().cloned().collect();
        blocks
            .into_iter()
            .map(|block| self.with_membership(block))
            .collect()
    }

    fn find(&self, object_path: &str) -> Option<BlockDevice> {
        let block = self.blocks.read().get(object_path).cloned();
        block.map(|block| self.with_membership(block))
    }

    // Membership lives only in `members`; rescans never touch it.
    fn set_physical_volume(&self, object_path: &str, association: Option<PhysicalVolumeAssociation>) {
        let mut members = self.members.write();
        match association {
            Some(association) => {
                members.insert(object_path.to_string(), association);
            }
            None => {
                members.remove(object_path);
            }
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
        let reason = if self.is_mounted(block) {
            Some("mounted")
        } else if self.has_holders(&block.device) {
            Some("held by another device")
        } else if block.physical_volume_group.is_some()
            || self.members.read().contains_key(&block.object_path)
        {
            Some("already a physical volume")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::DeviceInUse {
                device: block.device.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn wipe(&self, device: &str) -> Result<()> {
        debug!("Wiping {}", device);
        let output = Command::new("wipefs")
            .args(["-a", device])
            .output()
            .await
            .map_err(|e| Error::WipeFailed {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("wipefs on {} failed: {}", device, reason);
            return Err(Error::WipeFailed {
                device: device.to_string(),
                reason,
            });
        }
        Ok(())
    }
}
