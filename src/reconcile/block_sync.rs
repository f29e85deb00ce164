//! Block Association Sync
//!
//! After a group is reconciled, point every known block at the logical volume
//! it exposes and at the group it is a physical volume of, and clear
//! associations the latest snapshot no longer backs.

use crate::domain::ports::{BlockDevice, BlockDeviceDirectory, PhysicalVolumeAssociation};
use crate::inventory::FieldMap;
use crate::volume::VolumeGroup;
use std::collections::BTreeMap;
use tracing::debug;

/// Counts of association changes made by one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSyncReport {
    pub volumes_linked: usize,
    /// Mapper blocks of this group whose volume is no longer tracked
    pub volumes_unlinked: usize,
    pub members_associated: usize,
    pub members_cleared: usize,
}

/// Find the physical volume record for a block, by primary path then alias
fn find_member_record<'a>(
    block: &BlockDevice,
    pvs: &'a BTreeMap<String, FieldMap>,
) -> Option<&'a FieldMap> {
    block.all_paths().find_map(|path| pvs.get(path))
}

/// Sync block associations for one group against its physical volume records
pub fn sync_block_associations(
    blocks: &dyn BlockDeviceDirectory,
    group: &VolumeGroup,
    pvs: &BTreeMap<String, FieldMap>,
) -> BlockSyncReport {
    let mut report = BlockSyncReport::default();

    for block in blocks.list_block_devices() {
        if block.dm_vg_name.as_deref() == Some(group.name()) {
            match block
                .dm_lv_name
                .as_deref()
                .and_then(|name| group.volumes().get(name))
            {
                Some(volume) => {
                    blocks.set_logical_volume(&block.object_path, Some(volume.object_path()));
                    report.volumes_linked += 1;
                }
                None => {
                    blocks.set_logical_volume(&block.object_path, None);
                    report.volumes_unlinked += 1;
                }
            }
        }

        match find_member_record(&block, pvs) {
            Some(record) => {
                blocks.set_physical_volume(
                    &block.object_path,
                    Some(PhysicalVolumeAssociation {
                        group_path: group.object_path().to_string(),
                        record: record.clone(),
                    }),
                );
                report.members_associated += 1;
            }
            None if block.physical_volume_group.as_deref() == Some(group.object_path()) => {
                debug!("{} is no longer a member of {}", block.device, group.name());
                blocks.set_physical_volume(&block.object_path, None);
                report.members_cleared += 1;
            }
            None => {}
        }
    }

    report
}

/// Clear the association of every block that is a member of `group_path`
pub fn clear_group_members(blocks: &dyn BlockDeviceDirectory, group_path: &str) -> usize {
    let mut cleared = 0;
    for block in blocks.list_block_devices() {
        if block.physical_volume_group.as_deref() == Some(group_path) {
            blocks.set_physical_volume(&block.object_path, None);
            cleared += 1;
        }
    }
    cleared
}

/// Clear the volume link of every mapper block belonging to `group_name`
pub fn clear_group_volumes(blocks: &dyn BlockDeviceDirectory, group_name: &str) -> usize {
    let mut cleared = 0;
    for block in blocks.list_block_devices() {
        if block.dm_vg_name.as_deref() == Some(group_name) {
            blocks.set_logical_volume(&block.object_path, None);
            cleared += 1;
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticBlockDirectory;
    use crate::volume::LogicalVolume;
    use serde_json::json;

    fn pv_records(devices: &[&str]) -> BTreeMap<String, FieldMap> {
        devices
            .iter()
            .map(|d| {
                let mut record = FieldMap::new();
                record.insert("device".into(), json!(d));
                (d.to_string(), record)
            })
            .collect()
    }

    #[test]
    fn test_member_found_by_alias() {
        let blocks = StaticBlockDirectory::new(vec![BlockDevice {
            object_path: "/block/sdb".into(),
            device: "/dev/sdb".into(),
            symlinks: vec!["/dev/disk/by-path/pci-0000:00:1f.2-ata-2".into()],
            ..Default::default()
        }]);
        let group = VolumeGroup::new("vg0", "/lvm");

        let report = sync_block_associations(
            &blocks,
            &group,
            &pv_records(&["/dev/disk/by-path/pci-0000:00:1f.2-ata-2"]),
        );

        assert_eq!(report.members_associated, 1);
        let block = blocks.find("/block/sdb").unwrap();
        assert_eq!(block.physical_volume_group.as_deref(), Some("/lvm/vg0"));
    }

    #[test]
    fn test_stale_member_cleared_only_for_own_group() {
        let blocks = StaticBlockDirectory::new(vec![
            BlockDevice {
                object_path: "/block/sdb".into(),
                device: "/dev/sdb".into(),
                physical_volume_group: Some("/lvm/vg0".into()),
                ..Default::default()
            },
            BlockDevice {
                object_path: "/block/sdc".into(),
                device: "/dev/sdc".into(),
                physical_volume_group: Some("/lvm/vg1".into()),
                ..Default::default()
            },
        ]);
        let group = VolumeGroup::new("vg0", "/lvm");

        let report = sync_block_associations(&blocks, &group, &BTreeMap::new());

        assert_eq!(report.members_cleared, 1);
        assert_eq!(blocks.find("/block/sdb").unwrap().physical_volume_group, None);
        assert_eq!(
            blocks.find("/block/sdc").unwrap().physical_volume_group.as_deref(),
            Some("/lvm/vg1")
        );
    }

    #[test]
    fn test_mapper_block_linked_to_volume() {
        let blocks = StaticBlockDirectory::new(vec![BlockDevice {
            object_path: "/block/dm_2d0".into(),
            device: "/dev/dm-0".into(),
            dm_vg_name: Some("vg0".into()),
            dm_lv_name: Some("root".into()),
            ..Default::default()
        }]);
        let mut group = VolumeGroup::new("vg0", "/lvm");
        let path = group.volume_path("root");
        group
            .volumes_mut()
            .insert(LogicalVolume::new("root", path, FieldMap::new()));

        let report = sync_block_associations(&blocks, &group, &BTreeMap::new());

        assert_eq!(report.volumes_linked, 1);
        assert_eq!(blocks.logical_volume_of("/block/dm_2d0").as_deref(), Some("/lvm/vg0/root"));
    }

    #[test]
    fn test_clear_group_members() {
        let blocks = StaticBlockDirectory::new(vec![BlockDevice {
            object_path: "/block/sdb".into(),
            device: "/dev/sdb".into(),
            physical_volume_group: Some("/lvm/vg0".into()),
            ..Default::default()
        }]);

        assert_eq!(clear_group_members(&blocks, "/lvm/vg0"), 1);
        assert_eq!(clear_group_members(&blocks, "/lvm/vg0"), 0);
    }

    #[test]
    fn test_removed_volume_unlinked_from_mapper_block() {
        let blocks = StaticBlockDirectory::new(vec![BlockDevice {
            object_path: "/block/dm_2d0".into(),
            device: "/dev/dm-0".into(),
            dm_vg_name: Some("vg0".into()),
            dm_lv_name: Some("root".into()),
            ..Default::default()
        }]);
        let mut group = VolumeGroup::new("vg0", "/lvm");
        let path = group.volume_path("root");
        group
            .volumes_mut()
            .insert(LogicalVolume::new("root", path, FieldMap::new()));
        sync_block_associations(&blocks, &group, &BTreeMap::new());
        assert!(blocks.logical_volume_of("/block/dm_2d0").is_some());

        group.volumes_mut().remove("root");
        let report = sync_block_associations(&blocks, &group, &BTreeMap::new());

        assert_eq!(report.volumes_linked, 0);
        assert_eq!(report.volumes_unlinked, 1);
        assert_eq!(blocks.logical_volume_of("/block/dm_2d0"), None);
    }

    #[test]
    fn test_clear_group_volumes_only_touches_own_group() {
        let blocks = StaticBlockDirectory::new(vec![
            BlockDevice {
                object_path: "/block/dm_2d0".into(),
                dm_vg_name: Some("vg0".into()),
                dm_lv_name: Some("root".into()),
                ..Default::default()
            },
            BlockDevice {
                object_path: "/block/dm_2d1".into(),
                dm_vg_name: Some("vg1".into()),
                dm_lv_name: Some("root".into()),
                ..Default::default()
            },
        ]);
        blocks.set_logical_volume("/block/dm_2d0", Some("/lvm/vg0/root"));
        blocks.set_logical_volume("/block/dm_2d1", Some("/lvm/vg1/root"));

        assert_eq!(clear_group_volumes(&blocks, "vg0"), 1);
        assert_eq!(blocks.logical_volume_of("/block/dm_2d0"), None);
        assert_eq!(blocks.logical_volume_of("/block/dm_2d1").as_deref(), Some("/lvm/vg1/root"));
    }
}
