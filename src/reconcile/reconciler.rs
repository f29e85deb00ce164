//! Snapshot Reconciler
//!
//! Turns an inventory snapshot into create / update / remove operations on a
//! volume group's logical volumes. The order of steps is fixed: group fields,
//! group publication, per-volume create or update, stale removal, then block
//! associations. Clients therefore never see a volume before its group or a
//! volume that the latest snapshot no longer reports.

use super::block_sync::{
    clear_group_members, clear_group_volumes, sync_block_associations, BlockSyncReport,
};
use super::progress::{fraction_from_copy_percent, ProgressTracker};
use crate::domain::ports::{BlockDeviceDirectory, NameCodec, ObjectPublisher, OperationTag};
use crate::inventory::{
    record_name, FieldLookup, FieldMap, InventorySnapshot, FIELD_COPY_PERCENT, FIELD_MOVE_PV,
};
use crate::publish::PublishedEntity;
use crate::volume::{is_pvmove_volume, is_visible_volume, LogicalVolume, VolumeGroup};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one reconcile pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// A move is in progress and the group should keep being polled
    pub needs_polling: bool,
    pub group_published: bool,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    /// Records dropped for missing required fields
    pub skipped: usize,
    pub progress_updates: usize,
    pub blocks: BlockSyncReport,
}

/// Applies snapshots to volume groups
pub struct SnapshotReconciler {
    publisher: Arc<dyn ObjectPublisher>,
    blocks: Arc<dyn BlockDeviceDirectory>,
    names: Arc<dyn NameCodec>,
    progress: ProgressTracker,
}

impl SnapshotReconciler {
    pub fn new(
        publisher: Arc<dyn ObjectPublisher>,
        blocks: Arc<dyn BlockDeviceDirectory>,
        names: Arc<dyn NameCodec>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            publisher,
            blocks,
            names,
            progress,
        }
    }

    /// Publish the group if it has never been published. Returns whether a
    /// publication happened.
    pub fn publish_pending(&self, group: &mut VolumeGroup) -> bool {
        if !group.mark_published() {
            return false;
        }
        info!("Publishing volume group {} at {}", group.name(), group.object_path());
        self.publisher.publish(
            PublishedEntity::volume_group(group.name(), group.object_path()),
            group.property_map(),
        );
        true
    }

    /// Apply one snapshot to `group`
    pub fn reconcile(&self, group: &mut VolumeGroup, snapshot: &InventorySnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        group.apply_fields(&snapshot.group, self.names.as_ref());
        report.group_published = self.publish_pending(group);

        let mut seen = HashSet::with_capacity(snapshot.logical_volumes.len());
        for record in &snapshot.logical_volumes {
            let name = match record_name(record) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping record in {}: {}", group.name(), e);
                    report.skipped += 1;
                    continue;
                }
            };

            if is_pvmove_volume(name) {
                report.needs_polling = true;
                report.progress_updates += self.track_move(record);
            }

            if !is_visible_volume(name) {
                continue;
            }
            seen.insert(name.to_string());
            self.apply_volume(group, name, record, &mut report);
        }

        for volume in group.volumes_mut().remove_absent(&seen) {
            info!("Removing logical volume {}/{}", group.name(), volume.name());
            self.publisher.unpublish(volume.object_path());
            report.removed += 1;
        }

        group.set_needs_polling(report.needs_polling);
        self.publisher
            .update_properties(group.object_path(), group.property_map());

        let (pvs, skipped_pvs) = snapshot.physical_volumes_by_device();
        if skipped_pvs > 0 {
            warn!(
                "Skipping {} physical volume records without a device in {}",
                skipped_pvs,
                group.name()
            );
            report.skipped += skipped_pvs;
        }
        report.blocks = sync_block_associations(self.blocks.as_ref(), group, &pvs);
        group.last_synced = Some(Utc::now());

        debug!(
            "Reconciled {}: {} created, {} updated, {} removed, {} skipped",
            group.name(),
            report.created,
            report.updated,
            report.removed,
            report.skipped
        );
        report
    }

    /// Unpublish every volume of the group, then the group itself
    pub fn teardown(&self, group: &mut VolumeGroup) {
        for volume in group.volumes_mut().drain() {
            self.publisher.unpublish(volume.object_path());
        }
        clear_group_members(self.blocks.as_ref(), group.object_path());
        clear_group_volumes(self.blocks.as_ref(), group.name());
        if group.is_published() {
            info!("Unpublishing volume group {}", group.name());
            self.publisher.unpublish(group.object_path());
        }
    }

    fn track_move(&self, record: &FieldMap) -> usize {
        match (
            record.str_field(FIELD_MOVE_PV),
            record.u64_field(FIELD_COPY_PERCENT),
        ) {
            (Some(device), Some(copy_percent)) => self.progress.attribute_progress(
                OperationTag::EmptyDevice,
                device,
                fraction_from_copy_percent(copy_percent),
            ),
            _ => 0,
        }
    }

    fn apply_volume(
        &self,
        group: &mut VolumeGroup,
        name: &str,
        record: &FieldMap,
        report: &mut ReconcileReport,
    ) {
        let group_name = group.name().to_string();
        let group_path = group.object_path().to_string();

        if let Some(volume) = group.volumes_mut().get_mut(name) {
            if volume.apply(record) {
                self.publisher
                    .update_properties(volume.object_path(), volume_properties(&group_path, record));
                report.updated += 1;
            }
            return;
        }

        let volume = LogicalVolume::new(name, group.volume_path(name), record.clone());
        debug!("Creating logical volume {}/{}", group_name, name);
        self.publisher.publish(
            PublishedEntity::logical_volume(name, &group_name, volume.object_path()),
            volume_properties(&group_path, record),
        );
        group.volumes_mut().insert(volume);
        report.created += 1;
    }
}

/// Properties of a logical volume as exposed to clients
fn volume_properties(group_path: &str, record: &FieldMap) -> FieldMap {
    let mut properties = record.clone();
    properties.insert("volume-group".into(), json!(group_path));
    properties
}
