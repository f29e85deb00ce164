//! Progress Tracker
//!
//! Attributes the progress of a data-move operation to the pending job that
//! represents it. The move reports its device by its own path convention, so
//! each job target is resolved through the block directory by primary path
//! and then by alias.

use crate::domain::ports::{BlockDeviceDirectory, JobRegistry, OperationTag};
use std::sync::Arc;
use tracing::debug;

/// Scale of the copy-percent value reported for moves (parts per 1e8)
pub const COPY_PERCENT_SCALE: f64 = 100_000_000.0;

/// Normalize a reported copy-percent into a fraction in [0.0, 1.0]
pub fn fraction_from_copy_percent(copy_percent: u64) -> f64 {
    (copy_percent as f64 / COPY_PERCENT_SCALE).clamp(0.0, 1.0)
}

/// Maps move progress onto pending jobs
pub struct ProgressTracker {
    jobs: Arc<dyn JobRegistry>,
    blocks: Arc<dyn BlockDeviceDirectory>,
}

impl ProgressTracker {
    pub fn new(jobs: Arc<dyn JobRegistry>, blocks: Arc<dyn BlockDeviceDirectory>) -> Self {
        Self { jobs, blocks }
    }

    /// Set `fraction` on every job of kind `operation` that targets `device`.
    /// Returns the number of jobs updated.
    pub fn attribute_progress(&self, operation: OperationTag, device: &str, fraction: f64) -> usize {
        let mut updated = 0;
        for job in self.jobs.active_jobs(operation) {
            let targets_device = job.objects.iter().any(|object| {
                self.blocks
                    .find(object)
                    .map(|block| block.device == device || block.symlinks.iter().any(|s| s == device))
                    .unwrap_or(false)
            });
            if targets_device {
                job.set_progress(fraction);
                updated += 1;
                debug!("{} progress for {} set to {:.3}", job.id, device, fraction);
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::BlockDevice;
    use crate::jobs::JobTable;
    use crate::test_support::StaticBlockDirectory;

    fn sdb() -> BlockDevice {
        BlockDevice {
            object_path: "/block/sdb".into(),
            device: "/dev/sdb".into(),
            symlinks: vec!["/dev/disk/by-id/wwn-0x5000".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_copy_percent_normalization() {
        assert!((fraction_from_copy_percent(50_000_000) - 0.5).abs() < 1e-6);
        assert_eq!(fraction_from_copy_percent(0), 0.0);
        assert_eq!(fraction_from_copy_percent(250_000_000), 1.0);
    }

    #[test]
    fn test_attributes_by_primary_path() {
        let jobs = JobTable::new();
        let blocks = Arc::new(StaticBlockDirectory::new(vec![sdb()]));
        let job = jobs.start(OperationTag::EmptyDevice, vec!["/block/sdb".into()]);
        let tracker = ProgressTracker::new(jobs.clone(), blocks);

        let updated = tracker.attribute_progress(
            OperationTag::EmptyDevice,
            "/dev/sdb",
            fraction_from_copy_percent(50_000_000),
        );

        assert_eq!(updated, 1);
        let progress = job.progress();
        assert!(progress.valid);
        assert!((progress.fraction - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_attributes_by_alias() {
        let jobs = JobTable::new();
        let blocks = Arc::new(StaticBlockDirectory::new(vec![sdb()]));
        let job = jobs.start(OperationTag::EmptyDevice, vec!["/block/sdb".into()]);
        let tracker = ProgressTracker::new(jobs.clone(), blocks);

        assert_eq!(
            tracker.attribute_progress(OperationTag::EmptyDevice, "/dev/disk/by-id/wwn-0x5000", 0.25),
            1
        );
        assert!((job.progress().fraction - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_other_operations_and_devices_untouched() {
        let jobs = JobTable::new();
        let blocks = Arc::new(StaticBlockDirectory::new(vec![sdb()]));
        let removal = jobs.start(OperationTag::RemoveDevice, vec!["/block/sdb".into()]);
        let unknown = jobs.start(OperationTag::EmptyDevice, vec!["/block/missing".into()]);
        let tracker = ProgressTracker::new(jobs.clone(), blocks);

        assert_eq!(tracker.attribute_progress(OperationTag::EmptyDevice, "/dev/sdb", 0.5), 0);
        assert!(!removal.progress().valid);
        assert!(!unknown.progress().valid);
    }
}
