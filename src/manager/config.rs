//! Manager configuration

use crate::publish::DEFAULT_OBJECT_ROOT;
use crate::scheduler::DEFAULT_POLL_INTERVAL;
use std::time::Duration;

/// Default interval between volume group rescans
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the volume group manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Refresh timer armed by every inventory fetch
    pub poll_interval: Duration,
    /// Interval between group rescans; `None` rescans only at startup and
    /// after rename or delete jobs
    pub rescan_interval: Option<Duration>,
    /// Object path root groups and volumes are published under
    pub object_root: String,
    /// Capacity of the request channel
    pub command_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            rescan_interval: Some(DEFAULT_RESCAN_INTERVAL),
            object_root: DEFAULT_OBJECT_ROOT.to_string(),
            command_capacity: 256,
        }
    }
}
