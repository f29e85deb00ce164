//! Entity Table
//!
//! Owning, name-keyed collection of the logical volumes of one volume group.
//! Membership in the table is what makes a volume "owned"; there are no back
//! references to the group.

use crate::inventory::FieldMap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashSet;

// =============================================================================
// Visibility Rules
// =============================================================================

/// Name fragments of volumes LVM keeps for its own bookkeeping
const INTERNAL_VOLUME_MARKERS: [&str; 6] = ["_mlog", "_mimage", "_rimage", "_rmeta", "_tdata", "_tmeta"];

/// Check if a volume is a pvmove temporary
pub fn is_pvmove_volume(name: &str) -> bool {
    name.starts_with("pvmove")
}

/// Check if a volume should be exposed to clients
pub fn is_visible_volume(name: &str) -> bool {
    !name.is_empty()
        && !INTERNAL_VOLUME_MARKERS.iter().any(|m| name.contains(m))
        && !is_pvmove_volume(name)
        && !name.starts_with("snapshot")
}

// =============================================================================
// Logical Volume
// =============================================================================

/// A logical volume tracked by its group
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalVolume {
    name: String,
    object_path: String,
    fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogicalVolume {
    pub fn new(name: impl Into<String>, object_path: impl Into<String>, fields: FieldMap) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            object_path: object_path.into(),
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Replace all fields with a new record. Returns whether anything changed.
    pub fn apply(&mut self, fields: &FieldMap) -> bool {
        if self.fields == *fields {
            return false;
        }
        self.fields = fields.clone();
        self.updated_at = Utc::now();
        true
    }
}

// =============================================================================
// Entity Table
// =============================================================================

/// Logical volumes of a group keyed by name, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    volumes: IndexMap<String, LogicalVolume>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&LogicalVolume> {
        self.volumes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LogicalVolume> {
        self.volumes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// Insert a volume. A volume with the same name is never replaced;
    /// returns false in that case.
    pub fn insert(&mut self, volume: LogicalVolume) -> bool {
        if self.volumes.contains_key(volume.name()) {
            return false;
        }
        self.volumes.insert(volume.name().to_string(), volume);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<LogicalVolume> {
        self.volumes.shift_remove(name)
    }

    /// Remove every volume whose name is not in `keep`, returning them in
    /// table order.
    pub fn remove_absent(&mut self, keep: &HashSet<String>) -> Vec<LogicalVolume> {
        let stale: Vec<String> = self
            .volumes
            .keys()
            .filter(|name| !keep.contains(*name))
            .cloned()
            .collect();
        stale.iter().filter_map(|name| self.remove(name)).collect()
    }

    /// Remove every volume
    pub fn drain(&mut self) -> Vec<LogicalVolume> {
        self.volumes.drain(..).map(|(_, v)| v).collect()
    }

    /// Find a volume by its object path
    pub fn find_by_path(&self, object_path: &str) -> Option<&LogicalVolume> {
        self.volumes.values().find(|v| v.object_path() == object_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogicalVolume> {
        self.volumes.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.volumes.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
