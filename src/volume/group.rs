//! Volume Group
//!
//! In-memory model of one volume group: its scalar properties, publication
//! state and the table of logical volumes it owns.

use super::entity_table::EntityTable;
use crate::domain::ports::NameCodec;
use crate::inventory::{
    FieldLookup, FieldMap, FIELD_EXTENT_SIZE, FIELD_FREE_SIZE, FIELD_NAME, FIELD_SIZE, FIELD_UUID,
};
use crate::publish::{group_object_path, volume_object_path};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Scalar properties of a volume group, taken from the latest snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProperties {
    pub display_name: Option<String>,
    pub uuid: Option<String>,
    pub size: u64,
    pub free_size: u64,
    pub extent_size: u64,
    pub needs_polling: bool,
}

/// A volume group and the logical volumes it owns
#[derive(Debug)]
pub struct VolumeGroup {
    name: String,
    object_root: String,
    object_path: String,
    properties: GroupProperties,
    published: bool,
    volumes: EntityTable,
    pub last_synced: Option<DateTime<Utc>>,
}

impl VolumeGroup {
    /// Create a publish-pending group
    pub fn new(name: impl Into<String>, object_root: impl Into<String>) -> Self {
        let name = name.into();
        let object_root = object_root.into();
        let object_path = group_object_path(&object_root, &name);
        Self {
            name,
            object_root,
            object_path,
            properties: GroupProperties::default(),
            published: false,
            volumes: EntityTable::new(),
            last_synced: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Object path a logical volume of this group is published at
    pub fn volume_path(&self, volume: &str) -> String {
        volume_object_path(&self.object_root, &self.name, volume)
    }

    pub fn properties(&self) -> &GroupProperties {
        &self.properties
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Mark as published. Returns false if it already was.
    pub fn mark_published(&mut self) -> bool {
        !std::mem::replace(&mut self.published, true)
    }

    pub fn volumes(&self) -> &EntityTable {
        &self.volumes
    }

    pub fn volumes_mut(&mut self) -> &mut EntityTable {
        &mut self.volumes
    }

    /// Apply group-level snapshot fields. Missing fields keep their value.
    pub fn apply_fields(&mut self, fields: &FieldMap, names: &dyn NameCodec) {
        if let Some(name) = fields.str_field(FIELD_NAME) {
            self.properties.display_name = Some(names.decode(name));
        }
        if let Some(uuid) = fields.str_field(FIELD_UUID) {
            self.properties.uuid = Some(uuid.to_string());
        }
        if let Some(size) = fields.u64_field(FIELD_SIZE) {
            self.properties.size = size;
        }
        if let Some(free) = fields.u64_field(FIELD_FREE_SIZE) {
            self.properties.free_size = free;
        }
        if let Some(extent) = fields.u64_field(FIELD_EXTENT_SIZE) {
            self.properties.extent_size = extent;
        }
    }

    pub fn set_needs_polling(&mut self, needs_polling: bool) {
        self.properties.needs_polling = needs_polling;
    }

    /// Properties as exposed to clients
    pub fn property_map(&self) -> FieldMap {
        let p = &self.properties;
        let mut map = FieldMap::new();
        map.insert("name".into(), json!(self.name));
        map.insert("display-name".into(), json!(p.display_name));
        map.insert("uuid".into(), json!(p.uuid));
        map.insert("size".into(), json!(p.size));
        map.insert("free-size".into(), json!(p.free_size));
        map.insert("extent-size".into(), json!(p.extent_size));
        map.insert("needs-polling".into(), json!(p.needs_polling));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PassthroughNames;

    #[test]
    fn test_missing_fields_keep_previous_values() {
        let mut group = VolumeGroup::new("vg0", "/lvm");
        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!("vg0"));
        fields.insert("size".into(), json!(4096));
        fields.insert("free-size".into(), json!(1024));
        group.apply_fields(&fields, &PassthroughNames);

        let mut partial = FieldMap::new();
        partial.insert("free-size".into(), json!(512));
        group.apply_fields(&partial, &PassthroughNames);

        let props = group.properties();
        assert_eq!(props.display_name.as_deref(), Some("vg0"));
        assert_eq!(props.size, 4096);
        assert_eq!(props.free_size, 512);
    }

    #[test]
    fn test_published_once() {
        let mut group = VolumeGroup::new("vg0", "/lvm");
        assert!(!group.is_published());
        assert!(group.mark_published());
        assert!(!group.mark_published());
        assert_eq!(group.object_path(), "/lvm/vg0");
        assert_eq!(group.volume_path("root"), "/lvm/vg0/root");
    }
}
