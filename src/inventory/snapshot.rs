//! Inventory Snapshot
//!
//! One point-in-time dump of a volume group as reported by the inventory
//! helper: group-level fields, per logical volume records and per physical
//! volume records.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form record of named, typed fields
pub type FieldMap = BTreeMap<String, Value>;

// =============================================================================
// Field Names
// =============================================================================

pub const FIELD_NAME: &str = "name";
pub const FIELD_UUID: &str = "uuid";
pub const FIELD_SIZE: &str = "size";
pub const FIELD_FREE_SIZE: &str = "free-size";
pub const FIELD_EXTENT_SIZE: &str = "extent-size";
pub const FIELD_MOVE_PV: &str = "move_pv";
pub const FIELD_COPY_PERCENT: &str = "copy_percent";
pub const FIELD_DEVICE: &str = "device";

/// Typed accessors over a [`FieldMap`]
pub trait FieldLookup {
    /// Get a string field
    fn str_field(&self, key: &str) -> Option<&str>;

    /// Get an unsigned integer field
    fn u64_field(&self, key: &str) -> Option<u64>;
}

impl FieldLookup for FieldMap {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn u64_field(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// =============================================================================
// Inventory Snapshot
// =============================================================================

/// Result of a single inventory fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Group-level fields
    #[serde(flatten)]
    pub group: FieldMap,
    /// Logical volume records, in helper order
    #[serde(default, rename = "lvs")]
    pub logical_volumes: Vec<FieldMap>,
    /// Physical volume records, in helper order
    #[serde(default, rename = "pvs")]
    pub physical_volumes: Vec<FieldMap>,
}

impl InventorySnapshot {
    /// Decode a snapshot from the helper's JSON output
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build a snapshot from explicit parts
    pub fn new(
        group: FieldMap,
        logical_volumes: Vec<FieldMap>,
        physical_volumes: Vec<FieldMap>,
    ) -> Self {
        Self {
            group,
            logical_volumes,
            physical_volumes,
        }
    }

    /// Physical volume records keyed by device path.
    ///
    /// Records without a device field are dropped.
    pub fn physical_volumes_by_device(&self) -> (BTreeMap<String, FieldMap>, usize) {
        let mut by_device = BTreeMap::new();
        let mut skipped = 0;
        for record in &self.physical_volumes {
            match record.str_field(FIELD_DEVICE) {
                Some(device) => {
                    by_device.insert(device.to_string(), record.clone());
                }
                None => skipped += 1,
            }
        }
        (by_device, skipped)
    }
}

/// Name of a logical volume record, or a record-level error
pub fn record_name(record: &FieldMap) -> Result<&str> {
    record.str_field(FIELD_NAME).ok_or(Error::MalformedRecord {
        kind: "logical volume",
        field: FIELD_NAME,
    })
}

/// Decode the helper's group listing
pub fn group_names_from_json(bytes: &[u8]) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Listing {
        Names(Vec<String>),
        Records(Vec<FieldMap>),
    }

    let names = match serde_json::from_slice::<Listing>(bytes)? {
        Listing::Names(names) => names,
        Listing::Records(records) => records
            .iter()
            .filter_map(|r| r.str_field(FIELD_NAME).map(str::to_string))
            .collect(),
    };
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_helper_output() {
        let raw = json!({
            "name": "vg0",
            "uuid": "Xk2l-abcd",
            "size": 10737418240u64,
            "free-size": 4294967296u64,
            "extent-size": 4194304,
            "lvs": [
                { "name": "root", "size": 2147483648u64 },
                { "name": "pvmove0", "move_pv": "/dev/sdb", "copy_percent": 50000000 }
            ],
            "pvs": [ { "device": "/dev/sda" }, { "size": 1 } ]
        });
        let snapshot = InventorySnapshot::from_json(raw.to_string().as_bytes()).unwrap();

        assert_eq!(snapshot.group.str_field(FIELD_NAME), Some("vg0"));
        assert_eq!(snapshot.group.u64_field(FIELD_EXTENT_SIZE), Some(4194304));
        assert!(!snapshot.group.contains_key("lvs"));
        assert_eq!(snapshot.logical_volumes.len(), 2);

        let (pvs, skipped) = snapshot.physical_volumes_by_device();
        assert!(pvs.contains_key("/dev/sda"));
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let mut record = FieldMap::new();
        record.insert("size".into(), json!("1024"));
        assert_eq!(record.u64_field("size"), Some(1024));
        assert_eq!(record.str_field("size"), Some("1024"));
    }

    #[test]
    fn test_record_name_missing() {
        let record = FieldMap::new();
        assert!(matches!(
            record_name(&record),
            Err(Error::MalformedRecord { field: "name", .. })
        ));
    }

    #[test]
    fn test_group_listing_forms() {
        let names = group_names_from_json(br#"["vg0","vg1"]"#).unwrap();
        assert_eq!(names, vec!["vg0", "vg1"]);

        let names = group_names_from_json(br#"[{"name":"vg0"},{"uuid":"x"}]"#).unwrap();
        assert_eq!(names, vec!["vg0"]);
    }
}
