//! Publication Events
//!
//! Events emitted by the object publisher so that pending requests can react
//! to entities appearing or disappearing.

use serde::{Deserialize, Serialize};

/// Kind of entity exposed by the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    VolumeGroup,
    LogicalVolume,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::VolumeGroup => write!(f, "volume_group"),
            EntityKind::LogicalVolume => write!(f, "logical_volume"),
        }
    }
}

/// Identity of an externally visible entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEntity {
    pub kind: EntityKind,
    /// Entity name (encoded LVM name)
    pub name: String,
    /// Owning volume group name, for logical volumes
    pub owner: Option<String>,
    /// Object path the entity is exposed at
    pub object_path: String,
}

impl PublishedEntity {
    pub fn volume_group(name: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::VolumeGroup,
            name: name.into(),
            owner: None,
            object_path: object_path.into(),
        }
    }

    pub fn logical_volume(
        name: impl Into<String>,
        owner: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::LogicalVolume,
            name: name.into(),
            owner: Some(owner.into()),
            object_path: object_path.into(),
        }
    }
}

/// Events emitted by the publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PublicationEvent {
    /// An entity became visible
    Published(PublishedEntity),

    /// An entity's properties were replaced
    Updated { object_path: String },

    /// An entity stopped being visible
    Unpublished {
        kind: EntityKind,
        object_path: String,
    },
}

impl PublicationEvent {
    /// Get the object path associated with this event
    pub fn object_path(&self) -> &str {
        match self {
            PublicationEvent::Published(entity) => &entity.object_path,
            PublicationEvent::Updated { object_path } => object_path,
            PublicationEvent::Unpublished { object_path, .. } => object_path,
        }
    }

    /// Get the published entity if this is a publication
    pub fn published(&self) -> Option<&PublishedEntity> {
        match self {
            PublicationEvent::Published(entity) => Some(entity),
            _ => None,
        }
    }
}
