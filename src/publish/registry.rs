//! Object Registry
//!
//! In-memory object publisher. Keeps the set of exposed entities keyed by
//! object path and broadcasts publication events to subscribers.

use super::{PublicationEvent, PublishedEntity};
use crate::domain::ports::ObjectPublisher;
use crate::inventory::FieldMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the publication event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Published Object
// =============================================================================

/// An entity exposed by the registry
#[derive(Debug, Clone)]
pub struct PublishedObject {
    pub entity: PublishedEntity,
    pub properties: FieldMap,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Counters for publication activity
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub publications: AtomicU64,
    pub unpublications: AtomicU64,
    pub updates: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub objects: u64,
    pub publications: u64,
    pub unpublications: u64,
    pub updates: u64,
}

// =============================================================================
// Object Registry
// =============================================================================

/// In-memory publisher backed by a path-keyed map
pub struct ObjectRegistry {
    objects: RwLock<HashMap<String, PublishedObject>>,
    stats: RegistryStats,
    event_sender: broadcast::Sender<PublicationEvent>,
}

impl ObjectRegistry {
    /// Create a new registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_capacity(DEFAULT_EVENT_CAPACITY))
    }

    /// Create a registry with a specific event channel capacity
    pub fn with_capacity(event_capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(event_capacity);
        Self {
            objects: RwLock::new(HashMap::new()),
            stats: RegistryStats::default(),
            event_sender,
        }
    }

    /// Get a published object by path
    pub fn get(&self, object_path: &str) -> Option<PublishedObject> {
        self.objects.read().get(object_path).cloned()
    }

    /// Check if an object path is published
    pub fn contains(&self, object_path: &str) -> bool {
        self.objects.read().contains_key(object_path)
    }

    /// Get all published object paths, sorted
    pub fn object_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            objects: self.objects.read().len() as u64,
            publications: self.stats.publications.load(Ordering::Relaxed),
            unpublications: self.stats.unpublications.load(Ordering::Relaxed),
            updates: self.stats.updates.load(Ordering::Relaxed),
        }
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl ObjectPublisher for ObjectRegistry {
    fn publish(&self, entity: PublishedEntity, properties: FieldMap) {
        let now = Utc::now();
        let path = entity.object_path.clone();
        {
            let mut objects = self.objects.write();
            if objects.contains_key(&path) {
                warn!("Object {} already published, replacing", path);
            }
            objects.insert(
                path.clone(),
                PublishedObject {
                    entity: entity.clone(),
                    properties,
                    published_at: now,
                    updated_at: now,
                },
            );
        }
        self.stats.publications.fetch_add(1, Ordering::Relaxed);
        debug!("Published {} {}", entity.kind, path);

        let _ = self.event_sender.send(PublicationEvent::Published(entity));
    }

    fn update_properties(&self, object_path: &str, properties: FieldMap) {
        let updated = {
            let mut objects = self.objects.write();
            match objects.get_mut(object_path) {
                Some(object) => {
                    object.properties = properties;
                    object.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };

        if updated {
            self.stats.updates.fetch_add(1, Ordering::Relaxed);
            let _ = self.event_sender.send(PublicationEvent::Updated {
                object_path: object_path.to_string(),
            });
        }
    }

    fn unpublish(&self, object_path: &str) {
        let removed = self.objects.write().remove(object_path);
        if let Some(object) = removed {
            self.stats.unpublications.fetch_add(1, Ordering::Relaxed);
            debug!("Unpublished {} {}", object.entity.kind, object_path);
            let _ = self.event_sender.send(PublicationEvent::Unpublished {
                kind: object.entity.kind,
                object_path: object_path.to_string(),
            });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PublicationEvent> {
        self.event_sender.subscribe()
    }
}
