//! Job Completion Bridge
//!
//! Correlates a pending request with the two events that can finish it: the
//! job's terminal outcome and the publication of the entity the job is
//! expected to create. Each waiter resolves exactly once; events arriving
//! after resolution are ignored.

use crate::domain::ports::{JobOutcome, OperationTag};
use crate::error::{Error, Result};
use crate::publish::{EntityKind, PublishedEntity};
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

// =============================================================================
// Types
// =============================================================================

/// Successful result delivered to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The job finished and nothing else was expected
    Completed,
    /// The expected entity became visible at this path
    Published { object_path: String },
}

/// Channel end through which a caller is answered
pub type Responder = oneshot::Sender<Result<Resolution>>;

/// What a waiter needs to see before it resolves successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionCriterion {
    /// Job success alone completes the request
    JobOnly,
    /// A named entity must be published after the job is spawned
    EntityPublished {
        kind: EntityKind,
        name: String,
        /// Owning group that the entity must belong to, when set
        owner: Option<String>,
    },
}

impl CompletionCriterion {
    pub fn volume_group(name: impl Into<String>) -> Self {
        Self::EntityPublished {
            kind: EntityKind::VolumeGroup,
            name: name.into(),
            owner: None,
        }
    }

    pub fn logical_volume(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::EntityPublished {
            kind: EntityKind::LogicalVolume,
            name: name.into(),
            owner: Some(owner.into()),
        }
    }

    fn matches(&self, entity: &PublishedEntity) -> bool {
        match self {
            CompletionCriterion::JobOnly => false,
            CompletionCriterion::EntityPublished { kind, name, owner } => {
                entity.kind == *kind
                    && entity.name == *name
                    && owner.as_ref().map_or(true, |o| entity.owner.as_ref() == Some(o))
            }
        }
    }

    fn listens_for_publication(&self) -> bool {
        matches!(self, CompletionCriterion::EntityPublished { .. })
    }
}

/// Identifier of a registered waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl std::fmt::Display for WaiterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

/// Terminal state a waiter reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterOutcome {
    Succeeded,
    Failed,
}

struct CompletionWaiter {
    operation: OperationTag,
    criterion: CompletionCriterion,
    responder: Responder,
}

/// Counters describing bridge activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub registered: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Events that arrived for waiters that had already resolved
    pub ignored: u64,
    /// Detachments from the publication source
    pub detached: u64,
}

// =============================================================================
// Bridge
// =============================================================================

/// Registry of waiters for pending requests
#[derive(Default)]
pub struct JobCompletionBridge {
    waiters: BTreeMap<WaiterId, CompletionWaiter>,
    next_id: u64,
    stats: BridgeStats,
}

impl JobCompletionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a freshly spawned job
    pub fn register(
        &mut self,
        operation: OperationTag,
        criterion: CompletionCriterion,
        responder: Responder,
    ) -> WaiterId {
        self.next_id += 1;
        let id = WaiterId(self.next_id);
        debug!("Registered {} for {} ({:?})", id, operation, criterion);
        self.waiters.insert(
            id,
            CompletionWaiter {
                operation,
                criterion,
                responder,
            },
        );
        self.stats.registered += 1;
        id
    }

    /// Feed the terminal outcome of the job behind `id`.
    ///
    /// Returns the outcome if this call resolved the waiter.
    pub fn on_job_completed(&mut self, id: WaiterId, outcome: &JobOutcome) -> Option<WaiterOutcome> {
        let Some(waiter) = self.waiters.get(&id) else {
            debug!("Ignoring job completion for resolved {}", id);
            self.stats.ignored += 1;
            return None;
        };

        if !outcome.success {
            let context = waiter.operation.failure_context().to_string();
            self.resolve(
                id,
                Err(Error::JobFailed {
                    context,
                    message: outcome.message.clone(),
                }),
            );
            return Some(WaiterOutcome::Failed);
        }

        if waiter.criterion == CompletionCriterion::JobOnly {
            self.resolve(id, Ok(Resolution::Completed));
            return Some(WaiterOutcome::Succeeded);
        }

        // Success is reported by the publication of the expected entity.
        None
    }

    /// Feed a publication event. Returns the waiters it resolved.
    pub fn on_entity_published(&mut self, entity: &PublishedEntity) -> Vec<WaiterId> {
        let matched: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, w)| w.criterion.matches(entity))
            .map(|(id, _)| *id)
            .collect();

        for id in &matched {
            self.resolve(
                *id,
                Ok(Resolution::Published {
                    object_path: entity.object_path.clone(),
                }),
            );
        }
        matched
    }

    /// Resolve waiters against entities that are already visible.
    ///
    /// Used after publication events were missed.
    pub fn resolve_visible<'a>(
        &mut self,
        visible: impl IntoIterator<Item = &'a PublishedEntity>,
    ) -> Vec<WaiterId> {
        let mut resolved = Vec::new();
        for entity in visible {
            if self.listening() == 0 {
                break;
            }
            resolved.extend(self.on_entity_published(entity));
        }
        resolved
    }

    /// Whether `id` is still waiting
    pub fn is_waiting(&self, id: WaiterId) -> bool {
        self.waiters.contains_key(&id)
    }

    /// Number of unresolved waiters
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Number of waiters attached to the publication source
    pub fn listening(&self) -> usize {
        self.waiters
            .values()
            .filter(|w| w.criterion.listens_for_publication())
            .count()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Detach every remaining waiter. Their callers observe a dropped
    /// responder.
    pub fn teardown(&mut self) -> usize {
        let count = self.waiters.len();
        for (id, waiter) in std::mem::take(&mut self.waiters) {
            debug!("Tearing down {} for {}", id, waiter.operation);
            if waiter.criterion.listens_for_publication() {
                self.stats.detached += 1;
            }
        }
        count
    }

    fn resolve(&mut self, id: WaiterId, result: Result<Resolution>) {
        let Some(waiter) = self.waiters.remove(&id) else {
            return;
        };

        if waiter.criterion.listens_for_publication() {
            self.stats.detached += 1;
        }

        match &result {
            Ok(resolution) => {
                self.stats.succeeded += 1;
                info!("{} for {} succeeded: {:?}", id, waiter.operation, resolution);
            }
            Err(e) => {
                self.stats.failed += 1;
                info!("{} for {} failed: {}", id, waiter.operation, e);
            }
        }

        if waiter.responder.send(result).is_err() {
            debug!("Caller for {} went away before resolution", id);
        }
    }
}

impl Drop for JobCompletionBridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio_test::{assert_pending, assert_ready, task};

    fn data_volume() -> PublishedEntity {
        PublishedEntity::logical_volume("data", "vg0", "/lvm/vg0/data")
    }

    #[test]
    fn test_publication_then_job_success_resolves_once() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        let id = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );
        let mut rx = task::spawn(rx);
        assert_pending!(rx.poll());

        assert_eq!(bridge.on_entity_published(&data_volume()), vec![id]);
        assert_eq!(bridge.on_job_completed(id, &JobOutcome::succeeded()), None);

        let result = assert_ready!(rx.poll()).unwrap();
        assert_matches!(
            result,
            Ok(Resolution::Published { object_path }) if object_path == "/lvm/vg0/data"
        );

        let stats = bridge.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.detached, 1);
        assert_eq!(bridge.listening(), 0);
    }

    #[test]
    fn test_job_success_waits_for_publication() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        let id = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );
        let mut rx = task::spawn(rx);

        assert_eq!(bridge.on_job_completed(id, &JobOutcome::succeeded()), None);
        assert!(bridge.is_waiting(id));
        assert_pending!(rx.poll());

        bridge.on_entity_published(&data_volume());
        assert_matches!(assert_ready!(rx.poll()), Ok(Ok(Resolution::Published { .. })));
    }

    #[test]
    fn test_failure_short_circuits_later_publication() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        let id = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );
        let mut rx = task::spawn(rx);

        assert_eq!(
            bridge.on_job_completed(id, &JobOutcome::failed("disk full")),
            Some(WaiterOutcome::Failed)
        );
        assert!(bridge.on_entity_published(&data_volume()).is_empty());

        let err = assert_ready!(rx.poll()).unwrap().unwrap_err();
        assert_eq!(err.job_message(), Some("disk full"));
        assert_eq!(bridge.stats().failed, 1);
        assert_eq!(bridge.stats().succeeded, 0);
    }

    #[test]
    fn test_owner_disambiguates_same_name() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, _rx) = oneshot::channel();
        let id = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );

        let other = PublishedEntity::logical_volume("data", "vg1", "/lvm/vg1/data");
        assert!(bridge.on_entity_published(&other).is_empty());

        let group = PublishedEntity::volume_group("data", "/lvm/data");
        assert!(bridge.on_entity_published(&group).is_empty());
        assert!(bridge.is_waiting(id));
    }

    #[test]
    fn test_rename_matches_group_without_owner() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        bridge.register(
            OperationTag::RenameGroup,
            CompletionCriterion::volume_group("vg-new"),
            tx,
        );
        let mut rx = task::spawn(rx);

        bridge.on_entity_published(&PublishedEntity::volume_group("vg-new", "/lvm/vg_2dnew"));
        assert_matches!(
            assert_ready!(rx.poll()),
            Ok(Ok(Resolution::Published { object_path })) if object_path == "/lvm/vg_2dnew"
        );
    }

    #[test]
    fn test_resolve_visible_after_missed_events() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        let id = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );
        let (other_tx, _other_rx) = oneshot::channel();
        let other = bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("logs", "vg0"),
            other_tx,
        );

        let visible = vec![
            PublishedEntity::volume_group("vg0", "/lvm/vg0"),
            PublishedEntity::logical_volume("root", "vg0", "/lvm/vg0/root"),
            data_volume(),
        ];
        assert_eq!(bridge.resolve_visible(&visible), vec![id]);
        assert!(bridge.is_waiting(other));

        let mut rx = task::spawn(rx);
        assert_matches!(
            assert_ready!(rx.poll()),
            Ok(Ok(Resolution::Published { object_path })) if object_path == "/lvm/vg0/data"
        );
    }

    #[test]
    fn test_job_only_resolves_on_success() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        let id = bridge.register(OperationTag::DeleteGroup, CompletionCriterion::JobOnly, tx);
        assert_eq!(bridge.listening(), 0);

        assert_eq!(
            bridge.on_job_completed(id, &JobOutcome::succeeded()),
            Some(WaiterOutcome::Succeeded)
        );
        let mut rx = task::spawn(rx);
        assert_matches!(assert_ready!(rx.poll()), Ok(Ok(Resolution::Completed)));
        assert_eq!(bridge.stats().detached, 0);
    }

    #[test]
    fn test_teardown_detaches_remaining_waiters() {
        let mut bridge = JobCompletionBridge::new();
        let (tx, rx) = oneshot::channel();
        bridge.register(
            OperationTag::CreateVolume,
            CompletionCriterion::logical_volume("data", "vg0"),
            tx,
        );

        assert_eq!(bridge.teardown(), 1);
        assert_eq!(bridge.pending(), 0);
        assert_eq!(bridge.stats().detached, 1);

        let mut rx = task::spawn(rx);
        assert!(assert_ready!(rx.poll()).is_err());
    }
}
