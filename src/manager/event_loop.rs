//! Volume Group Manager
//!
//! A single task owns every volume group, its poll scheduler and the
//! completion bridge. Inventory fetches, prechecks, jobs and timers run in
//! spawned tasks and report back through the loop's event channel, so no
//! state is ever mutated off the loop.

use super::config::ManagerConfig;
use super::context::Context;
use super::handle::{Command, GroupSummary, ManagerHandle, VolumeGroupOperation};
use crate::domain::ports::{BlockDevice, CallerIdentity, JobOutcome, JobSpec, OperationTag};
use crate::error::{Error, ErrorScope, Result};
use crate::inventory::InventorySnapshot;
use crate::jobs::{
    round_to_sector, CompletionCriterion, JobCompletionBridge, LvmCommand, Resolution,
    WaiterId, WaiterOutcome,
};
use crate::publish::{PublicationEvent, PublishedEntity};
use crate::reconcile::{ProgressTracker, SnapshotReconciler};
use crate::scheduler::{LaunchPlan, PollDecision, PollScheduler, TimerId};
use crate::volume::VolumeGroup;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// =============================================================================
// Loop Events
// =============================================================================

/// A job ready to be spawned, with what its caller waits for
struct PreparedJob {
    group: String,
    spec: JobSpec,
    criterion: CompletionCriterion,
}

/// Work that still has to happen off the loop before the job can start
enum Preparation {
    Ready(PreparedJob),
    /// The block must be unused and is wiped before the job starts
    NeedsUnusedBlock { job: PreparedJob, block: BlockDevice },
}

enum LoopEvent {
    GroupsListed {
        generation: u64,
        result: Result<Vec<String>>,
    },
    FetchCompleted {
        group: String,
        generation: u64,
        result: Result<InventorySnapshot>,
    },
    TimerExpired {
        group: String,
        timer: TimerId,
    },
    Prechecked {
        job: PreparedJob,
        result: Result<()>,
        reply: oneshot::Sender<Result<Resolution>>,
    },
    JobCompleted {
        waiter: WaiterId,
        group: String,
        operation: OperationTag,
        outcome: JobOutcome,
    },
}

struct GroupState {
    group: VolumeGroup,
    scheduler: PollScheduler,
}

// =============================================================================
// Manager
// =============================================================================

/// Event loop owning all volume group state
pub struct Manager {
    config: ManagerConfig,
    ctx: Context,
    reconciler: SnapshotReconciler,
    bridge: JobCompletionBridge,
    groups: BTreeMap<String, GroupState>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    events_rx: mpsc::UnboundedReceiver<LoopEvent>,
    publications: Option<broadcast::Receiver<PublicationEvent>>,
    sync_generation: u64,
    sync_replies: Vec<oneshot::Sender<Result<Vec<String>>>>,
}

impl Manager {
    /// Create a manager and the handle used to talk to it
    pub fn new(config: ManagerConfig, ctx: Context) -> (Self, ManagerHandle) {
        let (commands_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reconciler = SnapshotReconciler::new(
            ctx.publisher.clone(),
            ctx.blocks.clone(),
            ctx.names.clone(),
            ProgressTracker::new(ctx.jobs.clone(), ctx.blocks.clone()),
        );
        let publications = Some(ctx.publisher.subscribe());

        let manager = Self {
            config,
            ctx,
            reconciler,
            bridge: JobCompletionBridge::new(),
            groups: BTreeMap::new(),
            commands,
            events_tx,
            events_rx,
            publications,
            sync_generation: 0,
            sync_replies: Vec::new(),
        };
        (manager, ManagerHandle::new(commands_tx))
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Volume group manager started under {}", self.config.object_root);
        self.sync_groups(None);
        let mut rescan = self.config.rescan_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                publication = next_publication(&mut self.publications) => {
                    self.handle_publication(publication);
                }
                _ = next_tick(&mut rescan) => self.sync_groups(None),
            }
        }

        self.stop();
    }

    fn stop(&mut self) {
        for state in self.groups.values_mut() {
            state.scheduler.shutdown();
        }
        let detached = self.bridge.teardown();
        info!("Volume group manager stopped, {} pending requests dropped", detached);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Poll { group, reply } => {
                let _ = reply.send(self.request_poll(&group));
            }
            Command::SyncGroups { reply } => self.sync_groups(reply),
            Command::Groups { reply } => {
                let _ = reply.send(self.summaries());
            }
            Command::Operation {
                group,
                caller,
                operation,
                reply,
            } => self.handle_operation(&group, caller, operation, reply),
            Command::Shutdown => {}
        }
    }

    fn summaries(&self) -> Vec<GroupSummary> {
        self.groups
            .values()
            .map(|state| GroupSummary {
                name: state.group.name().to_string(),
                object_path: state.group.object_path().to_string(),
                published: state.group.is_published(),
                needs_polling: state.group.properties().needs_polling,
                volumes: state
                    .group
                    .volumes()
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                poll_state: state.scheduler.state(),
            })
            .collect()
    }

    // =========================================================================
    // Group Discovery
    // =========================================================================

    fn sync_groups(&mut self, reply: Option<oneshot::Sender<Result<Vec<String>>>>) {
        self.sync_generation += 1;
        self.sync_replies.extend(reply);

        let generation = self.sync_generation;
        let inventory = self.ctx.inventory.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = inventory.list_groups().await;
            let _ = events.send(LoopEvent::GroupsListed { generation, result });
        });
    }

    fn apply_group_list(&mut self, generation: u64, result: Result<Vec<String>>) {
        if generation != self.sync_generation {
            debug!("Dropping superseded group listing {}", generation);
            return;
        }

        let names = match result {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list volume groups: {}", e);
                let message = e.to_string();
                for reply in self.sync_replies.drain(..) {
                    let _ = reply.send(Err(Error::Internal(message.clone())));
                }
                return;
            }
        };

        let listed: BTreeSet<String> = names.into_iter().collect();
        let stale: Vec<String> = self
            .groups
            .keys()
            .filter(|name| !listed.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            self.remove_group(&name);
        }

        for name in &listed {
            if self.groups.contains_key(name) {
                continue;
            }
            info!("Discovered volume group {}", name);
            self.groups.insert(
                name.clone(),
                GroupState {
                    group: VolumeGroup::new(name.as_str(), self.config.object_root.as_str()),
                    scheduler: PollScheduler::new(self.config.poll_interval),
                },
            );
            if let Err(e) = self.request_poll(name) {
                warn!("Failed to poll new volume group {}: {}", name, e);
            }
        }

        let tracked: Vec<String> = listed.into_iter().collect();
        for reply in self.sync_replies.drain(..) {
            let _ = reply.send(Ok(tracked.clone()));
        }
    }

    fn remove_group(&mut self, name: &str) {
        let Some(mut state) = self.groups.remove(name) else {
            return;
        };
        info!("Volume group {} is gone", name);
        state.scheduler.shutdown();
        self.reconciler.teardown(&mut state.group);
        self.ctx.metrics.inc(&self.ctx.metrics.jobs.groups_removed);
    }

    // =========================================================================
    // Polling
    // =========================================================================

    fn request_poll(&mut self, name: &str) -> Result<()> {
        let state = self
            .groups
            .get_mut(name)
            .ok_or_else(|| Error::VolumeGroupNotFound {
                name: name.to_string(),
            })?;
        let metrics = &self.ctx.metrics;
        metrics.inc(&metrics.poll.polls_requested);

        match state.scheduler.request_poll() {
            PollDecision::Launch(plan) => self.launch_fetch(name, plan),
            PollDecision::Coalesced => {
                debug!("Poll of {} coalesced into the next refresh", name);
                metrics.inc(&metrics.poll.polls_coalesced);
            }
            PollDecision::AlreadyRunning => {
                debug!("Poll of {} already running", name);
            }
        }
        Ok(())
    }

    fn launch_fetch(&self, name: &str, plan: LaunchPlan) {
        let metrics = &self.ctx.metrics;
        if let Some(superseded) = plan.superseded {
            debug!("Fetch {} of {} superseded by {}", superseded, name, plan.generation);
            metrics.inc(&metrics.poll.fetches_superseded);
        }
        metrics.inc(&metrics.poll.fetches_launched);

        let LaunchPlan {
            generation,
            cancel,
            timer,
            delay,
            ..
        } = plan;

        let inventory = self.ctx.inventory.clone();
        let events = self.events_tx.clone();
        let group = name.to_string();
        tokio::spawn(async move {
            let result = inventory.fetch_inventory(&group, cancel).await;
            let _ = events.send(LoopEvent::FetchCompleted {
                group,
                generation,
                result,
            });
        });

        let events = self.events_tx.clone();
        let group = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LoopEvent::TimerExpired { group, timer });
        });
    }

    fn apply_fetch(&mut self, name: &str, generation: u64, result: Result<InventorySnapshot>) {
        let metrics = self.ctx.metrics.clone();
        let Some(state) = self.groups.get_mut(name) else {
            debug!("Dropping fetch result for removed group {}", name);
            return;
        };
        if !state.scheduler.on_fetch_completed(generation) {
            debug!("Dropping stale fetch {} of {}", generation, name);
            metrics.inc(&metrics.poll.stale_results);
            return;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                match e.scope() {
                    ErrorScope::PollCycle => {
                        warn!("Failed to update LVM volume group {}: {}", name, e)
                    }
                    _ => error!("Unexpected error updating LVM volume group {}: {}", name, e),
                }
                metrics.inc(&metrics.poll.fetch_errors);
                if self.reconciler.publish_pending(&mut state.group) {
                    metrics.inc(&metrics.jobs.groups_published);
                }
                return;
            }
        };

        let report = self.reconciler.reconcile(&mut state.group, &snapshot);
        metrics.inc(&metrics.poll.reconcile_passes);
        metrics.add(&metrics.poll.records_skipped, report.skipped as u64);
        if report.group_published {
            metrics.inc(&metrics.jobs.groups_published);
        }

        if report.needs_polling {
            if let Err(e) = self.request_poll(name) {
                warn!("Failed to keep polling {}: {}", name, e);
            }
        }
    }

    fn on_timer_expired(&mut self, name: &str, timer: TimerId) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        if let Some(plan) = state.scheduler.on_timer_expired(timer) {
            self.launch_fetch(name, plan);
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn handle_operation(
        &mut self,
        group: &str,
        caller: CallerIdentity,
        operation: VolumeGroupOperation,
        reply: oneshot::Sender<Result<Resolution>>,
    ) {
        match self.prepare(group, caller, operation) {
            Ok(Preparation::Ready(job)) => self.start_job(job, reply),
            Ok(Preparation::NeedsUnusedBlock { job, block }) => {
                let blocks = self.ctx.blocks.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = match blocks.ensure_unused(&block).await {
                        Ok(()) => blocks.wipe(&block.device).await,
                        Err(e) => Err(e),
                    };
                    let _ = events.send(LoopEvent::Prechecked { job, result, reply });
                });
            }
            Err(e) => self.reject(e, reply),
        }
    }

    fn reject(&self, error: Error, reply: oneshot::Sender<Result<Resolution>>) {
        if error.is_precondition() {
            debug!("Rejecting request: {}", error);
            let metrics = &self.ctx.metrics;
            metrics.inc(&metrics.jobs.precondition_failures);
        } else {
            warn!("Request failed before its job started: {}", error);
        }
        let _ = reply.send(Err(error));
    }

    fn find_block(&self, object_path: &str) -> Result<BlockDevice> {
        self.ctx
            .blocks
            .find(object_path)
            .ok_or_else(|| Error::DeviceNotFound {
                object_path: object_path.to_string(),
            })
    }

    /// Validate a request and build its job
    fn prepare(
        &self,
        name: &str,
        caller: CallerIdentity,
        operation: VolumeGroupOperation,
    ) -> Result<Preparation> {
        let state = self
            .groups
            .get(name)
            .ok_or_else(|| Error::VolumeGroupNotFound {
                name: name.to_string(),
            })?;
        let group = &state.group;
        let names = self.ctx.names.as_ref();

        let job = |tag: OperationTag, objects: Vec<String>, command: LvmCommand, criterion| {
            PreparedJob {
                group: name.to_string(),
                spec: JobSpec {
                    operation: tag,
                    target_owner: group.object_path().to_string(),
                    caller,
                    objects,
                    command,
                },
                criterion,
            }
        };

        let preparation = match operation {
            VolumeGroupOperation::Delete { wipe } => {
                let members: Vec<BlockDevice> = self
                    .ctx
                    .blocks
                    .list_block_devices()
                    .into_iter()
                    .filter(|b| b.physical_volume_group.as_deref() == Some(group.object_path()))
                    .collect();
                let wipe_devices = if wipe {
                    members.iter().map(|b| b.device.clone()).collect()
                } else {
                    Vec::new()
                };
                Preparation::Ready(job(
                    OperationTag::DeleteGroup,
                    members.into_iter().map(|b| b.object_path).collect(),
                    LvmCommand::DeleteGroup {
                        group: name.to_string(),
                        wipe_devices,
                    },
                    CompletionCriterion::JobOnly,
                ))
            }
            VolumeGroupOperation::Rename { new_name } => {
                let new_name = names.encode(&new_name, false);
                Preparation::Ready(job(
                    OperationTag::RenameGroup,
                    Vec::new(),
                    LvmCommand::RenameGroup {
                        group: name.to_string(),
                        new_name: new_name.clone(),
                    },
                    CompletionCriterion::volume_group(new_name),
                ))
            }
            VolumeGroupOperation::AddDevice { block } => {
                let block = self.find_block(&block)?;
                Preparation::NeedsUnusedBlock {
                    job: job(
                        OperationTag::AddDevice,
                        vec![block.object_path.clone()],
                        LvmCommand::AddDevice {
                            group: name.to_string(),
                            device: block.device.clone(),
                        },
                        CompletionCriterion::JobOnly,
                    ),
                    block,
                }
            }
            VolumeGroupOperation::RemoveDevice { block, wipe } => {
                let block = self.find_block(&block)?;
                Preparation::Ready(job(
                    OperationTag::RemoveDevice,
                    vec![block.object_path.clone()],
                    LvmCommand::RemoveDevice {
                        group: name.to_string(),
                        device: block.device,
                        wipe,
                    },
                    CompletionCriterion::JobOnly,
                ))
            }
            VolumeGroupOperation::EmptyDevice { block, background } => {
                let block = self.find_block(&block)?;
                Preparation::Ready(job(
                    OperationTag::EmptyDevice,
                    vec![block.object_path.clone()],
                    LvmCommand::EmptyDevice {
                        device: block.device,
                        background,
                    },
                    CompletionCriterion::JobOnly,
                ))
            }
            VolumeGroupOperation::CreatePlainVolume {
                name: volume,
                size,
                stripes,
                stripe_size,
            } => {
                let volume = names.encode(&volume, true);
                Preparation::Ready(job(
                    OperationTag::CreateVolume,
                    Vec::new(),
                    LvmCommand::CreatePlainVolume {
                        group: name.to_string(),
                        name: volume.clone(),
                        size: round_to_sector(size),
                        stripes,
                        stripe_size,
                    },
                    CompletionCriterion::logical_volume(volume, name),
                ))
            }
            VolumeGroupOperation::CreateThinPoolVolume { name: volume, size } => {
                let volume = names.encode(&volume, true);
                Preparation::Ready(job(
                    OperationTag::CreateVolume,
                    Vec::new(),
                    LvmCommand::CreateThinPool {
                        group: name.to_string(),
                        name: volume.clone(),
                        size: round_to_sector(size),
                    },
                    CompletionCriterion::logical_volume(volume, name),
                ))
            }
            VolumeGroupOperation::CreateThinVolume {
                name: volume,
                size,
                pool,
            } => {
                let pool = group
                    .volumes()
                    .find_by_path(&pool)
                    .ok_or_else(|| Error::LogicalVolumeNotFound {
                        object_path: pool.clone(),
                    })?
                    .name()
                    .to_string();
                let volume = names.encode(&volume, true);
                Preparation::Ready(job(
                    OperationTag::CreateVolume,
                    Vec::new(),
                    LvmCommand::CreateThinVolume {
                        group: name.to_string(),
                        name: volume.clone(),
                        size: round_to_sector(size),
                        pool,
                    },
                    CompletionCriterion::logical_volume(volume, name),
                ))
            }
        };
        Ok(preparation)
    }

    fn start_job(&mut self, job: PreparedJob, reply: oneshot::Sender<Result<Resolution>>) {
        let metrics = &self.ctx.metrics;
        let PreparedJob {
            group,
            spec,
            criterion,
        } = job;
        let operation = spec.operation;

        let handle = match self.ctx.launcher.spawn_job(spec) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to start {} on {}: {}", operation, group, e);
                metrics.inc(&metrics.jobs.launch_failures);
                let _ = reply.send(Err(e));
                return;
            }
        };
        metrics.inc(&metrics.jobs.jobs_spawned);

        let waiter = self.bridge.register(operation, criterion, reply);
        debug!("{} started as {} for {}", operation, handle.id, waiter);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = handle
                .completion
                .await
                .unwrap_or_else(|_| JobOutcome::failed("Job was abandoned before completing"));
            let _ = events.send(LoopEvent::JobCompleted {
                waiter,
                group,
                operation,
                outcome,
            });
        });
    }

    fn on_job_completed(&mut self, waiter: WaiterId, group: &str, operation: OperationTag, outcome: JobOutcome) {
        let metrics = self.ctx.metrics.clone();
        match self.bridge.on_job_completed(waiter, &outcome) {
            Some(WaiterOutcome::Succeeded) => metrics.inc(&metrics.jobs.waiters_succeeded),
            Some(WaiterOutcome::Failed) => metrics.inc(&metrics.jobs.waiters_failed),
            None => {}
        }

        match operation {
            OperationTag::RenameGroup | OperationTag::DeleteGroup => self.sync_groups(None),
            _ => {
                if let Err(e) = self.request_poll(group) {
                    debug!("Not refreshing after {}: {}", operation, e);
                }
            }
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::GroupsListed { generation, result } => {
                self.apply_group_list(generation, result)
            }
            LoopEvent::FetchCompleted {
                group,
                generation,
                result,
            } => self.apply_fetch(&group, generation, result),
            LoopEvent::TimerExpired { group, timer } => self.on_timer_expired(&group, timer),
            LoopEvent::Prechecked { job, result, reply } => match result {
                Ok(()) => self.start_job(job, reply),
                Err(e) => self.reject(e, reply),
            },
            LoopEvent::JobCompleted {
                waiter,
                group,
                operation,
                outcome,
            } => self.on_job_completed(waiter, &group, operation, outcome),
        }
    }

    fn handle_publication(&mut self, publication: std::result::Result<PublicationEvent, RecvError>) {
        match publication {
            Ok(PublicationEvent::Published(entity)) => {
                let resolved = self.bridge.on_entity_published(&entity);
                let metrics = &self.ctx.metrics;
                metrics.add(&metrics.jobs.waiters_succeeded, resolved.len() as u64);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} publication events, rechecking pending requests", missed);
                self.resolve_visible();
            }
            Err(RecvError::Closed) => {
                warn!("Publication stream closed");
                self.publications = None;
            }
        }
    }

    /// Resolve waiters whose entity is already published
    fn resolve_visible(&mut self) {
        if self.bridge.listening() == 0 {
            return;
        }

        let mut visible = Vec::new();
        for state in self.groups.values() {
            let group = &state.group;
            if !group.is_published() {
                continue;
            }
            visible.push(PublishedEntity::volume_group(group.name(), group.object_path()));
            visible.extend(group.volumes().iter().map(|volume| {
                PublishedEntity::logical_volume(volume.name(), group.name(), volume.object_path())
            }));
        }

        let resolved = self.bridge.resolve_visible(&visible);
        if !resolved.is_empty() {
            info!("Resolved {} pending requests from current state", resolved.len());
            let metrics = &self.ctx.metrics;
            metrics.add(&metrics.jobs.waiters_succeeded, resolved.len() as u64);
        }
    }
}

async fn next_publication(
    publications: &mut Option<broadcast::Receiver<PublicationEvent>>,
) -> std::result::Result<PublicationEvent, RecvError> {
    match publications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
