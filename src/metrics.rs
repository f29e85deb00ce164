//! Manager Metrics
//!
//! Cache-line aligned counters updated by the event loop and read by the
//! metrics endpoint.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Poll Metrics
// =============================================================================

/// Counters for polling and reconciliation
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct PollMetrics {
    pub polls_requested: AtomicU64,
    pub polls_coalesced: AtomicU64,
    pub fetches_launched: AtomicU64,
    pub fetches_superseded: AtomicU64,
    pub fetch_errors: AtomicU64,
    /// Results dropped because a newer fetch was launched
    pub stale_results: AtomicU64,
    pub reconcile_passes: AtomicU64,
    pub records_skipped: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<PollMetrics>() <= CACHE_LINE_SIZE);

// =============================================================================
// Job Metrics
// =============================================================================

/// Counters for jobs and their waiters
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct JobMetrics {
    pub jobs_spawned: AtomicU64,
    pub launch_failures: AtomicU64,
    pub precondition_failures: AtomicU64,
    pub waiters_succeeded: AtomicU64,
    pub waiters_failed: AtomicU64,
    pub groups_published: AtomicU64,
    pub groups_removed: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<JobMetrics>() <= CACHE_LINE_SIZE);

// =============================================================================
// Manager Metrics
// =============================================================================

/// All counters of one manager
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    pub poll: PollMetrics,
    pub jobs: JobMetrics,
}

/// Point-in-time copy of [`ManagerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub polls_requested: u64,
    pub polls_coalesced: u64,
    pub fetches_launched: u64,
    pub fetches_superseded: u64,
    pub fetch_errors: u64,
    pub stale_results: u64,
    pub reconcile_passes: u64,
    pub records_skipped: u64,
    pub jobs_spawned: u64,
    pub launch_failures: u64,
    pub precondition_failures: u64,
    pub waiters_succeeded: u64,
    pub waiters_failed: u64,
    pub groups_published: u64,
    pub groups_removed: u64,
    pub last_update_ms: u64,
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment one of this manager's counters
    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        self.add(counter, 1);
    }

    #[inline]
    pub fn add(&self, counter: &AtomicU64, by: u64) {
        bump(counter, by);
        self.jobs
            .last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            polls_requested: load(&self.poll.polls_requested),
            polls_coalesced: load(&self.poll.polls_coalesced),
            fetches_launched: load(&self.poll.fetches_launched),
            fetches_superseded: load(&self.poll.fetches_superseded),
            fetch_errors: load(&self.poll.fetch_errors),
            stale_results: load(&self.poll.stale_results),
            reconcile_passes: load(&self.poll.reconcile_passes),
            records_skipped: load(&self.poll.records_skipped),
            jobs_spawned: load(&self.jobs.jobs_spawned),
            launch_failures: load(&self.jobs.launch_failures),
            precondition_failures: load(&self.jobs.precondition_failures),
            waiters_succeeded: load(&self.jobs.waiters_succeeded),
            waiters_failed: load(&self.jobs.waiters_failed),
            groups_published: load(&self.jobs.groups_published),
            groups_removed: load(&self.jobs.groups_removed),
            last_update_ms: self.jobs.last_update_ms.load(Ordering::Acquire),
        }
    }
}

impl MetricsSnapshot {
    /// Counter name and value pairs, for exporters
    pub fn counters(&self) -> [(&'static str, u64); 15] {
        [
            ("polls_requested", self.polls_requested),
            ("polls_coalesced", self.polls_coalesced),
            ("fetches_launched", self.fetches_launched),
            ("fetches_superseded", self.fetches_superseded),
            ("fetch_errors", self.fetch_errors),
            ("stale_results", self.stale_results),
            ("reconcile_passes", self.reconcile_passes),
            ("records_skipped", self.records_skipped),
            ("jobs_spawned", self.jobs_spawned),
            ("launch_failures", self.launch_failures),
            ("precondition_failures", self.precondition_failures),
            ("waiters_succeeded", self.waiters_succeeded),
            ("waiters_failed", self.waiters_failed),
            ("groups_published", self.groups_published),
            ("groups_removed", self.groups_removed),
        ]
    }
}
