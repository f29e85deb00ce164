//! Poll Scheduler
//!
//! Debounces refresh requests for one volume group and keeps at most one
//! inventory fetch current at a time.
//!
//! Every launch arms a refresh timer. Requests that arrive while the timer is
//! armed are coalesced into a single retrigger that fires when the timer
//! expires. A retriggered launch supersedes any fetch still running: the old
//! fetch is cancelled and its result, identified by generation, is dropped.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default refresh interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Identity of an armed refresh timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No fetch running and no timer armed
    Idle,
    /// A fetch is running or the refresh timer is armed
    FetchInFlight,
    /// As above, with another fetch requested for when the timer expires
    FetchInFlightWithRetrigger,
}

/// Instructions for launching a fetch
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    /// Generation the fetch result must carry to be applied
    pub generation: u64,
    /// Token the fetch should watch for cancellation
    pub cancel: CancellationToken,
    /// Generation of the fetch this launch cancelled, if any
    pub superseded: Option<u64>,
    /// Timer to arm
    pub timer: TimerId,
    /// How long the timer runs
    pub delay: Duration,
}

/// Result of a poll request
#[derive(Debug, Clone)]
pub enum PollDecision {
    /// Start a fetch now
    Launch(LaunchPlan),
    /// Folded into the retrigger of the armed timer
    Coalesced,
    /// A fetch is running and no timer is armed; its result will be used
    AlreadyRunning,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

/// Single-flight scheduler for one group's inventory fetches
#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    generation: u64,
    current: Option<InFlight>,
    timer: Option<TimerId>,
    next_timer: u64,
    retrigger: bool,
    launches: u64,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: 0,
            current: None,
            timer: None,
            next_timer: 0,
            retrigger: false,
            launches: 0,
        }
    }

    pub fn state(&self) -> PollState {
        if self.current.is_none() && self.timer.is_none() {
            PollState::Idle
        } else if self.retrigger {
            PollState::FetchInFlightWithRetrigger
        } else {
            PollState::FetchInFlight
        }
    }

    /// Ask for a fresh snapshot
    pub fn request_poll(&mut self) -> PollDecision {
        if self.timer.is_some() {
            self.retrigger = true;
            PollDecision::Coalesced
        } else if self.current.is_some() {
            PollDecision::AlreadyRunning
        } else {
            PollDecision::Launch(self.launch())
        }
    }

    /// Handle expiry of a refresh timer. Stale timers are ignored.
    pub fn on_timer_expired(&mut self, timer: TimerId) -> Option<LaunchPlan> {
        if self.timer != Some(timer) {
            return None;
        }
        self.timer = None;
        if std::mem::take(&mut self.retrigger) {
            Some(self.launch())
        } else {
            None
        }
    }

    /// Handle completion of a fetch. Returns whether its result is the
    /// authoritative one and should be applied.
    pub fn on_fetch_completed(&mut self, generation: u64) -> bool {
        match &self.current {
            Some(current) if current.generation == generation => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel the running fetch and disarm everything
    pub fn shutdown(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
        }
        self.timer = None;
        self.retrigger = false;
    }

    /// Generation of the fetch currently believed current
    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.generation)
    }

    /// Total number of fetches launched
    pub fn launches(&self) -> u64 {
        self.launches
    }

    fn launch(&mut self) -> LaunchPlan {
        self.generation += 1;
        self.next_timer += 1;
        self.launches += 1;

        let cancel = CancellationToken::new();
        let superseded = self
            .current
            .replace(InFlight {
                generation: self.generation,
                cancel: cancel.clone(),
            })
            .map(|old| {
                old.cancel.cancel();
                old.generation
            });

        let timer = TimerId(self.next_timer);
        self.timer = Some(timer);

        LaunchPlan {
            generation: self.generation,
            cancel,
            superseded,
            timer,
            delay: self.interval,
        }
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn launched(decision: PollDecision) -> LaunchPlan {
        match decision {
            PollDecision::Launch(plan) => plan,
            other => panic!("expected launch, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_request_launches() {
        let mut scheduler = PollScheduler::default();
        assert_eq!(scheduler.state(), PollState::Idle);

        let plan = launched(scheduler.request_poll());

        assert_eq!(plan.generation, 1);
        assert_eq!(plan.delay, DEFAULT_POLL_INTERVAL);
        assert!(plan.superseded.is_none());
        assert_eq!(scheduler.state(), PollState::FetchInFlight);
    }

    #[test]
    fn test_rapid_requests_coalesce_into_one_extra_fetch() {
        let mut scheduler = PollScheduler::default();

        let first = launched(scheduler.request_poll());
        assert_matches!(scheduler.request_poll(), PollDecision::Coalesced);
        assert_matches!(scheduler.request_poll(), PollDecision::Coalesced);
        assert_eq!(scheduler.state(), PollState::FetchInFlightWithRetrigger);

        let second = scheduler.on_timer_expired(first.timer).unwrap();
        assert_eq!(second.superseded, Some(first.generation));
        assert!(first.cancel.is_cancelled());
        assert_eq!(scheduler.launches(), 2);

        assert!(!scheduler.on_fetch_completed(first.generation));
        assert!(scheduler.on_fetch_completed(second.generation));

        assert!(scheduler.on_timer_expired(second.timer).is_none());
        assert_eq!(scheduler.state(), PollState::Idle);
        assert_eq!(scheduler.launches(), 2);
    }

    #[test]
    fn test_request_without_timer_while_fetching_is_noop() {
        let mut scheduler = PollScheduler::default();
        let plan = launched(scheduler.request_poll());
        assert!(scheduler.on_timer_expired(plan.timer).is_none());

        assert_matches!(scheduler.request_poll(), PollDecision::AlreadyRunning);
        assert_eq!(scheduler.current_generation(), Some(plan.generation));
        assert!(!plan.cancel.is_cancelled());
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut scheduler = PollScheduler::default();
        let first = launched(scheduler.request_poll());
        scheduler.request_poll();
        let second = scheduler.on_timer_expired(first.timer).unwrap();

        scheduler.request_poll();
        assert!(scheduler.on_timer_expired(first.timer).is_none());
        assert_eq!(scheduler.state(), PollState::FetchInFlightWithRetrigger);
        assert!(scheduler.on_timer_expired(second.timer).is_some());
    }

    #[test]
    fn test_completed_fetch_then_timer_returns_to_idle() {
        let mut scheduler = PollScheduler::new(Duration::from_millis(100));
        let plan = launched(scheduler.request_poll());

        assert!(scheduler.on_fetch_completed(plan.generation));
        assert_eq!(scheduler.state(), PollState::FetchInFlight);
        assert_matches!(scheduler.request_poll(), PollDecision::Coalesced);

        let again = scheduler.on_timer_expired(plan.timer).unwrap();
        assert!(again.superseded.is_none());
    }

    #[test]
    fn test_shutdown_cancels_running_fetch() {
        let mut scheduler = PollScheduler::default();
        let plan = launched(scheduler.request_poll());

        scheduler.shutdown();

        assert!(plan.cancel.is_cancelled());
        assert_eq!(scheduler.state(), PollState::Idle);
        assert!(!scheduler.on_fetch_completed(plan.generation));
    }
}
