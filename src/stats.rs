//! Coordinator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-coordinator counters
pub struct CoordinatorStats {
    /// Runs accepted from `StartSaga`
    pub sagas_started: AtomicU64,
    /// Runs whose last action succeeded
    pub sagas_completed: AtomicU64,
    /// Runs fully unwound
    pub sagas_compensated: AtomicU64,
    /// Runs that exhausted compensation retries
    pub sagas_quarantined: AtomicU64,
    /// Successful forward calls
    pub actions_executed: AtomicU64,
    /// Failed forward calls
    pub actions_failed: AtomicU64,
    /// Successful compensation calls
    pub compensations_executed: AtomicU64,
    /// Failed compensation calls
    pub compensations_failed: AtomicU64,
    /// Compensation retries scheduled
    pub retries_scheduled: AtomicU64,
    /// Runs handed off to a peer
    pub handoffs: AtomicU64,
}

impl CoordinatorStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            sagas_started: AtomicU64::new(0),
            sagas_completed: AtomicU64::new(0),
            sagas_compensated: AtomicU64::new(0),
            sagas_quarantined: AtomicU64::new(0),
            actions_executed: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            compensations_executed: AtomicU64::new(0),
            compensations_failed: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            handoffs: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            sagas_started: self.sagas_started.load(Ordering::Relaxed),
            sagas_completed: self.sagas_completed.load(Ordering::Relaxed),
            sagas_compensated: self.sagas_compensated.load(Ordering::Relaxed),
            sagas_quarantined: self.sagas_quarantined.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            compensations_executed: self.compensations_executed.load(Ordering::Relaxed),
            compensations_failed: self.compensations_failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}

impl Default for CoordinatorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`CoordinatorStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    /// Runs accepted from `StartSaga`
    pub sagas_started: u64,
    /// Runs whose last action succeeded
    pub sagas_completed: u64,
    /// Runs fully unwound
    pub sagas_compensated: u64,
    /// Runs that exhausted compensation retries
    pub sagas_quarantined: u64,
    /// Successful forward calls
    pub actions_executed: u64,
    /// Failed forward calls
    pub actions_failed: u64,
    /// Successful compensation calls
    pub compensations_executed: u64,
    /// Failed compensation calls
    pub compensations_failed: u64,
    /// Compensation retries scheduled
    pub retries_scheduled: u64,
    /// Runs handed off to a peer
    pub handoffs: u64,
}
