//! Saga observer trait

use crate::{ActionContext, ExecutionId, SagaFault};

/// Observer trait for external observability.
///
/// `on_saga_quarantined` is the channel through which an exhausted
/// compensation is surfaced; implementations should alert on it.
pub trait SagaObserver: Send + Sync + 'static {
    /// A `StartSaga` was accepted
    fn on_saga_started(&self, eid: &ExecutionId, saga: &str);
    /// Forward call about to run
    fn on_action_started(&self, context: &ActionContext);
    /// Forward call succeeded
    fn on_action_completed(&self, context: &ActionContext, duration_millis: u64);
    /// Forward call failed; compensation follows
    fn on_action_failed(&self, context: &ActionContext, error: &str);
    /// Compensation call about to run
    fn on_compensation_started(&self, context: &ActionContext);
    /// Compensation call succeeded
    fn on_compensation_completed(&self, context: &ActionContext);
    /// Compensation call failed
    fn on_compensation_failed(&self, context: &ActionContext, error: &str);
    /// A compensation retry is scheduled at `schedule_millis`
    fn on_compensation_scheduled(&self, context: &ActionContext, schedule_millis: u64);
    /// The rest of a run was sent to a peer
    fn on_handoff(&self, eid: &ExecutionId, saga: &str, message_type: &str);
    /// Last action succeeded
    fn on_saga_completed(&self, eid: &ExecutionId, saga: &str);
    /// Run fully unwound
    fn on_saga_compensated(&self, eid: &ExecutionId, saga: &str);
    /// Compensation retries exhausted
    fn on_saga_quarantined(&self, fault: &SagaFault);
}

/// No-op observer
pub struct NoOpObserver;

impl SagaObserver for NoOpObserver {
    fn on_saga_started(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_action_started(&self, _context: &ActionContext) {}
    fn on_action_completed(&self, _context: &ActionContext, _duration_millis: u64) {}
    fn on_action_failed(&self, _context: &ActionContext, _error: &str) {}
    fn on_compensation_started(&self, _context: &ActionContext) {}
    fn on_compensation_completed(&self, _context: &ActionContext) {}
    fn on_compensation_failed(&self, _context: &ActionContext, _error: &str) {}
    fn on_compensation_scheduled(&self, _context: &ActionContext, _schedule_millis: u64) {}
    fn on_handoff(&self, _eid: &ExecutionId, _saga: &str, _message_type: &str) {}
    fn on_saga_completed(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_saga_compensated(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_saga_quarantined(&self, _fault: &SagaFault) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl SagaObserver for TracingObserver {
    fn on_saga_started(&self, eid: &ExecutionId, saga: &str) {
        tracing::info!(eid = %eid, saga = %saga, "Saga started");
    }

    fn on_action_started(&self, context: &ActionContext) {
        tracing::debug!(eid = %context.eid, saga = %context.saga, index = context.index, "Action started");
    }

    fn on_action_completed(&self, context: &ActionContext, duration_millis: u64) {
        tracing::debug!(eid = %context.eid, index = context.index, duration_ms = duration_millis, "Action completed");
    }

    fn on_action_failed(&self, context: &ActionContext, error: &str) {
        tracing::warn!(eid = %context.eid, saga = %context.saga, index = context.index, error = %error, "Action failed");
    }

    fn on_compensation_started(&self, context: &ActionContext) {
        tracing::debug!(eid = %context.eid, index = context.index, retries = context.retries, "Compensation started");
    }

    fn on_compensation_completed(&self, context: &ActionContext) {
        tracing::debug!(eid = %context.eid, index = context.index, retries = context.retries, "Compensation completed");
    }

    fn on_compensation_failed(&self, context: &ActionContext, error: &str) {
        tracing::warn!(eid = %context.eid, saga = %context.saga, index = context.index, retries = context.retries, error = %error, "Compensation failed");
    }

    fn on_compensation_scheduled(&self, context: &ActionContext, schedule_millis: u64) {
        tracing::debug!(eid = %context.eid, index = context.index, retries = context.retries, schedule_millis, "Compensation retry scheduled");
    }

    fn on_handoff(&self, eid: &ExecutionId, saga: &str, message_type: &str) {
        tracing::info!(eid = %eid, saga = %saga, message_type = %message_type, "Handed off to peer");
    }

    fn on_saga_completed(&self, eid: &ExecutionId, saga: &str) {
        tracing::info!(eid = %eid, saga = %saga, "Saga completed");
    }

    fn on_saga_compensated(&self, eid: &ExecutionId, saga: &str) {
        tracing::info!(eid = %eid, saga = %saga, "Saga compensated");
    }

    fn on_saga_quarantined(&self, fault: &SagaFault) {
        tracing::error!(
            eid = %fault.eid,
            saga = %fault.saga,
            index = fault.index,
            retries = fault.retries,
            reason = %fault.reason,
            "Saga quarantined"
        );
    }
}
