//! Idempotency key generation for saga actions
//!
//! Delivery is at-least-once: a handoff racing a crash can repeat a call.
//! Actions that must not repeat their side effect dedupe on these keys.

use crate::ExecutionId;

/// Idempotency key for deduplicating side effects
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(pub Box<str>);

impl IdempotencyKey {
    /// Create an idempotency key for a forward action
    pub fn for_action(saga: &str, eid: &ExecutionId, index: usize) -> Self {
        Self(format!("saga:{}:{}:action:{}", saga, eid, index).into_boxed_str())
    }

    /// Create an idempotency key for compensation.
    ///
    /// Retries share the key; a successful compensation must not be applied twice.
    pub fn for_compensation(saga: &str, eid: &ExecutionId, index: usize) -> Self {
        Self(format!("saga:{}:{}:compensate:{}", saga, eid, index).into_boxed_str())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
