//! Execution identity and per-call action context

use crate::IdempotencyKey;
use uuid::Uuid;

/// Unique identifier for one saga invocation (eid)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(Box<str>);

impl ExecutionId {
    /// Mint a fresh execution ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().into_boxed_str())
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl std::fmt::Debug for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecutionId({})", self.0)
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator-local job identifier, distinct from the eid
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Debug for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context passed with every execute/compensate call
#[derive(Clone)]
pub struct ActionContext {
    /// Saga invocation this call belongs to
    pub eid: ExecutionId,
    /// Saga name (routing key without prefix)
    pub saga: Box<str>,
    /// Index of the action being executed or compensated
    pub index: usize,
    /// Compensation attempt count for this index (0 for forward calls)
    pub retries: u32,
}

impl ActionContext {
    /// Key for deduplicating the forward side effect of this action
    pub fn action_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_action(&self.saga, &self.eid, self.index)
    }

    /// Key for deduplicating the compensation of this action
    pub fn compensation_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_compensation(&self.saga, &self.eid, self.index)
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("eid", &self.eid)
            .field("saga", &self.saga)
            .field("index", &self.index)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
