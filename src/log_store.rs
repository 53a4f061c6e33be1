//! Append-only audit log for saga lifecycle events

use crate::LogStoreError;
use async_trait::async_trait;

/// Lifecycle transition recorded in the log
#[derive(Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum SagaLogKind {
    /// Run accepted
    StartSaga {
        /// Invocation arguments
        args: Vec<u8>,
    },
    /// Run finished
    EndSaga {
        /// True when the run ended by fully unwinding
        compensated: bool,
    },
    /// About to execute an action
    StartAction {
        /// Action index
        index: u32,
    },
    /// Action executed successfully
    EndAction {
        /// Action index
        index: u32,
    },
    /// About to compensate an action
    StartCompensateAction {
        /// Action index
        index: u32,
        /// Failed attempts so far
        retries: u32,
    },
    /// Compensation succeeded
    EndCompensateAction {
        /// Action index
        index: u32,
        /// Failed attempts before this one
        retries: u32,
    },
    /// Compensation failed and a retry is scheduled
    DelayCompensateAction {
        /// Action index
        index: u32,
        /// Failed attempts so far, this one included
        retries: u32,
        /// Absolute wake time, millis since UNIX epoch
        schedule_millis: u64,
    },
    /// Compensation retries exhausted; terminal for the run
    QuarantineSaga {
        /// Action that could not be compensated
        index: u32,
        /// Failed attempts
        retries: u32,
        /// Last compensation error
        reason: String,
    },
}

impl SagaLogKind {
    /// Stable kebab-case name of the entry
    pub fn log_type(&self) -> &'static str {
        match self {
            Self::StartSaga { .. } => "start-saga",
            Self::EndSaga { .. } => "end-saga",
            Self::StartAction { .. } => "start-action",
            Self::EndAction { .. } => "end-action",
            Self::StartCompensateAction { .. } => "start-compensate-action",
            Self::EndCompensateAction { .. } => "end-compensate-action",
            Self::DelayCompensateAction { .. } => "delay-compensate-action",
            Self::QuarantineSaga { .. } => "quarantine-saga",
        }
    }
}

/// One log entry
#[derive(Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct SagaLog {
    /// Run identifier
    pub eid: String,
    /// Saga name
    pub saga: String,
    /// Wall clock time of the transition, millis since UNIX epoch
    pub recorded_at_millis: u64,
    /// What happened
    pub kind: SagaLogKind,
}

/// Write-only sink for lifecycle events.
///
/// Best-effort: the coordinator logs a failed write and carries on.
#[async_trait]
pub trait SagaLogStore: Send + Sync + 'static {
    /// Append one entry
    async fn create_log(&self, entry: SagaLog) -> Result<(), LogStoreError>;
}

/// Default store; discards everything
pub struct NoOpLogStore;

#[async_trait]
impl SagaLogStore for NoOpLogStore {
    async fn create_log(&self, _entry: SagaLog) -> Result<(), LogStoreError> {
        Ok(())
    }
}

/// In-memory log store for testing and inspection
pub struct InMemoryLogStore {
    data: std::sync::RwLock<Vec<SagaLog>>,
}

impl InMemoryLogStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<SagaLog> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries for one execution, in append order
    pub fn entries_for(&self, eid: &str) -> Vec<SagaLog> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.eid == eid)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SagaLogStore for InMemoryLogStore {
    async fn create_log(&self, entry: SagaLog) -> Result<(), LogStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| LogStoreError::Storage(e.to_string().into()))?;
        data.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(eid: &str, kind: SagaLogKind) -> SagaLog {
        SagaLog {
            eid: eid.into(),
            saga: "transfer".into(),
            recorded_at_millis: 0,
            kind,
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_filters_by_eid() {
        let store = InMemoryLogStore::new();

        store
            .create_log(entry("a", SagaLogKind::StartSaga { args: vec![] }))
            .await
            .unwrap();
        store
            .create_log(entry("b", SagaLogKind::StartAction { index: 0 }))
            .await
            .unwrap();
        store
            .create_log(entry("a", SagaLogKind::EndSaga { compensated: false }))
            .await
            .unwrap();

        assert_eq!(store.entries().len(), 3);
        let a: Vec<_> = store
            .entries_for("a")
            .into_iter()
            .map(|e| e.kind.log_type())
            .collect();
        assert_eq!(a, vec!["start-saga", "end-saga"]);
    }

    #[tokio::test]
    async fn test_noop_store_accepts_everything() {
        NoOpLogStore
            .create_log(entry("a", SagaLogKind::EndAction { index: 3 }))
            .await
            .unwrap();
    }
}
