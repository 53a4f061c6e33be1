//! Error types for saga actions, transport, and coordination

use crate::ExecutionId;

/// Error from an action's execute or compensate call.
///
/// Always recoverable from the coordinator's point of view: a failed
/// execute starts compensation, a failed compensate schedules a retry.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ActionError {
    /// The side effect did not (fully) apply
    #[error("action failed: {reason}")]
    Failed {
        /// Error description
        reason: Box<str>,
    },
}

impl ActionError {
    /// Shorthand for [`ActionError::Failed`]
    pub fn failed(reason: impl Into<Box<str>>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Error description
    pub fn reason(&self) -> &str {
        match self {
            Self::Failed { reason } => reason,
        }
    }
}

/// Wire or log entry encoding failure
#[derive(Clone, Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed
    #[error("encode error: {0}")]
    Encode(Box<str>),
    /// Bytes are not a valid archive of the expected type
    #[error("decode error: {0}")]
    Decode(Box<str>),
}

/// Error from the message transport
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport no longer accepts messages or workers
    #[error("transport closed")]
    Closed,
    /// The message could not be delivered
    #[error("send failed: {0}")]
    Send(Box<str>),
    /// The receiving handler refused the message
    #[error("message rejected: {0}")]
    Rejected(Box<str>),
    /// A worker's consumer task failed
    #[error("worker error: {0}")]
    Worker(Box<str>),
}

/// Error from a log store write
#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    /// The backing store failed
    #[error("storage error: {0}")]
    Storage(Box<str>),
    /// The entry could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors surfaced by the coordinator
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Creating a worker or sender failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A message could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Sagas need at least one action
    #[error("saga {0} has no actions")]
    EmptySaga(Box<str>),
    /// A saga with this name is already registered here
    #[error("saga {0} is already registered")]
    AlreadyRegistered(Box<str>),
    /// The coordinator is stopping or stopped
    #[error("coordinator is not running")]
    NotRunning,
    /// A message named a saga this worker does not serve
    #[error("unknown saga: {0}")]
    UnknownSaga(Box<str>),
    /// A message carried an index past the saga's last action
    #[error("index {index} out of range for saga {saga} with {len} actions")]
    IndexOutOfRange {
        /// Saga name
        saga: Box<str>,
        /// Index carried by the message
        index: usize,
        /// Number of actions in the saga
        len: usize,
    },
    /// The rest of a run could not be sent to a peer
    #[error("handoff failed for {eid}: {source}")]
    Handoff {
        /// Run that was not handed off
        eid: ExecutionId,
        /// Send failure
        #[source]
        source: TransportError,
    },
    /// A job task panicked
    #[error("job panicked: {0}")]
    JobPanicked(Box<str>),
    /// `stop` finished, but some runs could not be handed off
    #[error("shutdown completed with {} failure(s)", .failures.len())]
    Shutdown {
        /// One entry per failed job or forward
        failures: Vec<CoordinatorError>,
    },
}

/// Error from the saga client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The start request could not be sent
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The start request could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A run whose compensation exhausted its retries.
///
/// The run cannot make progress; it is quarantined and reported
/// through the observer, stats, and the log store.
#[derive(Clone, Debug)]
pub struct SagaFault {
    /// Quarantined run
    pub eid: ExecutionId,
    /// Saga name
    pub saga: Box<str>,
    /// Index whose compensation kept failing
    pub index: usize,
    /// Failed attempts before giving up
    pub retries: u32,
    /// Last compensation error
    pub reason: Box<str>,
}

impl std::fmt::Display for SagaFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "saga {} ({}) quarantined at index {} after {} retries: {}",
            self.saga, self.eid, self.index, self.retries, self.reason
        )
    }
}
