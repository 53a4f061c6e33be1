//! Orchestration-Based SAGA Coordinator
//!
//! A coordinator drives named sequences of reversible actions. When an
//! action fails, completed work is undone in reverse through each action's
//! compensation, with exponential backoff between failed compensation
//! attempts. Coordinator replicas share work through a competing-consumers
//! transport; a stopping replica finishes its in-flight calls and hands the
//! remainder of each run to a live peer.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Describe the saga
//! let saga = SagaDefinition::builder("transfer")
//!     .action(DebitSource::new(ledger.clone()))
//!     .action(CreditTarget::new(ledger))
//!     .build();
//!
//! // 2. Register it on a coordinator
//! let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
//! let coordinator = SagaCoordinator::new(transport.clone());
//! coordinator.register_saga(saga, None).await?;
//!
//! // 3. Start runs from anywhere that can reach the transport
//! let eid = SagaClient::new(transport, "transfer").execute(args).await?;
//!
//! // 4. Hand in-flight runs to peers on shutdown
//! coordinator.stop().await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod backoff;
mod context;
mod errors;
mod idempotency;
mod message;
mod options;
mod saga;

// === State Machine ===
mod coordinator;
mod job;

// === Transport ===
mod client;
mod memory;
mod transport;

// === Storage ===
#[cfg(feature = "lmdb")]
mod lmdb;
mod log_store;

// === Observability ===
mod observer;
mod stats;

// === Re-exports ===

// Types
pub use backoff::BackoffPolicy;
pub use context::{now_millis, ActionContext, ExecutionId, JobId};
pub use idempotency::IdempotencyKey;
pub use message::{routing_key, SagaMessage};
pub use options::{BackoffOverride, CoordinatorConfig, SagaOptions, SagaOptionsOverride};
pub use saga::{FnAction, SagaAction, SagaDefinition, SagaDefinitionBuilder};

// Errors
pub use errors::{
    ActionError, ClientError, CodecError, CoordinatorError, LogStoreError, SagaFault,
    TransportError,
};

// State machine
pub use coordinator::{Lifecycle, SagaCoordinator, SagaCoordinatorBuilder};
pub use job::{JobState, Transition};

// Transport
pub use client::SagaClient;
pub use memory::InMemoryTransport;
pub use transport::{MessageHandler, MessageSender, SenderOptions, Transport, Worker};

// Storage
#[cfg(feature = "lmdb")]
pub use lmdb::HeedLogStore;
pub use log_store::{InMemoryLogStore, NoOpLogStore, SagaLog, SagaLogKind, SagaLogStore};

// Observability
pub use observer::{NoOpObserver, SagaObserver, TracingObserver};
pub use stats::{CoordinatorStats, CoordinatorStatsSnapshot};
