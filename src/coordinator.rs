//! Saga execution coordinator
//!
//! Owns the registered sagas (one competing-consumers worker each), the
//! table of live jobs, and the per-saga outbound sender used for handoff.
//!
//! ```rust,ignore
//! let transport = Arc::new(InMemoryTransport::new());
//! let coordinator = SagaCoordinator::builder(transport.clone())
//!     .log_store(Arc::new(InMemoryLogStore::new()))
//!     .build();
//!
//! coordinator.register_saga(transfer_saga(), None).await?;
//! SagaClient::new(transport, "transfer").execute(args).await?;
//!
//! // Later: in-flight runs finish their current step and move to a peer.
//! coordinator.stop().await?;
//! ```

use crate::job::{JobEnv, JobParams, JobRunner, JobState};
use crate::message::routing_key;
use crate::{
    CoordinatorConfig, CoordinatorError, CoordinatorStats, CoordinatorStatsSnapshot, ExecutionId,
    JobId, MessageHandler, MessageSender, NoOpLogStore, SagaDefinition, SagaLogStore,
    SagaMessage, SagaObserver, SagaOptions, SagaOptionsOverride, SenderOptions, TracingObserver,
    Transport, TransportError, Worker,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Coordinator lifecycle; only moves forward
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting work
    Running,
    /// `stop` in progress; live jobs are finishing their current call
    Stopping,
    /// Every job has ended or been handed off
    Stopped,
}

/// Everything a job of one saga needs besides the run state
struct SagaRuntime {
    definition: Arc<SagaDefinition>,
    options: SagaOptions,
    sender: Arc<dyn MessageSender>,
}

struct RegisteredSaga {
    runtime: Arc<SagaRuntime>,
    worker: Box<dyn Worker>,
}

struct JobHandle {
    eid: ExecutionId,
    cancel: CancellationToken,
    /// Taken by `stop`; the entry stays until the task removes it
    task: Option<JoinHandle<Result<(), CoordinatorError>>>,
}

struct CoordinatorInner {
    lifecycle: Lifecycle,
    sagas: HashMap<Box<str>, RegisteredSaga>,
    jobs: HashMap<JobId, JobHandle>,
}

struct CoordinatorShared {
    transport: Arc<dyn Transport>,
    env: Arc<JobEnv>,
    inner: Mutex<CoordinatorInner>,
    /// Messages that could not be forwarded while stopping
    forward_failures: Mutex<Vec<CoordinatorError>>,
}

/// Builder for [`SagaCoordinator`]
pub struct SagaCoordinatorBuilder {
    transport: Arc<dyn Transport>,
    log_store: Arc<dyn SagaLogStore>,
    observer: Arc<dyn SagaObserver>,
    config: CoordinatorConfig,
}

impl SagaCoordinatorBuilder {
    /// Sink for lifecycle log entries
    pub fn log_store(mut self, log_store: Arc<dyn SagaLogStore>) -> Self {
        self.log_store = log_store;
        self
    }

    /// Hook for lifecycle events
    pub fn observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Coordinator-wide tunables
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a running coordinator with no sagas registered
    pub fn build(self) -> SagaCoordinator {
        SagaCoordinator {
            shared: Arc::new(CoordinatorShared {
                transport: self.transport,
                env: Arc::new(JobEnv {
                    log_store: self.log_store,
                    observer: self.observer,
                    stats: Arc::new(CoordinatorStats::new()),
                    config: self.config,
                }),
                inner: Mutex::new(CoordinatorInner {
                    lifecycle: Lifecycle::Running,
                    sagas: HashMap::new(),
                    jobs: HashMap::new(),
                }),
                forward_failures: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Drives saga runs received from the transport.
///
/// Call [`SagaCoordinator::stop`] before dropping; a dropped coordinator
/// abandons its in-flight runs.
pub struct SagaCoordinator {
    shared: Arc<CoordinatorShared>,
}

impl SagaCoordinator {
    /// Coordinator with the no-op log store and tracing observer
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Builder with the same defaults as [`SagaCoordinator::new`]
    pub fn builder(transport: Arc<dyn Transport>) -> SagaCoordinatorBuilder {
        SagaCoordinatorBuilder {
            transport,
            log_store: Arc::new(NoOpLogStore),
            observer: Arc::new(TracingObserver),
            config: CoordinatorConfig::default(),
        }
    }

    /// Start consuming the saga's routing key.
    ///
    /// Options resolve as `overrides` over the definition's own overrides
    /// over the defaults.
    pub async fn register_saga(
        &self,
        definition: SagaDefinition,
        overrides: Option<SagaOptionsOverride>,
    ) -> Result<(), CoordinatorError> {
        if definition.is_empty() {
            return Err(CoordinatorError::EmptySaga(definition.name().into()));
        }
        self.ensure_registrable(definition.name())?;

        let options = overrides
            .unwrap_or_default()
            .merged_over(definition.options())
            .resolve();
        let key = routing_key(definition.name());
        let sender = self
            .shared
            .transport
            .create_sender(&key, SenderOptions::fire_and_forget())
            .await?;
        let runtime = Arc::new(SagaRuntime {
            definition: Arc::new(definition),
            options,
            sender,
        });
        let handler = Arc::new(SagaWorkerHandler {
            shared: Arc::downgrade(&self.shared),
            runtime: runtime.clone(),
        });
        let worker = self.shared.transport.create_worker(&key, handler).await?;

        let name: Box<str> = runtime.definition.name().into();
        let registered = {
            let mut inner = self.shared.lock();
            if inner.lifecycle != Lifecycle::Running {
                Err((CoordinatorError::NotRunning, worker))
            } else if inner.sagas.contains_key(&name) {
                Err((CoordinatorError::AlreadyRegistered(name.clone()), worker))
            } else {
                inner.sagas.insert(name.clone(), RegisteredSaga { runtime, worker });
                Ok(())
            }
        };

        if let Err((error, worker)) = registered {
            // Lost a race with stop() or a concurrent registration.
            worker.stop().await?;
            return Err(error);
        }

        tracing::info!(
            saga = %name,
            routing_key = %key,
            max_retries = options.max_retries,
            "Saga registered"
        );
        Ok(())
    }

    /// Stop gracefully.
    ///
    /// Workers are deregistered first so no new work arrives. Every live job
    /// then finishes its in-flight call and hands the rest of its run to a
    /// peer; jobs stay in the table until they have done so. Handoffs and
    /// forwards that could not be sent are returned as
    /// [`CoordinatorError::Shutdown`]. Idempotent; calls after the first
    /// return immediately.
    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        let sagas: Vec<RegisteredSaga> = {
            let mut inner = self.shared.lock();
            if inner.lifecycle != Lifecycle::Running {
                return Ok(());
            }
            inner.lifecycle = Lifecycle::Stopping;
            inner.sagas.drain().map(|(_, saga)| saga).collect()
        };

        tracing::info!(sagas = sagas.len(), "Coordinator stopping");
        let mut failures = Vec::new();

        // Off every key before awaiting any worker, so a message forwarded
        // by one saga's handler never lands on another worker of ours.
        for saga in &sagas {
            saga.worker.deregister();
        }
        for saga in sagas {
            if let Err(e) = saga.worker.stop().await {
                tracing::error!(saga = %saga.runtime.definition.name(), error = %e, "Worker stop failed");
                failures.push(CoordinatorError::Transport(e));
            }
        }

        let tasks: Vec<(ExecutionId, JoinHandle<Result<(), CoordinatorError>>)> = {
            let mut inner = self.shared.lock();
            inner
                .jobs
                .values_mut()
                .filter_map(|job| {
                    job.cancel.cancel();
                    job.task.take().map(|task| (job.eid.clone(), task))
                })
                .collect()
        };

        let job_count = tasks.len();
        for (eid, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => {
                    tracing::error!(eid = %eid, error = %e, "Job panicked during stop");
                    failures.push(CoordinatorError::JobPanicked(e.to_string().into()));
                }
            }
        }
        failures.extend(self.shared.take_forward_failures());

        {
            let mut inner = self.shared.lock();
            // Only panicked jobs are left; the rest removed themselves.
            inner.jobs.clear();
            inner.lifecycle = Lifecycle::Stopped;
        }
        tracing::info!(jobs = job_count, failures = failures.len(), "Coordinator stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoordinatorError::Shutdown { failures })
        }
    }

    /// Current lifecycle phase
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lock().lifecycle
    }

    /// Number of live jobs
    pub fn active_jobs(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Registered saga names, sorted
    pub fn registered_sagas(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .lock()
            .sagas
            .keys()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }

    /// Resolved options of a registered saga
    pub fn saga_options(&self, saga: &str) -> Option<SagaOptions> {
        self.shared
            .lock()
            .sagas
            .get(saga)
            .map(|registered| registered.runtime.options)
    }

    /// Point-in-time copy of the counters
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.shared.env.stats.snapshot()
    }

    fn ensure_registrable(&self, name: &str) -> Result<(), CoordinatorError> {
        let inner = self.shared.lock();
        if inner.lifecycle != Lifecycle::Running {
            return Err(CoordinatorError::NotRunning);
        }
        if inner.sagas.contains_key(name) {
            return Err(CoordinatorError::AlreadyRegistered(name.into()));
        }
        Ok(())
    }
}

impl CoordinatorShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Turn an inbound message into a job, or forward it when stopping.
    async fn dispatch(
        self: &Arc<Self>,
        runtime: &Arc<SagaRuntime>,
        message: SagaMessage,
        payload: Vec<u8>,
    ) -> Result<(), CoordinatorError> {
        let definition = &runtime.definition;
        if message.saga() != definition.name() {
            return Err(CoordinatorError::UnknownSaga(message.saga().into()));
        }

        let message_type = message.message_type();
        let (eid, args, state, fresh) = match message {
            SagaMessage::StartSaga { eid, args, .. } => {
                (eid, args, JobState::StartAction { index: 0 }, true)
            }
            SagaMessage::StartAction {
                eid, args, index, ..
            } => (
                eid,
                args,
                JobState::StartAction {
                    index: index as usize,
                },
                false,
            ),
            SagaMessage::StartCompensateAction {
                eid,
                args,
                index,
                retries,
                ..
            } => (
                eid,
                args,
                JobState::StartCompensateAction {
                    index: index as usize,
                    retries,
                },
                false,
            ),
            SagaMessage::DelayCompensateAction {
                eid,
                args,
                index,
                retries,
                schedule_millis,
                ..
            } => (
                eid,
                args,
                JobState::DelayCompensateAction {
                    index: index as usize,
                    retries,
                    schedule_millis,
                },
                false,
            ),
        };

        if state.index() >= definition.len() {
            return Err(CoordinatorError::IndexOutOfRange {
                saga: definition.name().into(),
                index: state.index(),
                len: definition.len(),
            });
        }

        let eid = ExecutionId::from(eid);
        let params = JobParams {
            eid: eid.clone(),
            saga: definition.clone(),
            options: runtime.options,
            args: args.into(),
            state,
        };

        match self.add_job(runtime, params, fresh) {
            Ok(_) => Ok(()),
            // Delivered while stopping: pass it on untouched.
            Err(CoordinatorError::NotRunning) => {
                self.forward(runtime, eid, message_type, payload).await
            }
            Err(e) => Err(e),
        }
    }

    async fn forward(
        &self,
        runtime: &SagaRuntime,
        eid: ExecutionId,
        message_type: &'static str,
        payload: Vec<u8>,
    ) -> Result<(), CoordinatorError> {
        let saga = runtime.definition.name();
        if let Err(source) = runtime.sender.send(payload).await {
            tracing::error!(
                eid = %eid,
                saga = %saga,
                message_type,
                error = %source,
                "Forward failed while stopping"
            );
            self.forward_failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(CoordinatorError::Handoff {
                    eid: eid.clone(),
                    source: source.clone(),
                });
            return Err(CoordinatorError::Handoff { eid, source });
        }

        CoordinatorStats::incr(&self.env.stats.handoffs);
        self.env.observer.on_handoff(&eid, saga, message_type);
        Ok(())
    }

    fn take_forward_failures(&self) -> Vec<CoordinatorError> {
        std::mem::take(&mut *self.forward_failures.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn add_job(
        self: &Arc<Self>,
        runtime: &Arc<SagaRuntime>,
        params: JobParams,
        fresh: bool,
    ) -> Result<JobId, CoordinatorError> {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Running {
            return Err(CoordinatorError::NotRunning);
        }

        let id = JobId::new();
        let eid = params.eid.clone();
        let cancel = CancellationToken::new();
        let runner = JobRunner {
            params,
            env: self.env.clone(),
            sender: runtime.sender.clone(),
            cancel: cancel.clone(),
            fresh,
        };
        let shared = Arc::downgrade(self);
        let job_eid = eid.clone();

        let task = tokio::spawn(async move {
            let result = runner.run().await;
            if let Err(e) = &result {
                tracing::error!(job_id = %id, eid = %job_eid, error = %e, "Job failed");
            }
            if let Some(shared) = shared.upgrade() {
                shared.lock().jobs.remove(&id);
            }
            result
        });

        // The task cannot remove itself before this insert: it needs the lock we hold.
        inner.jobs.insert(
            id,
            JobHandle {
                eid,
                cancel,
                task: Some(task),
            },
        );
        tracing::trace!(job_id = %id, "Job added");
        Ok(id)
    }
}

struct SagaWorkerHandler {
    shared: Weak<CoordinatorShared>,
    runtime: Arc<SagaRuntime>,
}

#[async_trait]
impl MessageHandler for SagaWorkerHandler {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(TransportError::Rejected("coordinator dropped".into()));
        };
        let message = SagaMessage::decode(&payload)
            .map_err(|e| TransportError::Rejected(e.to_string().into()))?;

        tracing::debug!(
            saga = %self.runtime.definition.name(),
            eid = %message.eid(),
            message_type = message.message_type(),
            "Message received"
        );

        shared
            .dispatch(&self.runtime, message, payload)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string().into()))
    }
}
