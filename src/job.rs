//! Job states, the transition function, and the job driver
//!
//! A job drives one saga run (one eid) through consecutive states. Each
//! state is a single step: execute an action, compensate an action, or
//! wait out a retry delay. [`JobState::transition`] is pure; the driver
//! performs the side effects and decides, per step, whether the next state
//! runs here or is handed off to a peer because the coordinator is stopping.

use crate::{
    now_millis, ActionContext, CoordinatorConfig, CoordinatorError, CoordinatorStats,
    ExecutionId, MessageSender, SagaDefinition, SagaFault, SagaLog, SagaLogKind, SagaLogStore,
    SagaMessage, SagaObserver, SagaOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Position of a saga run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Execute an action
    StartAction {
        /// Action index
        index: usize,
    },
    /// Compensate an action
    StartCompensateAction {
        /// Action index
        index: usize,
        /// Failed attempts so far
        retries: u32,
    },
    /// Wait before compensating again
    DelayCompensateAction {
        /// Action index
        index: usize,
        /// Failed attempts so far
        retries: u32,
        /// Wake time, millis since UNIX epoch
        schedule_millis: u64,
    },
}

/// Result of applying a step outcome to a state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Continue with this state
    Next(JobState),
    /// Last action succeeded
    Completed,
    /// Index 0 compensated; the run is fully unwound
    Compensated,
    /// Compensation failed with no retries left
    Quarantined {
        /// Action whose compensation gave up
        index: usize,
        /// Failed attempts
        retries: u32,
    },
}

impl JobState {
    /// Action this state works on
    pub fn index(&self) -> usize {
        match *self {
            Self::StartAction { index } => index,
            Self::StartCompensateAction { index, .. } => index,
            Self::DelayCompensateAction { index, .. } => index,
        }
    }

    /// Failed compensation attempts; 0 for forward states
    pub fn retries(&self) -> u32 {
        match *self {
            Self::StartAction { .. } => 0,
            Self::StartCompensateAction { retries, .. } => retries,
            Self::DelayCompensateAction { retries, .. } => retries,
        }
    }

    /// True for a retry wait
    pub fn is_delay(&self) -> bool {
        matches!(self, Self::DelayCompensateAction { .. })
    }

    /// Next state after this step finished.
    ///
    /// `succeeded` is the outcome of the execute/compensate call; a delay
    /// step has no call and always moves on to compensating again.
    pub fn transition(
        &self,
        succeeded: bool,
        len: usize,
        options: &SagaOptions,
        now_millis: u64,
    ) -> Transition {
        match *self {
            Self::StartAction { index } if succeeded => {
                if index + 1 >= len {
                    Transition::Completed
                } else {
                    Transition::Next(Self::StartAction { index: index + 1 })
                }
            }
            // The failed step may have partially applied; undo it first.
            Self::StartAction { index } => {
                Transition::Next(Self::StartCompensateAction { index, retries: 0 })
            }
            Self::StartCompensateAction { index, .. } if succeeded => {
                if index == 0 {
                    Transition::Compensated
                } else {
                    Transition::Next(Self::StartCompensateAction {
                        index: index - 1,
                        retries: 0,
                    })
                }
            }
            Self::StartCompensateAction { index, retries } => {
                if retries >= options.max_retries {
                    return Transition::Quarantined { index, retries };
                }
                let retries = retries + 1;
                let schedule_millis =
                    now_millis.saturating_add(options.backoff.delay_millis(retries));
                Transition::Next(Self::DelayCompensateAction {
                    index,
                    retries,
                    schedule_millis,
                })
            }
            Self::DelayCompensateAction { index, retries, .. } => {
                Transition::Next(Self::StartCompensateAction { index, retries })
            }
        }
    }
}

/// State threaded through every step of one saga run
#[derive(Clone)]
pub(crate) struct JobParams {
    pub eid: ExecutionId,
    pub saga: Arc<SagaDefinition>,
    pub options: SagaOptions,
    pub args: Arc<[u8]>,
    pub state: JobState,
}

impl JobParams {
    /// Wire form of `state` for this run
    pub fn message(&self, state: JobState) -> SagaMessage {
        let eid = self.eid.as_str().to_owned();
        let saga = self.saga.name().to_owned();
        let args = self.args.to_vec();
        match state {
            JobState::StartAction { index } => SagaMessage::StartAction {
                eid,
                saga,
                args,
                index: wire_index(index),
            },
            JobState::StartCompensateAction { index, retries } => {
                SagaMessage::StartCompensateAction {
                    eid,
                    saga,
                    args,
                    index: wire_index(index),
                    retries,
                }
            }
            JobState::DelayCompensateAction {
                index,
                retries,
                schedule_millis,
            } => SagaMessage::DelayCompensateAction {
                eid,
                saga,
                args,
                index: wire_index(index),
                retries,
                schedule_millis,
            },
        }
    }

    fn context(&self, index: usize, retries: u32) -> ActionContext {
        ActionContext {
            eid: self.eid.clone(),
            saga: self.saga.name().into(),
            index,
            retries,
        }
    }
}

pub(crate) fn wire_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// Collaborators shared by every job of one coordinator
pub(crate) struct JobEnv {
    pub log_store: Arc<dyn SagaLogStore>,
    pub observer: Arc<dyn SagaObserver>,
    pub stats: Arc<CoordinatorStats>,
    pub config: CoordinatorConfig,
}

enum DelayOutcome {
    Elapsed,
    HandOff,
}

/// Drives one saga run until it ends or is handed off
pub(crate) struct JobRunner {
    pub params: JobParams,
    pub env: Arc<JobEnv>,
    /// Outbound channel to this saga's routing key
    pub sender: Arc<dyn MessageSender>,
    pub cancel: CancellationToken,
    /// Set when the run starts here from a client request
    pub fresh: bool,
}

impl JobRunner {
    pub async fn run(mut self) -> Result<(), CoordinatorError> {
        if self.fresh {
            let args = self.params.args.to_vec();
            self.log(SagaLogKind::StartSaga { args }).await;
            CoordinatorStats::incr(&self.env.stats.sagas_started);
            self.env
                .observer
                .on_saga_started(&self.params.eid, self.params.saga.name());
        }

        loop {
            let transition = match self.params.state {
                JobState::StartAction { index } => self.start_action(index).await?,
                JobState::StartCompensateAction { index, retries } => {
                    self.start_compensate(index, retries).await?
                }
                JobState::DelayCompensateAction {
                    schedule_millis, ..
                } => match self.delay(schedule_millis).await {
                    DelayOutcome::Elapsed => self.params.state.transition(
                        true,
                        self.params.saga.len(),
                        &self.params.options,
                        now_millis(),
                    ),
                    DelayOutcome::HandOff => return self.handoff(self.params.state).await,
                },
            };

            match transition {
                Transition::Next(next) => {
                    // Delays apply their own grace policy when stopping.
                    if self.cancel.is_cancelled() && !next.is_delay() {
                        return self.handoff(next).await;
                    }
                    self.params.state = next;
                }
                Transition::Completed => {
                    self.log(SagaLogKind::EndSaga { compensated: false }).await;
                    CoordinatorStats::incr(&self.env.stats.sagas_completed);
                    self.env
                        .observer
                        .on_saga_completed(&self.params.eid, self.params.saga.name());
                    return Ok(());
                }
                Transition::Compensated => {
                    self.log(SagaLogKind::EndSaga { compensated: true }).await;
                    CoordinatorStats::incr(&self.env.stats.sagas_compensated);
                    self.env
                        .observer
                        .on_saga_compensated(&self.params.eid, self.params.saga.name());
                    return Ok(());
                }
                // Reported by start_compensate, which still holds the error.
                Transition::Quarantined { .. } => return Ok(()),
            }
        }
    }

    async fn start_action(&self, index: usize) -> Result<Transition, CoordinatorError> {
        let action = self.action(index)?;
        let context = self.params.context(index, 0);

        self.log(SagaLogKind::StartAction {
            index: wire_index(index),
        })
        .await;
        self.env.observer.on_action_started(&context);

        let started = Instant::now();
        let result = action.execute(&context, &self.params.args).await;

        match &result {
            Ok(()) => {
                CoordinatorStats::incr(&self.env.stats.actions_executed);
                self.env
                    .observer
                    .on_action_completed(&context, started.elapsed().as_millis() as u64);
                self.log(SagaLogKind::EndAction {
                    index: wire_index(index),
                })
                .await;
            }
            Err(e) => {
                CoordinatorStats::incr(&self.env.stats.actions_failed);
                self.env.observer.on_action_failed(&context, e.reason());
            }
        }

        Ok(self.params.state.transition(
            result.is_ok(),
            self.params.saga.len(),
            &self.params.options,
            now_millis(),
        ))
    }

    async fn start_compensate(
        &self,
        index: usize,
        retries: u32,
    ) -> Result<Transition, CoordinatorError> {
        let action = self.action(index)?;
        let context = self.params.context(index, retries);

        self.log(SagaLogKind::StartCompensateAction {
            index: wire_index(index),
            retries,
        })
        .await;
        self.env.observer.on_compensation_started(&context);

        let result = action.compensate(&context, &self.params.args).await;
        let transition = self.params.state.transition(
            result.is_ok(),
            self.params.saga.len(),
            &self.params.options,
            now_millis(),
        );

        match (&result, transition) {
            (Ok(()), _) => {
                CoordinatorStats::incr(&self.env.stats.compensations_executed);
                self.env.observer.on_compensation_completed(&context);
                self.log(SagaLogKind::EndCompensateAction {
                    index: wire_index(index),
                    retries,
                })
                .await;
            }
            (
                Err(e),
                Transition::Next(JobState::DelayCompensateAction {
                    retries: next_retries,
                    schedule_millis,
                    ..
                }),
            ) => {
                CoordinatorStats::incr(&self.env.stats.compensations_failed);
                CoordinatorStats::incr(&self.env.stats.retries_scheduled);
                self.env.observer.on_compensation_failed(&context, e.reason());
                self.env
                    .observer
                    .on_compensation_scheduled(&context, schedule_millis);
                self.log(SagaLogKind::DelayCompensateAction {
                    index: wire_index(index),
                    retries: next_retries,
                    schedule_millis,
                })
                .await;
            }
            (Err(e), _) => {
                CoordinatorStats::incr(&self.env.stats.compensations_failed);
                CoordinatorStats::incr(&self.env.stats.sagas_quarantined);
                self.env.observer.on_compensation_failed(&context, e.reason());

                let fault = SagaFault {
                    eid: self.params.eid.clone(),
                    saga: self.params.saga.name().into(),
                    index,
                    retries,
                    reason: e.reason().into(),
                };
                self.log(SagaLogKind::QuarantineSaga {
                    index: wire_index(index),
                    retries,
                    reason: e.reason().to_owned(),
                })
                .await;
                self.env.observer.on_saga_quarantined(&fault);
            }
        }

        Ok(transition)
    }

    /// Wait for the absolute `schedule_millis`.
    ///
    /// If a stop arrives mid-wait and more than the grace window remains,
    /// the wait is abandoned and the delay itself is handed off; otherwise
    /// the timer runs out here.
    async fn delay(&self, schedule_millis: u64) -> DelayOutcome {
        let remaining = Duration::from_millis(schedule_millis.saturating_sub(now_millis()));
        let deadline = Instant::now() + remaining;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => DelayOutcome::Elapsed,
            _ = self.cancel.cancelled() => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining >= self.env.config.handoff_grace {
                    DelayOutcome::HandOff
                } else {
                    tokio::time::sleep_until(deadline).await;
                    DelayOutcome::Elapsed
                }
            }
        }
    }

    async fn handoff(&self, state: JobState) -> Result<(), CoordinatorError> {
        let message = self.params.message(state);
        let message_type = message.message_type();
        let payload = message.encode()?;

        if let Err(source) = self.sender.send(payload).await {
            tracing::error!(
                eid = %self.params.eid,
                saga = %self.params.saga.name(),
                message_type,
                error = %source,
                "Handoff failed; run is lost unless the message is replayed"
            );
            return Err(CoordinatorError::Handoff {
                eid: self.params.eid.clone(),
                source,
            });
        }

        CoordinatorStats::incr(&self.env.stats.handoffs);
        self.env
            .observer
            .on_handoff(&self.params.eid, self.params.saga.name(), message_type);
        Ok(())
    }

    fn action(&self, index: usize) -> Result<&Arc<dyn crate::SagaAction>, CoordinatorError> {
        self.params
            .saga
            .action(index)
            .ok_or_else(|| CoordinatorError::IndexOutOfRange {
                saga: self.params.saga.name().into(),
                index,
                len: self.params.saga.len(),
            })
    }

    async fn log(&self, kind: SagaLogKind) {
        let log_type = kind.log_type();
        let entry = SagaLog {
            eid: self.params.eid.as_str().to_owned(),
            saga: self.params.saga.name().to_owned(),
            recorded_at_millis: now_millis(),
            kind,
        };
        if let Err(e) = self.env.log_store.create_log(entry).await {
            tracing::warn!(eid = %self.params.eid, log_type, error = %e, "Saga log write failed");
        }
    }
}
