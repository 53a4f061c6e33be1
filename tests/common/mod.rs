#![allow(dead_code)]

use async_trait::async_trait;
use icanact_saga_orchestration::{
    ActionContext, ActionError, CoordinatorConfig, ExecutionId, InMemoryLogStore,
    InMemoryTransport, SagaAction, SagaCoordinator, SagaDefinition, SagaFault,
    SagaObserver, SagaOptionsOverride,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Compensate,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub kind: CallKind,
    pub index: usize,
    pub retries: u32,
    pub eid: ExecutionId,
    pub at: Instant,
}

/// Ordered record of every action call across all coordinators
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn sequence(&self) -> Vec<(CallKind, usize)> {
        self.calls().iter().map(|c| (c.kind, c.index)).collect()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }
}

/// Action with scripted outcomes and call counters
pub struct ScriptedAction {
    index: usize,
    log: CallLog,
    fail_execute: bool,
    /// Compensation fails this many times before succeeding
    compensate_failures: usize,
    execute_delay: Duration,
    compensate_delay: Duration,
    pub execute_calls: AtomicUsize,
    pub execute_finished: AtomicUsize,
    pub compensate_calls: AtomicUsize,
}

impl ScriptedAction {
    pub fn new(index: usize, log: &CallLog) -> Self {
        Self {
            index,
            log: log.clone(),
            fail_execute: false,
            compensate_failures: 0,
            execute_delay: Duration::ZERO,
            compensate_delay: Duration::ZERO,
            execute_calls: AtomicUsize::new(0),
            execute_finished: AtomicUsize::new(0),
            compensate_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn compensate_failures(mut self, failures: usize) -> Self {
        self.compensate_failures = failures;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    pub fn slow_compensation(mut self, delay: Duration) -> Self {
        self.compensate_delay = delay;
        self
    }

    pub fn executed(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn compensated(&self) -> usize {
        self.compensate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SagaAction for ScriptedAction {
    async fn execute(&self, context: &ActionContext, _args: &[u8]) -> Result<(), ActionError> {
        assert_eq!(context.index, self.index);
        self.log.push(Call {
            kind: CallKind::Execute,
            index: context.index,
            retries: context.retries,
            eid: context.eid.clone(),
            at: Instant::now(),
        });
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        self.execute_finished.fetch_add(1, Ordering::SeqCst);

        if self.fail_execute {
            Err(ActionError::failed(format!("execute {} failed", self.index)))
        } else {
            Ok(())
        }
    }

    async fn compensate(&self, context: &ActionContext, _args: &[u8]) -> Result<(), ActionError> {
        assert_eq!(context.index, self.index);
        self.log.push(Call {
            kind: CallKind::Compensate,
            index: context.index,
            retries: context.retries,
            eid: context.eid.clone(),
            at: Instant::now(),
        });
        let attempt = self.compensate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.compensate_delay.is_zero() {
            tokio::time::sleep(self.compensate_delay).await;
        }

        if attempt < self.compensate_failures {
            Err(ActionError::failed(format!("compensate {} failed", self.index)))
        } else {
            Ok(())
        }
    }
}

pub fn saga(name: &str, actions: &[Arc<ScriptedAction>]) -> SagaDefinition {
    actions
        .iter()
        .fold(SagaDefinition::builder(name), |builder, action| {
            builder.shared_action(action.clone())
        })
        .build()
}

pub fn fast_retries() -> SagaOptionsOverride {
    SagaOptionsOverride::default().with_min_delay_millis(1)
}

/// Observer that keeps faults and counts handoffs
#[derive(Default)]
pub struct RecordingObserver {
    pub faults: Mutex<Vec<SagaFault>>,
    pub handoffs: Mutex<Vec<String>>,
}

impl SagaObserver for RecordingObserver {
    fn on_saga_started(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_action_started(&self, _context: &ActionContext) {}
    fn on_action_completed(&self, _context: &ActionContext, _duration_millis: u64) {}
    fn on_action_failed(&self, _context: &ActionContext, _error: &str) {}
    fn on_compensation_started(&self, _context: &ActionContext) {}
    fn on_compensation_completed(&self, _context: &ActionContext) {}
    fn on_compensation_failed(&self, _context: &ActionContext, _error: &str) {}
    fn on_compensation_scheduled(&self, _context: &ActionContext, _schedule_millis: u64) {}
    fn on_handoff(&self, _eid: &ExecutionId, _saga: &str, message_type: &str) {
        self.handoffs.lock().unwrap().push(message_type.to_owned());
    }
    fn on_saga_completed(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_saga_compensated(&self, _eid: &ExecutionId, _saga: &str) {}
    fn on_saga_quarantined(&self, fault: &SagaFault) {
        self.faults.lock().unwrap().push(fault.clone());
    }
}

pub struct Harness {
    pub transport: Arc<InMemoryTransport>,
    pub log_store: Arc<InMemoryLogStore>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            transport: Arc::new(InMemoryTransport::new()),
            log_store: Arc::new(InMemoryLogStore::new()),
        }
    }

    pub fn coordinator(&self, config: CoordinatorConfig) -> SagaCoordinator {
        SagaCoordinator::builder(self.transport.clone())
            .log_store(self.log_store.clone())
            .config(config)
            .build()
    }

    pub fn observed_coordinator(
        &self,
        config: CoordinatorConfig,
        observer: Arc<RecordingObserver>,
    ) -> SagaCoordinator {
        SagaCoordinator::builder(self.transport.clone())
            .log_store(self.log_store.clone())
            .observer(observer)
            .config(config)
            .build()
    }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Give stray jobs a chance to run, to catch duplicates
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
