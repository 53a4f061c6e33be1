//! Saga definitions and the action trait

use crate::{ActionContext, ActionError, SagaOptionsOverride};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A forward step with its compensating step.
///
/// Both calls receive the same invocation arguments. Delivery is
/// at-least-once, so side effects should be idempotent; see
/// [`ActionContext::action_key`].
///
/// # Example
///
/// ```rust,ignore
/// struct ReserveFunds { ledger: LedgerClient }
///
/// #[async_trait]
/// impl SagaAction for ReserveFunds {
///     async fn execute(&self, ctx: &ActionContext, args: &[u8]) -> Result<(), ActionError> {
///         self.ledger.hold(ctx.action_key(), args).await.map_err(|e| ActionError::failed(e.to_string()))
///     }
///
///     async fn compensate(&self, ctx: &ActionContext, args: &[u8]) -> Result<(), ActionError> {
///         self.ledger.release(ctx.compensation_key(), args).await.map_err(|e| ActionError::failed(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait SagaAction: Send + Sync + 'static {
    /// Execute the forward step
    async fn execute(&self, context: &ActionContext, args: &[u8]) -> Result<(), ActionError>;

    /// Undo the forward step, including a partially applied one
    async fn compensate(&self, context: &ActionContext, args: &[u8]) -> Result<(), ActionError>;
}

/// Action built from a pair of async closures
pub struct FnAction<E, C> {
    execute: E,
    compensate: C,
}

impl<E, C> FnAction<E, C> {
    /// Wrap an execute closure and a compensate closure
    pub fn new(execute: E, compensate: C) -> Self {
        Self {
            execute,
            compensate,
        }
    }
}

#[async_trait]
impl<E, EF, C, CF> SagaAction for FnAction<E, C>
where
    E: Fn(ActionContext, Vec<u8>) -> EF + Send + Sync + 'static,
    EF: Future<Output = Result<(), ActionError>> + Send + 'static,
    C: Fn(ActionContext, Vec<u8>) -> CF + Send + Sync + 'static,
    CF: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    async fn execute(&self, context: &ActionContext, args: &[u8]) -> Result<(), ActionError> {
        (self.execute)(context.clone(), args.to_vec()).await
    }

    async fn compensate(&self, context: &ActionContext, args: &[u8]) -> Result<(), ActionError> {
        (self.compensate)(context.clone(), args.to_vec()).await
    }
}

/// Named, ordered list of actions. Immutable once registered.
pub struct SagaDefinition {
    name: Box<str>,
    actions: Vec<Arc<dyn SagaAction>>,
    options: SagaOptionsOverride,
}

impl SagaDefinition {
    /// Definition with default options
    pub fn new(name: impl Into<Box<str>>, actions: Vec<Arc<dyn SagaAction>>) -> Self {
        Self {
            name: name.into(),
            actions,
            options: SagaOptionsOverride::default(),
        }
    }

    /// Start building a definition action by action
    pub fn builder(name: impl Into<Box<str>>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            definition: Self::new(name, Vec::new()),
        }
    }

    /// Routing key and log name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Actions in execution order
    pub fn actions(&self) -> &[Arc<dyn SagaAction>] {
        &self.actions
    }

    /// Action at `index`, if any
    pub fn action(&self, index: usize) -> Option<&Arc<dyn SagaAction>> {
        self.actions.get(index)
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when the saga has no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Policy overrides declared on the definition itself
    pub fn options(&self) -> &SagaOptionsOverride {
        &self.options
    }
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`SagaDefinition`]
pub struct SagaDefinitionBuilder {
    definition: SagaDefinition,
}

impl SagaDefinitionBuilder {
    /// Append an action
    pub fn action(mut self, action: impl SagaAction) -> Self {
        self.definition.actions.push(Arc::new(action));
        self
    }

    /// Append an action that is shared with other definitions
    pub fn shared_action(mut self, action: Arc<dyn SagaAction>) -> Self {
        self.definition.actions.push(action);
        self
    }

    /// Append an action built from two closures
    pub fn fn_action<E, EF, C, CF>(self, execute: E, compensate: C) -> Self
    where
        E: Fn(ActionContext, Vec<u8>) -> EF + Send + Sync + 'static,
        EF: Future<Output = Result<(), ActionError>> + Send + 'static,
        C: Fn(ActionContext, Vec<u8>) -> CF + Send + Sync + 'static,
        CF: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.action(FnAction::new(execute, compensate))
    }

    /// Set per-saga policy overrides
    pub fn options(mut self, options: SagaOptionsOverride) -> Self {
        self.definition.options = options;
        self
    }

    /// Finish the definition
    pub fn build(self) -> SagaDefinition {
        self.definition
    }
}
