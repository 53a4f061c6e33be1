//! Saga policy and coordinator configuration

use crate::BackoffPolicy;
use std::time::Duration;

/// Resolved retry/backoff policy for one registered saga
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SagaOptions {
    /// Backoff between compensation attempts
    pub backoff: BackoffPolicy,
    /// Compensation retries allowed per index before the run is quarantined
    pub max_retries: u32,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_retries: 10,
        }
    }
}

/// Partial backoff override; unset fields fall back to the base policy
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BackoffOverride {
    /// Delay before the first retry
    pub min_delay_millis: Option<u64>,
    /// Delay cap
    pub max_delay_millis: Option<u64>,
    /// Growth factor per retry
    pub factor: Option<f64>,
}

impl BackoffOverride {
    fn merged_over(&self, base: &BackoffOverride) -> BackoffOverride {
        BackoffOverride {
            min_delay_millis: self.min_delay_millis.or(base.min_delay_millis),
            max_delay_millis: self.max_delay_millis.or(base.max_delay_millis),
            factor: self.factor.or(base.factor),
        }
    }

    fn apply(&self, policy: BackoffPolicy) -> BackoffPolicy {
        BackoffPolicy {
            min_delay_millis: self.min_delay_millis.unwrap_or(policy.min_delay_millis),
            max_delay_millis: self.max_delay_millis.unwrap_or(policy.max_delay_millis),
            factor: self.factor.unwrap_or(policy.factor),
        }
    }
}

/// Partial saga options, merged key by key over the defaults.
///
/// ```rust,ignore
/// let options = SagaOptionsOverride::default()
///     .with_min_delay_millis(1)
///     .with_max_retries(3)
///     .resolve();
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SagaOptionsOverride {
    /// Backoff fields to override
    pub backoff: Option<BackoffOverride>,
    /// Compensation attempts allowed before quarantine
    pub max_retries: Option<u32>,
}

impl SagaOptionsOverride {
    /// Set the backoff floor
    pub fn with_min_delay_millis(mut self, millis: u64) -> Self {
        self.backoff.get_or_insert_with(BackoffOverride::default).min_delay_millis = Some(millis);
        self
    }

    /// Set the backoff cap
    pub fn with_max_delay_millis(mut self, millis: u64) -> Self {
        self.backoff.get_or_insert_with(BackoffOverride::default).max_delay_millis = Some(millis);
        self
    }

    /// Set the backoff growth factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.backoff.get_or_insert_with(BackoffOverride::default).factor = Some(factor);
        self
    }

    /// Set the compensation retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Layer `self` over `base`; fields set on `self` win.
    pub fn merged_over(&self, base: &SagaOptionsOverride) -> SagaOptionsOverride {
        let backoff = match (&self.backoff, &base.backoff) {
            (Some(ours), Some(theirs)) => Some(ours.merged_over(theirs)),
            (Some(ours), None) => Some(*ours),
            (None, theirs) => *theirs,
        };
        SagaOptionsOverride {
            backoff,
            max_retries: self.max_retries.or(base.max_retries),
        }
    }

    /// Resolve against [`SagaOptions::default`].
    pub fn resolve(&self) -> SagaOptions {
        let defaults = SagaOptions::default();
        SagaOptions {
            backoff: self
                .backoff
                .map(|b| b.apply(defaults.backoff))
                .unwrap_or(defaults.backoff),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
        }
    }
}

/// Coordinator-wide tunables
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// A stopping coordinator waits out retry delays shorter than this
    /// instead of handing them off to a peer.
    pub handoff_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            handoff_grace: Duration::from_secs(3),
        }
    }
}

impl CoordinatorConfig {
    /// Override [`CoordinatorConfig::handoff_grace`]
    pub fn with_handoff_grace(mut self, grace: Duration) -> Self {
        self.handoff_grace = grace;
        self
    }
}
