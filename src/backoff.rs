//! Backoff policy for compensation retries

use std::time::Duration;

/// Exponential backoff applied between compensation attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for retry count 0 (milliseconds)
    pub min_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay_millis: 10,
            max_delay_millis: 10_000,
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// `floor(min(min_delay * factor^retries, max_delay))`, saturating at the cap.
    pub fn delay_millis(&self, retries: u32) -> u64 {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let raw = self.min_delay_millis as f64 * self.factor.powi(exponent);
        // f64::min ignores NaN, so an inf * 0 product still lands on the cap.
        let capped = raw.min(self.max_delay_millis as f64);
        if capped <= 0.0 {
            return 0;
        }
        capped.floor() as u64
    }

    /// Delay for a given retry count as a `Duration`.
    pub fn delay_for_retry(&self, retries: u32) -> Duration {
        Duration::from_millis(self.delay_millis(retries))
    }
}
