//! Linear backoff for the stock-query consumer.
//!
//! A query that fails for a transient reason is retried forever. The pause before
//! attempt `n + 1` is `step × n`, and once `n` reaches the alarm threshold every
//! further failure is logged at error level instead of warning.
//!
//! # Example
//!
//! ```rust
//! use stockroom_runtime::retry::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::builder()
//!     .step(Duration::from_secs(10))
//!     .alarm_threshold(6)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(30));
//! assert!(!policy.is_alarming(5));
//! assert!(policy.is_alarming(6));
//! ```

use std::time::Duration;

/// Default pause unit between attempts.
pub const DEFAULT_STEP: Duration = Duration::from_secs(10);

/// Default attempt count from which failures are logged at error level.
pub const DEFAULT_ALARM_THRESHOLD: u32 = 6;

/// Linear backoff configuration.
///
/// # Default Values
///
/// - `step`: 10 seconds
/// - `alarm_threshold`: 6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Pause added per failed attempt.
    pub step: Duration,
    /// Failed attempts after which logging escalates to error.
    pub alarm_threshold: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            alarm_threshold: DEFAULT_ALARM_THRESHOLD,
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            step: None,
            alarm_threshold: None,
        }
    }

    /// Pause after `attempts` consecutive failures: `step × attempts`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        self.step.saturating_mul(attempts)
    }

    /// `true` once `attempts` failures warrant an error-level log.
    #[must_use]
    pub const fn is_alarming(&self, attempts: u32) -> bool {
        attempts >= self.alarm_threshold
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    step: Option<Duration>,
    alarm_threshold: Option<u32>,
}

impl BackoffPolicyBuilder {
    /// Set the pause added per failed attempt.
    #[must_use]
    pub const fn step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the attempt count from which failures are logged at error level.
    #[must_use]
    pub const fn alarm_threshold(mut self, threshold: u32) -> Self {
        self.alarm_threshold = Some(threshold);
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        BackoffPolicy {
            step: self.step.unwrap_or(DEFAULT_STEP),
            alarm_threshold: self.alarm_threshold.unwrap_or(DEFAULT_ALARM_THRESHOLD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.step, Duration::from_secs(10));
        assert_eq!(policy.alarm_threshold, 6);
        assert_eq!(BackoffPolicy::builder().build(), policy);
    }

    #[test]
    fn test_delay_grows_linearly() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(70));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = BackoffPolicy::builder().step(Duration::MAX).build();
        assert_eq!(policy.delay_for_attempt(2), Duration::MAX);
    }

    #[test]
    fn test_alarm_threshold() {
        let policy = BackoffPolicy::builder().alarm_threshold(3).build();
        assert!(!policy.is_alarming(2));
        assert!(policy.is_alarming(3));
        assert!(policy.is_alarming(4));
    }
}
