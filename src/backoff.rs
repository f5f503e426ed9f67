//! Reconnect backoff policy for stream subscriptions.
//!
//! Delay doubles with each consecutive transport failure and is bounded by
//! a failure-count ceiling rather than a wall-clock cap: with the defaults
//! the schedule is 1s, 2s, 4s, 8s, 16s, 16s, … . A successfully received
//! record resets the count, so a healthy reconnect starts the schedule
//! over. Retries themselves are unbounded; only an explicit stop ends them.

use std::time::Duration;

/// Backoff configuration.
///
/// # Example
///
/// ```
/// use firehose_client::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new()
///     .with_base_delay(Duration::from_millis(500))
///     .with_max_failures(4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure; doubles from there.
    pub base_delay: Duration,
    /// Ceiling on the consecutive-failure count, bounding delay growth.
    pub max_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_failures: 5,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the failure-count ceiling.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Delay for a given consecutive-failure count: `base * 2^(failures-1)`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.pow(failures.saturating_sub(1).min(20))
    }
}

/// Consecutive-failure tracking for one subscription.
#[derive(Debug, Clone)]
pub struct BackoffState {
    failures: u32,
    policy: BackoffPolicy,
}

impl BackoffState {
    /// Create a fresh state with no recorded failures.
    pub fn new(policy: BackoffPolicy) -> Self {
        BackoffState { failures: 0, policy }
    }

    /// Record one more failure and return the delay before the next attempt.
    ///
    /// The failure count saturates at the policy ceiling, so the returned
    /// delay stops growing once the ceiling is reached.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = (self.failures + 1).min(self.policy.max_failures);
        self.policy.delay_for(self.failures)
    }

    /// Clear the failure count after a successful record delivery.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Current consecutive-failure count.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_failures, 5);
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let mut state = BackoffState::new(BackoffPolicy::default());

        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.next_delay(), Duration::from_secs(2));
        assert_eq!(state.next_delay(), Duration::from_secs(4));
        assert_eq!(state.next_delay(), Duration::from_secs(8));
        assert_eq!(state.next_delay(), Duration::from_secs(16));

        // sixth failure: count stays at the ceiling, delay stops growing
        assert_eq!(state.next_delay(), Duration::from_secs(16));
        assert_eq!(state.failures(), 5);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut state = BackoffState::new(BackoffPolicy::default());
        for _ in 0..4 {
            state.next_delay();
        }

        state.reset();
        assert_eq!(state.failures(), 0);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_custom_base_delay() {
        let policy = BackoffPolicy::new().with_base_delay(Duration::from_millis(100));
        let mut state = BackoffState::new(policy);

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_custom_failure_ceiling() {
        let policy = BackoffPolicy::new().with_max_failures(2);
        let mut state = BackoffState::new(policy);

        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.next_delay(), Duration::from_secs(2));
        assert_eq!(state.next_delay(), Duration::from_secs(2));
    }
}
