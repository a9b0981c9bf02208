//! Bounded exponential reconnection backoff.
//!
//! After each failed or unexpectedly closed cycle the attempt counter grows
//! by one up to `max_exponent`, and the next delay is
//! `base_delay * 2^attempt`. With the defaults the delays run 1 s, 2 s, 4 s,
//! 8 s, 16 s, 32 s and then stay at 32 s.

use std::time::Duration;

/// Reconnection delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_exponent: u32,
}

impl BackoffPolicy {
    /// Default base delay in milliseconds.
    pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

    /// Default attempt cap.
    pub const DEFAULT_MAX_EXPONENT: u32 = 6;

    /// Creates a policy with the given base delay and attempt cap.
    #[must_use]
    pub const fn new(base_delay: Duration, max_exponent: u32) -> Self {
        Self {
            base_delay,
            max_exponent,
        }
    }

    /// Base delay multiplied by `2^attempt`.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Highest attempt value; the delay plateaus from here on.
    #[must_use]
    pub const fn max_exponent(&self) -> u32 {
        self.max_exponent
    }

    /// Attempt counter after one more failure, capped at `max_exponent`.
    #[must_use]
    pub fn next_attempt(&self, current: u32) -> u32 {
        current.saturating_add(1).min(self.max_exponent)
    }

    /// Delay before reconnect attempt number `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(Self::DEFAULT_BASE_DELAY_MS),
            Self::DEFAULT_MAX_EXPONENT,
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_plateau() {
        let policy = BackoffPolicy::default();
        let mut attempt = 0;
        let mut delays = Vec::new();
        for _ in 0..8 {
            attempt = policy.next_attempt(attempt);
            delays.push(policy.delay_for(attempt).as_millis());
        }
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 32_000, 32_000]
        );
        assert_eq!(attempt, 6);
    }

    #[test]
    fn attempt_counter_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next_attempt(5), 6);
        assert_eq!(policy.next_attempt(6), 6);
        assert_eq!(policy.next_attempt(u32::MAX), 6);
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(60), Duration::from_millis(32_000));
    }

    #[test]
    fn custom_base_delay_scales() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), 3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }
}
