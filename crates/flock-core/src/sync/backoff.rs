//! Exponential backoff policy for failed replays.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
// Delay arithmetic runs through f64; every delay fits comfortably.

use std::time::Duration;

use rand::Rng;

/// Retry configuration for the sync engine
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay base for the first retry
    pub initial_delay: Duration,
    /// Growth factor per failed attempt
    pub multiplier: f64,
    /// Upper bound on the computed delay
    pub max_delay: Duration,
    /// Symmetric jitter fraction applied to the computed delay
    pub jitter: f64,
    /// Attempts after which an item fail-stops and waits for user action
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.1,
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    /// Set the delay base for the first retry
    #[must_use]
    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set the upper bound on the computed delay
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the attempt cap
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Capped exponential delay before jitter.
    #[must_use]
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let millis = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay with symmetric jitter applied, clamped to non-negative.
    #[must_use]
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay(retry_count).as_millis() as f64;
        let jitter = base * self.jitter * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert_eq!(policy.max_retries, 10);
    }

    #[test]
    fn test_base_delay_grows_monotonically() {
        let policy = BackoffPolicy::default();
        for retries in 0..policy.max_retries - 1 {
            assert!(policy.base_delay(retries) <= policy.base_delay(retries + 1));
        }
    }

    #[test]
    fn test_base_delay_never_exceeds_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
        assert_eq!(policy.base_delay(9), Duration::from_secs(300));
        assert_eq!(policy.base_delay(60), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_stays_within_jitter_band() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(3).as_millis();
            assert!((7_200..=8_800).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }
}
