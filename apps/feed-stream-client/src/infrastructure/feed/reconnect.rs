//! Reconnection Policy
//!
//! Implements capped exponential backoff with additive jitter for feed
//! reconnection, and the attempt ceiling that stops automatic retries.
//!
//! `delay(n) = min(base * 2^n, cap) + uniform(0, jitter_ratio * min(base * 2^n, cap))`

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the exponential part.
    pub cap: Duration,
    /// Jitter as a fraction of the computed delay (e.g. 0.2 = up to +20%).
    pub jitter_ratio: f64,
    /// Consecutive failures allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_ratio: 0.2,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        base_delay: Duration,
        cap: Duration,
        jitter_ratio: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            cap,
            jitter_ratio,
            max_attempts,
        }
    }

    /// Create configuration from `ClientConfig`.
    #[must_use]
    pub const fn from_client_config(config: &crate::ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay,
            cap: config.reconnect_cap,
            jitter_ratio: config.reconnect_jitter_ratio,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Largest jitter that can be added to a capped delay.
    #[must_use]
    pub fn max_jitter(&self) -> Duration {
        jitter_bound(self.cap, self.jitter_ratio)
    }
}

/// Reconnection policy tracking consecutive failed attempts.
///
/// # Example
///
/// ```rust
/// use feed_stream_client::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // A failed attempt yields the delay before the next one
/// let delay = policy.record_failure();
/// assert!(delay.is_some());
///
/// // A successful connection resets the counter
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Exponential part of the delay for a zero-based attempt index.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis();
        let factor = 1u128.checked_shl(attempt).unwrap_or(u128::MAX);
        let capped = base_millis
            .saturating_mul(factor)
            .min(self.config.cap.as_millis());

        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Full delay (backoff plus random jitter) for a zero-based attempt index.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for(attempt);
        backoff + self.random_jitter(backoff)
    }

    /// Record a failed connection attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// ceiling is reached.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempt_count = self.attempt_count.saturating_add(1);

        if self.is_exhausted() {
            return None;
        }

        Some(self.delay_for(self.attempt_count - 1))
    }

    /// Reset the policy after a successful connection or a manual reconnect.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Get the configured ceiling (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if the attempt ceiling has been reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        !self.is_exhausted()
    }

    fn random_jitter(&self, backoff: Duration) -> Duration {
        let bound = jitter_bound(backoff, self.config.jitter_ratio);
        if bound.is_zero() {
            return Duration::ZERO;
        }

        let bound_millis = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=bound_millis))
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn jitter_bound(delay: Duration, ratio: f64) -> Duration {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Duration::ZERO;
    }

    let millis = (delay.as_millis() as f64 * ratio).floor();
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::ZERO
    }
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            jitter_ratio: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.cap, Duration::from_secs(30));
        assert!((config.jitter_ratio - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.max_jitter(), Duration::from_secs(6));
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));

        assert_eq!(policy.record_failure(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.record_failure(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.record_failure(), Some(Duration::from_millis(4000)));
        assert_eq!(policy.record_failure(), Some(Duration::from_millis(8000)));
    }

    #[test]
    fn policy_cap() {
        let policy = ReconnectPolicy::new(no_jitter(0));

        assert_eq!(policy.backoff_for(4), Duration::from_millis(16_000));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.backoff_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.backoff_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        assert!(policy.record_failure().is_some());
        assert_eq!(policy.attempt_count(), 1);

        assert!(policy.record_failure().is_some());
        assert_eq!(policy.attempt_count(), 2);

        // Third failure reaches the ceiling
        assert!(policy.record_failure().is_none());
        assert_eq!(policy.attempt_count(), 3);
        assert!(policy.is_exhausted());
        assert!(!policy.should_retry());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        let _ = policy.record_failure();
        let _ = policy.record_failure();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.record_failure(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn policy_jitter_bounds() {
        let policy = ReconnectPolicy::new(ReconnectConfig::default());

        for _ in 0..100 {
            let millis = policy.delay_for(0).as_millis();
            assert!(millis >= 1000, "delay {millis}ms is below minimum 1000ms");
            assert!(millis <= 1200, "delay {millis}ms is above maximum 1200ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });

        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.record_failure().is_some());
        }
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap_plus_jitter(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..120_000,
            ratio in 0.0f64..1.0,
            attempt in 0u32..64,
        ) {
            let config = ReconnectConfig::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
                ratio,
                0,
            );
            let upper = config.cap + config.max_jitter();
            let policy = ReconnectPolicy::new(config);

            let delay = policy.delay_for(attempt);
            prop_assert!(delay >= policy.backoff_for(attempt));
            prop_assert!(delay <= upper);
        }

        #[test]
        fn delay_non_decreasing_below_cap(
            base_ms in 1u64..2_000,
            cap_ms in 1_000u64..120_000,
            attempt in 0u32..16,
        ) {
            let policy = ReconnectPolicy::new(ReconnectConfig::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
                0.2,
                0,
            ));

            // Only meaningful while the next backoff is still uncapped
            prop_assume!(policy.backoff_for(attempt + 1) < Duration::from_millis(cap_ms));

            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            prop_assert!(next >= current, "{next:?} < {current:?}");
        }
    }
}
