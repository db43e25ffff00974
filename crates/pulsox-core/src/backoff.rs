//! Reconnect backoff policy.
//!
//! Battery oximeters switch themselves off constantly, and hammering the
//! shared BLE adapter with reconnect attempts starves every other
//! peripheral on it. The policy here is plain exponential backoff with a
//! hard ceiling: delays grow monotonically per failed attempt, plateau at
//! the cap, and only a successful connect resets the schedule.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub multiplier: f64,
    /// Whether to randomize applied delays slightly to avoid several
    /// sessions reconnecting in lockstep.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with a fixed delay (no growth).
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            ..Default::default()
        }
    }

    /// Set the delay before the first reconnect attempt.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the per-attempt multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Scheduled delay after `attempt` prior failures.
    ///
    /// The schedule is non-decreasing in `attempt` and plateaus at
    /// [`max_delay`](Self::max_delay); it never resets on its own.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Clamp the exponent: powi saturates to infinity long before the
        // cast below could misbehave, and any real schedule has hit the
        // ceiling by then anyway.
        let exponent = attempt.min(1_000) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }

    /// The delay to actually sleep for: the scheduled delay, randomized by
    /// ±20% when jitter is enabled, still capped at the ceiling.
    #[must_use]
    pub fn applied_delay(&self, attempt: u32) -> Duration {
        let scheduled = self.delay_for_attempt(attempt);
        if !self.jitter {
            return scheduled;
        }
        let factor: f64 = rand::random_range(0.8..1.2);
        scheduled.mul_f64(factor).min(self.max_delay)
    }

    /// Validate the policy and return an error if invalid.
    ///
    /// Checks that:
    /// - `multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(Error::invalid_config("multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy::default().max_delay(Duration::from_secs(10));

        // 2^10 = 1024 seconds, but capped at 10.
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
        // And it stays there; the plateau never resets on its own.
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(10));
    }

    #[test]
    fn test_schedule_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_extreme_attempt_counts_do_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_fixed_delay() {
        let policy = BackoffPolicy::fixed_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_stays_bounded() {
        let policy = BackoffPolicy::default()
            .jitter(true)
            .max_delay(Duration::from_secs(8));
        for attempt in 0..16 {
            let applied = policy.applied_delay(attempt);
            assert!(applied <= Duration::from_secs(8));
            assert!(applied >= policy.delay_for_attempt(attempt).mul_f64(0.8));
        }
    }

    #[test]
    fn test_validation() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(
            BackoffPolicy::default()
                .multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            BackoffPolicy::default()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            BackoffPolicy::default()
                .max_delay(Duration::from_millis(1))
                .validate()
                .is_err()
        );
    }
}
