//! Backoff strategies with jitter.
//!
//! A [`RetryPolicy`] turns an attempt number into a delay. Workers use one
//! policy for messages that came back with `Retry` (keyed on the message's
//! attempt counter) and a [`ReconnectBackoff`] for failed connects (keyed on
//! consecutive connect failures). Jitter draws from the worker's own random
//! generator; nothing here touches shared state.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound for any computed delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.25, // ±25% randomization
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: delay doubles each attempt.
    Exponential,
    /// Linear backoff: delay increases by base amount each attempt.
    Linear,
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based) is retried.
    ///
    /// The result never exceeds `max_delay`, jitter included.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped_delay = std::cmp::min(self.base_delay_for(attempt), self.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor, rng);

        std::cmp::min(jittered_delay, self.max_delay)
    }

    fn base_delay_for(&self, attempt: u32) -> Duration {
        match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.max(1)),
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                let multiplier = 2_u32.saturating_pow(exponent);
                self.base_delay.saturating_mul(multiplier)
            },
        }
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±jitter_factor percentage. For example, with
/// jitter_factor=0.25, a 10s delay becomes 7.5s to 12.5s randomly.
fn apply_jitter<R: Rng + ?Sized>(duration: Duration, jitter_factor: f64, rng: &mut R) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

/// Tracks consecutive connect failures and yields bounded delays.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl ReconnectBackoff {
    /// Creates a tracker with no recorded failures.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, consecutive_failures: 0 }
    }

    /// Records a failure and returns how long to wait before reconnecting.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.policy.delay_for(self.consecutive_failures, rng)
    }

    /// Clears the failure streak after a successful connect.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Number of failures since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Exponential policy used for `Retry` outcomes by default.
///
/// Produces delays of ~0.5s, ~1s, ~2s, ~4s ... capped at 60s.
pub fn default_exponential_policy() -> RetryPolicy {
    RetryPolicy::default()
}

/// Policy used between reconnect attempts by default.
///
/// Starts at one second and doubles up to one minute.
pub fn default_reconnect_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        jitter_factor: 0.1,
        backoff_strategy: BackoffStrategy::Exponential,
    }
}

/// Constant delay without jitter.
pub fn fixed_policy(delay: Duration) -> RetryPolicy {
    RetryPolicy {
        base_delay: delay,
        max_delay: delay,
        jitter_factor: 0.0,
        backoff_strategy: BackoffStrategy::Fixed,
    }
}
