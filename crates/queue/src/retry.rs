//! Retry backoff for outbox rows.

#![allow(missing_docs)]

use std::time::Duration;

use courier_common::config::DeliveryConfig;
use rand::Rng;

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failed cycle.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Extra random delay, as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),    // 1 minute
            max_delay: Duration::from_secs(3600 * 24), // 24 hours
            multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl From<&DeliveryConfig> for RetryConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.backoff_base_secs),
            max_delay: Duration::from_secs(config.backoff_max_secs),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryConfig {
    /// Delay before the next cycle of a row with `attempt` failed cycles,
    /// without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        self.cap(delay_secs)
    }

    /// [`Self::delay_for_attempt`] stretched by a random jitter factor.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let factor = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter_ratio)
        } else {
            0.0
        };
        self.with_jitter(attempt, factor)
    }

    /// Delay for `attempt` stretched by `1 + factor`, still capped.
    #[must_use]
    pub fn with_jitter(&self, attempt: u32, factor: f64) -> Duration {
        let base = self.delay_for_attempt(attempt).as_secs_f64();
        self.cap(base * (1.0 + factor.max(0.0)))
    }

    fn cap(&self, secs: f64) -> Duration {
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}
