//! # Bounded Exponential Backoff
//!
//! Delay schedule used for member reconnection and caller-side submission retries.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once `max_attempts` is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt >= max_attempts {
                return None;
            }
        }

        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let max_ms = self.config.max_delay_ms as f64;
        let delay_ms = (self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent))
            .min(max_ms);
        self.attempt = self.attempt.saturating_add(1);

        Some(Duration::from_millis(delay_ms as u64).min(self.config.max_delay()))
    }

    /// Start over after a successful attempt
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
