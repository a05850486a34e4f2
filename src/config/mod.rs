//! # Sequencer Configuration
//!
//! Typed configuration for the engine, the event stream coordinator and the
//! opaque connector section.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broadcast_sequencer::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then config/sequencer.toml if present, then SEQUENCER_* variables
//! let manager = ConfigManager::load()?;
//!
//! let capacity = manager.config().engine.event_channel_capacity;
//! let reconnect = &manager.config().stream.reconnect;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring sequencer.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Engine-side behaviour
    pub engine: EngineConfig,

    /// Event stream subscription and reconnect policy
    pub stream: StreamConfig,

    /// Connector-specific section. Opaque here; checked only against the shape the
    /// connector declares.
    pub connector: serde_json::Value,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            stream: StreamConfig::default(),
            connector: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl SequencerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.event_channel_capacity",
                0,
                "channel capacity must be at least 1",
            ));
        }
        if self.engine.notification_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.notification_capacity",
                0,
                "notification capacity must be at least 1",
            ));
        }
        if self.engine.submission_retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.submission_retry.max_attempts",
                0,
                "at least one submission attempt is required",
            ));
        }
        if self.stream.subscription.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "stream.subscription",
                &self.stream.subscription,
                "subscription name must not be empty",
            ));
        }
        if self.stream.delivery_buffer == 0 {
            return Err(ConfigurationError::invalid_value(
                "stream.delivery_buffer",
                0,
                "delivery buffer must be at least 1",
            ));
        }
        self.engine
            .submission_retry
            .backoff
            .validate("engine.submission_retry.backoff")?;
        self.stream.reconnect.validate("stream.reconnect")?;
        Ok(())
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fail initialization unless the connector provides a global sequencer
    pub require_global_sequencer: bool,
    /// Bounded capacity of the connector -> engine event channel
    pub event_channel_capacity: usize,
    /// Capacity of the application notification channel
    pub notification_capacity: usize,
    pub submission_retry: SubmissionRetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_global_sequencer: true,
            event_channel_capacity: constants::DEFAULT_EVENT_CHANNEL_CAPACITY,
            notification_capacity: constants::DEFAULT_NOTIFICATION_CAPACITY,
            submission_retry: SubmissionRetryConfig::default(),
        }
    }
}

/// Caller-side retry of `submit_broadcast_batch` on `ConnectorUnavailable`.
///
/// `max_attempts = 1` disables retries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionRetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for SubmissionRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Event stream configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Logical subscription name; one per network per deployment
    pub subscription: String,
    /// Per-connection delivery buffer
    pub delivery_buffer: usize,
    /// Member reconnection policy
    pub reconnect: BackoffConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscription: constants::DEFAULT_SUBSCRIPTION.to_string(),
            delivery_buffer: constants::DEFAULT_DELIVERY_BUFFER,
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Give up after this many consecutive failures; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: constants::DEFAULT_BACKOFF_INITIAL_MS,
            max_delay_ms: constants::DEFAULT_BACKOFF_MAX_MS,
            multiplier: constants::DEFAULT_BACKOFF_MULTIPLIER,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.max_delay_ms"),
                self.max_delay_ms,
                format!("must not be below initial_delay_ms ({})", self.initial_delay_ms),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.multiplier"),
                self.multiplier,
                "multiplier must be a finite value >= 1.0",
            ));
        }
        Ok(())
    }
}
