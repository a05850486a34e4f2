//! # Resilience Module
//!
//! Retry timing for transient failures: reconnecting a cluster member to the
//! event stream, and caller-side resubmission after `ConnectorUnavailable`.
//!
//! ## Usage
//!
//! ```rust
//! use broadcast_sequencer::config::BackoffConfig;
//! use broadcast_sequencer::resilience::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(BackoffConfig {
//!     initial_delay_ms: 100,
//!     max_delay_ms: 1_000,
//!     multiplier: 2.0,
//!     max_attempts: Some(5),
//! });
//!
//! while let Some(delay) = backoff.next_delay() {
//!     // sleep(delay), then retry
//!     # let _ = delay;
//! }
//! ```

pub mod backoff;

pub use backoff::ExponentialBackoff;
