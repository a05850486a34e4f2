#![allow(clippy::doc_markdown)] // Allow technical terms like BatchID in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Broadcast Sequencer
//!
//! Blockchain connector abstraction and event-sequencing layer for a
//! multi-party orchestration engine.
//!
//! ## Overview
//!
//! Independent organizations submit broadcast batches (on-chain pins of
//! off-chain payloads) through a pluggable blockchain connector. The connector
//! reports two kinds of events back: private transaction updates for the
//! submitter, and globally sequenced batches for every participant. This crate
//! guarantees each participant's engine applies sequenced batches exactly once,
//! in the order the chain established, across connector disconnects and
//! engine-instance failover.
//!
//! ## Module Organization
//!
//! - [`blockchain`] - connector contract, event sink contract, data model
//! - [`state_machine`] - per-transaction state tracking
//! - [`broadcast`] - processed-batch ledger and submission retry
//! - [`sequencing`] - durable cursor, producer, transport and member consumer
//! - [`orchestration`] - the engine and its event dispatcher
//! - [`events`] - notifications for application-layer subscribers
//! - [`connectors`] - concrete connector implementations
//! - [`config`] - layered configuration
//! - [`resilience`] - bounded exponential backoff
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broadcast_sequencer::blockchain::{BroadcastBatch, Bytes32, HexUuid};
//! use broadcast_sequencer::config::SequencerConfig;
//! use broadcast_sequencer::connectors::{InMemoryConnector, InMemoryLedger};
//! use broadcast_sequencer::orchestration::OrchestrationEngine;
//! use std::sync::Arc;
//!
//! # async fn example() -> broadcast_sequencer::Result<()> {
//! let ledger = InMemoryLedger::new();
//! let engine = OrchestrationEngine::new(
//!     SequencerConfig::default(),
//!     Arc::new(InMemoryConnector::new("memory", ledger)),
//! );
//! engine.init().await?;
//!
//! let batch = BroadcastBatch::now(HexUuid::from_content(b"payload"), Bytes32::new([0xaa; 32]));
//! let tx = engine.submit_broadcast_batch("0xSender", &batch).await?;
//! println!("submitted as {tx}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property-based tests
//! ```

pub mod blockchain;
pub mod broadcast;
pub mod config;
pub mod connectors;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;
pub mod resilience;
pub mod sequencing;
pub mod state_machine;

pub use blockchain::{
    AdditionalInfo, BlockchainEvent, BlockchainPlugin, BroadcastBatch, Bytes32, Capabilities,
    EventSink, HexUuid, TxTrackingId,
};
pub use config::{ConfigManager, SequencerConfig};
pub use error::{Result, SequencerError};
pub use orchestration::OrchestrationEngine;
pub use sequencing::{EventStreamProducer, StreamConsumer};
pub use state_machine::{TransactionState, TransactionTracker};
