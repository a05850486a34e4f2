//! # Sequencing & Failover Coordination
//!
//! Single, ordered, replay-safe delivery of sequenced events to exactly one
//! active cluster member.
//!
//! - [`cursor`] - durable acknowledged position per subscription
//! - [`producer`] - ordered log, active-connection selection, replay on activation
//! - [`transport`] - member-to-producer connection seam
//! - [`consumer`] - member loop: apply, acknowledge, reconnect with backoff
//!
//! Delivery is at-least-once. Exactly-once at the application boundary comes
//! from the engine deduplicating by `BatchID` before acknowledging.

pub mod consumer;
pub mod cursor;
pub mod producer;
pub mod transport;

pub use consumer::{ConsumerStats, DeliveryHandler, StreamConsumer};
pub use cursor::{CursorError, CursorStore, FileCursorStore, InMemoryCursorStore};
pub use producer::{
    AppendOutcome, ConnectionId, EventStreamProducer, MemberId, ProducerConnection,
    ProducerStats, ProducerStatus, SequencedEvent,
};
pub use transport::{LocalTransport, StreamConnection, StreamTransport};
