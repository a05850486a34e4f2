//! # Application Notifications
//!
//! Broadcast channel through which the engine reports applied batches and
//! terminal transaction states to application-layer subscribers.
//!
//! ```rust
//! use broadcast_sequencer::blockchain::{AdditionalInfo, BroadcastBatch, Bytes32, HexUuid};
//! use broadcast_sequencer::events::{EngineNotification, NotificationPublisher};
//!
//! # tokio_test::block_on(async {
//! let publisher = NotificationPublisher::new(16);
//! let mut subscriber = publisher.subscribe();
//!
//! publisher.publish(EngineNotification::BatchSequenced {
//!     batch: BroadcastBatch::new(1000, HexUuid::from_content(b"ref-A"), Bytes32::new([0xaa; 32])),
//!     additional_info: AdditionalInfo::new(),
//!     sequence: Some(1),
//! });
//!
//! let received = subscriber.recv().await.unwrap();
//! assert_eq!(received.name, "broadcast.batch_sequenced");
//! # });
//! ```

pub mod publisher;

pub use publisher::{EngineNotification, NotificationPublisher, PublishedNotification};
