//! # Orchestration Engine
//!
//! ## Core Components
//!
//! - **OrchestrationEngine**: connector lifecycle, batch submission, stream membership
//! - **EventDispatcher**: applies connector events to the tracker and dedup ledger
//!
//! ## Event Flow
//!
//! ```text
//! connector --EventSink (bounded mpsc)--> EventDispatcher --> NotificationPublisher
//!                                             ^
//! EventStreamProducer --StreamConsumer--------+  (DeliveryHandler, ack after apply)
//! ```

pub mod dispatcher;
pub mod engine;

pub use dispatcher::{DispatchOutcome, DispatchStats, EventDispatcher};
pub use engine::OrchestrationEngine;
