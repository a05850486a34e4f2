//! # Blockchain Connector Abstraction
//!
//! - [`types`] - capabilities, broadcast batch model, identifiers
//! - [`plugin`] - the connector contract the engine calls
//! - [`events`] - the event sink contract connectors report through

pub mod events;
pub mod plugin;
pub mod types;

pub use events::{BlockchainEvent, EventSink};
pub use plugin::{check_config_shape, BlockchainPlugin};
pub use types::{
    AdditionalInfo, BroadcastBatch, Bytes32, Capabilities, HexParseError, HexUuid, TxTrackingId,
};
