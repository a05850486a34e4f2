//! # Connectors
//!
//! Concrete [`BlockchainPlugin`](crate::blockchain::BlockchainPlugin)
//! implementations. Each is an independent variant selected when the engine is
//! constructed.

pub mod memory;

pub use memory::{InMemoryConnector, InMemoryConnectorConfig, InMemoryLedger, Pin};
