//! # System Constants
//!
//! Defaults and well-known names shared by the connector contract, the
//! notification publisher and the sequencing layer.

/// Names of the notifications published to application-layer subscribers
pub mod events {
    pub const BATCH_SEQUENCED: &str = "broadcast.batch_sequenced";
    pub const TRANSACTION_UPDATED: &str = "transaction.updated";
}

/// Well-known keys connectors place in `AdditionalInfo`. The core never reads them.
pub mod additional_info {
    pub const BLOCK_NUMBER: &str = "blockNumber";
    pub const TRANSACTION_HASH: &str = "transactionHash";
    pub const SIGNER: &str = "signer";
}

/// Length of the on-chain batch identifier
pub const BATCH_ID_LENGTH: usize = 32;

/// Bounded capacity of the connector -> engine event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Capacity of the application notification broadcast channel
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1000;

/// Per-connection delivery buffer between the producer and the active member
pub const DEFAULT_DELIVERY_BUFFER: usize = 256;

pub const DEFAULT_SUBSCRIPTION: &str = "broadcast-batches";

/// Reconnect backoff defaults
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Attempts when rewriting the durable cursor races another writer
pub const CURSOR_CAS_ATTEMPTS: usize = 3;
