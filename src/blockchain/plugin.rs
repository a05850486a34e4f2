//! # Connector Contract
//!
//! The three operations the engine may call on a blockchain connector. Concrete
//! connectors are independent implementations chosen at configuration time.

use super::events::EventSink;
use super::types::{BroadcastBatch, Capabilities, TxTrackingId};
use crate::error::{Result, SequencerError};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait BlockchainPlugin: Send + Sync {
    /// Connector name for logging and error context
    fn name(&self) -> &str;

    /// Empty-valued structure describing the configuration this connector needs.
    ///
    /// Pure schema exchange: the engine fills it from its own configuration source
    /// and hands the result back to [`BlockchainPlugin::init`].
    fn config_interface(&self) -> Value;

    /// One-time setup returning the connector's capabilities.
    ///
    /// A second call fails with [`SequencerError::AlreadyInitialized`]. No event may
    /// be emitted through `events` before this returns successfully.
    async fn init(&self, config: Value, events: EventSink) -> Result<Capabilities>;

    /// Pin a batch on-chain under `identity`, returning a tracking ID for the
    /// asynchronous confirmation.
    ///
    /// Must be callable concurrently for independent batches and must not wait for
    /// confirmation. Resubmitting a batch that was already accepted must not create
    /// a second pin.
    async fn submit_broadcast_batch(
        &self,
        identity: &str,
        batch: &BroadcastBatch,
    ) -> Result<TxTrackingId>;
}

/// Check that every supplied key exists in the connector's declared shape.
///
/// Values stay opaque; only the key structure of nested objects is compared.
pub fn check_config_shape(connector: &str, shape: &Value, supplied: &Value) -> Result<()> {
    check_shape_at(connector, "", shape, supplied)
}

fn check_shape_at(connector: &str, path: &str, shape: &Value, supplied: &Value) -> Result<()> {
    let (Value::Object(shape_fields), Value::Object(supplied_fields)) = (shape, supplied) else {
        if path.is_empty() && !supplied.is_null() && !supplied.is_object() {
            return Err(SequencerError::ConfigurationInvalid(format!(
                "configuration for connector {connector} must be an object"
            )));
        }
        return Ok(());
    };

    for (key, value) in supplied_fields {
        let field_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        let Some(expected) = shape_fields.get(key) else {
            return Err(SequencerError::ConfigurationInvalid(format!(
                "connector {connector} does not recognize configuration key '{field_path}'"
            )));
        };
        check_shape_at(connector, &field_path, expected, value)?;
    }
    Ok(())
}
