//! Data model shared by connectors and the engine.

use crate::constants::BATCH_ID_LENGTH;
use crate::error::{Result, SequencerError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Opaque, connector-defined detail attached to events. Never parsed by the core.
pub type AdditionalInfo = serde_json::Map<String, serde_json::Value>;

/// Feature set a connector advertises once, at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// The connector can provide a single order of sequenced events agreed by all
    /// participants (requires an all-participant-visible ledger)
    pub global_sequencer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    #[error("expected {expected} bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    InvalidCharacter(String),
}

/// Fixed 32 byte value written in the clear on-chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32([u8; BATCH_ID_LENGTH]);

impl Bytes32 {
    pub const ZERO: Bytes32 = Bytes32([0; BATCH_ID_LENGTH]);

    pub const fn new(bytes: [u8; BATCH_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, HexParseError> {
        let array: [u8; BATCH_ID_LENGTH] =
            bytes.try_into().map_err(|_| HexParseError::InvalidLength {
                expected: BATCH_ID_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; BATCH_ID_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<hex::FromHexError> for HexParseError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidCharacter(err.to_string())
    }
}

impl FromStr for Bytes32 {
    type Err = HexParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        Self::from_slice(&hex::decode(digits)?)
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Content-addressing handle for an off-chain payload, resolved by a storage plugin.
///
/// Serialized as 32 hex characters without dashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HexUuid(Uuid);

impl HexUuid {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic reference derived from the payload bytes
    pub fn from_content(content: &[u8]) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, content))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl FromStr for HexUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for HexUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for HexUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexUuid({})", self.0.simple())
    }
}

impl Serialize for HexUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HexUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Correlation handle returned by `submit_broadcast_batch`.
///
/// Only meaningful within the lifetime of the connector instance that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxTrackingId(String);

impl TxTrackingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxTrackingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TxTrackingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TxTrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data pinned on-chain for a batch of broadcast messages.
///
/// Created at batching time, submitted once, immutable thereafter. The payload
/// itself lives in off-chain storage and is owned by the storage plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastBatch {
    /// Submission time from the submitter's perspective (seconds since epoch)
    pub timestamp: u64,
    pub batch_payload_ref: HexUuid,
    /// Written in plain text on-chain so any observer can correlate the pin with
    /// the off-chain payload
    pub batch_id: Bytes32,
}

impl BroadcastBatch {
    pub fn new(timestamp: u64, batch_payload_ref: HexUuid, batch_id: Bytes32) -> Self {
        Self {
            timestamp,
            batch_payload_ref,
            batch_id,
        }
    }

    /// Batch stamped with the current wall clock
    pub fn now(batch_payload_ref: HexUuid, batch_id: Bytes32) -> Self {
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self::new(timestamp, batch_payload_ref, batch_id)
    }

    /// Reject batches that cannot be pinned
    pub fn validate(&self) -> Result<()> {
        if self.batch_id.is_zero() {
            return Err(SequencerError::SubmissionRejected(
                "batch ID must be a non-empty 32 byte value".to_string(),
            ));
        }
        if self.batch_payload_ref.is_nil() {
            return Err(SequencerError::SubmissionRejected(format!(
                "batch {} has no payload reference",
                self.batch_id
            )));
        }
        Ok(())
    }
}
