//! Error types for the broadcast sequencer.

use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Connector-contract failures (`init`, `submit_broadcast_batch`) are returned
/// synchronously to the caller. Anomalies observed on the event side are never
/// propagated as errors into application state; they are counted and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),
    #[error("Connector {connector} is already initialized")]
    AlreadyInitialized { connector: String },
    #[error("Connector {connector} is not initialized")]
    NotInitialized { connector: String },
    #[error("Connector {connector} does not provide required capability: {capability}")]
    CapabilityMissing {
        connector: String,
        capability: String,
    },
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Connector unavailable: {0}")]
    ConnectorUnavailable(String),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Sequence gap on subscription {subscription}: {reason}")]
    SequenceGap {
        subscription: String,
        reason: String,
    },
    #[error("Cursor store error: {0}")]
    CursorStore(String),
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl SequencerError {
    /// Only transient backend failures may be retried, and only with identical input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectorUnavailable(_))
    }

    /// Fatal conditions require explicit resynchronization before delivery resumes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SequenceGap { .. })
    }

    pub fn sequence_gap(subscription: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SequenceGap {
            subscription: subscription.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SequencerError {
    fn from(error: serde_json::Error) -> Self {
        SequencerError::ConfigurationInvalid(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SequencerError::ConnectorUnavailable("node down".into()).is_retryable());
        assert!(!SequencerError::SubmissionRejected("zero id".into()).is_retryable());
        assert!(!SequencerError::ProtocolViolation("dup".into()).is_retryable());
        assert!(!SequencerError::sequence_gap("sub", "cursor lost").is_retryable());
    }

    #[test]
    fn test_sequence_gap_is_fatal() {
        let err = SequencerError::sequence_gap("broadcast", "expected 4, found 7");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Sequence gap on subscription broadcast: expected 4, found 7"
        );
    }
}
