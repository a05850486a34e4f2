use crate::error::SequencerError;
use thiserror::Error;

/// Error types for transaction state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Transaction {tx_tracking_id} already reached terminal state {state}")]
    AlreadyTerminal {
        tx_tracking_id: String,
        state: String,
    },

    #[error("Transaction {tx_tracking_id} is already tracked")]
    AlreadyTracked { tx_tracking_id: String },

    #[error("Transaction {tx_tracking_id} is not tracked")]
    UnknownTransaction { tx_tracking_id: String },

    #[error("Transaction {tx_tracking_id} is not terminal and cannot be retired")]
    NotTerminal { tx_tracking_id: String },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl From<StateMachineError> for SequencerError {
    fn from(err: StateMachineError) -> Self {
        SequencerError::ProtocolViolation(err.to_string())
    }
}
