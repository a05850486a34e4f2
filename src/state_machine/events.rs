use super::states::TransactionState;
use serde::{Deserialize, Serialize};

/// Events that can trigger transaction state transitions.
///
/// Both events are terminal and both originate exclusively from a connector's
/// `TransactionUpdate`; nothing at this layer fires them on a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// The transaction reached finality
    Confirm,
    /// The transaction failed with the connector's error message
    Fail(String),
}

impl TransactionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            Self::Confirm => None,
        }
    }

    /// Map a reported state onto the event that reaches it.
    ///
    /// A `Submitted` report carries no transition and yields `None`.
    pub fn from_reported_state(state: TransactionState, error_message: &str) -> Option<Self> {
        match state {
            TransactionState::Submitted => None,
            TransactionState::Confirmed => Some(Self::Confirm),
            TransactionState::Failed => Some(Self::Fail(error_message.to_string())),
        }
    }
}
