use serde::{Deserialize, Serialize};
use std::fmt;

/// The only architecturally significant status tracked for a blockchain transaction.
///
/// Everything else a connector knows (block number, receipt hash, gas) travels as
/// opaque additional info and is never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Accepted by the connector, awaiting finality
    #[serde(rename = "submitted")]
    Submitted,
    /// Final per the rules of the blockchain technology
    #[serde(rename = "confirmed")]
    Confirmed,
    /// Unlikely to ever become final. Labelled "error" on the wire.
    #[serde(rename = "error")]
    Failed,
}

impl TransactionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "error",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "error" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction state: {s}")),
        }
    }
}

/// Default state for newly tracked transactions
impl Default for TransactionState {
    fn default() -> Self {
        Self::Submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(TransactionState::Confirmed.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
        assert!(!TransactionState::Submitted.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(TransactionState::Failed.to_string(), "error");
        assert_eq!(
            "confirmed".parse::<TransactionState>().unwrap(),
            TransactionState::Confirmed
        );
        assert!("failed".parse::<TransactionState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&TransactionState::Failed).unwrap();
        assert_eq!(json, "\"error\"");

        let parsed: TransactionState = serde_json::from_str("\"submitted\"").unwrap();
        assert_eq!(parsed, TransactionState::Submitted);
    }
}
