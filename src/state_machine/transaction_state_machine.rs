use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TransactionEvent,
    states::TransactionState,
};
use crate::blockchain::types::{AdditionalInfo, Bytes32, TxTrackingId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A recorded state change, kept for audit alongside the current state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionTransition {
    pub from_state: TransactionState,
    pub to_state: TransactionState,
    pub event: TransactionEvent,
    /// Opaque connector detail delivered with the update
    pub additional_info: AdditionalInfo,
    pub transitioned_at: DateTime<Utc>,
}

/// State machine for a single tracked blockchain transaction.
///
/// Starts in `Submitted` and moves at most once, to `Confirmed` or `Failed`.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStateMachine {
    tx_tracking_id: TxTrackingId,
    state: TransactionState,
    identity: Option<String>,
    batch_id: Option<Bytes32>,
    error_message: Option<String>,
    submitted_at: DateTime<Utc>,
    transitions: Vec<TransactionTransition>,
}

impl TransactionStateMachine {
    /// Create a new state machine instance in the initial state
    pub fn new(tx_tracking_id: TxTrackingId) -> Self {
        Self {
            tx_tracking_id,
            state: TransactionState::default(),
            identity: None,
            batch_id: None,
            error_message: None,
            submitted_at: Utc::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current_state(&self) -> TransactionState {
        self.state
    }

    /// Apply an event, returning the new state
    pub fn transition(
        &mut self,
        event: TransactionEvent,
        additional_info: AdditionalInfo,
    ) -> StateMachineResult<TransactionState> {
        let from_state = self.state;
        let target_state = self.determine_target_state(from_state, &event)?;

        self.error_message = event.error_message().map(str::to_string);
        self.transitions.push(TransactionTransition {
            from_state,
            to_state: target_state,
            event,
            additional_info,
            transitioned_at: Utc::now(),
        });
        self.state = target_state;

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        &self,
        current_state: TransactionState,
        event: &TransactionEvent,
    ) -> StateMachineResult<TransactionState> {
        let target = match (current_state, event) {
            (TransactionState::Submitted, TransactionEvent::Confirm) => {
                TransactionState::Confirmed
            }
            (TransactionState::Submitted, TransactionEvent::Fail(_)) => TransactionState::Failed,

            (from_state, _) if from_state.is_terminal() => {
                return Err(StateMachineError::AlreadyTerminal {
                    tx_tracking_id: self.tx_tracking_id.to_string(),
                    state: from_state.to_string(),
                })
            }

            (from_state, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Attach submission details; returns false if they were already recorded
    pub(crate) fn record_submission(&mut self, identity: &str, batch_id: Bytes32) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity.to_string());
        self.batch_id = Some(batch_id);
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn tx_tracking_id(&self) -> &TxTrackingId {
        &self.tx_tracking_id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn batch_id(&self) -> Option<Bytes32> {
        self.batch_id
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn transitions(&self) -> &[TransactionTransition] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TransactionStateMachine {
        TransactionStateMachine::new(TxTrackingId::from("tx-1"))
    }

    #[test]
    fn test_valid_transitions() {
        let sm = machine();
        assert_eq!(
            sm.determine_target_state(TransactionState::Submitted, &TransactionEvent::Confirm)
                .unwrap(),
            TransactionState::Confirmed
        );
        assert_eq!(
            sm.determine_target_state(
                TransactionState::Submitted,
                &TransactionEvent::Fail("out of gas".to_string())
            )
            .unwrap(),
            TransactionState::Failed
        );
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let sm = machine();
        for terminal in [TransactionState::Confirmed, TransactionState::Failed] {
            let err = sm
                .determine_target_state(terminal, &TransactionEvent::Confirm)
                .unwrap_err();
            assert!(matches!(err, StateMachineError::AlreadyTerminal { .. }));
        }
    }

    #[test]
    fn test_transition_records_history() {
        let mut sm = machine();
        let mut info = AdditionalInfo::new();
        info.insert("blockNumber".to_string(), serde_json::json!(12));

        let state = sm
            .transition(TransactionEvent::Fail("reverted".to_string()), info)
            .unwrap();

        assert_eq!(state, TransactionState::Failed);
        assert_eq!(sm.error_message(), Some("reverted"));
        assert_eq!(sm.transitions().len(), 1);
        assert_eq!(sm.transitions()[0].from_state, TransactionState::Submitted);

        // Second terminal transition is refused and leaves the record untouched
        assert!(sm
            .transition(TransactionEvent::Confirm, AdditionalInfo::new())
            .is_err());
        assert_eq!(sm.current_state(), TransactionState::Failed);
        assert_eq!(sm.transitions().len(), 1);
    }

    #[test]
    fn test_submission_recorded_once() {
        let mut sm = machine();
        assert!(sm.record_submission("0xSender", Bytes32::new([1; 32])));
        assert!(!sm.record_submission("0xOther", Bytes32::new([2; 32])));
        assert_eq!(sm.identity(), Some("0xSender"));
    }
}
