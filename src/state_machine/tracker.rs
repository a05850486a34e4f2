//! # Transaction State Tracker
//!
//! Concurrent map from tracking ID to [`TransactionStateMachine`]. Updates for
//! one ID are serialized by the map shard lock, so racing terminal updates from
//! connector-internal tasks resolve to exactly one recorded outcome.
//!
//! Retired IDs leave a tombstone holding their terminal state, so a late
//! duplicate update for a retired ID is still rejected. Lock order is always
//! `records` shard before `retired` shard.

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TransactionEvent,
    states::TransactionState,
    transaction_state_machine::TransactionStateMachine,
};
use crate::blockchain::types::{AdditionalInfo, Bytes32, TxTrackingId};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct TransactionTracker {
    records: DashMap<TxTrackingId, TransactionStateMachine>,
    retired: DashMap<TxTrackingId, TransactionState>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly submitted transaction in `Submitted`.
    ///
    /// An update may already have raced ahead of the submission returning; in
    /// that case the existing record keeps its state and gains the submission details.
    pub fn track(
        &self,
        tx_tracking_id: TxTrackingId,
        identity: &str,
        batch_id: Bytes32,
    ) -> StateMachineResult<()> {
        let mut record = match self.records.entry(tx_tracking_id.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                if self.retired.contains_key(&tx_tracking_id) {
                    return Err(StateMachineError::AlreadyTracked {
                        tx_tracking_id: tx_tracking_id.to_string(),
                    });
                }
                entry.insert(TransactionStateMachine::new(tx_tracking_id.clone()))
            }
        };

        if !record.record_submission(identity, batch_id) {
            return Err(StateMachineError::AlreadyTracked {
                tx_tracking_id: tx_tracking_id.to_string(),
            });
        }

        debug!(
            tx_tracking_id = %tx_tracking_id,
            identity = %identity,
            batch_id = %batch_id,
            state = %record.current_state(),
            "Tracking submitted transaction"
        );
        Ok(())
    }

    /// Apply a connector `TransactionUpdate`.
    ///
    /// Returns the state after the update. A second terminal update for the same
    /// ID fails with [`StateMachineError::AlreadyTerminal`] and changes nothing.
    pub fn apply_update(
        &self,
        tx_tracking_id: &TxTrackingId,
        state: TransactionState,
        error_message: &str,
        additional_info: AdditionalInfo,
    ) -> StateMachineResult<TransactionState> {
        let mut record = match self.records.entry(tx_tracking_id.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                if let Some(retired) = self.retired.get(tx_tracking_id) {
                    return Err(StateMachineError::AlreadyTerminal {
                        tx_tracking_id: tx_tracking_id.to_string(),
                        state: retired.value().to_string(),
                    });
                }
                debug!(
                    tx_tracking_id = %tx_tracking_id,
                    "Update arrived before the submission was recorded"
                );
                entry.insert(TransactionStateMachine::new(tx_tracking_id.clone()))
            }
        };

        let Some(event) = TransactionEvent::from_reported_state(state, error_message) else {
            // A repeated "submitted" report is informational only
            let current = record.current_state();
            if current.is_terminal() {
                return Err(StateMachineError::AlreadyTerminal {
                    tx_tracking_id: tx_tracking_id.to_string(),
                    state: current.to_string(),
                });
            }
            return Ok(current);
        };

        let new_state = record.transition(event, additional_info)?;
        info!(
            tx_tracking_id = %tx_tracking_id,
            state = %new_state,
            error_message = record.error_message(),
            "Transaction reached terminal state"
        );
        Ok(new_state)
    }

    pub fn state(&self, tx_tracking_id: &TxTrackingId) -> Option<TransactionState> {
        self.records
            .get(tx_tracking_id)
            .map(|record| record.current_state())
    }

    /// Snapshot of a tracked transaction
    pub fn get(&self, tx_tracking_id: &TxTrackingId) -> Option<TransactionStateMachine> {
        self.records
            .get(tx_tracking_id)
            .map(|record| record.value().clone())
    }

    /// Transactions still `Submitted` after `older_than`.
    ///
    /// Liveness policy belongs to the caller; this never forces a transition.
    pub fn stale_submissions(&self, older_than: Duration) -> Vec<TxTrackingId> {
        let cutoff = chrono::Duration::from_std(older_than)
            .map(|age| Utc::now() - age)
            .unwrap_or_else(|_| Utc::now());

        self.records
            .iter()
            .filter(|record| {
                record.current_state() == TransactionState::Submitted
                    && record.submitted_at() <= cutoff
            })
            .map(|record| record.key().clone())
            .collect()
    }

    /// Drop a record once it is terminal, keeping a tombstone of its outcome
    /// for the lifetime of the tracker.
    pub fn retire(&self, tx_tracking_id: &TxTrackingId) -> StateMachineResult<TransactionStateMachine> {
        // The tombstone is written under the records shard lock, so no update
        // can observe the ID as unknown in between
        let removed = self.records.remove_if(tx_tracking_id, |id, record| {
            let terminal = record.is_terminal();
            if terminal {
                self.retired.insert(id.clone(), record.current_state());
            }
            terminal
        });

        match removed {
            Some((_, record)) => Ok(record),
            None if self.records.contains_key(tx_tracking_id) => {
                Err(StateMachineError::NotTerminal {
                    tx_tracking_id: tx_tracking_id.to_string(),
                })
            }
            None => Err(StateMachineError::UnknownTransaction {
                tx_tracking_id: tx_tracking_id.to_string(),
            }),
        }
    }

    pub fn is_retired(&self, tx_tracking_id: &TxTrackingId) -> bool {
        self.retired.contains_key(tx_tracking_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
