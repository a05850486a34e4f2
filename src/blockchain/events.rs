//! # Event Sink Contract
//!
//! What a connector may report back to the engine. Rather than invoking
//! callbacks, the connector pushes [`BlockchainEvent`]s through a bounded channel,
//! so a burst of chain activity applies backpressure to the connector instead of
//! growing memory in the engine.

use super::types::{AdditionalInfo, BroadcastBatch, TxTrackingId};
use crate::error::{Result, SequencerError};
use crate::state_machine::TransactionState;
use serde::Serialize;
use tokio::sync::mpsc;

/// Callback payloads delivered from a connector to the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockchainEvent {
    /// Private to the submitting participant. Only the submitter's engine sees it.
    TransactionUpdate {
        tx_tracking_id: TxTrackingId,
        state: TransactionState,
        error_message: String,
        additional_info: AdditionalInfo,
    },
    /// A batch that reached its final position in the global order. Seen by every
    /// participant, the submitter included.
    SequencedBroadcastBatch {
        batch: BroadcastBatch,
        additional_info: AdditionalInfo,
    },
}

impl BlockchainEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TransactionUpdate { .. } => "transaction_update",
            Self::SequencedBroadcastBatch { .. } => "sequenced_broadcast_batch",
        }
    }
}

/// Handle a connector uses to report events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<BlockchainEvent>,
}

impl EventSink {
    /// Create a sink and the receiving end owned by the engine
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BlockchainEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn transaction_update(
        &self,
        tx_tracking_id: TxTrackingId,
        state: TransactionState,
        error_message: impl Into<String>,
        additional_info: AdditionalInfo,
    ) -> Result<()> {
        self.emit(BlockchainEvent::TransactionUpdate {
            tx_tracking_id,
            state,
            error_message: error_message.into(),
            additional_info,
        })
        .await
    }

    pub async fn sequenced_broadcast_batch(
        &self,
        batch: BroadcastBatch,
        additional_info: AdditionalInfo,
    ) -> Result<()> {
        self.emit(BlockchainEvent::SequencedBroadcastBatch {
            batch,
            additional_info,
        })
        .await
    }

    /// Waits for channel capacity. Fails only once the engine has stopped listening.
    pub async fn emit(&self, event: BlockchainEvent) -> Result<()> {
        let event_type = event.event_type();
        self.sender.send(event).await.map_err(|_| {
            SequencerError::ChannelClosed(format!("engine stopped receiving {event_type} events"))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
