//! # Event Dispatcher
//!
//! Engine side of the event sink contract. Applies connector events to the
//! transaction tracker and the processed-batch ledger, then notifies
//! subscribers. Duplicate and out-of-order events are discarded here and
//! surface only as counters and logs.

use crate::blockchain::{AdditionalInfo, BlockchainEvent, BroadcastBatch, TxTrackingId};
use crate::broadcast::ProcessedBatchLedger;
use crate::error::Result;
use crate::events::{EngineNotification, NotificationPublisher};
use crate::sequencing::{DeliveryHandler, SequencedEvent};
use crate::state_machine::{TransactionState, TransactionTracker};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Batch ID already processed; no effect
    Duplicate,
    /// Protocol violation, logged and dropped
    Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub batches_applied: u64,
    pub duplicate_batches: u64,
    pub transaction_updates: u64,
    pub protocol_violations: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    batches_applied: AtomicU64,
    duplicate_batches: AtomicU64,
    transaction_updates: AtomicU64,
    protocol_violations: AtomicU64,
}

#[derive(Debug)]
pub struct EventDispatcher {
    tracker: Arc<TransactionTracker>,
    ledger: Arc<ProcessedBatchLedger>,
    publisher: NotificationPublisher,
    counters: DispatchCounters,
}

impl EventDispatcher {
    pub fn new(
        tracker: Arc<TransactionTracker>,
        ledger: Arc<ProcessedBatchLedger>,
        publisher: NotificationPublisher,
    ) -> Self {
        Self {
            tracker,
            ledger,
            publisher,
            counters: DispatchCounters::default(),
        }
    }

    pub fn ledger(&self) -> &Arc<ProcessedBatchLedger> {
        &self.ledger
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            batches_applied: self.counters.batches_applied.load(Ordering::Relaxed),
            duplicate_batches: self.counters.duplicate_batches.load(Ordering::Relaxed),
            transaction_updates: self.counters.transaction_updates.load(Ordering::Relaxed),
            protocol_violations: self.counters.protocol_violations.load(Ordering::Relaxed),
        }
    }

    pub fn dispatch(&self, event: BlockchainEvent) -> DispatchOutcome {
        match event {
            BlockchainEvent::TransactionUpdate {
                tx_tracking_id,
                state,
                error_message,
                additional_info,
            } => self.apply_transaction_update(&tx_tracking_id, state, &error_message, additional_info),
            BlockchainEvent::SequencedBroadcastBatch {
                batch,
                additional_info,
            } => self.apply_sequenced(&batch, additional_info, None),
        }
    }

    fn apply_transaction_update(
        &self,
        tx_tracking_id: &TxTrackingId,
        state: TransactionState,
        error_message: &str,
        additional_info: AdditionalInfo,
    ) -> DispatchOutcome {
        match self
            .tracker
            .apply_update(tx_tracking_id, state, error_message, additional_info.clone())
        {
            Ok(new_state) => {
                self.counters.transaction_updates.fetch_add(1, Ordering::Relaxed);
                if new_state.is_terminal() {
                    self.publisher.publish(EngineNotification::TransactionUpdated {
                        tx_tracking_id: tx_tracking_id.clone(),
                        state: new_state,
                        error_message: (!error_message.is_empty()).then(|| error_message.to_string()),
                        additional_info,
                    });
                }
                DispatchOutcome::Applied
            }
            Err(err) => {
                self.counters.protocol_violations.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tx_tracking_id = %tx_tracking_id,
                    reported_state = %state,
                    error = %err,
                    "Discarding transaction update"
                );
                DispatchOutcome::Discarded
            }
        }
    }

    /// Apply a sequenced batch at most once per `BatchID`
    pub fn apply_sequenced(
        &self,
        batch: &BroadcastBatch,
        additional_info: AdditionalInfo,
        sequence: Option<u64>,
    ) -> DispatchOutcome {
        if !self.ledger.record_if_new(batch, &additional_info, sequence) {
            self.counters.duplicate_batches.fetch_add(1, Ordering::Relaxed);
            debug!(
                batch_id = %batch.batch_id,
                sequence = sequence,
                "Duplicate sequenced batch ignored"
            );
            return DispatchOutcome::Duplicate;
        }

        self.counters.batches_applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            batch_id = %batch.batch_id,
            payload_ref = %batch.batch_payload_ref,
            sequence = sequence,
            "Sequenced batch applied"
        );
        self.publisher.publish(EngineNotification::BatchSequenced {
            batch: *batch,
            additional_info,
            sequence,
        });
        DispatchOutcome::Applied
    }

    /// Drain connector events until the sink closes or shutdown is signalled.
    /// Events already buffered at shutdown are still applied.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<BlockchainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Event dispatcher started");
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => {
                        self.dispatch(event);
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    receiver.close();
                    while let Some(event) = receiver.recv().await {
                        self.dispatch(event);
                    }
                    break;
                }
            }
        }
        info!(stats = ?self.stats(), "Event dispatcher stopped");
    }
}

#[async_trait]
impl DeliveryHandler for EventDispatcher {
    /// Duplicates still succeed so the acknowledgment advances past them
    async fn handle_delivery(&self, event: &SequencedEvent) -> Result<()> {
        self.apply_sequenced(&event.batch, event.additional_info.clone(), Some(event.sequence));
        Ok(())
    }
}
