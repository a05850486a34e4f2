//! Processed-batch ledger keyed by `BatchID`.

use crate::blockchain::{AdditionalInfo, BroadcastBatch, Bytes32};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A batch applied once at the application boundary
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedBatch {
    pub batch: BroadcastBatch,
    pub additional_info: AdditionalInfo,
    /// Stream position, when the batch arrived through the event stream coordinator
    pub sequence: Option<u64>,
    pub processed_at: DateTime<Utc>,
}

/// Concurrent set of processed batch IDs.
///
/// The entry API makes check-and-record a single step per shard, so two
/// deliveries of the same batch racing each other produce one apply.
#[derive(Debug, Default)]
pub struct ProcessedBatchLedger {
    processed: DashMap<Bytes32, ProcessedBatch>,
}

impl ProcessedBatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the batch unless its ID was already processed. Returns `true` when
    /// this call recorded it.
    pub fn record_if_new(
        &self,
        batch: &BroadcastBatch,
        additional_info: &AdditionalInfo,
        sequence: Option<u64>,
    ) -> bool {
        match self.processed.entry(batch.batch_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(ProcessedBatch {
                    batch: *batch,
                    additional_info: additional_info.clone(),
                    sequence,
                    processed_at: Utc::now(),
                });
                true
            }
        }
    }

    pub fn contains(&self, batch_id: &Bytes32) -> bool {
        self.processed.contains_key(batch_id)
    }

    pub fn get(&self, batch_id: &Bytes32) -> Option<ProcessedBatch> {
        self.processed.get(batch_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
