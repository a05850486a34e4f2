//! # Broadcast Batch Handling
//!
//! Engine-side bookkeeping for broadcast batches: the processed-batch ledger that
//! makes `SequencedBroadcastBatch` delivery idempotent, and caller-side
//! submission retry that resubmits the identical batch after a transient failure.

pub mod ledger;
pub mod submission;

pub use ledger::{ProcessedBatch, ProcessedBatchLedger};
pub use submission::submit_with_retry;
