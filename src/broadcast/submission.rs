//! Caller-side submission retry.

use crate::blockchain::{BlockchainPlugin, BroadcastBatch, TxTrackingId};
use crate::config::SubmissionRetryConfig;
use crate::error::Result;
use crate::resilience::ExponentialBackoff;
use tracing::{debug, warn};

/// Submit `batch`, retrying the identical input on `ConnectorUnavailable`.
///
/// Connectors dedupe resubmissions by `BatchID`, so a retry after a failure that
/// actually reached the network yields the original pin rather than a second one.
/// Every other error is returned on first occurrence.
pub async fn submit_with_retry(
    plugin: &dyn BlockchainPlugin,
    identity: &str,
    batch: &BroadcastBatch,
    retry: &SubmissionRetryConfig,
) -> Result<TxTrackingId> {
    let mut backoff = ExponentialBackoff::new(retry.backoff.clone());
    let mut attempt: u32 = 1;

    loop {
        match plugin.submit_broadcast_batch(identity, batch).await {
            Ok(tx_tracking_id) => {
                debug!(
                    connector = plugin.name(),
                    batch_id = %batch.batch_id,
                    tx_tracking_id = %tx_tracking_id,
                    attempt,
                    "Broadcast batch submitted"
                );
                return Ok(tx_tracking_id);
            }
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                let Some(delay) = backoff.next_delay() else {
                    return Err(err);
                };
                warn!(
                    connector = plugin.name(),
                    batch_id = %batch.batch_id,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Connector unavailable, retrying submission"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
