use async_trait::async_trait;
use broadcast_sequencer::blockchain::{BroadcastBatch, Bytes32, HexUuid};
use broadcast_sequencer::config::{BackoffConfig, SequencerConfig};
use broadcast_sequencer::connectors::{InMemoryConnector, InMemoryLedger};
use broadcast_sequencer::sequencing::{CursorStore, DeliveryHandler, EventStreamProducer, SequencedEvent};
use broadcast_sequencer::{OrchestrationEngine, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Batch whose ID and payload reference are derived from `n`
pub fn batch(n: u8) -> BroadcastBatch {
    BroadcastBatch::new(
        1000 + u64::from(n),
        HexUuid::from_content(format!("ref-{n}").as_bytes()),
        Bytes32::new([n; 32]),
    )
}

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms: 5,
        max_delay_ms: 40,
        multiplier: 2.0,
        max_attempts: None,
    }
}

pub fn test_config() -> SequencerConfig {
    let mut config = SequencerConfig::default();
    config.stream.reconnect = fast_backoff();
    config.engine.submission_retry.backoff = fast_backoff();
    config.stream.subscription = "network-a".to_string();
    config.stream.delivery_buffer = 4;
    config
}

/// Producer for the test subscription, opened from `test_config().stream`
pub fn stream_producer(store: Arc<dyn CursorStore>) -> Arc<EventStreamProducer> {
    EventStreamProducer::from_config(&test_config().stream, store).expect("open producer")
}

/// Engine over a fresh connector on `ledger`, already initialized
pub async fn initialized_engine(
    name: &str,
    ledger: &Arc<InMemoryLedger>,
) -> (OrchestrationEngine, Arc<InMemoryConnector>) {
    let connector = Arc::new(InMemoryConnector::new(name, Arc::clone(ledger)));
    let engine = OrchestrationEngine::new(test_config(), connector.clone());
    engine.init().await.expect("engine init");
    (engine, connector)
}

/// Delivery handler recording sequences in arrival order
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<u64>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    async fn handle_delivery(&self, event: &SequencedEvent) -> Result<()> {
        self.seen.lock().push(event.sequence);
        Ok(())
    }
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn wait_until<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}
