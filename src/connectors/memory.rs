//! # In-Memory Connector
//!
//! A complete connector over a process-local ledger shared by every participant.
//! The ledger is the single source of order: each accepted batch gets the next
//! sequence number (its block number), and every attached feed observes pins in
//! that order.
//!
//! Two kinds of feed exist. An [`EventSink`] feed sees pins live from the moment
//! it attaches. An [`EventStreamProducer`] feed is first replayed everything
//! after the producer's durable cursor, which is what makes failover and
//! producer restarts gap-free.

use crate::blockchain::{
    AdditionalInfo, BlockchainPlugin, BroadcastBatch, Bytes32, Capabilities, EventSink,
    TxTrackingId,
};
use crate::constants::additional_info;
use crate::error::{Result, SequencerError};
use crate::logging::log_connector_operation;
use crate::sequencing::{AppendOutcome, EventStreamProducer};
use crate::state_machine::TransactionState;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A batch pinned on the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub sequence: u64,
    pub block_number: u64,
    pub transaction_hash: String,
    pub signer: String,
    pub batch: BroadcastBatch,
}

impl Pin {
    fn additional_info(&self) -> AdditionalInfo {
        let mut info = AdditionalInfo::new();
        info.insert(additional_info::BLOCK_NUMBER.to_string(), json!(self.block_number));
        info.insert(
            additional_info::TRANSACTION_HASH.to_string(),
            json!(self.transaction_hash),
        );
        info.insert(additional_info::SIGNER.to_string(), json!(self.signer));
        info
    }
}

enum Feed {
    Stream(Arc<EventStreamProducer>),
    Sink(EventSink),
}

#[derive(Default)]
struct LedgerState {
    pins: Vec<Pin>,
    by_batch_id: HashMap<Bytes32, usize>,
    feeds: Vec<Feed>,
}

/// Process-local ledger visible to all participants
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    available: AtomicBool,
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the network becoming reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Pin a batch, or return the existing pin for its `BatchID`
    pub async fn pin(&self, signer: &str, batch: &BroadcastBatch) -> Result<Pin> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SequencerError::ConnectorUnavailable(
                "ledger is unreachable".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.by_batch_id.get(&batch.batch_id).copied() {
            if let Some(pin) = state.pins.get(existing) {
                debug!(batch_id = %batch.batch_id, sequence = pin.sequence, "Batch already pinned");
                return Ok(pin.clone());
            }
        }

        let sequence = state.pins.len() as u64 + 1;
        let pin = Pin {
            sequence,
            block_number: sequence,
            transaction_hash: format!("0x{sequence:064x}"),
            signer: signer.to_string(),
            batch: *batch,
        };
        let index = state.pins.len();
        state.pins.push(pin.clone());
        state.by_batch_id.insert(batch.batch_id, index);

        let mut feeds = std::mem::take(&mut state.feeds);
        let mut retained = Vec::with_capacity(feeds.len());
        for feed in feeds.drain(..) {
            if deliver(&feed, &pin).await {
                retained.push(feed);
            }
        }
        state.feeds = retained;
        Ok(pin)
    }

    pub async fn pins(&self) -> Vec<Pin> {
        self.state.lock().await.pins.clone()
    }

    pub async fn pin_count(&self) -> usize {
        self.state.lock().await.pins.len()
    }

    /// Feed a producer, first replaying every pin after its durable cursor
    pub async fn attach_stream(&self, producer: Arc<EventStreamProducer>) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.feeds.retain(|feed| match feed {
            Feed::Stream(existing) => !Arc::ptr_eq(existing, &producer),
            Feed::Sink(_) => true,
        });

        let resume_from = producer.resume_from();
        let mut replayed = 0;
        for pin in state.pins.iter().filter(|pin| pin.sequence > resume_from) {
            if let AppendOutcome::Appended(_) =
                producer.append_sequenced(pin.sequence, pin.batch, pin.additional_info())?
            {
                replayed += 1;
            }
        }

        state.feeds.push(Feed::Stream(producer));
        Ok(replayed)
    }

    pub async fn detach_stream(&self, producer: &Arc<EventStreamProducer>) {
        self.state.lock().await.feeds.retain(|feed| match feed {
            Feed::Stream(existing) => !Arc::ptr_eq(existing, producer),
            Feed::Sink(_) => true,
        });
    }

    /// Deliver future pins to `sink`
    pub async fn attach_sink(&self, sink: EventSink) {
        self.state.lock().await.feeds.push(Feed::Sink(sink));
    }
}

/// Returns whether the feed should stay attached
async fn deliver(feed: &Feed, pin: &Pin) -> bool {
    match feed {
        Feed::Stream(producer) => {
            match producer.append_sequenced(pin.sequence, pin.batch, pin.additional_info()) {
                Ok(_) => true,
                Err(SequencerError::ChannelClosed(_)) => false,
                Err(err) => {
                    // Faulted producers are re-fed by attaching again after resynchronizing
                    warn!(
                        subscription = producer.subscription(),
                        sequence = pin.sequence,
                        error = %err,
                        "Event stream rejected pin"
                    );
                    true
                }
            }
        }
        Feed::Sink(sink) => sink
            .sequenced_broadcast_batch(pin.batch, pin.additional_info())
            .await
            .is_ok(),
    }
}

/// Connector-declared configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConnectorConfig {
    pub network: String,
    pub global_sequencer: bool,
    /// Delay before the confirmation of an accepted submission is reported
    pub confirm_delay_ms: u64,
}

impl Default for InMemoryConnectorConfig {
    fn default() -> Self {
        Self {
            network: "memory".to_string(),
            global_sequencer: true,
            confirm_delay_ms: 0,
        }
    }
}

struct ConnectorRuntime {
    config: InMemoryConnectorConfig,
    events: EventSink,
}

pub struct InMemoryConnector {
    name: String,
    ledger: Arc<InMemoryLedger>,
    stream: Option<Arc<EventStreamProducer>>,
    runtime: OnceLock<ConnectorRuntime>,
    next_tracking_id: AtomicU64,
    submissions: DashMap<Bytes32, TxTrackingId>,
    reverting: DashMap<Bytes32, String>,
    lose_next_response: AtomicBool,
}

impl std::fmt::Debug for InMemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConnector")
            .field("name", &self.name)
            .field("initialized", &self.runtime.get().is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryConnector {
    /// Connector delivering sequenced batches straight through the engine's sink
    pub fn new(name: impl Into<String>, ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            name: name.into(),
            ledger,
            stream: None,
            runtime: OnceLock::new(),
            next_tracking_id: AtomicU64::new(1),
            submissions: DashMap::new(),
            reverting: DashMap::new(),
            lose_next_response: AtomicBool::new(false),
        }
    }

    /// Deliver sequenced batches through an event stream producer instead of the sink
    pub fn with_event_stream(mut self, producer: Arc<EventStreamProducer>) -> Self {
        self.stream = Some(producer);
        self
    }

    /// Transactions for this batch will be reported as failed with `reason`
    pub fn revert_batch(&self, batch_id: Bytes32, reason: impl Into<String>) {
        self.reverting.insert(batch_id, reason.into());
    }

    /// The next accepted submission reports `ConnectorUnavailable` after pinning
    pub fn lose_next_response(&self) {
        self.lose_next_response.store(true, Ordering::SeqCst);
    }

    fn runtime(&self) -> Result<&ConnectorRuntime> {
        self.runtime
            .get()
            .ok_or_else(|| SequencerError::NotInitialized {
                connector: self.name.clone(),
            })
    }

    fn report(
        &self,
        runtime: &ConnectorRuntime,
        tx_tracking_id: TxTrackingId,
        state: TransactionState,
        error_message: String,
        info: AdditionalInfo,
    ) {
        let events = runtime.events.clone();
        let delay = Duration::from_millis(runtime.config.confirm_delay_ms);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(err) = events
                .transaction_update(tx_tracking_id.clone(), state, error_message, info)
                .await
            {
                debug!(tx_tracking_id = %tx_tracking_id, error = %err, "Transaction update not delivered");
            }
        });
    }
}

#[async_trait]
impl BlockchainPlugin for InMemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn config_interface(&self) -> Value {
        json!({
            "network": "",
            "global_sequencer": false,
            "confirm_delay_ms": 0,
        })
    }

    async fn init(&self, config: Value, events: EventSink) -> Result<Capabilities> {
        if self.runtime.get().is_some() {
            return Err(SequencerError::AlreadyInitialized {
                connector: self.name.clone(),
            });
        }
        let config: InMemoryConnectorConfig = if config.is_null() {
            InMemoryConnectorConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        let capabilities = Capabilities {
            global_sequencer: config.global_sequencer,
        };

        let runtime = ConnectorRuntime {
            config,
            events: events.clone(),
        };
        if self.runtime.set(runtime).is_err() {
            return Err(SequencerError::AlreadyInitialized {
                connector: self.name.clone(),
            });
        }

        match &self.stream {
            Some(producer) => {
                let replayed = self.ledger.attach_stream(Arc::clone(producer)).await?;
                debug!(connector = %self.name, replayed, "Event stream attached to ledger");
            }
            None => self.ledger.attach_sink(events).await,
        }

        log_connector_operation(
            "init",
            &self.name,
            "initialized",
            self.runtime().ok().map(|r| r.config.network.as_str()),
        );
        Ok(capabilities)
    }

    async fn submit_broadcast_batch(
        &self,
        identity: &str,
        batch: &BroadcastBatch,
    ) -> Result<TxTrackingId> {
        let runtime = self.runtime()?;
        batch.validate()?;

        if let Some(existing) = self.submissions.get(&batch.batch_id) {
            return Ok(existing.value().clone());
        }

        if let Some(reason) = self.reverting.get(&batch.batch_id).map(|r| r.value().clone()) {
            let tx_tracking_id = match self.submissions.entry(batch.batch_id) {
                Entry::Occupied(entry) => return Ok(entry.get().clone()),
                Entry::Vacant(entry) => entry.insert(self.issue_tracking_id()).value().clone(),
            };
            self.report(
                runtime,
                tx_tracking_id.clone(),
                TransactionState::Failed,
                reason,
                AdditionalInfo::new(),
            );
            return Ok(tx_tracking_id);
        }

        let pin = self.ledger.pin(identity, batch).await?;
        let tx_tracking_id = match self.submissions.entry(batch.batch_id) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => entry.insert(self.issue_tracking_id()).value().clone(),
        };
        self.report(
            runtime,
            tx_tracking_id.clone(),
            TransactionState::Confirmed,
            String::new(),
            pin.additional_info(),
        );

        if self.lose_next_response.swap(false, Ordering::SeqCst) {
            return Err(SequencerError::ConnectorUnavailable(format!(
                "response for batch {} was lost",
                batch.batch_id
            )));
        }
        Ok(tx_tracking_id)
    }
}

impl InMemoryConnector {
    fn issue_tracking_id(&self) -> TxTrackingId {
        TxTrackingId::new(format!(
            "tx-{}",
            self.next_tracking_id.fetch_add(1, Ordering::SeqCst)
        ))
    }
}
