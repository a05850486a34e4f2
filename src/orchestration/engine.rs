//! # Orchestration Engine
//!
//! Owns one connector for its whole lifetime: configures and initializes it,
//! submits broadcast batches through it, and runs the tasks that apply its
//! events. Everything is constructed and torn down explicitly; there is no
//! process-wide state.

use super::dispatcher::{DispatchStats, EventDispatcher};
use crate::blockchain::{
    check_config_shape, BlockchainPlugin, BroadcastBatch, Capabilities, EventSink, TxTrackingId,
};
use crate::broadcast::{submit_with_retry, ProcessedBatchLedger};
use crate::config::{ConfigManager, SequencerConfig};
use crate::error::{Result, SequencerError};
use crate::events::{NotificationPublisher, PublishedNotification};
use crate::logging::log_connector_operation;
use crate::sequencing::{DeliveryHandler, MemberId, StreamConsumer, StreamTransport};
use crate::state_machine::{
    StateMachineError, StateMachineResult, TransactionState, TransactionStateMachine,
    TransactionTracker,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct OrchestrationEngine {
    config: SequencerConfig,
    plugin: Arc<dyn BlockchainPlugin>,
    capabilities: OnceLock<Capabilities>,
    init_started: AtomicBool,
    tracker: Arc<TransactionTracker>,
    dispatcher: Arc<EventDispatcher>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    consumers: Mutex<Vec<(Arc<StreamConsumer>, JoinHandle<Result<()>>)>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("connector", &self.plugin.name())
            .field("capabilities", &self.capabilities.get())
            .finish_non_exhaustive()
    }
}

impl OrchestrationEngine {
    pub fn new(config: SequencerConfig, plugin: Arc<dyn BlockchainPlugin>) -> Self {
        Self::with_ledger(config, plugin, Arc::new(ProcessedBatchLedger::new()))
    }

    /// Engine applying sequenced batches against `ledger`.
    ///
    /// Members of one cluster share a ledger, so a batch applied by a member
    /// that failed before acknowledging it is a duplicate for its successor.
    pub fn with_ledger(
        config: SequencerConfig,
        plugin: Arc<dyn BlockchainPlugin>,
        ledger: Arc<ProcessedBatchLedger>,
    ) -> Self {
        let tracker = Arc::new(TransactionTracker::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&tracker),
            ledger,
            NotificationPublisher::new(config.engine.notification_capacity),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            plugin,
            capabilities: OnceLock::new(),
            init_started: AtomicBool::new(false),
            tracker,
            dispatcher,
            event_loop: Mutex::new(None),
            consumers: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn from_manager(manager: &ConfigManager, plugin: Arc<dyn BlockchainPlugin>) -> Self {
        Self::new(manager.config().clone(), plugin)
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Configure and initialize the connector, then start applying its events.
    ///
    /// Fails with `CapabilityMissing` when global ordering is required and the
    /// connector cannot provide it. The connector stays initialized in that
    /// case, so a later call reports `AlreadyInitialized`.
    pub async fn init(&self) -> Result<Capabilities> {
        let connector = self.plugin.name().to_string();
        if self
            .init_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SequencerError::AlreadyInitialized { connector });
        }

        let shape = self.plugin.config_interface();
        if let Err(err) = check_config_shape(&connector, &shape, &self.config.connector) {
            self.init_started.store(false, Ordering::SeqCst);
            log_connector_operation("init", &connector, "rejected", Some(&err.to_string()));
            return Err(err);
        }

        let (sink, receiver) = EventSink::channel(self.config.engine.event_channel_capacity);
        let capabilities = match self.plugin.init(self.config.connector.clone(), sink).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                if !matches!(err, SequencerError::AlreadyInitialized { .. }) {
                    self.init_started.store(false, Ordering::SeqCst);
                }
                log_connector_operation("init", &connector, "failed", Some(&err.to_string()));
                return Err(err);
            }
        };

        if self.config.engine.require_global_sequencer && !capabilities.global_sequencer {
            log_connector_operation(
                "init",
                &connector,
                "rejected",
                Some("global sequencer required but not provided"),
            );
            return Err(SequencerError::CapabilityMissing {
                connector,
                capability: "globalSequencer".to_string(),
            });
        }

        let handle = tokio::spawn(
            Arc::clone(&self.dispatcher).run(receiver, self.shutdown.subscribe()),
        );
        *self.event_loop.lock() = Some(handle);
        let _ = self.capabilities.set(capabilities);

        log_connector_operation(
            "init",
            &connector,
            "success",
            Some(&format!("global_sequencer={}", capabilities.global_sequencer)),
        );
        Ok(capabilities)
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.get().copied()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.capabilities.get().is_none() {
            return Err(SequencerError::NotInitialized {
                connector: self.plugin.name().to_string(),
            });
        }
        Ok(())
    }

    /// Submit a batch for pinning and start tracking it in `Submitted`.
    ///
    /// Returns as soon as the connector accepted the batch; confirmation arrives
    /// later as a transaction update.
    pub async fn submit_broadcast_batch(
        &self,
        identity: &str,
        batch: &BroadcastBatch,
    ) -> Result<TxTrackingId> {
        self.ensure_initialized()?;
        batch.validate()?;

        let tx_tracking_id = submit_with_retry(
            self.plugin.as_ref(),
            identity,
            batch,
            &self.config.engine.submission_retry,
        )
        .await?;

        match self
            .tracker
            .track(tx_tracking_id.clone(), identity, batch.batch_id)
        {
            Ok(()) => {}
            // The connector returned the original pin for a resubmitted batch
            Err(StateMachineError::AlreadyTracked { .. })
                if self
                    .tracker
                    .get(&tx_tracking_id)
                    .and_then(|record| record.batch_id())
                    == Some(batch.batch_id) => {}
            Err(err) => return Err(err.into()),
        }

        info!(
            connector = self.plugin.name(),
            identity = %identity,
            batch_id = %batch.batch_id,
            tx_tracking_id = %tx_tracking_id,
            "Broadcast batch submitted"
        );
        Ok(tx_tracking_id)
    }

    pub fn transaction_state(&self, tx_tracking_id: &TxTrackingId) -> Option<TransactionState> {
        self.tracker.state(tx_tracking_id)
    }

    pub fn transaction(&self, tx_tracking_id: &TxTrackingId) -> Option<TransactionStateMachine> {
        self.tracker.get(tx_tracking_id)
    }

    /// Transactions still `Submitted` after `older_than`, for the caller's liveness policy
    pub fn stale_submissions(&self, older_than: Duration) -> Vec<TxTrackingId> {
        self.tracker.stale_submissions(older_than)
    }

    /// Forget a transaction that reached a terminal state
    pub fn retire_transaction(
        &self,
        tx_tracking_id: &TxTrackingId,
    ) -> StateMachineResult<TransactionStateMachine> {
        self.tracker.retire(tx_tracking_id)
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    pub fn ledger(&self) -> &Arc<ProcessedBatchLedger> {
        self.dispatcher.ledger()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedNotification> {
        self.dispatcher.publisher().subscribe()
    }

    /// Handler applying stream deliveries with this engine's dedup ledger
    pub fn delivery_handler(&self) -> Arc<dyn DeliveryHandler> {
        Arc::clone(&self.dispatcher) as Arc<dyn DeliveryHandler>
    }

    /// Join the sequenced event stream as cluster member `member`
    pub fn join_stream(
        &self,
        member: MemberId,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Arc<StreamConsumer>> {
        self.ensure_initialized()?;
        let consumer = StreamConsumer::new(
            member,
            transport,
            self.delivery_handler(),
            self.config.stream.reconnect.clone(),
        );
        let handle = consumer.start();
        self.consumers.lock().push((Arc::clone(&consumer), handle));
        Ok(consumer)
    }

    /// Stop stream consumers (handing delivery to other members), then drain and
    /// stop the event dispatcher
    pub async fn shutdown(&self) {
        let consumers: Vec<_> = self.consumers.lock().drain(..).collect();
        let handles: Vec<_> = consumers
            .into_iter()
            .map(|(consumer, handle)| {
                consumer.shutdown();
                handle
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Stream consumer ended with error"),
                Err(err) => warn!(error = %err, "Stream consumer task failed"),
            }
        }

        self.shutdown.send_replace(true);
        let event_loop = self.event_loop.lock().take();
        if let Some(handle) = event_loop {
            if let Err(err) = handle.await {
                warn!(error = %err, "Event dispatcher task failed");
            }
        }
        log_connector_operation("shutdown", self.plugin.name(), "stopped", None);
    }
}
