use crate::blockchain::{AdditionalInfo, BroadcastBatch, TxTrackingId};
use crate::constants::events;
use crate::state_machine::TransactionState;
use serde::Serialize;
use tokio::sync::broadcast;

/// What the engine tells application-layer subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineNotification {
    /// Network-wide: a batch applied once at its final position
    BatchSequenced {
        batch: BroadcastBatch,
        additional_info: AdditionalInfo,
        sequence: Option<u64>,
    },
    /// Private to the submitter: a tracked transaction reached a terminal state
    TransactionUpdated {
        tx_tracking_id: TxTrackingId,
        state: TransactionState,
        error_message: Option<String>,
        additional_info: AdditionalInfo,
    },
}

impl EngineNotification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchSequenced { .. } => events::BATCH_SEQUENCED,
            Self::TransactionUpdated { .. } => events::TRANSACTION_UPDATED,
        }
    }
}

/// Notification that has been published
#[derive(Debug, Clone)]
pub struct PublishedNotification {
    pub name: &'static str,
    pub notification: EngineNotification,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Fan-out of engine notifications to any number of subscribers
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    sender: broadcast::Sender<PublishedNotification>,
}

impl NotificationPublisher {
    /// Create a new publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification, returning how many subscribers received it.
    ///
    /// Publishing with no subscribers is not an error. Subscribers that fall more
    /// than the channel capacity behind observe `RecvError::Lagged`.
    pub fn publish(&self, notification: EngineNotification) -> usize {
        let published = PublishedNotification {
            name: notification.name(),
            notification,
            published_at: chrono::Utc::now(),
        };
        self.sender.send(published).unwrap_or(0)
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedNotification> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationPublisher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_NOTIFICATION_CAPACITY)
    }
}
