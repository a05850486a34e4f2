//! # Stream Consumer
//!
//! Member-side loop: connect, apply each delivered event through a
//! [`DeliveryHandler`], acknowledge only after the handler succeeded, and
//! reconnect with bounded exponential backoff when the transport drops.
//!
//! Whether this member is the active one is decided by the producer. A member
//! attached as standby simply waits on its connection until promoted.

use super::producer::{MemberId, SequencedEvent};
use super::transport::{StreamConnection, StreamTransport};
use crate::config::BackoffConfig;
use crate::error::{Result, SequencerError};
use crate::logging::log_error;
use crate::resilience::ExponentialBackoff;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Applies a delivered event durably. Returning `Ok` releases the acknowledgment.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle_delivery(&self, event: &SequencedEvent) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub acknowledged: u64,
    pub handler_errors: u64,
}

enum Step {
    Event(SequencedEvent),
    Disconnected,
    Shutdown,
}

enum Exit {
    Disconnected,
    Shutdown,
}

pub struct StreamConsumer {
    member: MemberId,
    transport: Arc<dyn StreamTransport>,
    handler: Arc<dyn DeliveryHandler>,
    reconnect: BackoffConfig,
    shutdown: watch::Sender<bool>,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    acknowledged: AtomicU64,
    handler_errors: AtomicU64,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("member", &self.member)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl StreamConsumer {
    pub fn new(
        member: MemberId,
        transport: Arc<dyn StreamTransport>,
        handler: Arc<dyn DeliveryHandler>,
        reconnect: BackoffConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            member,
            transport,
            handler,
            reconnect,
            shutdown,
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        })
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// Spawn the consume loop.
    ///
    /// The task ends with `Ok` after [`StreamConsumer::shutdown`], or with the
    /// error that stopped it: a fatal `SequenceGap`, or `ConnectorUnavailable`
    /// once reconnect attempts are exhausted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let consumer = Arc::clone(self);
        tokio::spawn(async move { consumer.run().await })
    }

    /// Close the connection deliberately, handing delivery to another member
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }

    async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new(self.reconnect.clone());
        info!(member = %self.member, "Stream consumer started");

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(());
            }

            let connected = tokio::select! {
                result = self.transport.connect(&self.member) => result,
                _ = shutdown.changed() => return Ok(()),
            };

            match connected {
                Ok(mut connection) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    backoff.reset();
                    debug!(
                        member = %self.member,
                        connection_id = %connection.id(),
                        "Connected to event stream"
                    );

                    match self.consume(connection.as_mut(), &mut shutdown).await? {
                        Exit::Shutdown => {
                            connection.close().await;
                            info!(member = %self.member, "Stream consumer shut down");
                            return Ok(());
                        }
                        Exit::Disconnected => {
                            info!(member = %self.member, "Event stream connection dropped");
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    self.connect_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(member = %self.member, error = %err, "Event stream connect failed");
                }
                Err(err) => {
                    log_error("stream_consumer", "connect", &err.to_string(), Some(self.member.as_str()));
                    return Err(err);
                }
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(SequencerError::ConnectorUnavailable(format!(
                    "member {} gave up reconnecting after {} attempts",
                    self.member,
                    backoff.attempts()
                )));
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn consume(
        &self,
        connection: &mut dyn StreamConnection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Exit> {
        loop {
            let step = tokio::select! {
                event = connection.next_event() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Disconnected,
                },
                _ = shutdown.changed() => Step::Shutdown,
            };

            let event = match step {
                Step::Event(event) => event,
                Step::Disconnected => return Ok(Exit::Disconnected),
                Step::Shutdown => return Ok(Exit::Shutdown),
            };

            if let Err(err) = self.handler.handle_delivery(&event).await {
                self.handler_errors.fetch_add(1, Ordering::Relaxed);
                connection.close().await;
                if err.is_fatal() {
                    return Err(err);
                }
                // Closing without acknowledging makes the event come back on reconnect
                warn!(
                    member = %self.member,
                    sequence = event.sequence,
                    error = %err,
                    "Delivery handler failed, reconnecting for redelivery"
                );
                return Ok(Exit::Disconnected);
            }

            match connection.acknowledge(event.sequence).await {
                Ok(()) => {
                    self.acknowledged.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(
                        member = %self.member,
                        sequence = event.sequence,
                        error = %err,
                        "Acknowledgment rejected, reconnecting"
                    );
                    connection.close().await;
                    return Ok(Exit::Disconnected);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{AdditionalInfo, BroadcastBatch, Bytes32, HexUuid};
    use crate::sequencing::cursor::InMemoryCursorStore;
    use crate::sequencing::producer::EventStreamProducer;
    use crate::sequencing::transport::LocalTransport;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        fail_once_at: Mutex<Option<u64>>,
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn handle_delivery(&self, event: &SequencedEvent) -> Result<()> {
            let mut fail = self.fail_once_at.lock();
            if *fail == Some(event.sequence) {
                *fail = None;
                return Err(SequencerError::ProtocolViolation("transient".into()));
            }
            self.seen.lock().push(event.sequence);
            Ok(())
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    fn batch(n: u8) -> BroadcastBatch {
        BroadcastBatch::new(u64::from(n), HexUuid::from_content(&[n]), Bytes32::new([n; 32]))
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        for _ in 0..200 {
            if recorder.seen.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} deliveries, saw {:?}", recorder.seen.lock());
    }

    #[tokio::test]
    async fn test_handler_failure_redelivers() {
        let producer =
            EventStreamProducer::open("sub", Arc::new(InMemoryCursorStore::new()), 4).unwrap();
        let _dispatch = producer.start();
        let recorder = Arc::new(Recorder {
            fail_once_at: Mutex::new(Some(2)),
            ..Recorder::default()
        });
        let consumer = StreamConsumer::new(
            MemberId::from("a"),
            Arc::new(LocalTransport::new(Arc::clone(&producer))),
            recorder.clone(),
            fast_backoff(),
        );
        let task = consumer.start();

        for n in 1..=3 {
            producer.append(batch(n), AdditionalInfo::new()).unwrap();
        }
        wait_for(&recorder, 3).await;

        assert_eq!(*recorder.seen.lock(), vec![1, 2, 3]);
        assert_eq!(consumer.stats().handler_errors, 1);
        assert!(consumer.stats().connects >= 2);

        consumer.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let producer =
            EventStreamProducer::open("sub", Arc::new(InMemoryCursorStore::new()), 4).unwrap();
        let transport = Arc::new(LocalTransport::new(producer));
        transport.set_available(false);

        let consumer = StreamConsumer::new(
            MemberId::from("a"),
            transport,
            Arc::new(Recorder::default()),
            BackoffConfig {
                max_attempts: Some(2),
                ..fast_backoff()
            },
        );
        let err = consumer.start().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(consumer.stats().connect_failures, 3);
    }
}
