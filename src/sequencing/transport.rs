//! # Stream Transport
//!
//! The connection a cluster member holds to the event producer. The producer
//! may live in another process; [`LocalTransport`] attaches in-process and can
//! be switched off to exercise the reconnect path.

use super::producer::{ConnectionId, EventStreamProducer, MemberId, ProducerConnection, SequencedEvent};
use crate::error::{Result, SequencerError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One member's live connection to the producer
#[async_trait]
pub trait StreamConnection: Send {
    fn id(&self) -> ConnectionId;

    /// Next event for this member; `None` once the transport dropped
    async fn next_event(&mut self) -> Option<SequencedEvent>;

    /// Acknowledge every event up to and including `sequence`
    async fn acknowledge(&mut self, sequence: u64) -> Result<()>;

    /// Deliberate close, handing delivery to the next member
    async fn close(&mut self);
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a connection. Transient failures surface as `ConnectorUnavailable`.
    async fn connect(&self, member: &MemberId) -> Result<Box<dyn StreamConnection>>;
}

#[derive(Debug)]
pub struct LocalTransport {
    producer: Arc<EventStreamProducer>,
    available: AtomicBool,
}

impl LocalTransport {
    pub fn new(producer: Arc<EventStreamProducer>) -> Self {
        Self {
            producer,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the producer becoming reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn producer(&self) -> &Arc<EventStreamProducer> {
        &self.producer
    }
}

#[async_trait]
impl StreamTransport for LocalTransport {
    async fn connect(&self, member: &MemberId) -> Result<Box<dyn StreamConnection>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SequencerError::ConnectorUnavailable(format!(
                "event stream {} is unreachable",
                self.producer.subscription()
            )));
        }
        let connection = self.producer.attach(member.clone())?;
        Ok(Box::new(LocalConnection { connection }))
    }
}

struct LocalConnection {
    connection: ProducerConnection,
}

#[async_trait]
impl StreamConnection for LocalConnection {
    fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    async fn next_event(&mut self) -> Option<SequencedEvent> {
        self.connection.next().await
    }

    async fn acknowledge(&mut self, sequence: u64) -> Result<()> {
        self.connection.acknowledge(sequence)
    }

    async fn close(&mut self) {
        self.connection.close();
    }
}
