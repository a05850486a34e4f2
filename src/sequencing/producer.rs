//! # Event Stream Producer
//!
//! Producer side of one logical subscription. It owns the ordered event log,
//! the durable cursor, and the choice of which attached connection is the
//! single active delivery target.
//!
//! ## Delivery discipline
//!
//! - Events carry strictly increasing sequence numbers starting at 1.
//! - Only the active connection receives events. Others wait attached, in
//!   attach order, as warm standbys.
//! - Whenever a connection becomes active it is replayed everything after the
//!   last acknowledged sequence, regardless of which connection acknowledged it.
//! - Acknowledgments advance the durable cursor through compare-and-set, then
//!   release the acknowledged prefix from memory. The cursor only moves
//!   forward; cursor I/O runs outside the producer's state lock.
//! - A discontinuity in appended sequences, or a cursor that disappeared from
//!   the store, faults the producer. Delivery stops until
//!   [`EventStreamProducer::resynchronize`] is called.

use super::cursor::{CursorError, CursorStore};
use crate::blockchain::{AdditionalInfo, BroadcastBatch};
use crate::config::StreamConfig;
use crate::constants::CURSOR_CAS_ATTEMPTS;
use crate::error::{Result, SequencerError};
use crate::logging::{log_error, log_sequencing_operation};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A sequenced broadcast batch at its final position in the stream
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub batch: BroadcastBatch,
    pub additional_info: AdditionalInfo,
}

/// Identity of one transport-level connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a cluster member (engine instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerStatus {
    Running,
    /// Delivery halted after a sequence gap or cursor loss
    Faulted { reason: String },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(u64),
    /// Sequence already in the log or already acknowledged; a replay from the source
    AlreadyKnown,
}

/// Point-in-time counters for one subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    pub appended: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub failovers: u64,
    /// Last acknowledged sequence (0 when none)
    pub acknowledged: u64,
    pub pending: usize,
    pub connections: usize,
}

struct ConnectionSlot {
    id: ConnectionId,
    member: MemberId,
    sender: mpsc::Sender<SequencedEvent>,
    delivered_upto: u64,
}

struct ProducerState {
    /// Unacknowledged events, contiguous from `acked + 1`
    pending: VecDeque<SequencedEvent>,
    next_sequence: u64,
    acked: u64,
    /// Cursor value last observed in the store
    durable: Option<u64>,
    /// Attach order doubles as failover order
    connections: Vec<ConnectionSlot>,
    active: Option<ConnectionId>,
    status: ProducerStatus,
    highest_delivered: u64,
    /// Bumped by every resynchronization; acknowledgments from an older epoch are dropped
    epoch: u64,
    stats: ProducerStats,
}

impl ProducerState {
    fn slot(&self, id: ConnectionId) -> Option<&ConnectionSlot> {
        self.connections.iter().find(|slot| slot.id == id)
    }

    fn slot_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionSlot> {
        self.connections.iter_mut().find(|slot| slot.id == id)
    }

    /// Make `id` the delivery target, replaying from the acknowledged position
    fn activate(&mut self, id: ConnectionId) {
        let acked = self.acked;
        if let Some(slot) = self.slot_mut(id) {
            slot.delivered_upto = acked;
        }
        self.active = Some(id);
    }

    /// Record `sequence` as acknowledged and release it from memory
    fn advance_acked(&mut self, sequence: u64) {
        if sequence <= self.acked {
            return;
        }
        self.acked = sequence;
        while self
            .pending
            .front()
            .is_some_and(|event| event.sequence <= sequence)
        {
            self.pending.pop_front();
        }
        // Keeps delivered_upto >= acked for every slot, including one promoted
        // while the cursor write was in flight
        for slot in &mut self.connections {
            slot.delivered_upto = slot.delivered_upto.max(sequence);
        }
        self.highest_delivered = self.highest_delivered.max(sequence);
    }
}

pub struct EventStreamProducer {
    subscription: String,
    store: Arc<dyn CursorStore>,
    delivery_buffer: usize,
    state: Mutex<ProducerState>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for EventStreamProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamProducer")
            .field("subscription", &self.subscription)
            .field("delivery_buffer", &self.delivery_buffer)
            .finish_non_exhaustive()
    }
}

impl EventStreamProducer {
    /// Open a subscription, resuming after its durable cursor
    pub fn open(
        subscription: impl Into<String>,
        store: Arc<dyn CursorStore>,
        delivery_buffer: usize,
    ) -> Result<Arc<Self>> {
        let subscription = subscription.into();
        let durable = store
            .load(&subscription)
            .map_err(|e| cursor_failure(&subscription, e))?;
        let acked = durable.unwrap_or(0);
        let next_sequence = acked.checked_add(1).ok_or_else(|| {
            SequencerError::sequence_gap(
                &subscription,
                format!("cursor at {acked} leaves no sequence space"),
            )
        })?;
        let (shutdown, _) = watch::channel(false);

        log_sequencing_operation("open", &subscription, durable, "running", None);

        Ok(Arc::new(Self {
            subscription,
            store,
            delivery_buffer: delivery_buffer.max(1),
            state: Mutex::new(ProducerState {
                pending: VecDeque::new(),
                next_sequence,
                acked,
                durable,
                connections: Vec::new(),
                active: None,
                status: ProducerStatus::Running,
                highest_delivered: acked,
                epoch: 0,
                stats: ProducerStats {
                    acknowledged: acked,
                    ..ProducerStats::default()
                },
            }),
            wake: Notify::new(),
            shutdown,
        }))
    }

    /// Open the subscription named in `config` with its delivery buffer
    pub fn from_config(config: &StreamConfig, store: Arc<dyn CursorStore>) -> Result<Arc<Self>> {
        Self::open(config.subscription.clone(), store, config.delivery_buffer)
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Last acknowledged sequence. The event source replays everything after it.
    pub fn resume_from(&self) -> u64 {
        self.state.lock().acked
    }

    pub fn status(&self) -> ProducerStatus {
        self.state.lock().status.clone()
    }

    pub fn stats(&self) -> ProducerStats {
        let state = self.state.lock();
        ProducerStats {
            acknowledged: state.acked,
            pending: state.pending.len(),
            connections: state.connections.len(),
            ..state.stats.clone()
        }
    }

    pub fn active_member(&self) -> Option<MemberId> {
        let state = self.state.lock();
        state
            .active
            .and_then(|id| state.slot(id))
            .map(|slot| slot.member.clone())
    }

    /// Append an event, assigning the next sequence number
    pub fn append(&self, batch: BroadcastBatch, additional_info: AdditionalInfo) -> Result<u64> {
        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;
        let sequence = state.next_sequence;
        self.push(&mut state, sequence, batch, additional_info)?;
        Ok(sequence)
    }

    /// Append an event whose position was fixed by the source (e.g. ledger order).
    ///
    /// Sequences at or below the known position are replays and ignored. A
    /// sequence beyond the next expected one faults the producer.
    pub fn append_sequenced(
        &self,
        sequence: u64,
        batch: BroadcastBatch,
        additional_info: AdditionalInfo,
    ) -> Result<AppendOutcome> {
        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;

        if sequence < state.next_sequence {
            return Ok(AppendOutcome::AlreadyKnown);
        }
        if sequence > state.next_sequence {
            let reason = format!(
                "expected sequence {}, source delivered {}",
                state.next_sequence, sequence
            );
            return Err(self.fault(&mut state, reason));
        }

        self.push(&mut state, sequence, batch, additional_info)?;
        Ok(AppendOutcome::Appended(sequence))
    }

    fn push(
        &self,
        state: &mut ProducerState,
        sequence: u64,
        batch: BroadcastBatch,
        additional_info: AdditionalInfo,
    ) -> Result<()> {
        let Some(next_sequence) = sequence.checked_add(1) else {
            return Err(self.fault(state, format!("sequence space exhausted at {sequence}")));
        };
        state.pending.push_back(SequencedEvent {
            sequence,
            batch,
            additional_info,
        });
        state.next_sequence = next_sequence;
        state.stats.appended += 1;
        self.wake.notify_one();
        Ok(())
    }

    fn ensure_accepting(&self, state: &ProducerState) -> Result<()> {
        match &state.status {
            ProducerStatus::Running => Ok(()),
            ProducerStatus::Faulted { reason } => {
                Err(SequencerError::sequence_gap(&self.subscription, reason.clone()))
            }
            ProducerStatus::Stopped => Err(SequencerError::ChannelClosed(format!(
                "producer for {} is stopped",
                self.subscription
            ))),
        }
    }

    /// Halt delivery and drop every connection so members observe the fault on reconnect
    fn fault(&self, state: &mut ProducerState, reason: String) -> SequencerError {
        log_error(
            "event_stream_producer",
            "sequence",
            &reason,
            Some(&self.subscription),
        );
        state.status = ProducerStatus::Faulted {
            reason: reason.clone(),
        };
        state.connections.clear();
        state.active = None;
        self.wake.notify_one();
        SequencerError::sequence_gap(&self.subscription, reason)
    }

    /// Attach a member connection. The first connection attached while no other
    /// is active becomes the delivery target.
    pub fn attach(self: &Arc<Self>, member: MemberId) -> Result<ProducerConnection> {
        let (sender, receiver) = mpsc::channel(self.delivery_buffer);
        let id = ConnectionId::new();

        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;
        let acked = state.acked;
        state.connections.push(ConnectionSlot {
            id,
            member: member.clone(),
            sender,
            delivered_upto: acked,
        });

        if state.active.is_none() {
            state.activate(id);
            log_sequencing_operation(
                "activate",
                &self.subscription,
                Some(acked),
                "active",
                Some(member.as_str()),
            );
            self.wake.notify_one();
        } else {
            debug!(
                subscription = %self.subscription,
                member = %member,
                connection_id = %id,
                "Connection attached as standby"
            );
        }

        Ok(ProducerConnection {
            id,
            member,
            receiver,
            producer: Arc::clone(self),
            detached: false,
        })
    }

    /// Remove a connection. Detaching the active connection promotes the next
    /// standby, which is replayed from the last acknowledged sequence.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.connections.iter().position(|slot| slot.id == id) else {
            return false;
        };
        let removed = state.connections.remove(index);

        if state.active == Some(id) {
            state.active = None;
            if let Some(next) = state.connections.first().map(|slot| slot.id) {
                state.activate(next);
                state.stats.failovers += 1;
                let member = state.slot(next).map(|slot| slot.member.to_string());
                log_sequencing_operation(
                    "failover",
                    &self.subscription,
                    Some(state.acked),
                    "active",
                    member.as_deref(),
                );
            } else {
                info!(
                    subscription = %self.subscription,
                    member = %removed.member,
                    acked = state.acked,
                    pending = state.pending.len(),
                    "Active connection detached; holding events until a member attaches"
                );
            }
            self.wake.notify_one();
        }
        true
    }

    /// Acknowledge every event up to and including `sequence` on behalf of `id`.
    ///
    /// Only sequences already delivered to that connection may be acknowledged.
    /// The durable cursor is advanced by compare-and-set outside the state lock
    /// and never moves backwards: a stored value already at or past `sequence`
    /// satisfies the acknowledgment without a write. Blocks on cursor store I/O.
    pub fn acknowledge(&self, id: ConnectionId, sequence: u64) -> Result<()> {
        let (mut expected, epoch) = {
            let state = self.state.lock();
            let delivered_upto = state
                .slot(id)
                .map(|slot| slot.delivered_upto)
                .ok_or_else(|| {
                    SequencerError::ProtocolViolation(format!(
                        "acknowledgment of {sequence} from unknown connection {id} on {}",
                        self.subscription
                    ))
                })?;
            if sequence > delivered_upto {
                return Err(SequencerError::ProtocolViolation(format!(
                    "connection {id} acknowledged {sequence} but was only delivered up to {delivered_upto}"
                )));
            }
            if sequence <= state.acked {
                return Ok(());
            }
            (state.durable, state.epoch)
        };

        for _ in 0..CURSOR_CAS_ATTEMPTS {
            if expected.is_some_and(|durable| durable >= sequence) {
                self.record_acknowledged(epoch, sequence, expected);
                return Ok(());
            }

            let swapped = self
                .store
                .compare_and_set(&self.subscription, expected, sequence)
                .map_err(|e| cursor_failure(&self.subscription, e))?;
            if swapped {
                self.record_acknowledged(epoch, sequence, Some(sequence));
                return Ok(());
            }

            let current = self
                .store
                .load(&self.subscription)
                .map_err(|e| cursor_failure(&self.subscription, e))?;
            if current.is_none() && expected.is_some() {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return Ok(());
                }
                let reason = format!("durable cursor lost (last persisted {expected:?})");
                return Err(self.fault(&mut state, reason));
            }
            warn!(
                subscription = %self.subscription,
                expected = ?expected,
                current = ?current,
                "Durable cursor changed underneath producer, retrying"
            );
            expected = current;
        }

        Err(SequencerError::CursorStore(format!(
            "cursor for {} kept changing during {CURSOR_CAS_ATTEMPTS} attempts",
            self.subscription
        )))
    }

    /// Apply a persisted acknowledgment to in-memory state, unless a
    /// resynchronization replaced that state meanwhile
    fn record_acknowledged(&self, epoch: u64, sequence: u64, durable: Option<u64>) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(
                subscription = %self.subscription,
                sequence,
                "Dropping acknowledgment from before resynchronization"
            );
            return;
        }
        state.durable = state.durable.max(durable);
        state.advance_acked(sequence);
    }

    /// Restart delivery after a fault from a position recovered out of band
    /// (typically the connector's canonical history). Discards in-memory events
    /// and rewrites the durable cursor to `from_sequence`, which is the one
    /// deliberate backwards move of the cursor.
    pub fn resynchronize(&self, from_sequence: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.status == ProducerStatus::Stopped {
            return self.ensure_accepting(&state);
        }
        let Some(next_sequence) = from_sequence.checked_add(1) else {
            let reason = format!("cannot resume after sequence {from_sequence}");
            return Err(self.fault(&mut state, reason));
        };

        let current = self
            .store
            .load(&self.subscription)
            .map_err(|e| cursor_failure(&self.subscription, e))?;
        if !self
            .store
            .compare_and_set(&self.subscription, current, from_sequence)
            .map_err(|e| cursor_failure(&self.subscription, e))?
        {
            return Err(SequencerError::CursorStore(format!(
                "cursor for {} changed during resynchronization",
                self.subscription
            )));
        }

        state.durable = Some(from_sequence);
        state.acked = from_sequence;
        state.next_sequence = next_sequence;
        state.highest_delivered = from_sequence;
        state.epoch += 1;
        state.pending.clear();
        state.status = ProducerStatus::Running;
        for slot in &mut state.connections {
            slot.delivered_upto = from_sequence;
        }

        warn!(
            subscription = %self.subscription,
            from_sequence,
            "Event stream resynchronized"
        );
        self.wake.notify_one();
        Ok(())
    }

    /// Spawn the dispatch task feeding the active connection
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let producer = Arc::clone(self);
        tokio::spawn(async move { producer.dispatch_loop().await })
    }

    /// Stop delivery and disconnect all members. Durable state is untouched.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let mut state = self.state.lock();
        state.status = ProducerStatus::Stopped;
        state.connections.clear();
        state.active = None;
        self.wake.notify_one();
        log_sequencing_operation(
            "shutdown",
            &self.subscription,
            Some(state.acked),
            "stopped",
            None,
        );
    }

    async fn dispatch_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        debug!(subscription = %self.subscription, "Dispatch loop started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let Some((id, sender)) = self.next_target() else {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            };

            tokio::select! {
                permit = sender.reserve() => match permit {
                    Ok(permit) => self.deliver(id, permit),
                    Err(_) => {
                        debug!(
                            subscription = %self.subscription,
                            connection_id = %id,
                            "Receiver dropped, detaching connection"
                        );
                        self.detach(id);
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        debug!(subscription = %self.subscription, "Dispatch loop stopped");
    }

    /// Active connection, when it is owed an event
    fn next_target(&self) -> Option<(ConnectionId, mpsc::Sender<SequencedEvent>)> {
        let state = self.state.lock();
        if state.status != ProducerStatus::Running {
            return None;
        }
        let slot = state.active.and_then(|id| state.slot(id))?;
        (slot.delivered_upto < state.next_sequence - 1).then(|| (slot.id, slot.sender.clone()))
    }

    /// Send the next owed event into reserved capacity.
    ///
    /// Delivery is recorded under the state lock before the event becomes
    /// visible, so the receiver can acknowledge it immediately.
    fn deliver(&self, id: ConnectionId, permit: mpsc::Permit<'_, SequencedEvent>) {
        let mut state = self.state.lock();
        if state.status != ProducerStatus::Running || state.active != Some(id) {
            return;
        }
        let acked = state.acked;
        let Some(delivered_upto) = state.slot(id).map(|slot| slot.delivered_upto) else {
            return;
        };
        // pending starts at acked + 1 and delivered_upto never falls below acked
        let Some(event) = delivered_upto
            .checked_sub(acked)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|index| state.pending.get(index))
            .cloned()
        else {
            return;
        };

        let sequence = event.sequence;
        if let Some(slot) = state.slot_mut(id) {
            slot.delivered_upto = sequence;
        }
        state.stats.delivered += 1;
        if sequence <= state.highest_delivered {
            state.stats.redelivered += 1;
        } else {
            state.highest_delivered = sequence;
        }
        permit.send(event);
    }
}

fn cursor_failure(subscription: &str, err: CursorError) -> SequencerError {
    match err {
        CursorError::Corrupt { .. } => SequencerError::sequence_gap(subscription, err.to_string()),
        CursorError::Io { .. } => err.into(),
    }
}

/// Member-side handle on an attached connection. Detaches on drop.
pub struct ProducerConnection {
    id: ConnectionId,
    member: MemberId,
    receiver: mpsc::Receiver<SequencedEvent>,
    producer: Arc<EventStreamProducer>,
    detached: bool,
}

impl fmt::Debug for ProducerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerConnection")
            .field("id", &self.id)
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}

impl ProducerConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// Next delivered event; `None` once the producer dropped this connection
    pub async fn next(&mut self) -> Option<SequencedEvent> {
        self.receiver.recv().await
    }

    pub fn acknowledge(&self, sequence: u64) -> Result<()> {
        self.producer.acknowledge(self.id, sequence)
    }

    /// Deliberate close. Takes the same failover path as a dropped connection.
    pub fn close(&mut self) {
        if !self.detached {
            self.detached = true;
            self.producer.detach(self.id);
        }
        self.receiver.close();
    }
}

impl Drop for ProducerConnection {
    fn drop(&mut self) {
        if !self.detached {
            self.producer.detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Bytes32, HexUuid};
    use crate::sequencing::cursor::InMemoryCursorStore;
    use std::time::Duration;
    use tokio::time::timeout;

    fn batch(n: u8) -> BroadcastBatch {
        BroadcastBatch::new(u64::from(n), HexUuid::from_content(&[n]), Bytes32::new([n; 32]))
    }

    fn producer(store: Arc<InMemoryCursorStore>) -> Arc<EventStreamProducer> {
        EventStreamProducer::open("sub", store, 8).unwrap()
    }

    async fn recv(conn: &mut ProducerConnection) -> u64 {
        timeout(Duration::from_secs(2), conn.next())
            .await
            .expect("delivery timed out")
            .expect("connection closed")
            .sequence
    }

    #[tokio::test]
    async fn test_only_active_connection_receives() {
        let producer = producer(Arc::new(InMemoryCursorStore::new()));
        let _task = producer.start();
        let mut first = producer.attach(MemberId::from("a")).unwrap();
        let mut second = producer.attach(MemberId::from("b")).unwrap();

        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut first).await, 1);
        assert!(timeout(Duration::from_millis(50), second.next()).await.is_err());
        assert_eq!(producer.active_member(), Some(MemberId::from("a")));
    }

    #[tokio::test]
    async fn test_failover_replays_unacknowledged() {
        let store = Arc::new(InMemoryCursorStore::new());
        let producer = producer(Arc::clone(&store));
        let _task = producer.start();
        let mut first = producer.attach(MemberId::from("a")).unwrap();
        let mut second = producer.attach(MemberId::from("b")).unwrap();

        for n in 1..=3 {
            producer.append(batch(n), AdditionalInfo::new()).unwrap();
        }
        assert_eq!(recv(&mut first).await, 1);
        first.acknowledge(1).unwrap();
        assert_eq!(recv(&mut first).await, 2);
        first.close();

        assert_eq!(recv(&mut second).await, 2);
        assert_eq!(recv(&mut second).await, 3);
        assert_eq!(store.load("sub").unwrap(), Some(1));

        let stats = producer.stats();
        assert_eq!(stats.failovers, 1);
        assert!(stats.redelivered >= 1);
    }

    #[tokio::test]
    async fn test_acknowledge_rules() {
        let producer = producer(Arc::new(InMemoryCursorStore::new()));
        let _task = producer.start();
        let mut active = producer.attach(MemberId::from("a")).unwrap();
        let standby = producer.attach(MemberId::from("b")).unwrap();

        assert!(matches!(
            active.acknowledge(1),
            Err(SequencerError::ProtocolViolation(_))
        ));
        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut active).await, 1);
        assert!(matches!(
            standby.acknowledge(1),
            Err(SequencerError::ProtocolViolation(_))
        ));
        assert!(matches!(
            active.acknowledge(5),
            Err(SequencerError::ProtocolViolation(_))
        ));
        active.acknowledge(1).unwrap();
        active.acknowledge(1).unwrap();
        assert_eq!(producer.resume_from(), 1);
        assert_eq!(producer.stats().pending, 0);
    }

    #[test]
    fn test_gap_faults_producer() {
        let producer = producer(Arc::new(InMemoryCursorStore::new()));
        assert_eq!(
            producer
                .append_sequenced(1, batch(1), AdditionalInfo::new())
                .unwrap(),
            AppendOutcome::Appended(1)
        );
        assert_eq!(
            producer
                .append_sequenced(1, batch(1), AdditionalInfo::new())
                .unwrap(),
            AppendOutcome::AlreadyKnown
        );

        let err = producer
            .append_sequenced(3, batch(3), AdditionalInfo::new())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));
        assert!(producer.attach(MemberId::from("a")).unwrap_err().is_fatal());

        producer.resynchronize(2).unwrap();
        assert_eq!(producer.status(), ProducerStatus::Running);
        assert_eq!(
            producer
                .append_sequenced(3, batch(3), AdditionalInfo::new())
                .unwrap(),
            AppendOutcome::Appended(3)
        );
    }

    #[tokio::test]
    async fn test_lost_cursor_is_surfaced() {
        let store = Arc::new(InMemoryCursorStore::new());
        let producer = producer(Arc::clone(&store));
        let _task = producer.start();
        let mut conn = producer.attach(MemberId::from("a")).unwrap();

        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        producer.append(batch(2), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 1);
        conn.acknowledge(1).unwrap();
        assert_eq!(recv(&mut conn).await, 2);

        store.forget("sub");
        let err = conn.acknowledge(2).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));
    }

    #[test]
    fn test_reopen_resumes_from_cursor() {
        let store = Arc::new(InMemoryCursorStore::new());
        store.compare_and_set("sub", None, 4).unwrap();

        let producer = producer(store);
        assert_eq!(producer.resume_from(), 4);
        assert_eq!(
            producer
                .append_sequenced(3, batch(3), AdditionalInfo::new())
                .unwrap(),
            AppendOutcome::AlreadyKnown
        );
        assert_eq!(producer.append(batch(5), AdditionalInfo::new()).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let store = Arc::new(InMemoryCursorStore::new());
        let producer = producer(Arc::clone(&store));
        let _task = producer.start();
        let mut conn = producer.attach(MemberId::from("a")).unwrap();

        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 1);
        // Another writer persisted a later position in the meantime
        assert!(store.compare_and_set("sub", None, 10).unwrap());

        conn.acknowledge(1).unwrap();
        assert_eq!(store.load("sub").unwrap(), Some(10));
        assert_eq!(producer.resume_from(), 1);
        assert_eq!(producer.stats().pending, 0);

        producer.append(batch(2), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 2);
        conn.acknowledge(2).unwrap();
        assert_eq!(store.load("sub").unwrap(), Some(10));
        assert_eq!(producer.resume_from(), 2);
    }

    #[tokio::test]
    async fn test_resynchronize_rewinds_cursor_and_resumes() {
        let store = Arc::new(InMemoryCursorStore::new());
        let producer = producer(Arc::clone(&store));
        let _task = producer.start();
        let mut conn = producer.attach(MemberId::from("a")).unwrap();

        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 1);
        conn.acknowledge(1).unwrap();

        producer.resynchronize(0).unwrap();
        assert_eq!(store.load("sub").unwrap(), Some(0));
        assert_eq!(producer.resume_from(), 0);
        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 1);
        conn.acknowledge(1).unwrap();
        assert_eq!(store.load("sub").unwrap(), Some(1));
    }

    /// Store that reads producer state while a cursor write is in progress
    #[derive(Default)]
    struct ObservingStore {
        inner: InMemoryCursorStore,
        producer: std::sync::OnceLock<std::sync::Weak<EventStreamProducer>>,
        observed: Mutex<Vec<u64>>,
    }

    impl CursorStore for ObservingStore {
        fn load(&self, subscription: &str) -> std::result::Result<Option<u64>, CursorError> {
            self.inner.load(subscription)
        }

        fn compare_and_set(
            &self,
            subscription: &str,
            expected: Option<u64>,
            new_value: u64,
        ) -> std::result::Result<bool, CursorError> {
            if let Some(producer) = self.producer.get().and_then(std::sync::Weak::upgrade) {
                self.observed.lock().push(producer.resume_from());
            }
            self.inner.compare_and_set(subscription, expected, new_value)
        }
    }

    #[tokio::test]
    async fn test_cursor_write_runs_outside_state_lock() {
        let store = Arc::new(ObservingStore::default());
        let producer = EventStreamProducer::open("sub", store.clone(), 8).unwrap();
        store.producer.set(Arc::downgrade(&producer)).unwrap();
        let _task = producer.start();
        let mut conn = producer.attach(MemberId::from("a")).unwrap();

        producer.append(batch(1), AdditionalInfo::new()).unwrap();
        assert_eq!(recv(&mut conn).await, 1);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let acking = Arc::clone(&producer);
        let id = conn.id();
        std::thread::spawn(move || {
            let _ = done_tx.send(acking.acknowledge(id, 1).is_ok());
        });
        let acked = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("acknowledge blocked while writing the cursor");

        assert!(acked);
        assert_eq!(*store.observed.lock(), vec![0]);
        assert_eq!(producer.resume_from(), 1);
    }

    #[test]
    fn test_sequence_space_exhaustion_faults() {
        let producer = producer(Arc::new(InMemoryCursorStore::new()));
        let err = producer.resynchronize(u64::MAX).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));

        producer.resynchronize(u64::MAX - 1).unwrap();
        let err = producer
            .append(batch(1), AdditionalInfo::new())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));
    }

    #[test]
    fn test_cursor_at_sequence_limit_is_rejected_on_open() {
        let store = Arc::new(InMemoryCursorStore::new());
        store.compare_and_set("sub", None, u64::MAX).unwrap();
        assert!(EventStreamProducer::open("sub", store, 8)
            .unwrap_err()
            .is_fatal());
    }

    #[test]
    fn test_from_config_uses_stream_settings() {
        let config = StreamConfig {
            subscription: "network-b".to_string(),
            delivery_buffer: 3,
            ..StreamConfig::default()
        };
        let producer =
            EventStreamProducer::from_config(&config, Arc::new(InMemoryCursorStore::new())).unwrap();
        assert_eq!(producer.subscription(), "network-b");
        assert_eq!(producer.delivery_buffer, 3);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_members() {
        let producer = producer(Arc::new(InMemoryCursorStore::new()));
        let task = producer.start();
        let mut conn = producer.attach(MemberId::from("a")).unwrap();

        producer.shutdown();
        assert!(timeout(Duration::from_secs(1), conn.next()).await.unwrap().is_none());
        task.await.unwrap();
        assert!(matches!(
            producer.append(batch(1), AdditionalInfo::new()),
            Err(SequencerError::ChannelClosed(_))
        ));
    }
}
