mod common;

use broadcast_sequencer::broadcast::ProcessedBatchLedger;
use broadcast_sequencer::connectors::{InMemoryConnector, InMemoryLedger};
use broadcast_sequencer::events::{EngineNotification, PublishedNotification};
use broadcast_sequencer::sequencing::{
    DeliveryHandler, FileCursorStore, InMemoryCursorStore, LocalTransport, MemberId, ProducerStatus,
    SequencedEvent, StreamConsumer,
};
use broadcast_sequencer::{AdditionalInfo, OrchestrationEngine};
use common::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

fn first_occurrences(sequences: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let mut seen = HashSet::new();
    sequences.into_iter().filter(|s| seen.insert(*s)).collect()
}

/// Sequences of the batches an engine reported as applied, in publication order
fn applied_sequences(notifications: &mut broadcast::Receiver<PublishedNotification>) -> Vec<u64> {
    let mut sequences = Vec::new();
    while let Ok(published) = notifications.try_recv() {
        if let EngineNotification::BatchSequenced {
            sequence: Some(sequence),
            ..
        } = published.notification
        {
            sequences.push(sequence);
        }
    }
    sequences
}

fn consumer(
    member: &str,
    transport: &Arc<LocalTransport>,
    handler: &Arc<RecordingHandler>,
) -> Arc<StreamConsumer> {
    StreamConsumer::new(
        MemberId::from(member),
        transport.clone(),
        handler.clone(),
        fast_backoff(),
    )
}

#[tokio::test]
async fn test_order_preserved_across_warm_handoff() {
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));

    let first = RecordingHandler::new();
    let second = RecordingHandler::new();
    let member_a = consumer("member-a", &transport, &first);
    let task_a = member_a.start();
    wait_until("member-a active", || async {
        producer.active_member() == Some(MemberId::from("member-a"))
    })
    .await;
    let member_b = consumer("member-b", &transport, &second);
    let task_b = member_b.start();
    wait_until("member-b standby", || async { producer.stats().connections == 2 }).await;

    for n in 1..=5 {
        producer.append(batch(n), AdditionalInfo::new()).unwrap();
    }
    wait_until("first events", || async { first.count() >= 3 }).await;

    // Planned shutdown takes the failover path
    member_a.shutdown();
    task_a.await.unwrap().unwrap();
    for n in 6..=10 {
        producer.append(batch(n), AdditionalInfo::new()).unwrap();
    }
    wait_until("handoff complete", || async {
        first_occurrences(first.sequences().into_iter().chain(second.sequences())).len() == 10
    })
    .await;

    let combined = first_occurrences(first.sequences().into_iter().chain(second.sequences()));
    assert_eq!(combined, (1..=10).collect::<Vec<_>>());

    let replayed = second.sequences();
    assert!(replayed.windows(2).all(|w| w[1] == w[0] + 1));
    assert!(replayed[0] <= *first.sequences().last().unwrap() + 1);
    assert_eq!(producer.active_member(), Some(MemberId::from("member-b")));
    assert_eq!(producer.stats().failovers, 1);

    member_b.shutdown();
    task_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_events_held_while_no_member_attached() {
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));

    for n in 1..=3 {
        producer.append(batch(n), AdditionalInfo::new()).unwrap();
    }
    assert_eq!(producer.stats().pending, 3);

    let handler = RecordingHandler::new();
    let member = consumer("late-member", &transport, &handler);
    let task = member.start();
    wait_until("held events delivered", || async { handler.count() == 3 }).await;
    wait_until("acknowledged", || async { producer.resume_from() == 3 }).await;

    assert_eq!(handler.sequences(), vec![1, 2, 3]);
    assert_eq!(producer.stats().pending, 0);
    member.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_producer_restart_replays_from_durable_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = InMemoryLedger::new();
    for n in 1..=5 {
        ledger.pin("0xSender", &batch(n)).await.unwrap();
    }

    let store = Arc::new(FileCursorStore::open(dir.path()).unwrap());
    let producer = stream_producer(store);
    let dispatch = producer.start();
    assert_eq!(ledger.attach_stream(Arc::clone(&producer)).await.unwrap(), 5);

    let handler = RecordingHandler::new();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));
    let member = consumer("member-a", &transport, &handler);
    let task = member.start();
    wait_until("acknowledged", || async { producer.resume_from() == 5 }).await;
    member.shutdown();
    task.await.unwrap().unwrap();

    // Producer goes away; the chain keeps moving
    producer.shutdown();
    dispatch.await.unwrap();
    ledger.detach_stream(&producer).await;
    for n in 6..=7 {
        ledger.pin("0xSender", &batch(n)).await.unwrap();
    }

    let store = Arc::new(FileCursorStore::open(dir.path()).unwrap());
    let restarted = stream_producer(store);
    assert_eq!(restarted.resume_from(), 5);
    let _dispatch = restarted.start();
    assert_eq!(ledger.attach_stream(Arc::clone(&restarted)).await.unwrap(), 2);

    let after = RecordingHandler::new();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&restarted)));
    let member = consumer("member-b", &transport, &after);
    let task = member.start();
    wait_until("replay", || async { after.count() == 2 }).await;

    assert_eq!(handler.sequences(), vec![1, 2, 3, 4, 5]);
    assert_eq!(after.sequences(), vec![6, 7]);
    member.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_member_reconnects_with_backoff() {
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));
    transport.set_available(false);

    let handler = RecordingHandler::new();
    let member = consumer("member-a", &transport, &handler);
    let task = member.start();
    producer.append(batch(1), AdditionalInfo::new()).unwrap();
    wait_until("connect failures", || async { member.stats().connect_failures >= 2 }).await;
    assert_eq!(handler.count(), 0);

    transport.set_available(true);
    wait_until("delivery after reconnect", || async { handler.count() == 1 }).await;
    assert_eq!(member.stats().connects, 1);

    member.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sequence_gap_is_surfaced_until_resynchronized() {
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));

    producer
        .append_sequenced(1, batch(1), AdditionalInfo::new())
        .unwrap();
    let err = producer
        .append_sequenced(3, batch(3), AdditionalInfo::new())
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));

    let handler = RecordingHandler::new();
    let member = consumer("member-a", &transport, &handler);
    let fatal = member.start().await.unwrap().unwrap_err();
    assert!(fatal.is_fatal());
    assert_eq!(handler.count(), 0);

    // Recovered out of band: everything through 2 is accounted for
    producer.resynchronize(2).unwrap();
    producer
        .append_sequenced(3, batch(3), AdditionalInfo::new())
        .unwrap();
    let member = consumer("member-a", &transport, &handler);
    let task = member.start();
    wait_until("delivery after resync", || async { handler.count() == 1 }).await;
    assert_eq!(handler.sequences(), vec![3]);

    member.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lost_cursor_stops_member_with_fatal_error() {
    let store = Arc::new(InMemoryCursorStore::new());
    let producer = stream_producer(store.clone());
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));

    let handler = RecordingHandler::new();
    let member = consumer("member-a", &transport, &handler);
    let task = member.start();
    producer.append(batch(1), AdditionalInfo::new()).unwrap();
    wait_until("first ack", || async { producer.resume_from() == 1 }).await;

    store.forget("network-a");
    producer.append(batch(2), AdditionalInfo::new()).unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(producer.status(), ProducerStatus::Faulted { .. }));
}

#[tokio::test]
async fn test_engine_applies_stream_deliveries_once() {
    let ledger = InMemoryLedger::new();
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let connector = InMemoryConnector::new("node", Arc::clone(&ledger))
        .with_event_stream(Arc::clone(&producer));
    let engine = OrchestrationEngine::new(test_config(), Arc::new(connector));
    engine.init().await.unwrap();

    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));
    engine
        .join_stream(MemberId::from("member-a"), transport)
        .unwrap();

    for n in 1..=3 {
        engine
            .submit_broadcast_batch("0xSender", &batch(n))
            .await
            .unwrap();
    }
    // The same batch arriving again from the chain is a replay, not a new effect
    engine
        .delivery_handler()
        .handle_delivery(&SequencedEvent {
            sequence: 1,
            batch: batch(1),
            additional_info: AdditionalInfo::new(),
        })
        .await
        .unwrap();

    wait_until("stream applied", || async { engine.ledger().len() == 3 }).await;
    wait_until("acknowledged", || async { producer.resume_from() == 3 }).await;
    let stats = engine.dispatch_stats();
    assert_eq!(stats.batches_applied, 3);
    assert_eq!(stats.duplicate_batches, 1);
    assert_eq!(engine.ledger().get(&batch(2).batch_id).unwrap().sequence, Some(2));

    engine.shutdown().await;
    assert_eq!(producer.active_member(), None);
}

#[tokio::test]
async fn test_cluster_engines_apply_each_batch_once_across_failover() {
    let ledger = InMemoryLedger::new();
    let producer = stream_producer(Arc::new(InMemoryCursorStore::new()));
    let _dispatch = producer.start();
    let transport = Arc::new(LocalTransport::new(Arc::clone(&producer)));
    let applied = Arc::new(ProcessedBatchLedger::new());

    let member_engine = |name: &str| {
        let connector = InMemoryConnector::new(name, Arc::clone(&ledger))
            .with_event_stream(Arc::clone(&producer));
        OrchestrationEngine::with_ledger(test_config(), Arc::new(connector), Arc::clone(&applied))
    };
    let engine_a = member_engine("member-a");
    let engine_b = member_engine("member-b");
    engine_a.init().await.unwrap();
    engine_b.init().await.unwrap();
    let mut notifications_a = engine_a.subscribe();
    let mut notifications_b = engine_b.subscribe();

    engine_a
        .join_stream(MemberId::from("member-a"), transport.clone())
        .unwrap();
    wait_until("member-a active", || async {
        producer.active_member() == Some(MemberId::from("member-a"))
    })
    .await;
    engine_b
        .join_stream(MemberId::from("member-b"), transport.clone())
        .unwrap();
    wait_until("member-b standby", || async { producer.stats().connections == 2 }).await;

    for n in 1..=5 {
        ledger.pin("0xSender", &batch(n)).await.unwrap();
    }
    wait_until("member-a applying", || async { applied.len() >= 3 }).await;

    // Member A leaves mid-stream; B is replayed everything A did not acknowledge
    engine_a.shutdown().await;
    for n in 6..=10 {
        ledger.pin("0xSender", &batch(n)).await.unwrap();
    }
    wait_until("all batches applied", || async { applied.len() == 10 }).await;
    wait_until("all acknowledged", || async { producer.resume_from() == 10 }).await;

    let mut sequences = applied_sequences(&mut notifications_a);
    sequences.extend(applied_sequences(&mut notifications_b));
    assert_eq!(sequences, (1..=10).collect::<Vec<u64>>());

    let stats_a = engine_a.dispatch_stats();
    let stats_b = engine_b.dispatch_stats();
    assert_eq!(stats_a.batches_applied + stats_b.batches_applied, 10);
    for n in 1..=10u8 {
        assert_eq!(
            applied.get(&batch(n).batch_id).unwrap().sequence,
            Some(u64::from(n))
        );
    }

    engine_b.shutdown().await;
}
