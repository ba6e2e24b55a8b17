//! Bus integration tests. Require a JetStream-enabled NATS server
//! (`NOTIF__BUS__URL`, default nats://localhost:4222).

use std::time::Duration;

use futures::StreamExt;
use notif_hub::bus::{AckMode, BusClient, BusError, ConsumerSpec, StartPosition, StreamSpec};
use uuid::Uuid;

async fn connect() -> BusClient {
    let url = std::env::var("NOTIF__BUS__URL")
        .unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let client = async_nats::connect(&url).await.expect("NATS must be running");
    BusClient::new(client)
}

/// Unique stream name and subject prefix per test run.
fn scope() -> (String, String) {
    let tag = Uuid::new_v4().simple().to_string();
    (format!("T_{}", &tag[..12]).to_uppercase(), format!("t{}", &tag[..12]))
}

#[tokio::test]
#[ignore = "requires NATS with JetStream"]
async fn test_publish_assigns_increasing_sequences() {
    let bus = connect().await;
    let (stream, prefix) = scope();

    bus.ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .unwrap();

    let first = bus.publish(&format!("{}.a", prefix), b"one").await.unwrap();
    let second = bus.publish(&format!("{}.a", prefix), b"two").await.unwrap();
    assert!(second > first);

    let stored = bus.get_by_seq(&stream, first).await.unwrap();
    assert_eq!(stored.payload, b"one");
    assert_eq!(stored.subject, format!("{}.a", prefix));
}

#[tokio::test]
#[ignore = "requires NATS with JetStream"]
async fn test_stream_overlap_detected() {
    let bus = connect().await;
    let (stream, prefix) = scope();

    bus.ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .unwrap();

    // A second stream over an overlapping subject is refused with the
    // conflicting stream's name
    let conflicting = StreamSpec::new(
        &format!("{}_B", stream),
        vec![format!("{}.x.*", prefix)],
    );
    match bus.ensure_stream(&conflicting).await {
        Err(BusError::StreamOverlap { existing, .. }) => assert_eq!(existing, stream),
        other => panic!("expected StreamOverlap, got {:?}", other.map(|_| ())),
    }

    // Re-ensuring the same stream is fine
    assert!(bus
        .ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .is_ok());
}

#[tokio::test]
#[ignore = "requires NATS with JetStream"]
async fn test_consume_ack_and_redelivery() {
    let bus = connect().await;
    let (stream, prefix) = scope();

    bus.ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .unwrap();

    bus.publish(&format!("{}.orders", prefix), br#"{"n":1}"#)
        .await
        .unwrap();

    let spec = ConsumerSpec::new(vec![format!("{}.>", prefix)])
        .durable("it-consumer")
        .ack_mode(AckMode::Explicit)
        .ack_wait(Duration::from_secs(1));

    let consumer = bus.consumer(&stream, &spec).await.unwrap();
    let mut messages = consumer.messages().await.unwrap();

    // First delivery, nak with no delay for immediate redelivery
    let msg = messages.next().await.unwrap().unwrap();
    assert_eq!(msg.num_delivered(), 1);
    msg.nak(None).await.unwrap();

    let redelivered = tokio::time::timeout(Duration::from_secs(5), messages.next())
        .await
        .expect("redelivery expected")
        .unwrap()
        .unwrap();
    assert!(redelivered.num_delivered() >= 2);
    redelivered.ack().await.unwrap();
}

#[tokio::test]
#[ignore = "requires NATS with JetStream"]
async fn test_term_stops_redelivery() {
    let bus = connect().await;
    let (stream, prefix) = scope();

    bus.ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .unwrap();
    bus.publish(&format!("{}.bad", prefix), b"unparseable")
        .await
        .unwrap();

    let spec = ConsumerSpec::new(vec![format!("{}.>", prefix)])
        .durable("term-consumer")
        .ack_wait(Duration::from_secs(1));

    let consumer = bus.consumer(&stream, &spec).await.unwrap();
    let mut messages = consumer.messages().await.unwrap();

    let msg = messages.next().await.unwrap().unwrap();
    msg.term().await.unwrap();

    // No redelivery should arrive
    let next = tokio::time::timeout(Duration::from_secs(3), messages.next()).await;
    assert!(next.is_err(), "terminated message must not redeliver");
}

#[tokio::test]
#[ignore = "requires NATS with JetStream"]
async fn test_query_range_and_start_position() {
    let bus = connect().await;
    let (stream, prefix) = scope();

    bus.ensure_stream(&StreamSpec::new(&stream, vec![format!("{}.>", prefix)]))
        .await
        .unwrap();

    for i in 0..5 {
        bus.publish(&format!("{}.seq", prefix), format!("{}", i).as_bytes())
            .await
            .unwrap();
    }

    let from = chrono::Utc::now() - chrono::Duration::minutes(1);
    let stored = bus
        .query_range(&stream, &format!("{}.>", prefix), from, None, 10)
        .await
        .unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.windows(2).all(|w| w[0].sequence < w[1].sequence));

    // A New-position consumer sees only later publishes
    let spec = ConsumerSpec::new(vec![format!("{}.>", prefix)])
        .durable("new-consumer")
        .start(StartPosition::New);
    let consumer = bus.consumer(&stream, &spec).await.unwrap();
    let mut messages = consumer.messages().await.unwrap();

    bus.publish(&format!("{}.seq", prefix), b"later").await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), messages.next())
        .await
        .expect("delivery expected")
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload(), b"later");
    msg.ack().await.unwrap();
}
