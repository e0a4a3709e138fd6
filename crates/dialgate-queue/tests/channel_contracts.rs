//! Contract tests for QueueChannel and QueueConsumer.
//!
//! Every backend runs the same behavioral checks: the in-memory broker and
//! the SurrealDB queue over an in-memory database. The file-backed
//! `surrealkv` engine gets a lifecycle smoke test.

use std::sync::Arc;
use std::time::Duration;

use dialgate_queue::{
    BrokerConfig, BrokerConnection, BrokerError, Connector, MemoryConnector, QueueChannel,
    QueueName, SurrealConnector,
};

fn queue(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

async fn memory_channel() -> Arc<dyn QueueChannel> {
    MemoryConnector::default().open_channel().await.unwrap()
}

async fn surreal_channel() -> Arc<dyn QueueChannel> {
    SurrealConnector::in_memory().open_channel().await.unwrap()
}

// ===========================================================================
// Contract bodies
// ===========================================================================

async fn send_requires_asserted_queue(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/amd");
    let err = channel.send(&q, b"{}").await.unwrap_err();
    assert!(matches!(err, BrokerError::QueueNotFound { .. }));

    channel.assert_queue(&q).await.unwrap();
    channel.assert_queue(&q).await.unwrap();
    channel.send(&q, b"{}").await.unwrap();
    assert_eq!(channel.pending_count(&q).await.unwrap(), 1);
}

async fn delivery_order_matches_send_order(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/status");
    channel.assert_queue(&q).await.unwrap();
    for body in ["a", "b", "c"] {
        channel.send(&q, body.as_bytes()).await.unwrap();
    }

    let mut consumer = channel.consume(&q).await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(consumer.next().await.unwrap().payload);
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

async fn unacked_message_stays_available(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/amd");
    channel.assert_queue(&q).await.unwrap();
    channel.send(&q, br#"{"callSid":"CA9"}"#).await.unwrap();

    let mut first = channel.consume(&q).await.unwrap();
    let skipped = first.next().await.unwrap();
    assert!(first.try_next().await.unwrap().is_none());

    let mut second = channel.consume(&q).await.unwrap();
    let again = second.next().await.unwrap();
    assert_eq!(again.message_id, skipped.message_id);
    assert_eq!(again.payload, skipped.payload);
    assert_eq!(channel.pending_count(&q).await.unwrap(), 1);
}

async fn ack_is_won_exactly_once(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/amd");
    channel.assert_queue(&q).await.unwrap();
    channel.send(&q, b"{}").await.unwrap();

    let mut a = channel.consume(&q).await.unwrap();
    let mut b = channel.consume(&q).await.unwrap();
    let da = a.next().await.unwrap();
    let db = b.next().await.unwrap();

    assert!(a.ack(&da).await.unwrap());
    assert!(!b.ack(&db).await.unwrap());
    assert_eq!(channel.pending_count(&q).await.unwrap(), 0);
}

async fn cancel_stops_delivery(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/status");
    channel.assert_queue(&q).await.unwrap();

    let mut consumer = channel.consume(&q).await.unwrap();
    assert_eq!(channel.consumer_count(&q).await.unwrap(), 1);

    let tag = consumer.tag().clone();
    channel.cancel(&tag).await.unwrap();
    assert_eq!(channel.consumer_count(&q).await.unwrap(), 0);

    channel.send(&q, b"{}").await.unwrap();
    let err = consumer.next().await.unwrap_err();
    assert!(matches!(err, BrokerError::ConsumerCanceled { .. }));

    // Cancel is idempotent.
    channel.cancel(&tag).await.unwrap();
}

async fn concurrent_sends_are_all_stored(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/status");
    let mut senders = tokio::task::JoinSet::new();
    for n in 0..40 {
        let channel = Arc::clone(&channel);
        let q = q.clone();
        senders.spawn(async move {
            channel.assert_queue(&q).await?;
            channel.send(&q, format!("{n}").as_bytes()).await
        });
    }
    while let Some(sent) = senders.join_next().await {
        sent.unwrap().unwrap();
    }
    assert_eq!(channel.pending_count(&q).await.unwrap(), 40);

    let mut consumer = channel.consume(&q).await.unwrap();
    let mut last_seq = 0;
    for _ in 0..40 {
        let delivery = consumer.next().await.unwrap();
        assert!(delivery.seq > last_seq);
        last_seq = delivery.seq;
    }
    assert!(consumer.try_next().await.unwrap().is_none());
}

async fn close_fails_waiting_consumer(channel: Arc<dyn QueueChannel>) {
    let q = queue("voice/amd");
    channel.assert_queue(&q).await.unwrap();
    let mut consumer = channel.consume(&q).await.unwrap();

    let waiter = tokio::spawn(async move { consumer.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    channel.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiting consumer must not hang after close")
        .unwrap();
    assert!(matches!(result, Err(BrokerError::ChannelClosed { .. })));
    assert!(!channel.is_open());
    assert!(channel.send(&q, b"{}").await.is_err());
}

// ===========================================================================
// Memory backend
// ===========================================================================

#[tokio::test]
async fn memory_send_requires_asserted_queue() {
    send_requires_asserted_queue(memory_channel().await).await;
}

#[tokio::test]
async fn memory_delivery_order_matches_send_order() {
    delivery_order_matches_send_order(memory_channel().await).await;
}

#[tokio::test]
async fn memory_unacked_message_stays_available() {
    unacked_message_stays_available(memory_channel().await).await;
}

#[tokio::test]
async fn memory_ack_is_won_exactly_once() {
    ack_is_won_exactly_once(memory_channel().await).await;
}

#[tokio::test]
async fn memory_cancel_stops_delivery() {
    cancel_stops_delivery(memory_channel().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_sends_are_all_stored() {
    concurrent_sends_are_all_stored(memory_channel().await).await;
}

#[tokio::test]
async fn memory_close_fails_waiting_consumer() {
    close_fails_waiting_consumer(memory_channel().await).await;
}

// ===========================================================================
// SurrealDB backend
// ===========================================================================

#[tokio::test]
async fn surreal_send_requires_asserted_queue() {
    send_requires_asserted_queue(surreal_channel().await).await;
}

#[tokio::test]
async fn surreal_delivery_order_matches_send_order() {
    delivery_order_matches_send_order(surreal_channel().await).await;
}

#[tokio::test]
async fn surreal_unacked_message_stays_available() {
    unacked_message_stays_available(surreal_channel().await).await;
}

#[tokio::test]
async fn surreal_ack_is_won_exactly_once() {
    ack_is_won_exactly_once(surreal_channel().await).await;
}

#[tokio::test]
async fn surreal_cancel_stops_delivery() {
    cancel_stops_delivery(surreal_channel().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_concurrent_sends_are_all_stored() {
    concurrent_sends_are_all_stored(surreal_channel().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_publish_and_consume_channels_send_concurrently() {
    let connector = SurrealConnector::in_memory();
    let first = connector.open_channel().await.unwrap();
    let second = connector.open_channel().await.unwrap();
    let q = queue("voice/amd");

    let mut senders = tokio::task::JoinSet::new();
    for n in 0..20 {
        let channel = if n % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        let q = q.clone();
        senders.spawn(async move {
            channel.assert_queue(&q).await?;
            channel.send(&q, b"{}").await
        });
    }
    while let Some(sent) = senders.join_next().await {
        sent.unwrap().unwrap();
    }
    assert_eq!(first.pending_count(&q).await.unwrap(), 20);
}

#[tokio::test]
async fn surreal_close_fails_waiting_consumer() {
    close_fails_waiting_consumer(surreal_channel().await).await;
}

#[tokio::test]
async fn surreal_channels_share_one_database() {
    let connector = SurrealConnector::in_memory();
    let publish = connector.open_channel().await.unwrap();
    let consume = connector.open_channel().await.unwrap();
    let q = queue("voice/status");

    publish.assert_queue(&q).await.unwrap();
    let mut consumer = consume.consume(&q).await.unwrap();
    publish.send(&q, br#"{"callSid":"CA1"}"#).await.unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(2), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.payload, br#"{"callSid":"CA1"}"#.to_vec());
}

#[tokio::test]
async fn surrealkv_messages_survive_channel_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("surrealkv://{}", dir.path().join("queues").display());
    let connection = BrokerConnection::from_config(&BrokerConfig::new(url))
        .await
        .unwrap();
    let q = queue("voice/amd");

    let publish = connection.publish_channel().await.unwrap();
    publish.assert_queue(&q).await.unwrap();
    publish.send(&q, br#"{"callSid":"CA1"}"#).await.unwrap();
    publish.close().await.unwrap();

    let consume = connection.consume_channel().await.unwrap();
    let mut consumer = consume.consume(&q).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(2), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.payload, br#"{"callSid":"CA1"}"#.to_vec());
    assert!(consumer.ack(&delivery).await.unwrap());

    let reopened = connection.publish_channel().await.unwrap();
    assert_ne!(reopened.id(), publish.id());
    assert_eq!(reopened.pending_count(&q).await.unwrap(), 0);
    connection.close().await.unwrap();
}
