//! Integration tests for the Kafka query source and reply sink.
//!
//! These tests use testcontainers to start a real Kafka broker and validate:
//! - Query fetch and reply publish through the stock-query bridge
//! - Acknowledged offsets are not redelivered to the same consumer group
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take a while to start Kafka:
//! ```bash
//! cargo test -p stockroom-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used)]
#![allow(clippy::panic)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use stockroom_core::bus::QuerySource;
use stockroom_core::{ArticleCode, OrderNumbering, StockCountReply};
use stockroom_redpanda::{KafkaQuerySource, KafkaReplySink};
use stockroom_runtime::{InventoryEngine, StockQueryBridge};
use stockroom_testing::{test_clock, InMemoryInventoryStore, RecordingMetrics};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio::sync::broadcast;

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn producer(brokers: &str) -> FutureProducer {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()
        .expect("Failed to create producer")
}

/// Publish raw queries, retrying until the topic has been auto-created.
async fn send_queries(brokers: &str, topic: &str, payloads: &[&str]) {
    let producer = producer(brokers);
    for payload in payloads {
        let mut delivered = false;
        for _ in 0..50 {
            let record: FutureRecord<'_, (), str> = FutureRecord::to(topic).payload(*payload);
            if producer
                .send(record, Timeout::After(Duration::from_secs(5)))
                .await
                .is_ok()
            {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(delivered, "Failed to publish query {payload}");
    }
}

/// Read `count` replies from `topic`.
async fn read_replies(brokers: &str, topic: &str, count: usize) -> Vec<StockCountReply> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", "reply-reader")
        .set("auto.offset.reset", "earliest")
        .create()
        .expect("Failed to create reply consumer");
    consumer.subscribe(&[topic]).expect("Failed to subscribe");

    let mut replies = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while replies.len() < count {
            let message = consumer.recv().await.expect("Failed to receive reply");
            let payload = message.payload().expect("Reply without payload");
            replies.push(serde_json::from_slice(payload).expect("Reply is not JSON"));
        }
    })
    .await
    .expect("Timed out waiting for replies");
    replies
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_bridge_answers_over_kafka() {
    let (_kafka, brokers) = start_kafka().await;
    send_queries(&brokers, "stock-queries", &["W1", "BAD..999", "GHOST"]).await;

    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed_stock(&ArticleCode::new("W1").unwrap(), "Widget", 100, 7);
    let engine = InventoryEngine::new(
        store,
        OrderNumbering::default(),
        Arc::new(test_clock()),
        Arc::new(RecordingMetrics::default()),
    );

    let source = KafkaQuerySource::builder()
        .brokers(&brokers)
        .topic("stock-queries")
        .consumer_group("bridge-test")
        .build()
        .expect("Failed to create source");
    let sink = KafkaReplySink::builder()
        .brokers(&brokers)
        .topic("stock-replies")
        .build()
        .expect("Failed to create sink");

    let (shutdown, _) = broadcast::channel(1);
    let handle = StockQueryBridge::new("store-1").spawn(
        Arc::new(engine),
        Arc::new(source),
        Arc::new(sink),
        &shutdown,
    );

    let replies = read_replies(&brokers, "stock-replies", 2).await;
    shutdown.send(()).unwrap();
    handle.join().await;

    let expected = |article: &str, count| StockCountReply {
        instance: "store-1".to_string(),
        article: article.to_string(),
        count,
    };
    assert_eq!(replies, vec![expected("W1", 7), expected("GHOST", 0)]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_acked_queries_are_not_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    send_queries(&brokers, "ack-queries", &["FIRST", "SECOND"]).await;

    let build = || {
        KafkaQuerySource::builder()
            .brokers(&brokers)
            .topic("ack-queries")
            .consumer_group("ack-test")
            .build()
            .expect("Failed to create source")
    };

    let first = {
        let source = build();
        let message = source.fetch().await.unwrap().expect("message");
        source.ack(&message).await.unwrap();
        // let the async commit reach the broker before the consumer closes
        tokio::time::sleep(Duration::from_secs(2)).await;
        message
    };
    assert_eq!(first.payload_str(), Some("FIRST"));

    let source = build();
    let next = tokio::time::timeout(Duration::from_secs(30), source.fetch())
        .await
        .expect("Timed out waiting for redelivery")
        .unwrap()
        .expect("message");
    assert_eq!(next.payload_str(), Some("SECOND"));
    assert_eq!(next.offset, first.offset + 1);
}
