//! Query topic consumer.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use stockroom_core::bus::{BusError, QueryMessage, QuerySource};

/// Default offset reset policy for a new consumer group.
pub const DEFAULT_AUTO_OFFSET_RESET: &str = "earliest";

/// Kafka consumer of stock queries with manual offset commits.
///
/// `fetch` never reports the source as exhausted; the bridge stops it through its
/// shutdown signal.
pub struct KafkaQuerySource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaQuerySource {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> KafkaQuerySourceBuilder {
        KafkaQuerySourceBuilder::default()
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for a [`KafkaQuerySource`].
#[derive(Default)]
pub struct KafkaQuerySourceBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl KafkaQuerySourceBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic to read queries from.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Consumer group ID.
    ///
    /// Default: `stockroom-<topic>`.
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Where a new consumer group starts reading (`"earliest"`, `"latest"`).
    ///
    /// Default: [`DEFAULT_AUTO_OFFSET_RESET`].
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Create the consumer and subscribe it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers or topic are missing, or the
    /// consumer cannot be created or subscribed.
    pub fn build(self) -> Result<KafkaQuerySource, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BusError::ConnectionFailed("Query topic not configured".to_string()))?;
        let group = self
            .consumer_group
            .unwrap_or_else(|| format!("stockroom-{topic}"));
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_AUTO_OFFSET_RESET.to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer.subscribe(&[topic.as_str()]).map_err(|e| {
            BusError::ConnectionFailed(format!("Failed to subscribe to '{topic}': {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %group,
            auto_offset_reset = %auto_offset_reset,
            manual_commit = true,
            "Query source subscribed"
        );

        Ok(KafkaQuerySource { consumer, topic })
    }
}

impl QuerySource for KafkaQuerySource {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Option<QueryMessage>, BusError>> + Send + '_>> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| BusError::ReceiveFailed(e.to_string()))?;

            let query = QueryMessage {
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };
            tracing::trace!(
                topic = %query.topic,
                partition = query.partition,
                offset = query.offset,
                "Received stock query"
            );
            Ok(Some(query))
        })
    }

    fn ack<'a>(
        &'a self,
        message: &'a QueryMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        Box::pin(async move {
            let ack_failed = |reason: String| BusError::AckFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason,
            };

            // The committed offset is the next one to read.
            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(
                    &message.topic,
                    message.partition,
                    Offset::Offset(message.offset + 1),
                )
                .map_err(|e| ack_failed(e.to_string()))?;

            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| ack_failed(e.to_string()))
        })
    }
}
