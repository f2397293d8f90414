//! Reply topic producer.

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use stockroom_core::bus::{BusError, ReplySink};
use stockroom_core::types::StockCountReply;

/// Default producer send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer of stock-count replies.
///
/// Each reply is a JSON object keyed by its article code.
pub struct KafkaReplySink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaReplySink {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> KafkaReplySinkBuilder {
        KafkaReplySinkBuilder::default()
    }

    /// Destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for a [`KafkaReplySink`].
#[derive(Default)]
pub struct KafkaReplySinkBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
}

impl KafkaReplySinkBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic replies are published to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Send timeout.
    ///
    /// Default: [`DEFAULT_SEND_TIMEOUT`]
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers or topic are missing, or the
    /// producer cannot be created.
    pub fn build(self) -> Result<KafkaReplySink, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BusError::ConnectionFailed("Reply topic not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("1");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, topic = %topic, acks, "Reply sink created");

        Ok(KafkaReplySink {
            producer,
            topic,
            timeout,
        })
    }
}

impl ReplySink for KafkaReplySink {
    fn publish<'a>(
        &'a self,
        reply: &'a StockCountReply,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(reply)
                .map_err(|e| BusError::SerializationFailed(e.to_string()))?;

            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(reply.article.as_str());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        article = %reply.article,
                        "Stock reply delivered"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => Err(BusError::PublishFailed {
                    topic: self.topic.clone(),
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }
}
