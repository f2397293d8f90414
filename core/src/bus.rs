//! Message-bus seams of the stock-query bridge.
//!
//! ```text
//!  query topic ──► QuerySource ──► bridge consumer ──► engine (stock amount)
//!                                        │
//!                                        ▼
//!  reply topic ◄── ReplySink   ◄── bridge producer
//! ```
//!
//! Acknowledgement is explicit: a message that is fetched but never acked is
//! delivered again after a restart, so the consumer only acks once it has either
//! answered the query or decided it can never be answered.
//!
//! # Implementations
//!
//! - `KafkaQuerySource` / `KafkaReplySink` (in `stockroom-redpanda`)
//! - `InMemoryQuerySource` / `InMemoryReplySink` (in `stockroom-testing`)

use crate::types::StockCountReply;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur on the message bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the brokers.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to receive the next message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to commit a consumed offset.
    #[error("Acknowledge failed for {topic}/{partition}@{offset}: {reason}")]
    AckFailed {
        /// Topic of the message.
        topic: String,
        /// Partition of the message.
        partition: i32,
        /// Offset of the message.
        offset: i64,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to publish a reply.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to serialize a reply.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

/// One inbound stock-quantity query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryMessage {
    /// Raw payload, expected to be an article code.
    pub payload: Vec<u8>,
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl QueryMessage {
    /// Payload as text, `None` when it is not UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Inbound side of the bridge.
pub trait QuerySource: Send + Sync {
    /// Wait for the next query. `Ok(None)` means the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ReceiveFailed`] if the broker reports an error.
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Option<QueryMessage>, BusError>> + Send + '_>>;

    /// Mark `message` as processed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AckFailed`] if the offset cannot be committed.
    fn ack<'a>(
        &'a self,
        message: &'a QueryMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>>;
}

/// Outbound side of the bridge.
pub trait ReplySink: Send + Sync {
    /// Publish one reply.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] or [`BusError::SerializationFailed`].
    fn publish<'a>(
        &'a self,
        reply: &'a StockCountReply,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>>;
}
