//! Redpanda transport for the Stockroom stock-query bridge.
//!
//! This crate implements the bridge's [`QuerySource`](stockroom_core::bus::QuerySource)
//! and [`ReplySink`](stockroom_core::bus::ReplySink) with rdkafka, so it works against
//! Redpanda or any other Kafka-compatible broker.
//!
//! # Topics
//!
//! ```text
//!  query topic  (payload: raw article code)
//!        │
//!        ▼
//!  KafkaQuerySource ──► bridge ──► KafkaReplySink
//!                                        │
//!                                        ▼
//!  reply topic  (key: article, payload: {"instance","article","count"})
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Auto-commit is disabled; [`QuerySource::ack`](stockroom_core::bus::QuerySource::ack)
//!   commits the offset after the message
//! - A query fetched but not acked before a crash is delivered again
//! - Replies are keyed by article, so replies for one article keep their order
//!
//! # Example
//!
//! ```no_run
//! use stockroom_redpanda::{KafkaQuerySource, KafkaReplySink};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = KafkaQuerySource::builder()
//!     .brokers("localhost:9092")
//!     .topic("stock-queries")
//!     .consumer_group("stockroom-store-1")
//!     .build()?;
//! let sink = KafkaReplySink::builder()
//!     .brokers("localhost:9092")
//!     .topic("stock-replies")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sink;
pub mod source;

pub use sink::{KafkaReplySink, KafkaReplySinkBuilder};
pub use source::{KafkaQuerySource, KafkaQuerySourceBuilder};
