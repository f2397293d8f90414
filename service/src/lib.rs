//! Stockroom inventory service.
//!
//! Wires the consistency engine to `PostgreSQL`, the Prometheus exporter and the
//! Kafka stock-query bridge. See `main.rs` for the startup sequence.

pub mod config;

pub use config::{Config, ConfigError};
