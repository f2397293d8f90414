//! # Stockroom Runtime
//!
//! The moving parts of the Stockroom inventory engine.
//!
//! ## Core Components
//!
//! - **Transactional executor** ([`executor`]): atomic, reentrant multi-statement
//!   execution at serializable isolation
//! - **Consistency engine** ([`engine`]): stock, reservation and sale operations
//!   enforcing the inventory invariants
//! - **Stock-query bridge** ([`bridge`]): answers asynchronous "how many in stock"
//!   queries over a message bus, with linear backoff ([`retry`])
//! - **Metrics** ([`metrics`]): Prometheus exporter and counters
//!
//! ## Example
//!
//! ```ignore
//! use stockroom_runtime::InventoryEngine;
//! use stockroom_core::{ExecCtx, OrderNumbering};
//!
//! let engine = InventoryEngine::new(store, OrderNumbering::default(), clock, metrics);
//! let ctx = ExecCtx::with_timeout(Duration::from_secs(5));
//!
//! let reservation = engine.make_reservation(&ctx, request).await?;
//! engine.finish_order(&ctx, reservation.order_number).await?;
//! ```

/// Stock-query consumer and reply producer
pub mod bridge;

/// Inventory consistency engine
pub mod engine;

/// Reentrant transactional executor
pub mod executor;

/// Prometheus metrics for observability
pub mod metrics;

/// Linear backoff for the stock-query consumer
pub mod retry;

pub use bridge::{BridgeHandle, StockLookup, StockQueryBridge};
pub use engine::InventoryEngine;
pub use executor::TransactionalExecutor;
pub use metrics::{MetricsServer, PrometheusInventoryMetrics};
pub use retry::BackoffPolicy;
