//! Prometheus metrics for observability and monitoring.
//!
//! Covers the business counters of the consistency engine and the health of the
//! stock-query bridge.
//!
//! # Example
//!
//! ```rust,no_run
//! use stockroom_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use stockroom_core::error::ErrorKind;
use stockroom_core::metrics::InventoryMetrics;
use thiserror::Error;

/// Reservations canceled.
pub const ORDERS_CANCELED: &str = "stockroom_orders_canceled_total";
/// Local-pickup reservations placed.
pub const LOCAL_ORDERS_PLACED: &str = "stockroom_local_orders_placed_total";
/// Internet reservations placed.
pub const INTERNET_ORDERS_PLACED: &str = "stockroom_internet_orders_placed_total";
/// Stock queries answered, labelled by outcome.
pub const QUERIES_ANSWERED: &str = "stockroom_stock_queries_total";
/// Failed attempts at answering a stock query, labelled by error kind.
pub const QUERY_RETRIES: &str = "stockroom_stock_query_retries_total";
/// Replies that could not be published.
pub const REPLY_PUBLISH_ERRORS: &str = "stockroom_reply_publish_errors_total";
/// Transactions rolled back, labelled by the kind of error that caused it.
pub const ROLLBACKS: &str = "stockroom_transactions_rolled_back_total";
/// Transaction duration.
pub const TRANSACTION_DURATION: &str = "stockroom_transaction_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping. Must be started
/// from within a tokio runtime.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions, install the recorder and spawn the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g., by another test) is tolerated:
    /// a warning is logged and the existing recorder keeps collecting.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                register_metrics();
                let addr = self.addr;
                tokio::spawn(async move {
                    // `ExporterError` implements neither `Debug` nor `Display` in
                    // metrics-exporter-prometheus 0.15, so it cannot be logged.
                    if exporter.await.is_err() {
                        tracing::error!(%addr, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(ORDERS_CANCELED, "Total number of canceled reservations");
    describe_counter!(
        LOCAL_ORDERS_PLACED,
        "Total number of local-pickup reservations placed"
    );
    describe_counter!(
        INTERNET_ORDERS_PLACED,
        "Total number of internet reservations placed"
    );
    describe_counter!(
        QUERIES_ANSWERED,
        "Total number of stock queries acknowledged, by outcome"
    );
    describe_counter!(
        QUERY_RETRIES,
        "Total number of failed attempts at answering a stock query"
    );
    describe_counter!(
        REPLY_PUBLISH_ERRORS,
        "Total number of stock replies that could not be published"
    );
    describe_counter!(
        ROLLBACKS,
        "Total number of rolled back transactions, by error kind"
    );
    describe_histogram!(
        TRANSACTION_DURATION,
        "Time from begin to commit or rollback of an outermost transaction"
    );
}

/// [`InventoryMetrics`] backed by the global `metrics` recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusInventoryMetrics;

impl InventoryMetrics for PrometheusInventoryMetrics {
    fn order_canceled(&self) {
        counter!(ORDERS_CANCELED).increment(1);
    }

    fn local_order_placed(&self) {
        counter!(LOCAL_ORDERS_PLACED).increment(1);
    }

    fn internet_order_placed(&self) {
        counter!(INTERNET_ORDERS_PLACED).increment(1);
    }
}

/// Executor counters.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record a transaction that did not commit, labelled with the error kind.
    pub fn record_rollback(kind: ErrorKind) {
        counter!(ROLLBACKS, "kind" => kind.as_str()).increment(1);
    }
}

/// Bridge counters.
pub struct BridgeMetrics;

impl BridgeMetrics {
    /// Record an acknowledged query; `outcome` is `answered`, `unknown` or `invalid`.
    pub fn record_query(outcome: &'static str) {
        counter!(QUERIES_ANSWERED, "outcome" => outcome).increment(1);
    }

    /// Record a failed attempt, labelled with the error kind.
    pub fn record_retry(kind: ErrorKind) {
        counter!(QUERY_RETRIES, "kind" => kind.as_str()).increment(1);
    }

    /// Record a reply that could not be published.
    pub fn record_publish_error() {
        counter!(REPLY_PUBLISH_ERRORS).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_inventory_counters_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        let sink = PrometheusInventoryMetrics;
        sink.order_canceled();
        sink.local_order_placed();
        sink.internet_order_placed();
        BridgeMetrics::record_query("answered");

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains(ORDERS_CANCELED));
            assert!(rendered.contains(LOCAL_ORDERS_PLACED));
            assert!(rendered.contains(INTERNET_ORDERS_PLACED));
            assert!(rendered.contains(QUERIES_ANSWERED));
        }
    }
}
