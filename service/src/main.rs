//! Stockroom service binary.
//!
//! Startup:
//! 1. Load configuration and initialize tracing
//! 2. Start the Prometheus exporter
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Build the consistency engine
//! 5. Connect to Redpanda and spawn the stock-query bridge
//!
//! Ctrl+C or SIGTERM broadcasts shutdown and waits for the bridge to drain.

use anyhow::Context;
use std::sync::Arc;
use stockroom_core::environment::SystemClock;
use stockroom_core::OrderNumbering;
use stockroom_postgres::PgInventoryStore;
use stockroom_redpanda::{KafkaQuerySource, KafkaReplySink};
use stockroom_runtime::{
    BackoffPolicy, InventoryEngine, MetricsServer, PrometheusInventoryMetrics, StockQueryBridge,
};
use stockroom_service::Config;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        instance = %config.inventory.instance,
        brokers = %config.redpanda.brokers,
        query_topic = %config.redpanda.query_topic,
        reply_topic = %config.redpanda.reply_topic,
        register_slots = config.inventory.register_slots,
        "Starting Stockroom service"
    );

    let mut metrics_server = MetricsServer::new(config.metrics_addr()?);
    metrics_server
        .start()
        .context("Failed to start metrics exporter")?;
    stockroom_postgres::describe_metrics();

    info!("Connecting to inventory database...");
    let store = PgInventoryStore::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Inventory database ready");

    let numbering = OrderNumbering::new(config.inventory.register_slots)?;
    let engine = InventoryEngine::new(
        Arc::new(store),
        numbering,
        Arc::new(SystemClock),
        Arc::new(PrometheusInventoryMetrics),
    );

    info!("Connecting to Redpanda...");
    let source = KafkaQuerySource::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.query_topic)
        .consumer_group(&config.redpanda.consumer_group)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()?;
    let sink = KafkaReplySink::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.reply_topic)
        .producer_acks(&config.redpanda.producer_acks)
        .timeout(config.publish_timeout())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let bridge = StockQueryBridge::new(config.inventory.instance.clone())
        .with_backoff(
            BackoffPolicy::builder()
                .step(config.backoff_step())
                .alarm_threshold(config.inventory.alarm_threshold)
                .build(),
        )
        .with_channel_capacity(config.inventory.channel_capacity)
        .spawn(
            Arc::new(engine),
            Arc::new(source),
            Arc::new(sink),
            &shutdown_tx,
        );
    info!("Stock query bridge running");

    shutdown_signal().await;

    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(config.shutdown_timeout(), bridge.join())
        .await
        .is_err()
    {
        warn!(
            timeout = ?config.shutdown_timeout(),
            "Stock query bridge did not stop in time"
        );
    }
    info!("Stockroom service stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed it is logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
