//! Asynchronous stock-query bridge.
//!
//! Other systems ask "how many units of this article do you have" by publishing
//! the raw article code on the query topic. The bridge answers on the reply topic
//! with `{"instance": ..., "article": ..., "count": ...}`.
//!
//! The bridge is two tasks joined by a channel:
//!
//! ```text
//!  QuerySource ──► QueryConsumer ──mpsc──► ReplyProducer ──► ReplySink
//!                       │
//!                       ▼
//!                  StockLookup (engine, no transaction)
//! ```
//!
//! # Consumer rules
//!
//! - A payload that is not a valid article code is acknowledged and dropped.
//! - An unknown article is a valid answer of zero.
//! - Any other lookup failure leaves the message unacknowledged and retries it
//!   after `step × attempts`, forever. Later messages wait. Failures that are not
//!   transient log at error level from the first attempt.
//! - A lookup in flight is abandoned on shutdown; the message stays unacknowledged.
//!
//! # Producer rules
//!
//! A reply that cannot be published is logged and dropped.
//!
//! Both tasks stop on the shutdown broadcast, including mid-backoff.

use crate::engine::InventoryEngine;
use crate::metrics::BridgeMetrics;
use crate::retry::BackoffPolicy;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use stockroom_core::article::ArticleCode;
use stockroom_core::bus::{QueryMessage, QuerySource, ReplySink};
use stockroom_core::context::ExecCtx;
use stockroom_core::error::InventoryError;
use stockroom_core::store::InventoryStore;
use stockroom_core::types::StockCountReply;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default capacity of the consumer-to-producer channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Read-only stock lookup used by the bridge.
pub trait StockLookup: Send + Sync {
    /// Units of `article` available.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] for an unknown article, any other kind for a
    /// failure worth retrying.
    fn available<'a>(
        &'a self,
        article: &'a ArticleCode,
    ) -> Pin<Box<dyn Future<Output = Result<u32, InventoryError>> + Send + 'a>>;
}

impl<S> StockLookup for InventoryEngine<S>
where
    S: InventoryStore + 'static,
{
    fn available<'a>(
        &'a self,
        article: &'a ArticleCode,
    ) -> Pin<Box<dyn Future<Output = Result<u32, InventoryError>> + Send + 'a>> {
        Box::pin(async move {
            let ctx = ExecCtx::background();
            self.amount_in_stock(&ctx, article).await
        })
    }
}

/// A count ready to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ArticleCount {
    article: String,
    count: u32,
}

/// Whether the consumer loop should keep going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Configuration and entry point of the bridge.
///
/// # Example
///
/// ```rust,ignore
/// let (shutdown_tx, _) = broadcast::channel(1);
/// let handle = StockQueryBridge::new("store-1")
///     .with_backoff(BackoffPolicy::default())
///     .spawn(engine, source, sink, &shutdown_tx);
///
/// // later
/// let _ = shutdown_tx.send(());
/// handle.join().await;
/// ```
#[derive(Clone, Debug)]
pub struct StockQueryBridge {
    instance: String,
    backoff: BackoffPolicy,
    channel_capacity: usize,
}

impl StockQueryBridge {
    /// Create a bridge answering as store `instance`.
    #[must_use]
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            backoff: BackoffPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the retry backoff.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the capacity of the channel between the two halves (minimum 1).
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Spawn the consumer and producer tasks.
    ///
    /// Both subscribe to `shutdown` before this returns, so a signal sent right
    /// after is never missed.
    #[must_use]
    pub fn spawn(
        self,
        lookup: Arc<dyn StockLookup>,
        source: Arc<dyn QuerySource>,
        sink: Arc<dyn ReplySink>,
        shutdown: &broadcast::Sender<()>,
    ) -> BridgeHandle {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let consumer = QueryConsumer {
            lookup,
            source,
            replies: tx,
            backoff: self.backoff,
            shutdown: shutdown.subscribe(),
        };
        let producer = ReplyProducer {
            sink,
            instance: self.instance,
            replies: rx,
            shutdown: shutdown.subscribe(),
        };

        BridgeHandle {
            consumer: tokio::spawn(consumer.run()),
            producer: tokio::spawn(producer.run()),
        }
    }
}

/// Join handles of the two bridge tasks.
pub struct BridgeHandle {
    consumer: JoinHandle<()>,
    producer: JoinHandle<()>,
}

impl BridgeHandle {
    /// Wait until both tasks have stopped.
    pub async fn join(self) {
        if let Err(e) = self.consumer.await {
            error!(error = %e, "Stock query consumer task failed");
        }
        if let Err(e) = self.producer.await {
            error!(error = %e, "Stock reply producer task failed");
        }
    }
}

/// Inbound half: fetch, look up, acknowledge, forward.
struct QueryConsumer {
    lookup: Arc<dyn StockLookup>,
    source: Arc<dyn QuerySource>,
    replies: mpsc::Sender<ArticleCount>,
    backoff: BackoffPolicy,
    shutdown: broadcast::Receiver<()>,
}

impl QueryConsumer {
    async fn run(mut self) {
        info!("Stock query consumer started");

        loop {
            let message = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Stock query consumer received shutdown signal");
                    break;
                }
                fetched = self.source.fetch() => match fetched {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        info!("Query source exhausted");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to fetch stock query, retrying in {:?}", self.backoff.step);
                        if self.pause(self.backoff.step).await == Flow::Stop {
                            break;
                        }
                        continue;
                    }
                },
            };

            if self.process(&message).await == Flow::Stop {
                break;
            }
        }

        info!("Stock query consumer stopped");
    }

    /// Answer one message, retrying until it is answered or shutdown arrives.
    async fn process(&mut self, message: &QueryMessage) -> Flow {
        let Some(article) = message
            .payload_str()
            .and_then(|raw| ArticleCode::new(raw).ok())
        else {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                payload = %String::from_utf8_lossy(&message.payload),
                "Dropping malformed stock query"
            );
            self.ack(message).await;
            BridgeMetrics::record_query("invalid");
            return Flow::Continue;
        };

        let mut attempts: u32 = 0;
        loop {
            let looked_up = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(%article, "Stock query consumer received shutdown signal during lookup");
                    return Flow::Stop;
                }
                looked_up = self.lookup.available(&article) => looked_up,
            };
            let count = match looked_up {
                Ok(count) => {
                    BridgeMetrics::record_query("answered");
                    count
                }
                Err(InventoryError::NotFound(_)) => {
                    debug!(%article, "Unknown article, answering zero");
                    BridgeMetrics::record_query("unknown");
                    0
                }
                Err(err) => {
                    attempts = attempts.saturating_add(1);
                    BridgeMetrics::record_retry(err.kind());
                    let delay = self.backoff.delay_for_attempt(attempts);
                    if self.backoff.is_alarming(attempts) || !err.is_transient() {
                        error!(%article, attempts, error = %err, "Stock query keeps failing, retrying in {:?}", delay);
                    } else {
                        warn!(%article, attempts, error = %err, "Stock query failed, retrying in {:?}", delay);
                    }
                    if self.pause(delay).await == Flow::Stop {
                        return Flow::Stop;
                    }
                    continue;
                }
            };

            self.ack(message).await;
            return self.forward(article.as_str(), count).await;
        }
    }

    async fn ack(&self, message: &QueryMessage) {
        if let Err(e) = self.source.ack(message).await {
            error!(offset = message.offset, error = %e, "Failed to acknowledge stock query");
        }
    }

    async fn forward(&self, article: &str, count: u32) -> Flow {
        let ready = ArticleCount {
            article: article.to_string(),
            count,
        };
        if self.replies.send(ready).await.is_err() {
            warn!("Reply producer is gone, stopping consumer");
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Sleep for `delay` unless shutdown arrives first.
    async fn pause(&mut self, delay: std::time::Duration) -> Flow {
        tokio::select! {
            _ = self.shutdown.recv() => {
                info!("Stock query consumer received shutdown signal during backoff");
                Flow::Stop
            }
            () = tokio::time::sleep(delay) => Flow::Continue,
        }
    }
}

/// Outbound half: publish every ready count once.
struct ReplyProducer {
    sink: Arc<dyn ReplySink>,
    instance: String,
    replies: mpsc::Receiver<ArticleCount>,
    shutdown: broadcast::Receiver<()>,
}

impl ReplyProducer {
    async fn run(mut self) {
        info!(instance = %self.instance, "Stock reply producer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Stock reply producer received shutdown signal");
                    break;
                }
                next = self.replies.recv() => match next {
                    Some(ready) => self.publish(ready).await,
                    None => break,
                },
            }
        }

        info!("Stock reply producer stopped");
    }

    async fn publish(&self, ready: ArticleCount) {
        let reply = StockCountReply {
            instance: self.instance.clone(),
            article: ready.article,
            count: ready.count,
        };
        match self.sink.publish(&reply).await {
            Ok(()) => debug!(article = %reply.article, count = reply.count, "Stock reply published"),
            Err(e) => {
                BridgeMetrics::record_publish_error();
                error!(article = %reply.article, error = %e, "Failed to publish stock reply");
            }
        }
    }
}
