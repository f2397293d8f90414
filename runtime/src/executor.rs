//! Reentrant transactional executor.
//!
//! [`TransactionalExecutor::run`] executes a unit of work atomically at
//! serializable isolation. The transaction handle travels inside the
//! [`ExecCtx`] handed to the work, so nested units of work that call `run` again
//! join the open transaction instead of nesting a new one.
//!
//! Per outermost call there is exactly one `begin` followed by exactly one
//! `commit` or `rollback`, however deep the nesting. Only the outermost call rolls
//! back; an inner failure just propagates, and the outer call sees it and undoes
//! everything.

use crate::metrics::{TransactionMetrics, TRANSACTION_DURATION};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use stockroom_core::context::ExecCtx;
use stockroom_core::error::InventoryError;
use stockroom_core::store::TransactionalStore;
use tracing::Instrument;

/// Runs units of work inside a single store transaction.
pub struct TransactionalExecutor<S: TransactionalStore> {
    store: Arc<S>,
}

impl<S: TransactionalStore> Clone for TransactionalExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TransactionalStore> TransactionalExecutor<S> {
    /// Create an executor over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run `work` atomically.
    ///
    /// When `ctx` already carries a transaction, `work` runs inside it and any error
    /// is returned as is. Otherwise a serializable transaction is opened, `work`
    /// receives a context bound to it, and the transaction is committed on `Ok` or
    /// rolled back on `Err`. Commit hooks registered on the context run after a
    /// successful commit and are dropped on rollback.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Timeout`] if the deadline in `ctx` passes before `work`
    ///   completes; the transaction is rolled back.
    /// - [`InventoryError::Storage`] if begin or commit fail.
    /// - Whatever `work` returns, unchanged.
    pub async fn run<T, F, Fut>(&self, ctx: &ExecCtx<S::Tx>, work: F) -> Result<T, InventoryError>
    where
        F: FnOnce(ExecCtx<S::Tx>) -> Fut,
        Fut: Future<Output = Result<T, InventoryError>>,
    {
        if ctx.in_transaction() {
            tracing::trace!(correlation_id = ?ctx.correlation_id(), "Joining open transaction");
            return work(ctx.clone()).await;
        }

        let tx = ctx
            .bounded(async { self.store.begin().await.map_err(InventoryError::from) })
            .await?;
        let scoped = ctx.enter_transaction(tx.clone());
        let span = tracing::debug_span!(
            "transaction",
            correlation_id = %scoped.correlation_id().unwrap_or_default()
        );
        let started = Instant::now();

        let outcome = scoped
            .bounded(work(scoped.clone()))
            .instrument(span.clone())
            .await;

        let result = match outcome {
            Ok(value) => match self.store.commit(tx).await {
                Ok(()) => {
                    span.in_scope(|| tracing::debug!("Transaction committed"));
                    scoped.run_commit_hooks();
                    Ok(value)
                }
                Err(err) => {
                    span.in_scope(|| tracing::warn!(error = %err, "Commit failed"));
                    scoped.discard_commit_hooks();
                    let err = InventoryError::from(err);
                    TransactionMetrics::record_rollback(err.kind());
                    Err(err)
                }
            },
            Err(err) => {
                scoped.discard_commit_hooks();
                TransactionMetrics::record_rollback(err.kind());
                self.rollback_quietly(tx).instrument(span.clone()).await;
                span.in_scope(|| tracing::debug!(error = %err, "Transaction rolled back"));
                Err(err)
            }
        };

        metrics::histogram!(TRANSACTION_DURATION).record(started.elapsed().as_secs_f64());
        result
    }

    /// Roll back, logging instead of returning a failure so the caller's error wins.
    async fn rollback_quietly(&self, tx: S::Tx) {
        if let Err(err) = self.store.rollback(tx).await {
            tracing::warn!(error = %err, "Rollback failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use stockroom_testing::InMemoryInventoryStore;

    fn executor() -> (Arc<InMemoryInventoryStore>, TransactionalExecutor<InMemoryInventoryStore>) {
        let store = Arc::new(InMemoryInventoryStore::new());
        (Arc::clone(&store), TransactionalExecutor::new(store))
    }

    #[tokio::test]
    async fn test_outer_call_commits_once() {
        let (store, executor) = executor();
        let ctx = ExecCtx::background();

        let value = executor
            .run(&ctx, |tx| async move {
                assert!(tx.in_transaction());
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        let stats = store.stats();
        assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_nested_calls_join() {
        let (store, executor) = executor();
        let ctx = ExecCtx::background();

        executor
            .run(&ctx, |outer| {
                let executor = executor.clone();
                async move {
                    let outer_id = outer.correlation_id();
                    executor
                        .run(&outer, |inner| async move {
                            assert_eq!(inner.correlation_id(), outer_id);
                            Ok(())
                        })
                        .await
                }
            })
            .await
            .unwrap();

        let stats = store.stats();
        assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_inner_failure_rolls_back_outer_once() {
        let (store, executor) = executor();
        let ctx = ExecCtx::background();

        let result: Result<(), _> = executor
            .run(&ctx, |outer| {
                let executor = executor.clone();
                async move {
                    executor
                        .run(&outer, |_inner| async {
                            Err::<(), _>(InventoryError::NotFound("W1".into()))
                        })
                        .await
                }
            })
            .await;

        assert_eq!(result, Err(InventoryError::NotFound("W1".into())));
        let stats = store.stats();
        assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_hooks_run_after_commit_only() {
        let (_store, executor) = executor();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        executor
            .run(&ExecCtx::background(), |tx| async move {
                tx.on_commit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&fired);
        let _ = executor
            .run(&ExecCtx::background(), |tx| async move {
                tx.on_commit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                Err::<(), _>(InventoryError::Storage("boom".into()))
            })
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let (store, executor) = executor();
        store.fail_next_rollback();

        let result: Result<(), _> = executor
            .run(&ExecCtx::background(), |_tx| async {
                Err(InventoryError::Validation("bad".into()))
            })
            .await;

        assert_eq!(result, Err(InventoryError::Validation("bad".into())));
    }

    #[tokio::test]
    async fn test_commit_failure_is_storage_fault() {
        let (store, executor) = executor();
        store.fail_next_commit();

        let result = executor
            .run(&ExecCtx::background(), |_tx| async { Ok(1) })
            .await;

        assert!(matches!(result, Err(InventoryError::Storage(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_rolls_back_with_timeout() {
        let (store, executor) = executor();
        let ctx = ExecCtx::with_timeout(Duration::from_millis(100));

        let result: Result<(), _> = executor
            .run(&ctx, |_tx| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(InventoryError::Timeout));
        let stats = store.stats();
        assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 0, 1));
    }
}
