//! sqlx implementation of [`InventoryStore`].

use crate::rows;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use std::fmt;
use std::sync::Arc;
use stockroom_core::article::ArticleCode;
use stockroom_core::context::ExecCtx;
use stockroom_core::order::{OrderNumber, ReservationStatus};
use stockroom_core::store::{InventoryStore, StoreError, StoreFuture, TransactionalStore};
use stockroom_core::types::{DateRange, LineItem, Price, Reservation, SoldRecord, StockItem};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Counter of transactions aborted by a serialization conflict (SQLSTATE 40001).
pub const SERIALIZATION_FAILURES: &str = "stockroom_store_serialization_failures_total";

const SERIALIZATION_FAILURE_CODE: &str = "40001";

/// Register descriptions of the store's metrics with the global recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        SERIALIZATION_FAILURES,
        "Total number of statements aborted by a serialization conflict"
    );
}

/// Handle of an open database transaction.
///
/// Clones share one transaction. Commit or rollback takes it out, after which every
/// clone reports [`StoreError::TransactionClosed`].
#[derive(Clone)]
pub struct PgTransaction {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl PgTransaction {
    fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    async fn take(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.inner
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)
    }
}

impl fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTransaction").finish_non_exhaustive()
    }
}

/// Connection a statement runs on.
enum Conn<'c> {
    Pooled(PoolConnection<Postgres>),
    Tx(MutexGuard<'c, Option<Transaction<'static, Postgres>>>),
}

impl Conn<'_> {
    fn get(&mut self) -> Result<&mut PgConnection, StoreError> {
        match self {
            Self::Pooled(conn) => Ok(&mut **conn),
            Self::Tx(guard) => (**guard)
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or(StoreError::TransactionClosed),
        }
    }
}

fn is_serialization_failure(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(SERIALIZATION_FAILURE_CODE)
    )
}

fn db_error(action: &str, e: &sqlx::Error) -> StoreError {
    if is_serialization_failure(e) {
        metrics::counter!(SERIALIZATION_FAILURES).increment(1);
        warn!(action, error = %e, "Serialization conflict");
    }
    StoreError::Database(format!("Failed to {action}: {e}"))
}

fn missing_stock(article: &ArticleCode) -> StoreError {
    StoreError::NotFound(format!("stock {article}"))
}

/// PostgreSQL-backed inventory store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE stock (article TEXT PRIMARY KEY, name TEXT, price BIGINT, amount BIGINT);
/// CREATE TABLE on_processing (id BIGSERIAL, order_number BIGINT, article TEXT, price BIGINT,
///     amount BIGINT, date_of_reservation TIMESTAMPTZ, updated_at TIMESTAMPTZ, status TEXT);
/// CREATE TABLE sold (id BIGSERIAL, article TEXT, price BIGINT, amount BIGINT,
///     date_of_sale TIMESTAMPTZ);
/// ```
///
/// Prices are stored in cents.
#[derive(Clone, Debug)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| db_error("connect", &e))?;
        Ok(Self::new(pool))
    }

    /// Run the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection for `ctx`: the open transaction if any, else a pooled one.
    async fn conn<'c>(&self, ctx: &'c ExecCtx<PgTransaction>) -> Result<Conn<'c>, StoreError> {
        match ctx.transaction() {
            Some(tx) => Ok(Conn::Tx(tx.inner.lock().await)),
            None => self
                .pool
                .acquire()
                .await
                .map(Conn::Pooled)
                .map_err(|e| db_error("acquire connection", &e)),
        }
    }
}

impl TransactionalStore for PgInventoryStore {
    type Tx = PgTransaction;

    fn begin(&self) -> StoreFuture<'_, PgTransaction> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("begin transaction", &e))?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("set isolation level", &e))?;
            Ok(PgTransaction::new(tx))
        })
    }

    fn commit(&self, tx: PgTransaction) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            tx.take()
                .await?
                .commit()
                .await
                .map_err(|e| db_error("commit transaction", &e))
        })
    }

    fn rollback(&self, tx: PgTransaction) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            tx.take()
                .await?
                .rollback()
                .await
                .map_err(|e| db_error("roll back transaction", &e))
        })
    }
}

impl InventoryStore for PgInventoryStore {
    fn insert_stock<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        item: &'a StockItem,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            sqlx::query("INSERT INTO stock (article, name, price, amount) VALUES ($1, $2, $3, $4)")
                .bind(item.article.as_str())
                .bind(item.name.as_str())
                .bind(item.price.cents())
                .bind(i64::from(item.amount))
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("insert stock", &e))?;
            Ok(())
        })
    }

    fn stock_item<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, StockItem> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let row: Option<rows::StockRow> =
                sqlx::query_as("SELECT name, price, amount FROM stock WHERE article = $1")
                    .bind(article.as_str())
                    .fetch_optional(conn.get()?)
                    .await
                    .map_err(|e| db_error("load stock", &e))?;
            rows::stock_item(article, row.ok_or_else(|| missing_stock(article))?)
        })
    }

    fn stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, u32> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let row: Option<(i64,)> = sqlx::query_as("SELECT amount FROM stock WHERE article = $1")
                .bind(article.as_str())
                .fetch_optional(conn.get()?)
                .await
                .map_err(|e| db_error("load stock amount", &e))?;
            let (amount,) = row.ok_or_else(|| missing_stock(article))?;
            rows::quantity(amount)
        })
    }

    fn set_stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        article: &'a ArticleCode,
        amount: u32,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let result = sqlx::query("UPDATE stock SET amount = $2 WHERE article = $1")
                .bind(article.as_str())
                .bind(i64::from(amount))
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("update stock amount", &e))?;
            if result.rows_affected() == 0 {
                return Err(missing_stock(article));
            }
            Ok(())
        })
    }

    fn set_stock_price<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        article: &'a ArticleCode,
        price: Price,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let result = sqlx::query("UPDATE stock SET price = $2 WHERE article = $1")
                .bind(article.as_str())
                .bind(price.cents())
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("update stock price", &e))?;
            if result.rows_affected() == 0 {
                return Err(missing_stock(article));
            }
            Ok(())
        })
    }

    fn insert_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        reservation: &'a Reservation,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            for line in &reservation.lines {
                sqlx::query(
                    r"
                    INSERT INTO on_processing
                        (order_number, article, price, amount, date_of_reservation, updated_at, status)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ",
                )
                .bind(reservation.order_number.get())
                .bind(line.article.as_str())
                .bind(line.price.cents())
                .bind(i64::from(line.quantity))
                .bind(reservation.created_at)
                .bind(reservation.updated_at)
                .bind(reservation.status.as_str())
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("insert reservation line", &e))?;
            }
            debug!(
                order_number = %reservation.order_number,
                lines = reservation.lines.len(),
                "Reservation rows inserted"
            );
            Ok(())
        })
    }

    fn load_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        order: OrderNumber,
    ) -> StoreFuture<'a, Option<Reservation>> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let found: Vec<rows::ReservationRow> = sqlx::query_as(
                r"
                SELECT article, price, amount, date_of_reservation, updated_at, status
                FROM on_processing
                WHERE order_number = $1
                ORDER BY id
                ",
            )
            .bind(order.get())
            .fetch_all(conn.get()?)
            .await
            .map_err(|e| db_error("load reservation", &e))?;
            rows::reservation(order, found)
        })
    }

    fn update_reservation_status<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        order: OrderNumber,
        lines: &'a [LineItem],
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let [register, local, internet] = ReservationStatus::OPEN;
            let mut matched = 0;
            for line in lines {
                let result = sqlx::query(
                    r"
                    UPDATE on_processing
                    SET status = $1, updated_at = $2
                    WHERE order_number = $3
                      AND article = $4
                      AND price = $5
                      AND amount = $6
                      AND status IN ($7, $8, $9)
                    ",
                )
                .bind(status.as_str())
                .bind(at)
                .bind(order.get())
                .bind(line.article.as_str())
                .bind(line.price.cents())
                .bind(i64::from(line.quantity))
                .bind(register.as_str())
                .bind(local.as_str())
                .bind(internet.as_str())
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("update reservation status", &e))?;
                matched += result.rows_affected();
            }
            Ok(matched)
        })
    }

    fn delete_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        order: OrderNumber,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let result = sqlx::query("DELETE FROM on_processing WHERE order_number = $1")
                .bind(order.get())
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("delete reservation", &e))?;
            Ok(result.rows_affected())
        })
    }

    fn insert_sold<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        record: &'a SoldRecord,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            sqlx::query("INSERT INTO sold (article, price, amount, date_of_sale) VALUES ($1, $2, $3, $4)")
                .bind(record.article.as_str())
                .bind(record.price.cents())
                .bind(i64::from(record.quantity))
                .bind(record.sold_at)
                .execute(conn.get()?)
                .await
                .map_err(|e| db_error("insert sold record", &e))?;
            Ok(())
        })
    }

    fn sold_between<'a>(
        &'a self,
        ctx: &'a ExecCtx<PgTransaction>,
        range: &'a DateRange,
    ) -> StoreFuture<'a, Vec<SoldRecord>> {
        Box::pin(async move {
            let mut conn = self.conn(ctx).await?;
            let found: Vec<rows::SoldRow> = sqlx::query_as(
                r"
                SELECT article, price, amount, date_of_sale
                FROM sold
                WHERE date_of_sale BETWEEN $1 AND $2
                ORDER BY date_of_sale, id
                ",
            )
            .bind(range.start())
            .bind(range.end())
            .fetch_all(conn.get()?)
            .await
            .map_err(|e| db_error("load sold records", &e))?;
            found.into_iter().map(rows::sold_record).collect()
        })
    }
}
