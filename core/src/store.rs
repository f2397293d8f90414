//! Storage collaborator abstractions.
//!
//! The consistency engine is the only writer of the three tables described here:
//!
//! - `stock(article PK, name, price, amount)`
//! - `on_processing(article, price, amount, date_of_reservation, updated_at, order_number, status)`
//! - `sold(article, price, amount, date_of_sale)`
//!
//! Every data method receives the caller's [`ExecCtx`]. When the context carries a
//! transaction handle the statement must run inside that transaction; otherwise it
//! runs on its own connection and commits immediately.
//!
//! # Implementations
//!
//! - `PgInventoryStore` (in `stockroom-postgres`): production implementation
//! - `InMemoryInventoryStore` (in `stockroom-testing`): deterministic test double
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so that the
//! traits stay usable as trait objects.

use crate::article::ArticleCode;
use crate::context::ExecCtx;
use crate::order::{OrderNumber, ReservationStatus};
use crate::types::{DateRange, LineItem, Price, Reservation, SoldRecord, StockItem};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by storage implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection, query or isolation failure.
    #[error("Database error: {0}")]
    Database(String),

    /// The transaction handle was already committed or rolled back.
    #[error("Transaction already closed")]
    TransactionClosed,
}

/// Boxed future returned by storage methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Transaction lifecycle of a store.
///
/// `Tx` is a cheaply clonable handle to one open transaction. The transactional
/// executor is the only caller of these methods.
pub trait TransactionalStore: Send + Sync {
    /// Handle to an open transaction.
    type Tx: Clone + Send + Sync + 'static;

    /// Open a transaction at serializable isolation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available or the
    /// isolation level cannot be set.
    fn begin(&self) -> StoreFuture<'_, Self::Tx>;

    /// Commit `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on serialization failures and
    /// [`StoreError::TransactionClosed`] if `tx` was already resolved.
    fn commit(&self, tx: Self::Tx) -> StoreFuture<'_, ()>;

    /// Roll `tx` back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the rollback could not be sent and
    /// [`StoreError::TransactionClosed`] if `tx` was already resolved.
    fn rollback(&self, tx: Self::Tx) -> StoreFuture<'_, ()>;
}

/// Row-level operations on the stock, reservation and sold tables.
pub trait InventoryStore: TransactionalStore {
    /// Insert a new stock row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the row cannot be written, duplicate
    /// article included.
    fn insert_stock<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        item: &'a StockItem,
    ) -> StoreFuture<'a, ()>;

    /// Read a full stock row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the article is not stocked.
    fn stock_item<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, StockItem>;

    /// Read the available amount of an article.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the article is not stocked.
    fn stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, u32>;

    /// Overwrite the available amount of an article.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the article is not stocked.
    fn set_stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        article: &'a ArticleCode,
        amount: u32,
    ) -> StoreFuture<'a, ()>;

    /// Overwrite the unit price of an article.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the article is not stocked.
    fn set_stock_price<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        article: &'a ArticleCode,
        price: Price,
    ) -> StoreFuture<'a, ()>;

    /// Insert one `on_processing` row per reservation line.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any row cannot be written.
    fn insert_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        reservation: &'a Reservation,
    ) -> StoreFuture<'a, ()>;

    /// Load every row of a reservation, `None` when the order number is unused.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure or if the stored rows are
    /// not a consistent reservation.
    fn load_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        order: OrderNumber,
    ) -> StoreFuture<'a, Option<Reservation>>;

    /// Move the open rows matching `lines` to `status`, returning the rows matched.
    ///
    /// A row matches when order number, article, price and amount equal one of the
    /// given lines and its current status is still open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    fn update_reservation_status<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        order: OrderNumber,
        lines: &'a [LineItem],
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64>;

    /// Delete every row of a reservation, returning the rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    fn delete_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        order: OrderNumber,
    ) -> StoreFuture<'a, u64>;

    /// Append a ledger entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the row cannot be written.
    fn insert_sold<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        record: &'a SoldRecord,
    ) -> StoreFuture<'a, ()>;

    /// Ledger entries sold within `range`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    fn sold_between<'a>(
        &'a self,
        ctx: &'a ExecCtx<Self::Tx>,
        range: &'a DateRange,
    ) -> StoreFuture<'a, Vec<SoldRecord>>;
}
