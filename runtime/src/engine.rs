//! The inventory consistency engine.
//!
//! Every mutation of stock, reservation or sold rows goes through
//! [`InventoryEngine`]. Inputs are validated before any storage access; multi-row
//! operations run in a single [`TransactionalExecutor`] call so that either every
//! line takes effect or none does.
//!
//! # Reservation lifecycle
//!
//! ```text
//! NewCashRegister ─┐
//! NewLocalCustomer ├──► Canceled  (cancel_reservation: stock returned)
//! NewInternetCustomer ┘  Finished  (finish_order: lines moved to the sold ledger)
//! ```
//!
//! Register slots (order numbers up to [`OrderNumbering::register_slots`]) are
//! deleted on resolution so the slot can be reused; customer orders keep their rows
//! with the terminal status.

use crate::executor::TransactionalExecutor;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use stockroom_core::article::ArticleCode;
use stockroom_core::context::ExecCtx;
use stockroom_core::environment::Clock;
use stockroom_core::error::InventoryError;
use stockroom_core::metrics::InventoryMetrics;
use stockroom_core::order::{OrderNumber, OrderNumbering, ReservationStatus};
use stockroom_core::store::{InventoryStore, StoreFuture};
use stockroom_core::types::{
    DateRange, LineItem, Price, Reservation, ReservationRequest, SaleRequest, SoldRecord,
    StockItem,
};
use stockroom_core::validation;

/// Orchestrates stock, reservation and sale mutations on top of a store.
pub struct InventoryEngine<S: InventoryStore> {
    store: Arc<S>,
    executor: TransactionalExecutor<S>,
    numbering: OrderNumbering,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn InventoryMetrics>,
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Create an engine.
    ///
    /// `clock` stamps reservations and sales; `metrics` receives the business
    /// counters after each successful commit.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        numbering: OrderNumbering,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn InventoryMetrics>,
    ) -> Self {
        Self {
            executor: TransactionalExecutor::new(Arc::clone(&store)),
            store,
            numbering,
            clock,
            metrics,
        }
    }

    /// The register-slot boundary in use.
    #[must_use]
    pub const fn numbering(&self) -> OrderNumbering {
        self.numbering
    }

    /// The executor, for composing engine calls into a larger unit of work.
    #[must_use]
    pub const fn executor(&self) -> &TransactionalExecutor<S> {
        &self.executor
    }

    /// Await a single storage call under the context deadline.
    async fn single<T>(
        ctx: &ExecCtx<S::Tx>,
        call: StoreFuture<'_, T>,
    ) -> Result<T, InventoryError> {
        ctx.bounded(async move { call.await.map_err(InventoryError::from) })
            .await
    }

    // ------------------------------------------------------------------
    // Stock
    // ------------------------------------------------------------------

    /// Add a new product to stock.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for a blank name; storage errors otherwise,
    /// including a duplicate article.
    #[tracing::instrument(skip_all, fields(article = %item.article))]
    pub async fn add_product_to_stock(
        &self,
        ctx: &ExecCtx<S::Tx>,
        item: StockItem,
    ) -> Result<(), InventoryError> {
        item.validate()?;
        Self::single(ctx, self.store.insert_stock(ctx, &item)).await?;
        tracing::info!(amount = item.amount, price = %item.price, "Product added to stock");
        Ok(())
    }

    /// Change the unit price of a stocked article.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the article is not stocked.
    #[tracing::instrument(skip_all, fields(article = %article, price = %price))]
    pub async fn change_price_in_stock(
        &self,
        ctx: &ExecCtx<S::Tx>,
        article: &ArticleCode,
        price: Price,
    ) -> Result<(), InventoryError> {
        Self::single(ctx, self.store.set_stock_price(ctx, article, price)).await
    }

    /// Overwrite the available amount of a stocked article.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] if `amount` is negative or too large,
    /// [`InventoryError::NotFound`] if the article is not stocked.
    #[tracing::instrument(skip_all, fields(article = %article, amount = amount))]
    pub async fn change_amount_in_stock(
        &self,
        ctx: &ExecCtx<S::Tx>,
        article: &ArticleCode,
        amount: i64,
    ) -> Result<(), InventoryError> {
        if !validation::is_valid_stock_amount(amount) {
            return Err(InventoryError::Validation(format!(
                "stock amount must be between 0 and {}, got {amount}",
                u32::MAX
            )));
        }
        let amount = u32::try_from(amount)
            .map_err(|e| InventoryError::Validation(e.to_string()))?;
        Self::single(ctx, self.store.set_stock_amount(ctx, article, amount)).await
    }

    /// Units of `article` available.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the article is not stocked.
    pub async fn amount_in_stock(
        &self,
        ctx: &ExecCtx<S::Tx>,
        article: &ArticleCode,
    ) -> Result<u32, InventoryError> {
        Self::single(ctx, self.store.stock_amount(ctx, article)).await
    }

    /// Full stock record of `article`.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the article is not stocked.
    pub async fn stock_item(
        &self,
        ctx: &ExecCtx<S::Tx>,
        article: &ArticleCode,
    ) -> Result<StockItem, InventoryError> {
        Self::single(ctx, self.store.stock_item(ctx, article)).await
    }

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    /// Place a reservation, taking every line out of stock.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] for a malformed request, before any storage access.
    /// - [`InventoryError::AlreadyProcessed`] if the order number is in use.
    /// - [`InventoryError::InsufficientStock`] if any line is short; nothing changes.
    #[tracing::instrument(skip_all, fields(order = %request.order_number, status = %request.status))]
    pub async fn make_reservation(
        &self,
        ctx: &ExecCtx<S::Tx>,
        request: ReservationRequest,
    ) -> Result<Reservation, InventoryError> {
        request.validate(&self.numbering)?;
        let reservation = self
            .executor
            .run(ctx, move |tx| async move { self.reserve(&tx, request).await })
            .await?;
        tracing::info!(lines = reservation.lines.len(), "Reservation placed");
        Ok(reservation)
    }

    async fn reserve(
        &self,
        tx: &ExecCtx<S::Tx>,
        request: ReservationRequest,
    ) -> Result<Reservation, InventoryError> {
        let order = request.order_number;
        if self.store.load_reservation(tx, order).await?.is_some() {
            return Err(InventoryError::AlreadyProcessed(order));
        }

        let mut remaining = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            remaining.push(self.take(tx, line).await?);
        }
        for (line, amount) in request.lines.iter().zip(remaining) {
            self.store
                .set_stock_amount(tx, &line.article, amount)
                .await?;
        }

        let now = self.clock.now();
        let reservation = Reservation {
            order_number: order,
            lines: request.lines,
            created_at: now,
            updated_at: now,
            status: request.status,
        };
        self.store.insert_reservation(tx, &reservation).await?;

        let metrics = Arc::clone(&self.metrics);
        match reservation.status {
            ReservationStatus::NewLocalCustomer => {
                tx.on_commit(move || metrics.local_order_placed());
            }
            ReservationStatus::NewInternetCustomer => {
                tx.on_commit(move || metrics.internet_order_placed());
            }
            _ => {}
        }
        Ok(reservation)
    }

    /// Read the available amount of a line's article and return what is left after
    /// taking the line's quantity.
    async fn take(&self, tx: &ExecCtx<S::Tx>, line: &LineItem) -> Result<u32, InventoryError> {
        let available = self.store.stock_amount(tx, &line.article).await?;
        available
            .checked_sub(line.quantity)
            .ok_or_else(|| InventoryError::InsufficientStock {
                article: line.article.clone(),
                requested: line.quantity,
                available,
            })
    }

    /// Cancel an open reservation and return its lines to stock.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if there is no such reservation.
    /// - [`InventoryError::AlreadyProcessed`] if it is already finished or canceled.
    /// - [`InventoryError::Storage`] if the status update does not match every line.
    #[tracing::instrument(skip_all, fields(order = %order))]
    pub async fn cancel_reservation(
        &self,
        ctx: &ExecCtx<S::Tx>,
        order: OrderNumber,
    ) -> Result<(), InventoryError> {
        self.executor
            .run(ctx, move |tx| async move { self.cancel(&tx, order).await })
            .await?;
        tracing::info!("Reservation canceled");
        Ok(())
    }

    async fn cancel(&self, tx: &ExecCtx<S::Tx>, order: OrderNumber) -> Result<(), InventoryError> {
        let reservation = self.open_reservation(tx, order).await?;
        for line in &reservation.lines {
            let available = self.store.stock_amount(tx, &line.article).await?;
            let restored = available.checked_add(line.quantity).ok_or_else(|| {
                InventoryError::Storage(format!(
                    "stock amount of {} would overflow",
                    line.article
                ))
            })?;
            self.store
                .set_stock_amount(tx, &line.article, restored)
                .await?;
        }
        self.resolve(tx, &reservation, ReservationStatus::Canceled)
            .await?;

        let metrics = Arc::clone(&self.metrics);
        tx.on_commit(move || metrics.order_canceled());
        Ok(())
    }

    /// Complete an open reservation, moving every line into the sold ledger.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if there is no such reservation.
    /// - [`InventoryError::AlreadyProcessed`] if it is already finished or canceled.
    /// - [`InventoryError::Storage`] if the status update does not match every line.
    #[tracing::instrument(skip_all, fields(order = %order))]
    pub async fn finish_order(
        &self,
        ctx: &ExecCtx<S::Tx>,
        order: OrderNumber,
    ) -> Result<Vec<SoldRecord>, InventoryError> {
        let sold = self
            .executor
            .run(ctx, move |tx| async move { self.finish(&tx, order).await })
            .await?;
        tracing::info!(lines = sold.len(), "Order finished");
        Ok(sold)
    }

    async fn finish(
        &self,
        tx: &ExecCtx<S::Tx>,
        order: OrderNumber,
    ) -> Result<Vec<SoldRecord>, InventoryError> {
        let reservation = self.open_reservation(tx, order).await?;
        let now = self.clock.now();
        let mut sold = Vec::with_capacity(reservation.lines.len());
        for line in &reservation.lines {
            let record = SoldRecord::from_line(line, now);
            self.store.insert_sold(tx, &record).await?;
            sold.push(record);
        }
        self.resolve(tx, &reservation, ReservationStatus::Finished)
            .await?;
        Ok(sold)
    }

    /// A stored reservation.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if there is no such reservation.
    pub async fn reservation(
        &self,
        ctx: &ExecCtx<S::Tx>,
        order: OrderNumber,
    ) -> Result<Reservation, InventoryError> {
        Self::single(ctx, self.store.load_reservation(ctx, order))
            .await?
            .ok_or_else(|| InventoryError::NotFound(format!("reservation {order}")))
    }

    /// Load a reservation that may still transition.
    async fn open_reservation(
        &self,
        tx: &ExecCtx<S::Tx>,
        order: OrderNumber,
    ) -> Result<Reservation, InventoryError> {
        let reservation = self
            .store
            .load_reservation(tx, order)
            .await?
            .ok_or_else(|| InventoryError::NotFound(format!("reservation {order}")))?;
        if reservation.status.is_terminal() {
            return Err(InventoryError::AlreadyProcessed(order));
        }
        Ok(reservation)
    }

    /// Move an open reservation to a terminal status.
    ///
    /// Register slots are freed by deleting their rows. Customer orders keep their
    /// rows; every line read earlier in this transaction must match the update.
    async fn resolve(
        &self,
        tx: &ExecCtx<S::Tx>,
        reservation: &Reservation,
        status: ReservationStatus,
    ) -> Result<(), InventoryError> {
        let order = reservation.order_number;
        if self.numbering.is_register_slot(order) {
            self.store.delete_reservation(tx, order).await?;
            return Ok(());
        }

        let now: DateTime<Utc> = self.clock.now();
        let matched = self
            .store
            .update_reservation_status(tx, order, &reservation.lines, status, now)
            .await?;
        let expected = u64::try_from(reservation.lines.len()).unwrap_or(u64::MAX);
        if matched != expected {
            tracing::error!(
                %order,
                matched,
                expected,
                "Status update did not match the reservation lines"
            );
            return Err(InventoryError::Storage(format!(
                "status update for order {order} matched {matched} of {expected} lines"
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sales
    // ------------------------------------------------------------------

    /// Sell lines directly from stock, without a reservation.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] for a malformed request, before any storage access.
    /// - [`InventoryError::InsufficientStock`] if any line is short; nothing changes.
    #[tracing::instrument(skip_all, fields(lines = sale.lines.len()))]
    pub async fn make_sale(
        &self,
        ctx: &ExecCtx<S::Tx>,
        sale: SaleRequest,
    ) -> Result<Vec<SoldRecord>, InventoryError> {
        sale.validate()?;
        let sold = self
            .executor
            .run(ctx, move |tx| async move { self.sell(&tx, &sale.lines).await })
            .await?;
        tracing::info!("Sale recorded");
        Ok(sold)
    }

    async fn sell(
        &self,
        tx: &ExecCtx<S::Tx>,
        lines: &[LineItem],
    ) -> Result<Vec<SoldRecord>, InventoryError> {
        let now = self.clock.now();
        let mut sold = Vec::with_capacity(lines.len());
        for line in lines {
            let remaining = self.take(tx, line).await?;
            self.store
                .set_stock_amount(tx, &line.article, remaining)
                .await?;
            let record = SoldRecord::from_line(line, now);
            self.store.insert_sold(tx, &record).await?;
            sold.push(record);
        }
        Ok(sold)
    }

    /// Ledger entries sold between `from` and `to`, both inclusive.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] if `from` is after `to`.
    pub async fn sales_between(
        &self,
        ctx: &ExecCtx<S::Tx>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SoldRecord>, InventoryError> {
        let range = DateRange::new(from, to)?;
        Self::single(ctx, self.store.sold_between(ctx, &range)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stockroom_testing::{test_clock, InMemoryInventoryStore, RecordingMetrics};

    fn engine() -> (
        Arc<InMemoryInventoryStore>,
        Arc<RecordingMetrics>,
        InventoryEngine<InMemoryInventoryStore>,
    ) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let engine = InventoryEngine::new(
            Arc::clone(&store),
            OrderNumbering::default(),
            Arc::new(test_clock()),
            metrics.clone(),
        );
        (store, metrics, engine)
    }

    fn article(code: &str) -> ArticleCode {
        ArticleCode::new(code).unwrap()
    }

    fn line(code: &str, quantity: u32) -> LineItem {
        LineItem {
            article: article(code),
            price: Price::from_cents(500).unwrap(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_change_amount_rejects_negative_before_storage() {
        let (store, _, engine) = engine();
        let ctx = ExecCtx::background();
        let err = engine
            .change_amount_in_stock(&ctx, &article("W1"), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
        assert_eq!(store.stats().statements, 0);
    }

    #[tokio::test]
    async fn test_unknown_article_amount_is_not_found() {
        let (_, _, engine) = engine();
        let err = engine
            .amount_in_stock(&ExecCtx::background(), &article("NOPE"))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_slot_is_freed_on_finish() {
        let (store, metrics, engine) = engine();
        let ctx = ExecCtx::background();
        store.seed_stock(&article("W1"), "Widget", 500, 5);

        let request = ReservationRequest {
            order_number: OrderNumber::new(3).unwrap(),
            lines: vec![line("W1", 2)],
            status: ReservationStatus::NewCashRegister,
        };
        engine.make_reservation(&ctx, request.clone()).await.unwrap();
        engine
            .finish_order(&ctx, OrderNumber::new(3).unwrap())
            .await
            .unwrap();

        // slot can be reused right away
        engine.make_reservation(&ctx, request).await.unwrap();
        assert_eq!(engine.amount_in_stock(&ctx, &article("W1")).await.unwrap(), 1);
        assert_eq!(metrics.snapshot().local_placed, 0);
        assert_eq!(metrics.snapshot().internet_placed, 0);
    }

    #[tokio::test]
    async fn test_customer_order_number_cannot_be_reused() {
        let (store, _, engine) = engine();
        let ctx = ExecCtx::background();
        store.seed_stock(&article("W1"), "Widget", 500, 5);

        let request = ReservationRequest {
            order_number: OrderNumber::new(42).unwrap(),
            lines: vec![line("W1", 1)],
            status: ReservationStatus::NewInternetCustomer,
        };
        engine.make_reservation(&ctx, request.clone()).await.unwrap();
        engine
            .cancel_reservation(&ctx, OrderNumber::new(42).unwrap())
            .await
            .unwrap();

        let err = engine.make_reservation(&ctx, request).await.unwrap_err();
        assert_eq!(
            err,
            InventoryError::AlreadyProcessed(OrderNumber::new(42).unwrap())
        );
        assert_eq!(engine.amount_in_stock(&ctx, &article("W1")).await.unwrap(), 5);
    }
}
