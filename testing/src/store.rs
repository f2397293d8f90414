//! In-memory inventory store with transactional semantics.
//!
//! Every transaction works on a private copy of the tables taken at `begin`.
//! Commit publishes the copy, unless another writer committed in the meantime, in
//! which case commit fails the way a serializable database reports an isolation
//! conflict. Statements outside a transaction apply directly to the committed
//! tables.
//!
//! Fault injection covers what the engine must survive: failing statements,
//! commits and rollbacks, slow statements, and a status update that matches
//! fewer rows than expected.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockroom_core::article::ArticleCode;
use stockroom_core::context::ExecCtx;
use stockroom_core::order::{OrderNumber, ReservationStatus};
use stockroom_core::store::{InventoryStore, StoreError, StoreFuture, TransactionalStore};
use stockroom_core::types::{DateRange, LineItem, Price, Reservation, SoldRecord, StockItem};

/// Handle to an open in-memory transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemTx(u64);

/// Call counters, for asserting on executor behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Transactions opened.
    pub begins: usize,
    /// Commit calls.
    pub commits: usize,
    /// Rollback calls.
    pub rollbacks: usize,
    /// Data statements attempted, in or out of a transaction.
    pub statements: usize,
}

#[derive(Clone, Debug)]
struct ReservationRow {
    order: OrderNumber,
    line: LineItem,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: ReservationStatus,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    stock: BTreeMap<ArticleCode, StockItem>,
    on_processing: Vec<ReservationRow>,
    sold: Vec<SoldRecord>,
}

#[derive(Debug)]
struct OpenTx {
    base_version: u64,
    tables: Tables,
    dirty: bool,
}

#[derive(Debug, Default)]
struct Faults {
    failing_statements: usize,
    fail_commit: bool,
    fail_rollback: bool,
    latency: Option<Duration>,
    shrunk_updates: HashSet<OrderNumber>,
}

#[derive(Debug, Default)]
struct State {
    committed: Tables,
    version: u64,
    open: HashMap<u64, OpenTx>,
    next_tx: u64,
    stats: StoreStats,
    faults: Faults,
}

/// In-memory [`InventoryStore`] for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use stockroom_testing::InMemoryInventoryStore;
/// use stockroom_core::article::ArticleCode;
///
/// let store = InMemoryInventoryStore::new();
/// let w1 = ArticleCode::new("W1").unwrap();
/// store.seed_stock(&w1, "Widget", 1_999, 10);
/// assert_eq!(store.committed_amount(&w1), Some(10));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a committed stock row.
    pub fn seed_stock(&self, article: &ArticleCode, name: &str, price_cents: i64, amount: u32) {
        let mut state = self.state.lock().unwrap();
        state.committed.stock.insert(
            article.clone(),
            StockItem {
                article: article.clone(),
                name: name.to_string(),
                price: Price::from_cents(price_cents).unwrap(),
                amount,
            },
        );
        state.version += 1;
    }

    /// Committed amount of `article`.
    #[must_use]
    pub fn committed_amount(&self, article: &ArticleCode) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .committed
            .stock
            .get(article)
            .map(|item| item.amount)
    }

    /// Committed reservation `order`.
    #[must_use]
    pub fn committed_reservation(&self, order: OrderNumber) -> Option<Reservation> {
        assemble(&self.state.lock().unwrap().committed, order).unwrap()
    }

    /// Committed sold ledger, in insertion order.
    #[must_use]
    pub fn sold_records(&self) -> Vec<SoldRecord> {
        self.state.lock().unwrap().committed.sold.clone()
    }

    /// Call counters so far.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.state.lock().unwrap().stats
    }

    /// Transactions begun and not yet resolved.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    /// Fail the next `count` data statements with a database error.
    pub fn fail_statements(&self, count: usize) {
        self.state.lock().unwrap().faults.failing_statements = count;
    }

    /// Fail the next commit with a database error. The transaction is discarded.
    pub fn fail_next_commit(&self) {
        self.state.lock().unwrap().faults.fail_commit = true;
    }

    /// Fail the next rollback with a database error. The transaction is discarded.
    pub fn fail_next_rollback(&self) {
        self.state.lock().unwrap().faults.fail_rollback = true;
    }

    /// Delay every data statement by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().faults.latency = latency;
    }

    /// Make the next status update of `order` match one row fewer than it should,
    /// as if a line had changed underneath the reader.
    pub fn shrink_next_status_update(&self, order: OrderNumber) {
        self.state
            .lock()
            .unwrap()
            .faults
            .shrunk_updates
            .insert(order);
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().unwrap().faults.latency
    }

    /// Run one statement against the tables visible to `ctx`.
    fn statement<R>(
        &self,
        ctx: &ExecCtx<MemTx>,
        write: bool,
        f: impl FnOnce(&mut Tables, &mut Faults) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.stats.statements += 1;
        if state.faults.failing_statements > 0 {
            state.faults.failing_statements -= 1;
            return Err(StoreError::Database(
                "injected statement failure".to_string(),
            ));
        }

        match ctx.transaction() {
            Some(MemTx(id)) => {
                let open = state
                    .open
                    .get_mut(id)
                    .ok_or(StoreError::TransactionClosed)?;
                let result = f(&mut open.tables, &mut state.faults)?;
                open.dirty |= write;
                Ok(result)
            }
            None => {
                let result = f(&mut state.committed, &mut state.faults)?;
                if write {
                    state.version += 1;
                }
                Ok(result)
            }
        }
    }

    fn run<'a, R, F>(&'a self, ctx: &'a ExecCtx<MemTx>, write: bool, f: F) -> StoreFuture<'a, R>
    where
        R: Send + 'a,
        F: FnOnce(&mut Tables, &mut Faults) -> Result<R, StoreError> + Send + 'a,
    {
        Box::pin(async move {
            if let Some(latency) = self.latency() {
                tokio::time::sleep(latency).await;
            }
            self.statement(ctx, write, f)
        })
    }
}

fn not_found(article: &ArticleCode) -> StoreError {
    StoreError::NotFound(format!("stock {article}"))
}

fn stock_mut<'t>(tables: &'t mut Tables, article: &ArticleCode) -> Result<&'t mut StockItem, StoreError> {
    tables.stock.get_mut(article).ok_or_else(|| not_found(article))
}

/// Rebuild a reservation from its rows.
fn assemble(tables: &Tables, order: OrderNumber) -> Result<Option<Reservation>, StoreError> {
    let rows: Vec<&ReservationRow> = tables
        .on_processing
        .iter()
        .filter(|row| row.order == order)
        .collect();
    let Some(first) = rows.first() else {
        return Ok(None);
    };
    if rows.iter().any(|row| row.status != first.status) {
        return Err(StoreError::Database(format!(
            "rows of order {order} disagree on status"
        )));
    }
    Ok(Some(Reservation {
        order_number: order,
        lines: rows.iter().map(|row| row.line.clone()).collect(),
        created_at: first.created_at,
        updated_at: rows
            .iter()
            .map(|row| row.updated_at)
            .max()
            .unwrap_or(first.updated_at),
        status: first.status,
    }))
}

impl TransactionalStore for InMemoryInventoryStore {
    type Tx = MemTx;

    fn begin(&self) -> StoreFuture<'_, MemTx> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.stats.begins += 1;
            state.next_tx += 1;
            let id = state.next_tx;
            let snapshot = OpenTx {
                base_version: state.version,
                tables: state.committed.clone(),
                dirty: false,
            };
            state.open.insert(id, snapshot);
            Ok(MemTx(id))
        })
    }

    fn commit(&self, tx: MemTx) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.stats.commits += 1;
            let open = state.open.remove(&tx.0).ok_or(StoreError::TransactionClosed)?;
            if std::mem::take(&mut state.faults.fail_commit) {
                return Err(StoreError::Database("injected commit failure".to_string()));
            }
            if !open.dirty {
                return Ok(());
            }
            if open.base_version != state.version {
                return Err(StoreError::Database(
                    "could not serialize access due to concurrent update".to_string(),
                ));
            }
            state.committed = open.tables;
            state.version += 1;
            Ok(())
        })
    }

    fn rollback(&self, tx: MemTx) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.stats.rollbacks += 1;
            state.open.remove(&tx.0).ok_or(StoreError::TransactionClosed)?;
            if std::mem::take(&mut state.faults.fail_rollback) {
                return Err(StoreError::Database(
                    "injected rollback failure".to_string(),
                ));
            }
            Ok(())
        })
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_stock<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        item: &'a StockItem,
    ) -> StoreFuture<'a, ()> {
        self.run(ctx, true, move |tables, _| {
            if tables.stock.contains_key(&item.article) {
                return Err(StoreError::Database(format!(
                    "duplicate key value violates unique constraint \"stock_pkey\": {}",
                    item.article
                )));
            }
            tables.stock.insert(item.article.clone(), item.clone());
            Ok(())
        })
    }

    fn stock_item<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, StockItem> {
        self.run(ctx, false, move |tables, _| {
            tables
                .stock
                .get(article)
                .cloned()
                .ok_or_else(|| not_found(article))
        })
    }

    fn stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        article: &'a ArticleCode,
    ) -> StoreFuture<'a, u32> {
        self.run(ctx, false, move |tables, _| {
            tables
                .stock
                .get(article)
                .map(|item| item.amount)
                .ok_or_else(|| not_found(article))
        })
    }

    fn set_stock_amount<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        article: &'a ArticleCode,
        amount: u32,
    ) -> StoreFuture<'a, ()> {
        self.run(ctx, true, move |tables, _| {
            stock_mut(tables, article)?.amount = amount;
            Ok(())
        })
    }

    fn set_stock_price<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        article: &'a ArticleCode,
        price: Price,
    ) -> StoreFuture<'a, ()> {
        self.run(ctx, true, move |tables, _| {
            stock_mut(tables, article)?.price = price;
            Ok(())
        })
    }

    fn insert_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        reservation: &'a Reservation,
    ) -> StoreFuture<'a, ()> {
        self.run(ctx, true, move |tables, _| {
            for line in &reservation.lines {
                let taken = tables.on_processing.iter().any(|row| {
                    row.order == reservation.order_number && row.line.article == line.article
                });
                if taken {
                    return Err(StoreError::Database(format!(
                        "duplicate key value violates unique constraint \"on_processing_order_article\": {} {}",
                        reservation.order_number, line.article
                    )));
                }
                tables.on_processing.push(ReservationRow {
                    order: reservation.order_number,
                    line: line.clone(),
                    created_at: reservation.created_at,
                    updated_at: reservation.updated_at,
                    status: reservation.status,
                });
            }
            Ok(())
        })
    }

    fn load_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        order: OrderNumber,
    ) -> StoreFuture<'a, Option<Reservation>> {
        self.run(ctx, false, move |tables, _| assemble(tables, order))
    }

    fn update_reservation_status<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        order: OrderNumber,
        lines: &'a [LineItem],
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64> {
        self.run(ctx, true, move |tables, faults| {
            let mut budget = usize::MAX;
            if faults.shrunk_updates.remove(&order) {
                let matching = tables
                    .on_processing
                    .iter()
                    .filter(|row| row.order == order && row.status.is_open())
                    .count();
                budget = matching.saturating_sub(1);
            }

            let mut matched = 0_u64;
            for row in &mut tables.on_processing {
                if budget == 0 {
                    break;
                }
                if row.order == order
                    && row.status.is_open()
                    && lines.iter().any(|line| *line == row.line)
                {
                    row.status = status;
                    row.updated_at = at;
                    matched += 1;
                    budget -= 1;
                }
            }
            Ok(matched)
        })
    }

    fn delete_reservation<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        order: OrderNumber,
    ) -> StoreFuture<'a, u64> {
        self.run(ctx, true, move |tables, _| {
            let before = tables.on_processing.len();
            tables.on_processing.retain(|row| row.order != order);
            Ok((before - tables.on_processing.len()) as u64)
        })
    }

    fn insert_sold<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        record: &'a SoldRecord,
    ) -> StoreFuture<'a, ()> {
        self.run(ctx, true, move |tables, _| {
            tables.sold.push(record.clone());
            Ok(())
        })
    }

    fn sold_between<'a>(
        &'a self,
        ctx: &'a ExecCtx<MemTx>,
        range: &'a DateRange,
    ) -> StoreFuture<'a, Vec<SoldRecord>> {
        self.run(ctx, false, move |tables, _| {
            let mut records: Vec<SoldRecord> = tables
                .sold
                .iter()
                .filter(|record| range.contains(record.sold_at))
                .cloned()
                .collect();
            records.sort_by_key(|record| record.sold_at);
            Ok(records)
        })
    }
}
