//! Row decoding.

use chrono::{DateTime, Utc};
use stockroom_core::article::ArticleCode;
use stockroom_core::order::{OrderNumber, ReservationStatus};
use stockroom_core::store::StoreError;
use stockroom_core::types::{LineItem, Price, Reservation, SoldRecord, StockItem};

/// `(name, price, amount)` from `stock`.
pub type StockRow = (String, i64, i64);

/// `(article, price, amount, date_of_reservation, updated_at, status)` from `on_processing`.
pub type ReservationRow = (String, i64, i64, DateTime<Utc>, DateTime<Utc>, String);

/// `(article, price, amount, date_of_sale)` from `sold`.
pub type SoldRow = (String, i64, i64, DateTime<Utc>);

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Database(format!("Corrupt {what} in database: {detail}"))
}

pub fn article(raw: String) -> Result<ArticleCode, StoreError> {
    ArticleCode::new(raw).map_err(|e| corrupt("article code", e))
}

pub fn price(cents: i64) -> Result<Price, StoreError> {
    Price::from_cents(cents).map_err(|e| corrupt("price", e))
}

pub fn quantity(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| corrupt("quantity", raw))
}

pub fn stock_item(article: &ArticleCode, (name, cents, amount): StockRow) -> Result<StockItem, StoreError> {
    Ok(StockItem {
        article: article.clone(),
        name,
        price: price(cents)?,
        amount: quantity(amount)?,
    })
}

pub fn sold_record((raw, cents, amount, sold_at): SoldRow) -> Result<SoldRecord, StoreError> {
    Ok(SoldRecord {
        article: article(raw)?,
        price: price(cents)?,
        quantity: quantity(amount)?,
        sold_at,
    })
}

/// Rebuild a reservation from its rows, in insertion order.
///
/// All rows of one order must share a status.
pub fn reservation(
    order: OrderNumber,
    rows: Vec<ReservationRow>,
) -> Result<Option<Reservation>, StoreError> {
    let mut rows = rows.into_iter();
    let Some((raw, cents, amount, created_at, mut updated_at, status)) = rows.next() else {
        return Ok(None);
    };
    let status = ReservationStatus::parse(&status).map_err(|e| corrupt("status", e))?;
    let mut lines = vec![LineItem {
        article: article(raw)?,
        price: price(cents)?,
        quantity: quantity(amount)?,
    }];

    for (raw, cents, amount, _, row_updated_at, row_status) in rows {
        if row_status != status.as_str() {
            return Err(StoreError::Database(format!(
                "Rows of order {order} disagree on status"
            )));
        }
        updated_at = updated_at.max(row_updated_at);
        lines.push(LineItem {
            article: article(raw)?,
            price: price(cents)?,
            quantity: quantity(amount)?,
        });
    }

    Ok(Some(Reservation {
        order_number: order,
        lines,
        created_at,
        updated_at,
        status,
    }))
}
