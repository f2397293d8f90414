//! Stock, reservation and sale records.

use crate::article::ArticleCode;
use crate::error::InventoryError;
use crate::order::{OrderNumber, OrderNumbering, ReservationStatus};
use crate::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Unit price in minor currency units (cents). Always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Price(i64);

impl Price {
    /// Validate and wrap a price in cents.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] unless `cents` is positive.
    pub fn from_cents(cents: i64) -> Result<Self, InventoryError> {
        if validation::is_valid_price(cents) {
            Ok(Self(cents))
        } else {
            Err(InventoryError::Validation(format!(
                "price must be positive, got {cents}"
            )))
        }
    }

    /// The price in cents.
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl TryFrom<i64> for Price {
    type Error = InventoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_cents(value)
    }
}

impl From<Price> for i64 {
    fn from(price: Price) -> Self {
        price.0
    }
}

/// A row of the stock table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Article code (primary key).
    pub article: ArticleCode,
    /// Display name.
    pub name: String,
    /// Current unit price.
    pub price: Price,
    /// Units available for reservation or sale.
    pub amount: u32,
}

impl StockItem {
    /// Check the fields the type system does not already guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the name is blank.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if validation::is_valid_product_name(&self.name) {
            Ok(())
        } else {
            Err(InventoryError::Validation(format!(
                "product name for {} must not be blank",
                self.article
            )))
        }
    }
}

/// One article held by a reservation, or one article of a direct sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Reserved or sold article.
    pub article: ArticleCode,
    /// Unit price at the time the line was created.
    pub price: Price,
    /// Number of units.
    pub quantity: u32,
}

impl LineItem {
    /// Check the line quantity.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the quantity is zero.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if validation::is_valid_quantity(i64::from(self.quantity)) {
            Ok(())
        } else {
            Err(InventoryError::Validation(format!(
                "quantity for {} must be positive",
                self.article
            )))
        }
    }
}

/// Validate a batch of lines: non-empty, each line valid, and, when `unique` is
/// set, no article repeated.
fn validate_lines(lines: &[LineItem], unique: bool) -> Result<(), InventoryError> {
    if lines.is_empty() {
        return Err(InventoryError::Validation(
            "at least one line item is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        line.validate()?;
        if unique && !seen.insert(&line.article) {
            return Err(InventoryError::Validation(format!(
                "article {} appears more than once",
                line.article
            )));
        }
    }
    Ok(())
}

/// Payload of a new reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Register slot or customer order number.
    pub order_number: OrderNumber,
    /// Reserved lines, articles unique.
    pub lines: Vec<LineItem>,
    /// Initial status, one of the `New*` statuses matching the order number range.
    pub status: ReservationStatus,
}

impl ReservationRequest {
    /// Check every reservation invariant that does not need storage.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the lines are empty, repeat an
    /// article or have a zero quantity, or if the status does not match the order
    /// number range.
    pub fn validate(&self, numbering: &OrderNumbering) -> Result<(), InventoryError> {
        validate_lines(&self.lines, true)?;
        if !numbering.accepts(self.order_number, self.status) {
            return Err(InventoryError::Validation(format!(
                "status {} is not allowed for order number {} (register slots: 1..={})",
                self.status,
                self.order_number,
                numbering.register_slots()
            )));
        }
        Ok(())
    }
}

/// A stored reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Register slot or customer order number.
    pub order_number: OrderNumber,
    /// Reserved lines in insertion order.
    pub lines: Vec<LineItem>,
    /// When the reservation was placed.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Current status.
    pub status: ReservationStatus,
}

/// Lines of a direct sale, without a prior reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    /// Sold lines.
    pub lines: Vec<LineItem>,
}

impl SaleRequest {
    /// Check every line.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if there are no lines or any line has
    /// a zero quantity.
    pub fn validate(&self) -> Result<(), InventoryError> {
        validate_lines(&self.lines, false)
    }
}

/// Entry of the append-only sold ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldRecord {
    /// Sold article.
    pub article: ArticleCode,
    /// Unit price at the time of sale.
    pub price: Price,
    /// Units sold.
    pub quantity: u32,
    /// Time of sale.
    pub sold_at: DateTime<Utc>,
}

impl SoldRecord {
    /// Ledger entry for `line` sold at `sold_at`.
    #[must_use]
    pub fn from_line(line: &LineItem, sold_at: DateTime<Utc>) -> Self {
        Self {
            article: line.article.clone(),
            price: line.price,
            quantity: line.quantity,
            sold_at,
        }
    }
}

/// Inclusive time range for ledger queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl DateRange {
    /// Validate and build a range.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if `from` is after `to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, InventoryError> {
        if validation::is_valid_date_range(from, to) {
            Ok(Self { from, to })
        } else {
            Err(InventoryError::Validation(format!(
                "date range start {from} is after its end {to}"
            )))
        }
    }

    /// Range start (inclusive).
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.from
    }

    /// Range end (inclusive).
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.to
    }

    /// `true` when `at` lies within the range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Outbound answer to a stock-quantity query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCountReply {
    /// Store instance that answered.
    pub instance: String,
    /// Queried article.
    pub article: String,
    /// Units available; zero for unknown articles.
    pub count: u32,
}
