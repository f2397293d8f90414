//! Error kinds surfaced by the consistency engine.

use crate::article::ArticleCode;
use crate::order::OrderNumber;
use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by every inventory operation.
///
/// Each variant maps to exactly one externally visible status, see
/// [`InventoryError::status_code`]. Transport adapters should answer with
/// [`InventoryError::public_message`] and keep the `Display` output for logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Malformed input, detected before any storage access.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No matching stock or reservation row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The reservation is not in a `New*` status, or its order number is taken.
    #[error("Order {0} is already processed")]
    AlreadyProcessed(OrderNumber),

    /// A line asks for more units than are available.
    #[error("Insufficient stock for {article}: requested {requested}, available {available}")]
    InsufficientStock {
        /// The short article.
        article: ArticleCode,
        /// Units requested by the line.
        requested: u32,
        /// Units available when the line was checked.
        available: u32,
    },

    /// The caller's deadline expired.
    #[error("Deadline exceeded")]
    Timeout,

    /// Any other persistence failure, isolation conflicts included.
    #[error("Storage fault: {0}")]
    Storage(String),
}

/// Discriminant of [`InventoryError`], for metrics labels and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`InventoryError::Validation`].
    Validation,
    /// See [`InventoryError::NotFound`].
    NotFound,
    /// See [`InventoryError::AlreadyProcessed`].
    AlreadyProcessed,
    /// See [`InventoryError::InsufficientStock`].
    InsufficientStock,
    /// See [`InventoryError::Timeout`].
    Timeout,
    /// See [`InventoryError::Storage`].
    Storage,
}

impl ErrorKind {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::AlreadyProcessed => "already_processed",
            Self::InsufficientStock => "insufficient_stock",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
        }
    }
}

impl InventoryError {
    /// The error's kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::Timeout => ErrorKind::Timeout,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// HTTP-style status a transport adapter answers with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyProcessed | ErrorKind::InsufficientStock => 409,
            ErrorKind::Timeout => 504,
            ErrorKind::Storage => 500,
        }
    }

    /// Message safe to show outside the process.
    ///
    /// Storage details never leave the process; every other kind only carries data
    /// the caller sent in the first place.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// `true` for kinds a caller may reasonably retry unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Storage)
    }
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Database(reason) => Self::Storage(reason),
            StoreError::TransactionClosed => {
                Self::Storage("transaction handle already closed".to_string())
            }
        }
    }
}
