//! # Stockroom Core
//!
//! Domain types and collaborator traits for the Stockroom inventory engine.
//!
//! The crate has no I/O of its own. It defines:
//!
//! - **Domain values**: [`article::ArticleCode`], [`order::OrderNumber`],
//!   [`types::Price`] and the stock, reservation and sold records in [`types`]
//! - **Validation**: pure predicates in [`validation`], applied by every typed
//!   constructor before anything reaches storage
//! - **Order numbering**: the register-slot boundary in [`order::OrderNumbering`]
//! - **Errors**: [`error::InventoryError`] and its status mapping
//! - **Execution context**: [`context::ExecCtx`], the explicit carrier of the
//!   open transaction, its commit hooks and the caller's deadline
//! - **Collaborator traits**: [`store::InventoryStore`], [`bus::QuerySource`],
//!   [`bus::ReplySink`], [`metrics::InventoryMetrics`] and
//!   [`environment::Clock`]
//!
//! Implementations live in `stockroom-postgres`, `stockroom-redpanda` and
//! `stockroom-testing`; the engine that ties them together lives in
//! `stockroom-runtime`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod article;
pub mod bus;
pub mod context;
pub mod error;
pub mod metrics;
pub mod order;
pub mod store;
pub mod types;
pub mod validation;

pub use article::{ArticleCode, Condition};
pub use context::ExecCtx;
pub use error::{ErrorKind, InventoryError};
pub use order::{OrderClass, OrderNumber, OrderNumbering, ReservationStatus};
pub use types::{
    DateRange, LineItem, Price, Reservation, ReservationRequest, SaleRequest, SoldRecord,
    StockCountReply, StockItem,
};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use stockroom_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
