//! # Stockroom Testing
//!
//! Test doubles and helpers for the Stockroom workspace.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: transactional in-memory store with fault injection
//! - [`InMemoryQuerySource`] / [`InMemoryReplySink`]: message bus doubles
//! - Mock environment: [`FixedClock`], [`RecordingMetrics`]
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use stockroom_testing::{test_clock, InMemoryInventoryStore, RecordingMetrics};
//!
//! #[tokio::test]
//! async fn reservation_takes_stock() {
//!     let store = Arc::new(InMemoryInventoryStore::new());
//!     let engine = InventoryEngine::new(
//!         store.clone(),
//!         OrderNumbering::default(),
//!         Arc::new(test_clock()),
//!         Arc::new(RecordingMetrics::default()),
//!     );
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use stockroom_core::environment::Clock;

pub mod bus;
pub mod store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use stockroom_core::metrics::InventoryMetrics;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use stockroom_testing::mocks::FixedClock;
    /// use stockroom_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Counter values captured by [`RecordingMetrics`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MetricsSnapshot {
        /// Canceled reservations.
        pub canceled: u64,
        /// Local-pickup reservations placed.
        pub local_placed: u64,
        /// Internet reservations placed.
        pub internet_placed: u64,
    }

    /// [`InventoryMetrics`] that counts calls.
    #[derive(Debug, Default)]
    pub struct RecordingMetrics {
        canceled: AtomicU64,
        local_placed: AtomicU64,
        internet_placed: AtomicU64,
    }

    impl RecordingMetrics {
        /// Current counter values.
        #[must_use]
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                canceled: self.canceled.load(Ordering::SeqCst),
                local_placed: self.local_placed.load(Ordering::SeqCst),
                internet_placed: self.internet_placed.load(Ordering::SeqCst),
            }
        }
    }

    impl InventoryMetrics for RecordingMetrics {
        fn order_canceled(&self) {
            self.canceled.fetch_add(1, Ordering::SeqCst);
        }

        fn local_order_placed(&self) {
            self.local_placed.fetch_add(1, Ordering::SeqCst);
        }

        fn internet_order_placed(&self) {
            self.internet_placed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    #![allow(clippy::unwrap_used)] // strategies only produce valid codes

    use proptest::prelude::*;
    use stockroom_core::article::ArticleCode;
    use stockroom_core::types::{LineItem, Price};

    /// Plain article codes without a condition suffix.
    pub fn article_code() -> impl Strategy<Value = ArticleCode> {
        "[A-Z][A-Z0-9-]{0,8}".prop_map(|code| ArticleCode::new(code).unwrap())
    }

    /// Prices between 0.01 and 1000.00.
    pub fn price() -> impl Strategy<Value = Price> {
        (1_i64..=100_000).prop_map(|cents| Price::from_cents(cents).unwrap())
    }

    /// 1 to `max_lines` lines with unique articles and quantities 1..=`max_quantity`.
    pub fn unique_lines(max_lines: usize, max_quantity: u32) -> impl Strategy<Value = Vec<LineItem>> {
        prop::collection::btree_map(article_code(), (price(), 1..=max_quantity), 1..=max_lines)
            .prop_map(|lines| {
                lines
                    .into_iter()
                    .map(|(article, (price, quantity))| LineItem {
                        article,
                        price,
                        quantity,
                    })
                    .collect()
            })
    }
}

// Re-export commonly used items
pub use bus::{InMemoryQuerySource, InMemoryReplySink};
pub use mocks::{test_clock, FixedClock, MetricsSnapshot, RecordingMetrics};
pub use store::{InMemoryInventoryStore, MemTx, StoreStats};
