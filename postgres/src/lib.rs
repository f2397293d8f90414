//! `PostgreSQL` inventory store for Stockroom.
//!
//! [`PgInventoryStore`] implements [`InventoryStore`](stockroom_core::store::InventoryStore)
//! on top of an sqlx connection pool:
//!
//! - Transactions run at `SERIALIZABLE` isolation; conflicts surface as
//!   [`StoreError::Database`](stockroom_core::store::StoreError::Database)
//! - Statements outside a transaction run on a pooled connection and autocommit
//! - Schema migrations ship with the crate (`migrations/`)
//!
//! # Example
//!
//! ```ignore
//! use stockroom_postgres::PgInventoryStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgInventoryStore::connect("postgres://localhost/stockroom", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
pub mod store;

pub use store::{describe_metrics, PgInventoryStore, PgTransaction, SERIALIZATION_FAILURES};
