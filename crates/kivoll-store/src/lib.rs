//! SQLite persistence for the kivoll worker.
//!
//! This crate provides the relational store backing the scrape pipeline:
//!
//! - Connection management with environment-driven backend selection
//! - Ordered, idempotent `.sql` migrations tracked in a `migrations` table
//! - A lazily loaded parameter-schema cache backed by the
//!   `weather_parameters` reference table
//! - Dynamic-column weather upserts and fixed-column occupancy inserts
//!
//! # Example
//!
//! ```no_run
//! use kivoll_store::Store;
//!
//! let store = Store::open("data/kivoll.sqlite3")?;
//! store.apply_migrations()?;
//! # Ok::<(), kivoll_store::Error>(())
//! ```

mod error;
mod migrations;
mod schema;
mod store;
mod weather;

pub use error::{Error, Result};
pub use migrations::MIGRATIONS;
pub use schema::ParameterSchemaCache;
pub use store::{Backend, Dialect, Store};
pub use weather::WeatherValues;

/// Default SQLite database filename inside the data directory.
pub const DATABASE_FILE: &str = "kivoll.sqlite3";
