//! Shared data types for the kivoll worker.
//!
//! This crate holds the plain types exchanged between the scraping
//! pipeline and the storage layer: weather resolutions, parsed occupancy
//! readings and scrape target descriptors. It deliberately carries no
//! I/O so that both `kivoll-store` and `kivoll-scrape` can depend on it.

mod types;

pub use types::{OccupancyReading, Resolution, TargetSpec};
