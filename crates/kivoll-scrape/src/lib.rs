//! Scrape targets, HTTP session handling and parsers for the kivoll
//! worker.
//!
//! The worker collects two kinds of data on a schedule: occupancy of
//! the Kletterzentrum climbing gym (scraped from its public page) and
//! weather observations and forecasts for the configured locations
//! (fetched from a forecast API). Parsed results are persisted through
//! [`kivoll_store`].

pub mod config;
pub mod error;
pub mod failure;
pub mod jobs;
pub mod kletterzentrum;
pub mod mock;
pub mod orchestrator;
pub mod session;
pub mod targets;
pub mod weather;

pub use config::Config;
pub use error::{Error, Result};
pub use failure::ErrorLog;
pub use orchestrator::{ScrapeArgs, run};
pub use session::{CachingSession, HttpTransport, ReqwestTransport, RetryingHttpSession};
