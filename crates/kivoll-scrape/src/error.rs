//! Error types for kivoll-scrape.

use std::path::PathBuf;

/// Result type for kivoll-scrape operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scraping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// All retry attempts for a request were exhausted.
    #[error("Request to {url} failed after {attempts} attempts")]
    RetryExhausted { url: String, attempts: u32 },

    /// The transport could not complete a request at all.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A non-retryable HTTP status.
    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// A dry run was requested but no cached page exists.
    #[error("No cached page at {path}; run without --dry-run first")]
    CacheMiss { path: PathBuf },

    /// A time of day that is not HH:MM.
    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTimeFormat(String),

    /// A timezone string the worker cannot interpret.
    #[error("Invalid timezone '{0}', expected 'UTC' or a fixed offset like '+01:00'")]
    InvalidTimezone(String),

    /// A semantic problem with the configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A state file exists but does not parse as JSON.
    #[error("Malformed JSON in {path}: {source}")]
    MalformedJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A state file carries a version this worker does not know.
    #[error("File {path} has unknown version {version}")]
    UnknownVersion { path: PathBuf, version: i64 },

    /// The embedded default asset failed to parse. Build defect.
    #[error("Embedded default asset is corrupt: {0}")]
    DefaultAssetCorrupt(#[source] serde_json::Error),

    /// Storage layer error.
    #[error(transparent)]
    Store(#[from] kivoll_store::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Coarse category used in the persistent error log.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RetryExhausted { .. } | Error::Transport(_) | Error::Status { .. } => {
                "TransientNetworkError"
            }
            Error::CacheMiss { .. } | Error::Io(_) => "StorageError",
            Error::InvalidTimeFormat(_) | Error::InvalidTimezone(_) => "ValidationError",
            Error::Config(_)
            | Error::MalformedJson { .. }
            | Error::UnknownVersion { .. }
            | Error::DefaultAssetCorrupt(_) => "ConfigError",
            Error::Store(_) => "StorageError",
        }
    }
}
