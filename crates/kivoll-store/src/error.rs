//! Error types for kivoll-store.

use std::path::PathBuf;

/// Result type for kivoll-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kivoll-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create the database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The selected backend speaks a dialect this build cannot generate
    /// SQL for.
    #[error("Unsupported database dialect '{0}'")]
    UnsupportedDialect(String),

    /// A migration file failed; its statements were rolled back.
    #[error("Migration {file} failed: {source}")]
    MigrationFailed {
        file: String,
        source: rusqlite::Error,
    },
}
