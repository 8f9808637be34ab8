//! Main store implementation.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use kivoll_types::OccupancyReading;

use crate::error::{Error, Result};

/// SQL dialect spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgresql",
        }
    }
}

/// Where the relational store lives.
///
/// The network backend is selected only when host, credential and the
/// `postgresql` driver are all present in the environment; anything else
/// falls back to the embedded database file.
#[derive(Debug, Clone)]
pub enum Backend {
    /// SQLite file in the data directory.
    Embedded(PathBuf),
    /// Network database reachable at `host`.
    Network { host: String, driver: String },
}

impl Backend {
    /// Resolve the backend from `DB_HOST`, `WORKER_DB_PASSWORD` and
    /// `DB_DRIVER`.
    pub fn from_env(data_dir: &Path) -> Backend {
        let host = std::env::var("DB_HOST").ok().filter(|v| !v.is_empty());
        let password = std::env::var("WORKER_DB_PASSWORD")
            .ok()
            .filter(|v| !v.is_empty());
        let driver = std::env::var("DB_DRIVER").ok();

        match (host, password, driver.as_deref()) {
            (Some(host), Some(_), Some("postgresql")) => Backend::Network {
                host,
                driver: "postgresql".to_string(),
            },
            _ => Backend::Embedded(data_dir.join(crate::DATABASE_FILE)),
        }
    }
}

/// SQLite-backed store for scraped weather and occupancy data.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    dialect: Dialect,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        Ok(Self {
            conn,
            dialect: Dialect::Sqlite,
        })
    }

    /// Open the store for a resolved backend.
    ///
    /// Only the embedded driver is bundled in this build; a network
    /// selection is rejected up front instead of mis-generating SQL later.
    pub fn open_backend(backend: &Backend) -> Result<Self> {
        match backend {
            Backend::Embedded(path) => Self::open(path),
            Backend::Network { driver, .. } => Err(Error::UnsupportedDialect(driver.clone())),
        }
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            dialect: Dialect::Sqlite,
        })
    }

    /// The dialect used for SQL generation.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Access the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // === Transaction control ===
    //
    // Each scrape target runs inside its own transaction; the orchestrator
    // commits on success and rolls back on failure.

    /// Begin an explicit transaction.
    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back the current transaction.
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

// Occupancy operations
impl Store {
    /// Insert one parsed occupancy reading.
    ///
    /// Readings are append-only; a fetch is never updated after the fact.
    pub fn insert_occupancy(&self, fetched_at: i64, reading: &OccupancyReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO kletterzentrum_data
             (fetched_at, overall, seil, boulder, open_sectors, total_sectors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                fetched_at,
                reading.overall,
                reading.seil,
                reading.boulder,
                reading.open_sectors,
                reading.total_sectors,
            ],
        )?;

        debug!("Inserted occupancy reading at {}", fetched_at);
        Ok(self.conn.last_insert_rowid())
    }

    /// Get the most recent occupancy reading, if any.
    pub fn latest_occupancy(&self) -> Result<Option<(i64, OccupancyReading)>> {
        let mut stmt = self.conn.prepare(
            "SELECT fetched_at, overall, seil, boulder, open_sectors, total_sectors
             FROM kletterzentrum_data ORDER BY fetched_at DESC, id DESC LIMIT 1",
        )?;

        let row = stmt
            .query_row([], |row| {
                Ok((
                    row.get(0)?,
                    OccupancyReading {
                        overall: row.get(1)?,
                        seil: row.get(2)?,
                        boulder: row.get(3)?,
                        open_sectors: row.get(4)?,
                        total_sectors: row.get(5)?,
                    },
                ))
            })
            .optional()?;

        Ok(row)
    }
}
