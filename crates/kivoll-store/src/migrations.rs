//! Ordered, idempotent schema migrations.
//!
//! Migration files are embedded `.sql` resources named with a numeric
//! prefix for ordering. Each file is applied once inside its own
//! transaction and recorded in the `migrations` table; empty files are
//! skipped without being recorded, so a later non-empty replacement at
//! the same name is still picked up.

use rusqlite::Connection;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::Store;

/// Packaged migrations, ordered by filename.
pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_initial_weather.sql",
        include_str!("migrations/0001_initial_weather.sql"),
    ),
    (
        "0002_initial_kletterzentrum.sql",
        include_str!("migrations/0002_initial_kletterzentrum.sql"),
    ),
];

impl Store {
    /// Apply all pending migrations.
    ///
    /// Returns the number of migration files applied. Any statement
    /// failure rolls back that file's statements and aborts the run;
    /// already-applied files remain applied.
    pub fn apply_migrations(&self) -> Result<usize> {
        apply_set(self.connection(), MIGRATIONS)
    }
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations
         (
             id         TEXT PRIMARY KEY,
             filename   TEXT,
             applied_at TEXT
         )",
        [],
    )?;
    Ok(())
}

fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM migrations")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Apply a set of (filename, sql) migrations in filename order.
pub(crate) fn apply_set(conn: &Connection, migrations: &[(&str, &str)]) -> Result<usize> {
    ensure_migrations_table(conn)?;
    let applied = applied_migrations(conn)?;

    let mut ordered: Vec<&(&str, &str)> = migrations.iter().collect();
    ordered.sort_by_key(|(name, _)| *name);

    let mut count = 0;
    for (name, sql) in ordered {
        if applied.iter().any(|id| id == name) {
            debug!("Migration {} already applied, skipping", name);
            continue;
        }
        if sql.trim().is_empty() {
            // Not recorded, so a later non-empty version still runs.
            debug!("Skipping empty migration file {}", name);
            continue;
        }

        info!("Applying SQL migration {}", name);
        apply_one(conn, name, sql)?;
        count += 1;
    }

    if count > 0 {
        info!("Applied {} pending migration(s)", count);
    }
    Ok(count)
}

fn apply_one(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for statement in sql.split(';') {
        let stmt = statement.trim();
        if stmt.is_empty() {
            continue;
        }
        tx.execute(stmt, []).map_err(|e| Error::MigrationFailed {
            file: name.to_string(),
            source: e,
        })?;
    }

    let applied_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap();
    let stem = name.strip_suffix(".sql").unwrap_or(name);
    tx.execute(
        "INSERT INTO migrations (id, filename, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, stem, applied_at],
    )?;

    tx.commit()?;
    Ok(())
}
