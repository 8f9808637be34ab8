//! Parameter schema cache.
//!
//! The set of storable weather parameters lives in the
//! `weather_parameters` table so that adding a column in a migration is
//! enough to accept a new parameter. The cache loads that table once per
//! process and validates requested parameter names against it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, warn};

use kivoll_types::Resolution;

use crate::error::Result;
use crate::store::Store;

type SchemaMap = HashMap<Resolution, HashSet<String>>;

/// Lazily loaded map of resolution to accepted parameter names.
///
/// There is no expiry; the schema only changes through migrations, which
/// run before any lookup. `clear` exists for tests and for forcing a
/// reload after out-of-band schema changes.
#[derive(Default)]
pub struct ParameterSchemaCache {
    inner: Mutex<Option<SchemaMap>>,
}

impl ParameterSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the accepted parameter names for a resolution, loading the
    /// schema from the store on first use.
    pub fn get_or_load(&self, store: &Store, resolution: Resolution) -> Result<HashSet<String>> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(load_schema(store)?);
            debug!("Loaded weather parameter schema");
        }
        let map = guard.as_ref().unwrap();
        Ok(map.get(&resolution).cloned().unwrap_or_default())
    }

    /// Drop the cached schema so the next lookup reloads it.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Partition parameter names into (accepted, rejected) for a
    /// resolution. Order of the input is preserved in both halves.
    pub fn validate(
        &self,
        store: &Store,
        resolution: Resolution,
        names: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let accepted_set = self.get_or_load(store, resolution)?;

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for name in names {
            if accepted_set.contains(name) {
                accepted.push(name.clone());
            } else {
                rejected.push(name.clone());
            }
        }
        Ok((accepted, rejected))
    }
}

fn load_schema(store: &Store) -> Result<SchemaMap> {
    let mut stmt = store
        .connection()
        .prepare("SELECT name, resolution FROM weather_parameters")?;

    let mut map: SchemaMap = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        let (name, resolution) = row?;
        match Resolution::from_name(&resolution) {
            Some(res) => {
                map.entry(res).or_default().insert(name);
            }
            None => {
                warn!(
                    "Ignoring weather parameter '{}' with unknown resolution '{}'",
                    name, resolution
                );
            }
        }
    }
    Ok(map)
}
