//! Weather data persistence.
//!
//! Rows are upserted per timestamp. Forecast tables keep one row per
//! (horizon, location, fetch), so re-fetching the same forecast window
//! later produces a new snapshot instead of overwriting the old one;
//! re-running the same fetch replaces its own rows.

use rusqlite::ToSql;
use tracing::{debug, warn};

use kivoll_types::Resolution;

use crate::error::{Error, Result};
use crate::schema::ParameterSchemaCache;
use crate::store::{Dialect, Store};

/// Values accompanying a set of timestamps.
pub enum WeatherValues {
    /// One value per parameter, for a single observation timestamp.
    Scalar(Vec<Option<f64>>),
    /// One series per parameter, indexed like the timestamp list.
    Series(Vec<Vec<Option<f64>>>),
}

impl WeatherValues {
    fn get(&self, param_idx: usize, ts_idx: usize) -> Option<f64> {
        match self {
            WeatherValues::Scalar(values) => values.get(param_idx).copied().flatten(),
            WeatherValues::Series(series) => series
                .get(param_idx)
                .and_then(|vals| vals.get(ts_idx))
                .copied()
                .flatten(),
        }
    }
}

impl Store {
    /// Upsert weather values for one location and resolution.
    ///
    /// Parameter names are validated against the schema cache; unknown
    /// names are dropped with a warning. Returns `Ok(false)` when no
    /// valid parameter remains, `Ok(true)` after rows were written.
    pub fn insert_weather_data(
        &self,
        schema: &ParameterSchemaCache,
        resolution: Resolution,
        location: &str,
        timestamps: &[i64],
        param_names: &[String],
        values: &WeatherValues,
        fetched_at: i64,
    ) -> Result<bool> {
        let accepted = schema.get_or_load(self, resolution)?;

        let mut columns = Vec::new();
        let mut indices = Vec::new();
        for (idx, name) in param_names.iter().enumerate() {
            if accepted.contains(name) {
                columns.push(name.as_str());
                indices.push(idx);
            } else {
                warn!(
                    "Dropping parameter '{}' not in the {} schema",
                    name, resolution
                );
            }
        }

        if columns.is_empty() {
            warn!("No storable {} parameters for {}", resolution, location);
            return Ok(false);
        }

        let sql = upsert_sql(self.dialect(), resolution, &columns)?;
        let mut stmt = self.connection().prepare(&sql)?;

        for (ts_idx, &ts) in timestamps.iter().enumerate() {
            let mut params: Vec<Box<dyn ToSql>> = match resolution {
                // Keyed by fetch time; the observation time is payload.
                Resolution::Current => {
                    vec![Box::new(fetched_at), Box::new(ts), Box::new(location.to_string())]
                }
                // Keyed by forecast horizon plus fetch snapshot.
                Resolution::Hourly | Resolution::Daily => {
                    vec![Box::new(ts), Box::new(fetched_at), Box::new(location.to_string())]
                }
            };
            for &param_idx in &indices {
                params.push(Box::new(values.get(param_idx, ts_idx)));
            }

            stmt.execute(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))?;
        }

        debug!(
            "Stored {} {} row(s) for {}",
            timestamps.len(),
            resolution,
            location
        );
        Ok(true)
    }
}

fn upsert_sql(dialect: Dialect, resolution: Resolution, columns: &[&str]) -> Result<String> {
    if dialect != Dialect::Sqlite {
        return Err(Error::UnsupportedDialect(dialect.as_str().to_string()));
    }

    let key_columns: &[&str] = match resolution {
        Resolution::Current => &["fetched_at", "observed_at", "location"],
        Resolution::Hourly => &["forecast_time", "fetched_at", "location"],
        Resolution::Daily => &["forecast_date", "fetched_at", "location"],
    };

    let all_columns: Vec<&str> = key_columns.iter().chain(columns.iter()).copied().collect();
    let placeholders: Vec<String> = (1..=all_columns.len()).map(|i| format!("?{i}")).collect();

    Ok(format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        resolution.table(),
        all_columns.join(", "),
        placeholders.join(", "),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.apply_migrations().unwrap();
        store
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn count_rows(store: &Store, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn test_hourly_upsert_replaces_same_fetch() {
        let store = migrated_store();
        let cache = ParameterSchemaCache::new();
        let params = names(&["temperature_2m", "precipitation"]);
        let timestamps = [3_600_i64, 7_200];

        let values = WeatherValues::Series(vec![
            vec![Some(10.5), Some(11.0)],
            vec![Some(0.0), None],
        ]);
        assert!(
            store
                .insert_weather_data(
                    &cache,
                    Resolution::Hourly,
                    "innsbruck",
                    &timestamps,
                    &params,
                    &values,
                    1_000,
                )
                .unwrap()
        );
        assert_eq!(count_rows(&store, "weather_hourly"), 2);

        // Same forecast horizon and fetch time replaces in place.
        let values = WeatherValues::Series(vec![
            vec![Some(12.0), Some(12.5)],
            vec![Some(0.3), Some(0.1)],
        ]);
        store
            .insert_weather_data(
                &cache,
                Resolution::Hourly,
                "innsbruck",
                &timestamps,
                &params,
                &values,
                1_000,
            )
            .unwrap();
        assert_eq!(count_rows(&store, "weather_hourly"), 2);

        let temp: f64 = store
            .connection()
            .query_row(
                "SELECT temperature_2m FROM weather_hourly
                 WHERE forecast_time = 3600 AND location = 'innsbruck'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(temp, 12.0);
    }

    #[test]
    fn test_later_fetch_adds_snapshot_rows() {
        let store = migrated_store();
        let cache = ParameterSchemaCache::new();
        let params = names(&["temperature_2m"]);
        let values = WeatherValues::Series(vec![vec![Some(5.0)]]);

        for fetched_at in [1_000, 2_000] {
            store
                .insert_weather_data(
                    &cache,
                    Resolution::Hourly,
                    "innsbruck",
                    &[3_600],
                    &params,
                    &values,
                    fetched_at,
                )
                .unwrap();
        }
        assert_eq!(count_rows(&store, "weather_hourly"), 2);
    }

    #[test]
    fn test_current_observation_stores_scalars_and_nulls() {
        let store = migrated_store();
        let cache = ParameterSchemaCache::new();
        let params = names(&["temperature_2m", "cloud_cover"]);
        let values = WeatherValues::Scalar(vec![Some(-3.2), None]);

        store
            .insert_weather_data(
                &cache,
                Resolution::Current,
                "innsbruck",
                &[1_699_999_200],
                &params,
                &values,
                1_700_000_000,
            )
            .unwrap();

        let (fetched_at, observed_at, temp, cloud): (i64, i64, f64, Option<f64>) = store
            .connection()
            .query_row(
                "SELECT fetched_at, observed_at, temperature_2m, cloud_cover
                 FROM weather_current WHERE location = 'innsbruck'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(fetched_at, 1_700_000_000);
        assert_eq!(observed_at, 1_699_999_200);
        assert_eq!(temp, -3.2);
        assert_eq!(cloud, None);
    }

    #[test]
    fn test_all_unknown_parameters_writes_nothing() {
        let store = migrated_store();
        let cache = ParameterSchemaCache::new();
        let params = names(&["soil_moisture_0_to_1cm"]);
        let values = WeatherValues::Series(vec![vec![Some(0.2)]]);

        let stored = store
            .insert_weather_data(
                &cache,
                Resolution::Hourly,
                "innsbruck",
                &[3_600],
                &params,
                &values,
                1_000,
            )
            .unwrap();
        assert!(!stored);
        assert_eq!(count_rows(&store, "weather_hourly"), 0);
    }

    #[test]
    fn test_upsert_sql_rejects_postgres() {
        let err = upsert_sql(Dialect::Postgres, Resolution::Hourly, &["temperature_2m"])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDialect(d) if d == "postgresql"));
    }

    #[test]
    fn test_upsert_sql_orders_key_columns_per_resolution() {
        let sql = upsert_sql(Dialect::Sqlite, Resolution::Current, &["temperature_2m"]).unwrap();
        assert!(sql.starts_with(
            "INSERT OR REPLACE INTO weather_current (fetched_at, observed_at, location, temperature_2m)"
        ));

        let sql = upsert_sql(Dialect::Sqlite, Resolution::Daily, &["precipitation_sum"]).unwrap();
        assert!(sql.starts_with(
            "INSERT OR REPLACE INTO weather_daily (forecast_date, fetched_at, location, precipitation_sum)"
        ));
    }
}
