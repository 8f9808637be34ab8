//! Weather ingestion from the forecast API.
//!
//! One API call covers all enabled locations; the response carries one
//! block per location which is matched back to its configured name by
//! coordinate proximity. Requested parameters are validated against the
//! live schema before the request is built, so the API is never asked
//! for values the store cannot keep.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use kivoll_store::{ParameterSchemaCache, Store, WeatherValues};
use kivoll_types::Resolution;

use crate::config::Config;
use crate::error::Result;
use crate::failure::ErrorLog;
use crate::session::{HttpTransport, RetryingHttpSession};

/// Coordinate tolerance for matching a response to a location, absorbs
/// the geocoding grid snap of the forecast API.
const COORDINATE_TOLERANCE: f64 = 3e-2;

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() < COORDINATE_TOLERANCE
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: i64,
    #[serde(flatten)]
    values: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SeriesBlock {
    time: Vec<i64>,
    #[serde(flatten)]
    values: serde_json::Map<String, Value>,
}

/// One per-location block of a forecast API response.
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    latitude: f64,
    longitude: f64,
    current: Option<CurrentBlock>,
    hourly: Option<SeriesBlock>,
    daily: Option<SeriesBlock>,
}

/// Fetch weather data for all enabled locations and store it.
///
/// Returns `Ok(false)` when the target failed in a way that should not
/// abort the invocation; storage errors propagate so the caller can
/// roll back the transaction.
pub async fn run<T: HttpTransport>(
    config: &Config,
    errors: &ErrorLog,
    session: &RetryingHttpSession<T>,
    store: &Store,
    schema: &ParameterSchemaCache,
) -> Result<bool> {
    debug!("Parsing weather configuration values");
    let Some(url) = config.module_url("weather") else {
        errors.record(
            "ConfigError",
            "url or parameters is malformed (not present or empty)",
            "weather:config:read_request_parameters",
            false,
        );
        warn!("No weather URL configured, skipping target");
        return Ok(false);
    };
    let parameters = match config.weather_parameters() {
        Some(Value::Object(map)) if !map.is_empty() => map,
        _ => {
            errors.record(
                "ConfigError",
                "url or parameters is malformed (not present or empty)",
                "weather:config:read_request_parameters",
                false,
            );
            warn!("No weather parameters configured, skipping target");
            return Ok(false);
        }
    };

    debug!("Validating requested weather parameters");
    let mut valid = Vec::new();
    for resolution in Resolution::ALL {
        let requested = coerce_param_list(parameters.get(resolution.as_str()), resolution, errors);
        let (accepted, rejected) = schema.validate(store, resolution, &requested)?;
        for name in rejected {
            warn!("Invalid {} parameter '{}' will be ignored", resolution, name);
            errors.record(
                "ValidationError",
                &format!("invalid {resolution} weather parameter requested: {name}"),
                "weather:config:invalid_parameter",
                false,
            );
        }
        if !accepted.is_empty() {
            valid.push((resolution, accepted));
        }
    }
    if valid.is_empty() {
        errors.record(
            "ValidationError",
            "no valid weather parameters remain after validation",
            "weather:config:no_valid_parameters",
            false,
        );
        warn!("No valid weather parameters remain, skipping target");
        return Ok(false);
    }

    let locations = enabled_locations(config);
    if locations.is_empty() {
        errors.record(
            "ConfigError",
            "no enabled locations with coordinates configured",
            "weather:config:no_locations",
            false,
        );
        warn!("No enabled weather locations, skipping target");
        return Ok(false);
    }

    let request_url = build_request_url(url, &valid, &locations);
    info!("Fetching weather at {}", url);
    let response = match session.get(&request_url, &[]).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Could not fetch weather data: {}", e);
            errors.record(e.kind(), &e.to_string(), "weather:config:request", false);
            return Ok(false);
        }
    };

    let responses = match parse_forecast_body(&response.body) {
        Ok(responses) => responses,
        Err(e) => {
            warn!("Could not parse weather response: {}", e);
            errors.record(
                "ParseDegradation",
                &format!("forecast response is not valid JSON: {e}"),
                "weather:parse:body",
                false,
            );
            return Ok(false);
        }
    };

    debug!("Writing weather data to database");
    let fetched_at = OffsetDateTime::now_utc().unix_timestamp();
    let mut saved = 0usize;

    for block in &responses {
        let Some(location) = match_location(block, &locations) else {
            warn!(
                "Could not match response to location (lat={}, lon={})",
                block.latitude, block.longitude
            );
            errors.record(
                "ValidationError",
                &format!(
                    "could not match weather response to location (lat={}, lon={})",
                    block.latitude, block.longitude
                ),
                "weather:dbstore:location_match",
                false,
            );
            continue;
        };

        debug!("Processing weather data for '{}'", location);
        for (resolution, names) in &valid {
            let (timestamps, values) = match resolution {
                Resolution::Current => match &block.current {
                    Some(current) => (vec![current.time], scalar_values(current, names)),
                    None => {
                        record_missing_block(errors, *resolution);
                        continue;
                    }
                },
                Resolution::Hourly => match &block.hourly {
                    Some(hourly) => (hourly.time.clone(), series_values(hourly, names)),
                    None => {
                        record_missing_block(errors, *resolution);
                        continue;
                    }
                },
                Resolution::Daily => match &block.daily {
                    Some(daily) => (daily.time.clone(), series_values(daily, names)),
                    None => {
                        record_missing_block(errors, *resolution);
                        continue;
                    }
                },
            };

            match store.insert_weather_data(
                schema,
                *resolution,
                location,
                &timestamps,
                names,
                &values,
                fetched_at,
            ) {
                Ok(true) => {
                    debug!(
                        "Inserted {} {} row(s) for {}",
                        timestamps.len(),
                        resolution,
                        location
                    );
                }
                Ok(false) => {
                    warn!("No {} rows stored for {}", resolution, location);
                }
                Err(e) => {
                    errors.record("StorageError", &e.to_string(), "weather:dbstore:insert_row", false);
                    return Err(e.into());
                }
            }
        }
        saved += 1;
    }

    if saved == 0 {
        warn!("No weather data was saved to database (no location match)");
        errors.record(
            "ValidationError",
            "no weather data was saved to database (no location match)",
            "weather:dbstore:no_data_saved",
            false,
        );
        return Ok(false);
    }

    info!("Weather data written for {} location(s)", saved);
    Ok(true)
}

/// Read a parameter list from config, coercing a scalar to a one-element
/// list with a warning.
fn coerce_param_list(
    raw: Option<&Value>,
    resolution: Resolution,
    errors: &ErrorLog,
) -> Vec<String> {
    match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(value_to_name).collect(),
        Some(scalar) => {
            warn!("{} parameter is not a list, coercing", resolution);
            errors.record(
                "ConfigError",
                &format!("{resolution} parameter is not a list"),
                "weather:config:invalid_parameter_type",
                false,
            );
            vec![value_to_name(scalar)]
        }
    }
}

fn value_to_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Locations marked enabled and carrying both coordinates.
fn enabled_locations(config: &Config) -> Vec<(String, f64, f64)> {
    let Some(Value::Object(map)) = config.weather_locations() else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(name, location)| {
            let enabled = location
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let latitude = location.get("latitude").and_then(Value::as_f64)?;
            let longitude = location.get("longitude").and_then(Value::as_f64)?;
            enabled.then(|| (name.clone(), latitude, longitude))
        })
        .collect()
}

/// Build the forecast request URL for all locations and validated
/// parameter lists.
fn build_request_url(
    base: &str,
    valid: &[(Resolution, Vec<String>)],
    locations: &[(String, f64, f64)],
) -> String {
    let latitudes: Vec<String> = locations.iter().map(|(_, lat, _)| lat.to_string()).collect();
    let longitudes: Vec<String> = locations.iter().map(|(_, _, lon)| lon.to_string()).collect();

    let mut url = format!(
        "{base}?latitude={}&longitude={}",
        latitudes.join(","),
        longitudes.join(",")
    );
    for (resolution, names) in valid {
        url.push_str(&format!("&{}={}", resolution.as_str(), names.join(",")));
    }
    url.push_str("&timeformat=unixtime");
    url
}

/// The API returns a single object for one location and an array for
/// several; accept both.
fn parse_forecast_body(body: &str) -> serde_json::Result<Vec<ForecastResponse>> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<serde_json::Result<Vec<_>>>(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

fn match_location<'a>(
    block: &ForecastResponse,
    locations: &'a [(String, f64, f64)],
) -> Option<&'a str> {
    locations
        .iter()
        .find(|(_, lat, lon)| is_close(block.latitude, *lat) && is_close(block.longitude, *lon))
        .map(|(name, _, _)| name.as_str())
}

fn scalar_values(block: &CurrentBlock, names: &[String]) -> WeatherValues {
    WeatherValues::Scalar(
        names
            .iter()
            .map(|name| block.values.get(name).and_then(Value::as_f64))
            .collect(),
    )
}

fn series_values(block: &SeriesBlock, names: &[String]) -> WeatherValues {
    WeatherValues::Series(
        names
            .iter()
            .map(|name| match block.values.get(name) {
                Some(Value::Array(items)) => items.iter().map(Value::as_f64).collect(),
                _ => vec![None; block.time.len()],
            })
            .collect(),
    )
}

fn record_missing_block(errors: &ErrorLog, resolution: Resolution) {
    warn!(
        "{} weather data is missing even though requested",
        resolution
    );
    errors.record(
        "ParseDegradation",
        &format!("{resolution} response is missing even though {resolution} was requested"),
        &format!("weather:dbstore:{resolution}_none"),
        false,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use serde_json::json;

    fn test_config(dir: &tempfile::TempDir, locations: Value) -> Config {
        Config::from_value(
            json!({
                "file": {"version": 1},
                "paths": {"data": dir.path().to_str().unwrap()},
                "modules": {
                    "weather": {
                        "url": "http://api.test/forecast",
                        "parameters": {
                            "hourly": ["temperature_2m", "precipitation"],
                            "current": ["temperature_2m"]
                        },
                        "locations": locations
                    }
                }
            }),
            dir.path().to_path_buf(),
        )
    }

    fn migrated_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.apply_migrations().unwrap();
        store
    }

    fn forecast_body() -> String {
        json!([{
            "latitude": 47.26,
            "longitude": 11.39,
            "current": {
                "time": 1_700_000_000,
                "temperature_2m": 4.5
            },
            "hourly": {
                "time": [1_700_000_000i64, 1_700_003_600i64],
                "temperature_2m": [4.5, 4.0],
                "precipitation": [0.0, null]
            }
        }])
        .to_string()
    }

    #[test]
    fn test_is_close_boundaries() {
        assert!(is_close(47.2692, 47.26));
        assert!(!is_close(47.2692, 47.2392));
        assert!(!is_close(47.0, 47.03));
    }

    #[test]
    fn test_coerce_scalar_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorLog::open(dir.path()).unwrap();

        let coerced = coerce_param_list(
            Some(&json!("temperature_2m")),
            Resolution::Hourly,
            &errors,
        );
        assert_eq!(coerced, vec!["temperature_2m"]);
        assert_eq!(
            errors.records()[0].context,
            "weather:config:invalid_parameter_type"
        );

        let list = coerce_param_list(Some(&json!(["a", "b"])), Resolution::Daily, &errors);
        assert_eq!(list, vec!["a", "b"]);
        assert!(coerce_param_list(None, Resolution::Current, &errors).is_empty());
    }

    #[test]
    fn test_parse_forecast_body_accepts_object_and_array() {
        let single = json!({"latitude": 1.0, "longitude": 2.0}).to_string();
        assert_eq!(parse_forecast_body(&single).unwrap().len(), 1);

        let many = json!([
            {"latitude": 1.0, "longitude": 2.0},
            {"latitude": 3.0, "longitude": 4.0}
        ])
        .to_string();
        assert_eq!(parse_forecast_body(&many).unwrap().len(), 2);

        assert!(parse_forecast_body("not json").is_err());
    }

    #[test]
    fn test_build_request_url_contains_validated_parameters() {
        let valid = vec![
            (Resolution::Current, vec!["temperature_2m".to_string()]),
            (
                Resolution::Hourly,
                vec!["temperature_2m".to_string(), "precipitation".to_string()],
            ),
        ];
        let locations = vec![("innsbruck".to_string(), 47.2692, 11.4041)];

        let url = build_request_url("http://api.test/forecast", &valid, &locations);
        assert!(url.starts_with("http://api.test/forecast?latitude=47.2692&longitude=11.4041"));
        assert!(url.contains("&current=temperature_2m"));
        assert!(url.contains("&hourly=temperature_2m,precipitation"));
        assert!(url.ends_with("&timeformat=unixtime"));
    }

    #[tokio::test]
    async fn test_run_stores_matched_location() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &dir,
            json!({"innsbruck": {"enabled": true, "latitude": 47.2692, "longitude": 11.4041}}),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        let transport = MockTransport::new();
        transport.push_status(200, &forecast_body());
        let session = RetryingHttpSession::new(transport);

        let ok = run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();
        assert!(ok);

        let hourly_rows: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM weather_hourly", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hourly_rows, 2);

        let current_rows: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM weather_current WHERE location = 'innsbruck'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(current_rows, 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_no_location_matches() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &dir,
            json!({"somewhere": {"enabled": true, "latitude": 10.0, "longitude": 10.0}}),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        let transport = MockTransport::new();
        transport.push_status(200, &forecast_body());
        let session = RetryingHttpSession::new(transport);

        let ok = run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();
        assert!(!ok);
        assert!(
            errors
                .records()
                .iter()
                .any(|r| r.context == "weather:dbstore:no_data_saved")
        );
    }

    #[tokio::test]
    async fn test_run_skips_disabled_locations() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &dir,
            json!({"innsbruck": {"enabled": false, "latitude": 47.2692, "longitude": 11.4041}}),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        let transport = MockTransport::new();
        let session = RetryingHttpSession::new(transport);

        let ok = run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();
        assert!(!ok);
        // No request was made at all.
        assert_eq!(session.transport().attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_dropped_from_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_value(
            json!({
                "file": {"version": 1},
                "paths": {"data": dir.path().to_str().unwrap()},
                "modules": {
                    "weather": {
                        "url": "http://api.test/forecast",
                        "parameters": {
                            "hourly": ["temperature_2m", "soil_moisture_0_to_1cm"]
                        },
                        "locations": {
                            "innsbruck": {"enabled": true, "latitude": 47.2692, "longitude": 11.4041}
                        }
                    }
                }
            }),
            dir.path().to_path_buf(),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        let transport = MockTransport::new();
        transport.push_status(200, &forecast_body());
        let session = RetryingHttpSession::new(transport);

        run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();

        let requests = session.transport().requests();
        assert!(requests[0].url.contains("hourly=temperature_2m&"));
        assert!(!requests[0].url.contains("soil_moisture"));
        assert!(
            errors
                .records()
                .iter()
                .any(|r| r.context == "weather:config:invalid_parameter")
        );
    }

    #[tokio::test]
    async fn test_missing_requested_block_skips_resolution_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &dir,
            json!({"innsbruck": {"enabled": true, "latitude": 47.2692, "longitude": 11.4041}}),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        // Current was requested but the response only carries hourly.
        let body = json!([{
            "latitude": 47.26,
            "longitude": 11.39,
            "hourly": {
                "time": [1_700_000_000i64],
                "temperature_2m": [4.5],
                "precipitation": [0.2]
            }
        }])
        .to_string();
        let transport = MockTransport::new();
        transport.push_status(200, &body);
        let session = RetryingHttpSession::new(transport);

        let ok = run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();
        assert!(ok);

        let hourly_rows: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM weather_hourly", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hourly_rows, 1);
        assert!(
            errors
                .records()
                .iter()
                .any(|r| r.context == "weather:dbstore:current_none")
        );
    }

    #[tokio::test]
    async fn test_request_failure_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &dir,
            json!({"innsbruck": {"enabled": true, "latitude": 47.2692, "longitude": 11.4041}}),
        );
        let errors = ErrorLog::open(dir.path()).unwrap();
        let store = migrated_store();
        let schema = ParameterSchemaCache::new();

        let transport = MockTransport::new();
        for _ in 0..4 {
            transport.push_status(500, "");
        }
        let session = RetryingHttpSession::new(transport);

        let ok = run(&config, &errors, &session, &store, &schema)
            .await
            .unwrap();
        assert!(!ok);
        assert!(
            errors
                .records()
                .iter()
                .any(|r| r.context == "weather:config:request")
        );
    }
}
