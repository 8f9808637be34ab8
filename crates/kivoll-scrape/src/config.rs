//! Configuration loading.
//!
//! The worker reads one JSON document. A malformed file or an unknown
//! `file.version` is recoverable: the embedded default is written back
//! to disk and loaded instead. Only a corrupt embedded default is
//! fatal, since there is nothing left to fall back to.

use std::path::{Path, PathBuf};

use serde_json::Value;
use time::UtcOffset;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::failure::ErrorLog;

/// Schema version this worker writes and understands.
pub const CURRENT_CONFIG_VERSION: i64 = 1;

const DEFAULT_CONFIG: &str = include_str!("defaults/config.default.json");

/// Loaded configuration document plus the resolved data directory.
pub struct Config {
    raw: Value,
    data_dir: PathBuf,
}

impl Config {
    /// Load the configuration, restoring the embedded default when the
    /// file is missing, malformed or carries an unknown version.
    pub fn load_or_restore(path: &Path) -> Result<Self> {
        let raw = match load_file(path) {
            Ok(raw) => raw,
            Err(e @ (Error::MalformedJson { .. } | Error::UnknownVersion { .. })) => {
                warn!("{}; reverting to default config", e);
                restore_default(path)?;
                load_file(path)?
            }
            Err(e) => return Err(e),
        };

        let data_dir = raw
            .pointer("/paths/data")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| Error::Config("missing 'paths.data' key".to_string()))?;
        std::fs::create_dir_all(&data_dir)?;

        debug!("Config loaded, data directory is {}", data_dir.display());
        Ok(Self { raw, data_dir })
    }

    /// Build a config from an already parsed document (for testing).
    #[cfg(test)]
    pub(crate) fn from_value(raw: Value, data_dir: PathBuf) -> Self {
        Self { raw, data_dir }
    }

    /// Directory holding the database, cache and state files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The raw configuration document.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// URL configured for a module, if present and non-empty.
    pub fn module_url(&self, module: &str) -> Option<&str> {
        self.raw
            .pointer(&format!("/modules/{module}/url"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// User agent configured for a module.
    pub fn module_user_agent(&self, module: &str) -> Option<&str> {
        self.raw
            .pointer(&format!("/modules/{module}/user_agent"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The `modules.weather.parameters` map.
    pub fn weather_parameters(&self) -> Option<&Value> {
        self.raw.pointer("/modules/weather/parameters")
    }

    /// The `modules.weather.locations` map.
    pub fn weather_locations(&self) -> Option<&Value> {
        self.raw.pointer("/modules/weather/locations")
    }

    /// The configured timezone as a fixed UTC offset.
    ///
    /// Accepts `UTC` or `+HH:MM` / `-HH:MM`. An absent key means UTC; a
    /// present but unparseable value is an error so a typo does not
    /// silently shift every schedule.
    pub fn timezone(&self, errors: &ErrorLog) -> Result<UtcOffset> {
        match self.raw.pointer("/general/timezone").and_then(Value::as_str) {
            None => Ok(UtcOffset::UTC),
            Some(raw) => parse_utc_offset(raw).inspect_err(|e| {
                errors.record(e.kind(), &e.to_string(), "config:timezone:parse", false);
            }),
        }
    }
}

fn load_file(path: &Path) -> Result<Value> {
    if !path.exists() {
        info!("No config at {}, writing default", path.display());
        restore_default(path)?;
    }

    let text = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| Error::MalformedJson {
        path: path.to_path_buf(),
        source: e,
    })?;

    match raw.pointer("/file/version").and_then(Value::as_i64) {
        Some(CURRENT_CONFIG_VERSION) => Ok(raw),
        Some(version) => Err(Error::UnknownVersion {
            path: path.to_path_buf(),
            version,
        }),
        None => Err(Error::MalformedJson {
            path: path.to_path_buf(),
            source: serde::de::Error::custom("missing 'file.version' key"),
        }),
    }
}

fn restore_default(path: &Path) -> Result<()> {
    // Validate the embedded asset before writing it; a corrupt default
    // has no recovery path.
    serde_json::from_str::<Value>(DEFAULT_CONFIG).map_err(Error::DefaultAssetCorrupt)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(())
}

/// Parse `UTC` or a fixed `+HH:MM` / `-HH:MM` offset.
pub fn parse_utc_offset(raw: &str) -> Result<UtcOffset> {
    if raw.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }

    let invalid = || Error::InvalidTimezone(raw.to_string());

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1i8, rest),
        Some(("-", rest)) => (-1i8, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i8 = hours.parse().map_err(|_| invalid())?;
    let minutes: i8 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 || hours < 0 || minutes < 0 {
        return Err(invalid());
    }

    UtcOffset::from_hms(sign * hours, sign * minutes, 0).map_err(|_| invalid())
}
