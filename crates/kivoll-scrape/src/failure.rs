//! Persistent error log.
//!
//! Every handled error is appended to `errors.json` in the data
//! directory with a timestamp, a coarse kind, a colon-delimited context
//! path and a fatal flag, for offline diagnosis. The file follows the
//! same recovery rules as the config: malformed JSON or an unknown
//! `file.version` resets it to the embedded default.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Schema version this worker writes and understands.
pub const CURRENT_ERRORS_VERSION: i64 = 1;

const DEFAULT_ERRORS: &str = include_str!("defaults/errors.default.json");

#[derive(Debug, Serialize, Deserialize)]
struct FileMeta {
    version: i64,
}

/// One logged error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: i64,
    pub kind: String,
    pub message: String,
    pub context: String,
    pub fatal: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorsFile {
    file: FileMeta,
    errors: Vec<ErrorRecord>,
}

/// Append-only error sink backed by `errors.json`.
pub struct ErrorLog {
    path: PathBuf,
    state: Mutex<ErrorsFile>,
}

impl ErrorLog {
    /// Open (or create) the error log in the data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("errors.json");
        let state = match load_file(&path) {
            Ok(state) => state,
            Err(e @ (Error::MalformedJson { .. } | Error::UnknownVersion { .. })) => {
                warn!("{}; reverting to default errors file", e);
                restore_default(&path)?;
                load_file(&path)?
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Append one error record and flush to disk.
    ///
    /// Logging an error must never itself fail the caller; a write
    /// problem is reported through tracing and otherwise swallowed.
    pub fn record(&self, kind: &str, message: &str, context: &str, fatal: bool) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.errors.push(ErrorRecord {
            timestamp,
            kind: kind.to_string(),
            message: message.to_string(),
            context: context.to_string(),
            fatal,
        });

        match serde_json::to_string_pretty(&*state) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.path, text) {
                    error!("Could not write {}: {}", self.path.display(), e);
                }
            }
            Err(e) => error!("Could not serialize error log: {}", e),
        }
    }

    /// Snapshot of all recorded errors (for testing and diagnostics).
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .errors
            .clone()
    }
}

fn load_file(path: &Path) -> Result<ErrorsFile> {
    if !path.exists() {
        restore_default(path)?;
    }

    let text = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| Error::MalformedJson {
        path: path.to_path_buf(),
        source: e,
    })?;

    match raw.pointer("/file/version").and_then(Value::as_i64) {
        Some(CURRENT_ERRORS_VERSION) => {
            serde_json::from_value(raw).map_err(|e| Error::MalformedJson {
                path: path.to_path_buf(),
                source: e,
            })
        }
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
    serde_json::from_str::<ErrorsFile>(DEFAULT_ERRORS).map_err(Error::DefaultAssetCorrupt)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, DEFAULT_ERRORS)?;
    Ok(())
}
