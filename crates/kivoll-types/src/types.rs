//! Core data types.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::Time;

/// Granularity of a weather time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// A single point-in-time observation.
    Current,
    /// Hourly forecast values.
    Hourly,
    /// Daily forecast values.
    Daily,
}

impl Resolution {
    /// All resolutions, in the order they are processed.
    pub const ALL: [Resolution; 3] = [Resolution::Current, Resolution::Hourly, Resolution::Daily];

    /// Lowercase name as used in configuration and the reference table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Current => "current",
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
        }
    }

    /// Parse a resolution name from the reference table.
    pub fn from_name(name: &str) -> Option<Resolution> {
        match name {
            "current" => Some(Resolution::Current),
            "hourly" => Some(Resolution::Hourly),
            "daily" => Some(Resolution::Daily),
            _ => None,
        }
    }

    /// Database table holding rows of this resolution.
    pub fn table(&self) -> &'static str {
        match self {
            Resolution::Current => "weather_current",
            Resolution::Hourly => "weather_hourly",
            Resolution::Daily => "weather_daily",
        }
    }

    /// Column name for the timestamp carried by each row.
    ///
    /// `current` rows are keyed by fetch time and additionally record when
    /// the observation was taken; forecast rows are keyed by their forecast
    /// horizon.
    pub fn time_column(&self) -> &'static str {
        match self {
            Resolution::Current => "observed_at",
            Resolution::Hourly => "forecast_time",
            Resolution::Daily => "forecast_date",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy values parsed from one fetch of the Kletterzentrum page.
///
/// Every field is parsed by an isolated strategy, so any subset may be
/// missing without invalidating the rest of the reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyReading {
    /// Overall occupancy percentage (0-100).
    pub overall: Option<i64>,
    /// Rope climbing section occupancy percentage.
    pub seil: Option<i64>,
    /// Bouldering section occupancy percentage.
    pub boulder: Option<i64>,
    /// Number of currently open sectors.
    pub open_sectors: Option<i64>,
    /// Total number of sectors.
    pub total_sectors: Option<i64>,
}

impl OccupancyReading {
    /// True when no extraction strategy produced a value.
    pub fn is_empty(&self) -> bool {
        self.overall.is_none()
            && self.seil.is_none()
            && self.boulder.is_none()
            && self.open_sectors.is_none()
            && self.total_sectors.is_none()
    }
}

/// A named scrape target and its scheduling metadata.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// Stable identifier used on the command line and in job ids.
    pub id: &'static str,
    /// Human-readable description for `--list-targets`.
    pub description: &'static str,
    /// Cron hour field for the external scheduler.
    pub hour: &'static str,
    /// Cron minute field for the external scheduler.
    pub minute: &'static str,
    /// Optional `[start, end)` window restricting auto-selection.
    pub open: Option<(Time, Time)>,
}

impl TargetSpec {
    /// Whether this target may be auto-selected at the given time.
    ///
    /// Targets without an open window are always selectable; otherwise
    /// the window is start-inclusive and end-exclusive.
    pub fn is_open_at(&self, at: Time) -> bool {
        match self.open {
            Some((start, end)) => start <= at && at < end,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::time;

    #[test]
    fn resolution_round_trips_names() {
        for res in Resolution::ALL {
            assert_eq!(Resolution::from_name(res.as_str()), Some(res));
        }
        assert_eq!(Resolution::from_name("bogus"), None);
    }

    #[test]
    fn empty_reading_reports_empty() {
        assert!(OccupancyReading::default().is_empty());
        let reading = OccupancyReading {
            seil: Some(40),
            ..Default::default()
        };
        assert!(!reading.is_empty());
    }

    #[test]
    fn open_window_includes_start_excludes_end() {
        let spec = TargetSpec {
            id: "t",
            description: "",
            hour: "9-21",
            minute: "*/5",
            open: Some((time!(9:00), time!(22:00))),
        };
        assert!(spec.is_open_at(time!(9:00)));
        assert!(spec.is_open_at(time!(21:59)));
        assert!(!spec.is_open_at(time!(22:00)));
        assert!(!spec.is_open_at(time!(8:59)));
    }

    #[test]
    fn missing_window_is_always_open() {
        let spec = TargetSpec {
            id: "t",
            description: "",
            hour: "0",
            minute: "0",
            open: None,
        };
        assert!(spec.is_open_at(time!(0:00)));
        assert!(spec.is_open_at(time!(23:59)));
    }
}
