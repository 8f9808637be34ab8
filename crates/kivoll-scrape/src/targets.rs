//! Scrape target definitions and selection.
//!
//! Targets can be requested explicitly on the command line or selected
//! automatically by matching the reference time against each target's
//! open window. The cron fields are consumed by the external scheduler;
//! the open windows belong to this subsystem.

use time::macros::time;
use time::{OffsetDateTime, Time, UtcOffset};
use tracing::{debug, warn};

use kivoll_types::TargetSpec;

use crate::error::{Error, Result};
use crate::failure::ErrorLog;

/// All defined scrape targets, in execution order.
pub fn scrape_targets() -> &'static [TargetSpec] {
    // Weather runs hourly outside climbing hours; occupancy every five
    // minutes while the gym is open.
    static TARGETS: [TargetSpec; 2] = [
        TargetSpec {
            id: "weather",
            description: "Weather observations and forecasts from the forecast API",
            hour: "22-23,00-09",
            minute: "0",
            open: None,
        },
        TargetSpec {
            id: "kletterzentrum",
            description: "Kletterzentrum Innsbruck occupancy page",
            hour: "9-21",
            minute: "*/5",
            open: Some((time!(9:00), time!(22:00))),
        },
    ];
    &TARGETS
}

/// Look up a target by id.
pub fn target_by_id(id: &str) -> Option<&'static TargetSpec> {
    scrape_targets().iter().find(|t| t.id == id)
}

/// Parse an `HH:MM` time-of-day override. Strict: anything else fails.
pub fn parse_time_of_day(raw: &str) -> Result<Time> {
    let invalid = || Error::InvalidTimeFormat(raw.to_string());

    let (hours, minutes) = raw.split_once(':').ok_or_else(invalid)?;
    let hours: u8 = hours.trim().parse().map_err(|_| invalid())?;
    let minutes: u8 = minutes.trim().parse().map_err(|_| invalid())?;
    Time::from_hms(hours, minutes, 0).map_err(|_| invalid())
}

/// Resolve the reference time for target selection: an explicit
/// override wins, otherwise the current time in the configured zone.
pub fn reference_time(time_of_day: Option<&str>, offset: UtcOffset) -> Result<Time> {
    match time_of_day {
        Some(raw) => {
            let at = parse_time_of_day(raw)?;
            debug!("Using provided time of day {} ({})", raw, offset);
            Ok(at)
        }
        None => {
            let now = OffsetDateTime::now_utc().to_offset(offset).time();
            debug!("Using current time in configured timezone ({})", offset);
            Ok(now)
        }
    }
}

/// Target ids whose open windows include the given time.
pub fn open_targets(at: Time) -> Vec<&'static str> {
    scrape_targets()
        .iter()
        .filter(|t| t.is_open_at(at))
        .map(|t| t.id)
        .collect()
}

/// Resolve which targets to run.
///
/// Without an explicit list the currently open targets are selected.
/// Explicit tokens are comma-separated and case-insensitive; `all`
/// expands to every target, duplicates are dropped, unknown tokens are
/// warned about and ignored.
pub fn resolve_targets(raw: Option<&str>, at: Time, errors: &ErrorLog) -> Vec<&'static str> {
    let Some(raw) = raw else {
        debug!("No explicit targets supplied; selecting currently open targets");
        return open_targets(at);
    };

    let mut selections: Vec<&'static str> = Vec::new();
    for token in raw.split(',') {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        if token == "all" {
            for target in scrape_targets() {
                if !selections.contains(&target.id) {
                    selections.push(target.id);
                }
            }
            continue;
        }
        if let Some(target) = target_by_id(&token) {
            if !selections.contains(&target.id) {
                selections.push(target.id);
            }
            continue;
        }
        warn!("Unknown target '{}' will be ignored", token);
        errors.record(
            "ValidationError",
            &format!("unknown scrape target '{token}'"),
            "scraper:targets:unknown",
            false,
        );
    }

    if selections.is_empty() {
        warn!("No valid targets requested; nothing to do");
    }
    selections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_errors() -> (tempfile::TempDir, ErrorLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::open(dir.path()).unwrap();
        (dir, log)
    }

    #[test]
    fn test_parse_time_of_day_strict() {
        assert_eq!(parse_time_of_day("14:30").unwrap(), time!(14:30));
        assert_eq!(parse_time_of_day("0:05").unwrap(), time!(0:05));
        assert!(parse_time_of_day("1430").is_err());
        assert!(parse_time_of_day("aa:bb").is_err());
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("").is_err());
    }

    #[test]
    fn test_auto_selection_follows_open_windows() {
        // During climbing hours both targets are open.
        assert_eq!(open_targets(time!(10:00)), vec!["weather", "kletterzentrum"]);
        // At night only weather remains.
        assert_eq!(open_targets(time!(23:00)), vec!["weather"]);
        // Window boundaries: start inclusive, end exclusive.
        assert_eq!(
            open_targets(time!(9:00)),
            vec!["weather", "kletterzentrum"]
        );
        assert_eq!(open_targets(time!(22:00)), vec!["weather"]);
    }

    #[test]
    fn test_resolve_explicit_targets() {
        let (_dir, errors) = test_errors();
        let resolved = resolve_targets(Some("kletterzentrum"), time!(23:00), &errors);
        // Explicit selection ignores open windows.
        assert_eq!(resolved, vec!["kletterzentrum"]);
    }

    #[test]
    fn test_resolve_expands_all_and_skips_unknown() {
        let (_dir, errors) = test_errors();
        let resolved = resolve_targets(Some("all,unknown,weather"), time!(12:00), &errors);
        assert_eq!(resolved, vec!["weather", "kletterzentrum"]);

        let records = errors.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context, "scraper:targets:unknown");
    }

    #[test]
    fn test_resolve_is_case_insensitive_and_dedups() {
        let (_dir, errors) = test_errors();
        let resolved = resolve_targets(
            Some("Weather, weather ,WEATHER"),
            time!(12:00),
            &errors,
        );
        assert_eq!(resolved, vec!["weather"]);
        assert!(errors.records().is_empty());
    }

    #[test]
    fn test_resolve_none_auto_selects() {
        let (_dir, errors) = test_errors();
        let resolved = resolve_targets(None, time!(23:30), &errors);
        assert_eq!(resolved, vec!["weather"]);
    }
}
