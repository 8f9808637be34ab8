//! Scheduled job reconciliation and the heartbeat file.
//!
//! The actual trigger engine is an external scheduler; this module
//! derives the desired job set from the scrape targets, reconciles it
//! against whatever the scheduler already persisted, and computes the
//! next fire time for the heartbeat file that liveness probes watch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::error::Result;
use crate::targets::scrape_targets;

/// File in the data directory holding the next scheduled run time.
pub const HEARTBEAT_FILE: &str = "heartbeat";

/// One desired scheduler job with cron-style hour and minute fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: &'static str,
    pub hour: &'static str,
    pub minute: &'static str,
}

/// The job set derived from the scrape targets.
pub fn desired_jobs() -> Vec<JobSpec> {
    scrape_targets()
        .iter()
        .map(|t| JobSpec {
            id: t.id,
            hour: t.hour,
            minute: t.minute,
        })
        .collect()
}

/// Compute which job ids to add and which to remove so that the
/// scheduler exactly matches the desired set.
pub fn reconcile(desired: &[JobSpec], existing: &[String]) -> (Vec<&'static str>, Vec<String>) {
    let desired_ids: BTreeSet<&str> = desired.iter().map(|j| j.id).collect();
    let existing_ids: BTreeSet<&str> = existing.iter().map(String::as_str).collect();

    let add = desired
        .iter()
        .filter(|j| !existing_ids.contains(j.id))
        .map(|j| j.id)
        .collect();
    let remove = existing
        .iter()
        .filter(|id| !desired_ids.contains(id.as_str()))
        .cloned()
        .collect();
    (add, remove)
}

/// Whether a cron field matches a value. Supports `*`, `*/n`, plain
/// numbers, ranges and comma-separated lists of those.
fn field_matches(field: &str, value: u8) -> bool {
    field.split(',').any(|part| {
        let part = part.trim();
        if part == "*" {
            return true;
        }
        if let Some(step) = part.strip_prefix("*/") {
            return step
                .parse::<u8>()
                .map(|step| step != 0 && value % step == 0)
                .unwrap_or(false);
        }
        if let Some((start, end)) = part.split_once('-') {
            return match (start.parse::<u8>(), end.parse::<u8>()) {
                (Ok(start), Ok(end)) => start <= value && value <= end,
                _ => false,
            };
        }
        part.parse::<u8>().map(|n| n == value).unwrap_or(false)
    })
}

/// Next time a job fires strictly after the given instant.
///
/// The supported field grammar keeps every schedule within a day, so
/// scanning minute by minute over 24 hours always finds the match.
pub fn next_fire_after(job: &JobSpec, after: OffsetDateTime) -> Option<OffsetDateTime> {
    let base = after
        .replace_second(0)
        .ok()?
        .replace_nanosecond(0)
        .ok()?;

    (1..=24 * 60).map(|i| base + Duration::minutes(i)).find(|t| {
        field_matches(job.hour, t.hour()) && field_matches(job.minute, t.minute())
    })
}

/// Earliest next fire time across all desired jobs.
pub fn next_run(jobs: &[JobSpec], after: OffsetDateTime) -> Option<OffsetDateTime> {
    jobs.iter().filter_map(|j| next_fire_after(j, after)).min()
}

fn heartbeat_path(data_dir: &Path) -> PathBuf {
    data_dir.join(HEARTBEAT_FILE)
}

/// Write the next run time to the heartbeat file, or remove the file
/// when no run is scheduled so monitors can flag the worker as idle.
pub fn write_heartbeat(data_dir: &Path, next_run: Option<OffsetDateTime>) -> Result<()> {
    let path = heartbeat_path(data_dir);
    match next_run {
        Some(at) => {
            let text = at.format(&Rfc3339).unwrap();
            debug!("Writing heartbeat, next run at {}", text);
            std::fs::write(&path, text)?;
        }
        None => {
            debug!("No scheduled runs, removing heartbeat file");
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
