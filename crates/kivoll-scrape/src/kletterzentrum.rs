//! Kletterzentrum Innsbruck occupancy scraping.
//!
//! The gym publishes occupancy on a marketing page whose markup changes
//! without notice, so extraction runs as independent strategies: overall
//! percentage from headings, per-section percentages from labelled bar
//! elements with an inline-CSS fallback, and open sector counts from the
//! text following the "Offene Sektoren" heading. A failing strategy
//! leaves its fields null and never poisons the others.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use kivoll_store::Store;
use kivoll_types::OccupancyReading;

use crate::config::Config;
use crate::error::Result;
use crate::failure::ErrorLog;
use crate::session::{self, HttpTransport, RetryingHttpSession};

const FALLBACK_USER_AGENT: &str = "kivoll-worker-occupancy/%s";

static PRIMARY_HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.x-text-content-text-primary").unwrap());
static ANY_H2: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static BAR_CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".bar-container").unwrap());
static BAR_LABEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.label").unwrap());
static BAR_PERCENTAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.bar[data-percentage]").unwrap());

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,3})").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static CSS_HEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"height:\s*(\d{1,3})%").unwrap());

/// Extract occupancy values from the gym page.
///
/// Never fails; fields whose strategy found nothing stay `None`.
pub fn parse_occupancy(html: &str) -> OccupancyReading {
    let document = Html::parse_document(html);
    let mut reading = OccupancyReading::default();

    reading.overall = parse_overall(&document);
    if reading.overall.is_none() {
        warn!("Could not parse overall occupancy");
    }

    parse_sections(&document, &mut reading);
    if reading.seil.is_none() || reading.boulder.is_none() {
        debug!("Section occupancy incomplete, trying inline CSS fallback");
        parse_css_fallback(html, &mut reading);
    }

    parse_open_sectors(&document, &mut reading);

    debug!(
        "Parsed occupancy: overall={:?} seil={:?} boulder={:?} sectors={:?}/{:?}",
        reading.overall, reading.seil, reading.boulder, reading.open_sectors, reading.total_sectors
    );
    reading
}

/// First percentage found in the primary headings, falling back to any
/// `h2` on the page.
fn parse_overall(document: &Html) -> Option<i64> {
    let primary: Vec<ElementRef> = document.select(&PRIMARY_HEADING).collect();
    let candidates = if primary.is_empty() {
        document.select(&ANY_H2).collect()
    } else {
        primary
    };

    for heading in candidates {
        let text: String = heading.text().collect();
        if let Some(m) = PERCENT_RE.captures(text.trim()) {
            if let Ok(value) = m[1].parse() {
                return Some(value);
            }
        }
    }
    None
}

/// Per-section percentages from labelled bar containers.
fn parse_sections(document: &Html, reading: &mut OccupancyReading) {
    for container in document.select(&BAR_CONTAINER) {
        let Some(label_el) = container.select(&BAR_LABEL).next() else {
            continue;
        };
        let Some(bar) = container.select(&BAR_PERCENTAGE).next() else {
            continue;
        };

        let label: String = label_el.text().collect::<String>().to_lowercase();
        let Some(percentage) = bar
            .value()
            .attr("data-percentage")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        else {
            warn!("Bar container for '{}' has unparseable percentage", label.trim());
            continue;
        };

        if label.contains("seil") {
            reading.seil = Some(percentage);
        } else if label.contains("boulder") {
            reading.boulder = Some(percentage);
        }
    }
}

/// Fallback for pages that only carry the bar heights as inline CSS.
/// Heights appear in section order: rope first, boulder second.
fn parse_css_fallback(html: &str, reading: &mut OccupancyReading) {
    let heights: Vec<i64> = CSS_HEIGHT_RE
        .captures_iter(html)
        .filter_map(|c| c[1].parse().ok())
        .collect();

    if reading.seil.is_none() {
        reading.seil = heights.first().copied();
    }
    if reading.boulder.is_none() {
        reading.boulder = heights.get(1).copied();
    }
}

/// Open and total sector counts from the first `span.first`/`span.second`
/// appearing after the "Offene Sektoren" heading, in document order.
fn parse_open_sectors(document: &Html, reading: &mut OccupancyReading) {
    let mut past_heading = false;

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };

        if !past_heading {
            let name = element.value().name();
            if (name == "h2" || name == "h3")
                && element
                    .text()
                    .collect::<String>()
                    .to_lowercase()
                    .contains("offene sektoren")
            {
                past_heading = true;
            }
            continue;
        }

        if element.value().name() != "span" {
            continue;
        }
        let classes = element.value().attr("class").unwrap_or("");
        let has_class = |wanted: &str| classes.split_whitespace().any(|c| c == wanted);

        let text: String = element.text().collect();
        let number = NUMBER_RE
            .find(text.trim())
            .and_then(|m| m.as_str().parse().ok());

        if has_class("first") && reading.open_sectors.is_none() {
            reading.open_sectors = number;
        } else if has_class("second") && reading.total_sectors.is_none() {
            reading.total_sectors = number;
        }

        if reading.open_sectors.is_some() && reading.total_sectors.is_some() {
            break;
        }
    }
}

/// Fetch (or replay) the gym page, parse it and store the reading.
///
/// In dry-run mode the page cached by a previous live run is parsed and
/// nothing is written. Returns `Ok(false)` on failures that should mark
/// the target failed without aborting the invocation.
pub async fn run<T: HttpTransport>(
    dry_run: bool,
    config: &Config,
    errors: &ErrorLog,
    session: &RetryingHttpSession<T>,
    store: &Store,
) -> Result<bool> {
    let html = if dry_run {
        warn!("Using cached HTML (dry run), nothing will be stored");
        session::load_cached_body(config.data_dir()).inspect_err(|e| {
            errors.record(e.kind(), &e.to_string(), "kletterzentrum:load_cached_html", false);
        })?
    } else {
        let Some(url) = config.module_url("kletterzentrum") else {
            errors.record(
                "ConfigError",
                "could not retrieve url to use (malformed config)",
                "kletterzentrum:fetch:url_error",
                false,
            );
            warn!("No Kletterzentrum URL configured, skipping target");
            return Ok(false);
        };

        let user_agent = match config.module_user_agent("kletterzentrum") {
            Some(ua) => ua.to_string(),
            None => {
                warn!("Could not retrieve user agent to use (malformed config)");
                errors.record(
                    "ConfigError",
                    "could not retrieve user agent to use (malformed config)",
                    "kletterzentrum:fetch:ua_error",
                    false,
                );
                FALLBACK_USER_AGENT.to_string()
            }
        };
        let user_agent = user_agent.replace("%s", env!("CARGO_PKG_VERSION"));
        let headers = [("User-Agent".to_string(), user_agent)];

        info!("Fetching occupancy page at {}", url);
        let response = match session.get(url, &headers).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Could not fetch Kletterzentrum page: {}", e);
                errors.record(e.kind(), &e.to_string(), "kletterzentrum:fetch:http_error", false);
                return Ok(false);
            }
        };

        let html = if response.body.trim().is_empty() {
            warn!("Received empty HTML from Kletterzentrum website");
            errors.record(
                "ParseDegradation",
                "received empty HTML from Kletterzentrum website",
                "kletterzentrum:fetch:empty_html",
                false,
            );
            String::new()
        } else {
            response.body
        };

        if let Err(e) = session::cache_body(config.data_dir(), &html) {
            warn!("Could not write {}: {}", session::CACHE_FILE, e);
            errors.record(e.kind(), &e.to_string(), "kletterzentrum:cache_html", false);
        }
        html
    };

    let reading = parse_occupancy(&html);
    if reading.is_empty() {
        warn!("No occupancy values could be extracted from the page");
        errors.record(
            "ParseDegradation",
            "no occupancy values could be extracted",
            "kletterzentrum:parse:empty_reading",
            false,
        );
    }

    if dry_run {
        return Ok(true);
    }

    let fetched_at = OffsetDateTime::now_utc().unix_timestamp();
    if let Err(e) = store.insert_occupancy(fetched_at, &reading) {
        errors.record("StorageError", &e.to_string(), "kletterzentrum:dbstore:sqlite", false);
        warn!("Could not store occupancy reading: {}", e);
        return Ok(false);
    }
    info!("Occupancy reading stored");
    Ok(true)
}
