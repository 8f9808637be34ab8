//! Scrape run orchestration.
//!
//! One invocation resolves which targets to run, executes them
//! sequentially, and commits or rolls back each target's transaction
//! independently. Only bootstrap failures (store, migrations, time
//! resolution) abort the whole run; a failing target just marks the
//! invocation as failed and the next target still runs.

use time::OffsetDateTime;
use tracing::{error, info, warn};

use kivoll_store::{Backend, ParameterSchemaCache, Store};

use crate::config::Config;
use crate::error::Result;
use crate::failure::ErrorLog;
use crate::session::{HttpTransport, ReqwestTransport, RetryingHttpSession};
use crate::{jobs, kletterzentrum, targets, weather};

/// Options controlling one scrape invocation.
#[derive(Debug, Default)]
pub struct ScrapeArgs {
    /// Replay the cached page instead of fetching, store nothing.
    pub dry_run: bool,
    /// Comma-separated explicit target list; `None` auto-selects.
    pub targets: Option<String>,
    /// `HH:MM` override for the reference time.
    pub time_of_day: Option<String>,
    /// Print the available targets and exit.
    pub list_targets: bool,
}

/// Run a scrape invocation with the production HTTP transport.
///
/// Returns the process exit code: 0 when every selected target
/// succeeded, 1 otherwise.
pub async fn run(args: &ScrapeArgs, config: &Config, errors: &ErrorLog) -> u8 {
    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            error!("Could not build HTTP client: {}", e);
            errors.record(e.kind(), &e.to_string(), "scraper:bootstrap:http_client", true);
            return 1;
        }
    };
    run_with_session(args, config, errors, &RetryingHttpSession::new(transport)).await
}

/// Run a scrape invocation against a caller-provided session.
pub async fn run_with_session<T: HttpTransport>(
    args: &ScrapeArgs,
    config: &Config,
    errors: &ErrorLog,
    session: &RetryingHttpSession<T>,
) -> u8 {
    if args.list_targets {
        println!("Available targets:");
        for target in targets::scrape_targets() {
            println!("- {}: {}", target.id, target.description);
        }
        return 0;
    }

    // Bootstrap: migrations run once, on their own connection.
    let backend = Backend::from_env(config.data_dir());
    match Store::open_backend(&backend).and_then(|store| store.apply_migrations()) {
        Ok(_) => {}
        Err(e) => {
            error!("Could not initialize database: {}", e);
            errors.record(
                "FatalBootstrapError",
                &e.to_string(),
                "scraper:bootstrap:migrations",
                true,
            );
            return 1;
        }
    }

    let reference = config
        .timezone(errors)
        .and_then(|offset| targets::reference_time(args.time_of_day.as_deref(), offset));
    let at = match reference {
        Ok(at) => at,
        Err(e) => {
            error!("Could not resolve time of day: {}", e);
            errors.record(e.kind(), &e.to_string(), "scraper:time-of-day:resolve", false);
            return 1;
        }
    };

    let selected = targets::resolve_targets(args.targets.as_deref(), at, errors);
    if selected.is_empty() {
        info!("No targets to scrape at this time");
        return 1;
    }

    let schema = ParameterSchemaCache::new();
    let total = selected.len();
    let mut failed = 0usize;

    for (idx, target) in selected.iter().enumerate() {
        info!("Scraping {} [{}/{}]", target, idx + 1, total);

        let success = match run_target(target, args, config, errors, session, &backend, &schema)
            .await
        {
            Ok(success) => success,
            Err(e) => {
                warn!("{} scrape failed: {}", target, e);
                errors.record(e.kind(), &e.to_string(), &format!("scraper:run:{target}"), false);
                false
            }
        };
        if !success {
            failed += 1;
        }
    }

    update_heartbeat(config, errors);

    if failed > 0 {
        warn!("{} target(s) failed, {} succeeded", failed, total - failed);
        return 1;
    }
    info!("Scraping successful [{}/{}]", total, total);
    0
}

/// Run one target inside its own connection and transaction.
async fn run_target<T: HttpTransport>(
    target: &str,
    args: &ScrapeArgs,
    config: &Config,
    errors: &ErrorLog,
    session: &RetryingHttpSession<T>,
    backend: &Backend,
    schema: &ParameterSchemaCache,
) -> Result<bool> {
    let store = Store::open_backend(backend)?;
    store.begin()?;

    let result = match target {
        "weather" => weather::run(config, errors, session, &store, schema).await,
        "kletterzentrum" => {
            kletterzentrum::run(args.dry_run, config, errors, session, &store).await
        }
        other => {
            // resolve_targets only yields known ids.
            warn!("Target '{}' has no runner", other);
            Ok(false)
        }
    };

    match result {
        Ok(true) => {
            store.commit()?;
            Ok(true)
        }
        Ok(false) => {
            store.rollback()?;
            Ok(false)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback() {
                warn!("Rollback after failure also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// Refresh the heartbeat file with the next scheduled run time.
fn update_heartbeat(config: &Config, errors: &ErrorLog) {
    let now = OffsetDateTime::now_utc();
    let next = jobs::next_run(&jobs::desired_jobs(), now);
    if let Err(e) = jobs::write_heartbeat(config.data_dir(), next) {
        warn!("Could not update heartbeat: {}", e);
        errors.record(e.kind(), &e.to_string(), "scraper:heartbeat:write", false);
    }
}
