use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kivoll_scrape::orchestrator::{self, ScrapeArgs};
use kivoll_scrape::{Config, ErrorLog};

#[derive(Parser)]
#[command(name = "kivoll-scrape")]
#[command(author, version, about = "Scrape gym occupancy and weather data", long_about = None)]
struct Cli {
    /// Replay the cached page instead of fetching; store nothing
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated targets to run (or "all"); omit to auto-select
    /// by time of day
    #[arg(short, long)]
    targets: Option<String>,

    /// Override the reference time for target selection (HH:MM)
    #[arg(long, value_name = "HH:MM")]
    time_of_day: Option<String>,

    /// List available targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "data/config.json")]
    config_path: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Only display warnings and errors (overrides --verbose)
    #[arg(long)]
    warn_only: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.warn_only {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load_or_restore(&cli.config_path)?;
    let errors = ErrorLog::open(config.data_dir())?;

    let args = ScrapeArgs {
        dry_run: cli.dry_run,
        targets: cli.targets,
        time_of_day: cli.time_of_day,
        list_targets: cli.list_targets,
    };

    let code = orchestrator::run(&args, &config, &errors).await;
    Ok(ExitCode::from(code))
}
