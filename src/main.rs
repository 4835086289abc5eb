//! Contrib-Harvest main entry point
//!
//! This is the command-line interface for the contributor harvester.

use clap::Parser;
use contrib_harvest::config::{load_config_with_hash, ApiKey, Config};
use contrib_harvest::harvest::{Harvester, ShutdownSignal};
use contrib_harvest::output::{export_to_file, load_statistics, print_statistics};
use contrib_harvest::storage::{RecordStore, SqliteStorage};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Contrib-Harvest: a rate-limited contributor harvester
///
/// Fetches the contributor list of up to BATCH_SIZE pending packages from
/// the Libraries.io contributors endpoint and records every result page in
/// TABLE of the SQLite database DB. Run it repeatedly to work through the
/// whole table; each run picks up where the previous one stopped.
#[derive(Parser, Debug)]
#[command(name = "contrib-harvest")]
#[command(version)]
#[command(about = "A rate-limited contributor harvester", long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(value_name = "DB")]
    database: PathBuf,

    /// Table holding one fetch record per project page
    #[arg(value_name = "TABLE")]
    table: String,

    /// Maximum number of pending projects to fetch in this run
    #[arg(value_name = "BATCH_SIZE")]
    batch_size: usize,

    /// Console log level
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log: Level,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    logfile: Option<PathBuf>,

    /// Log level for the log file
    #[arg(
        long = "logfile_level",
        alias = "logfile-level",
        value_name = "LEVEL",
        default_value = "debug"
    )]
    logfile_level: Level,

    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Load newline-separated package names as pending projects and exit
    #[arg(long, value_name = "FILE", conflicts_with_all = ["stats", "export", "dry_run"])]
    seed: Option<PathBuf>,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["seed", "export", "dry_run"])]
    stats: bool,

    /// Write completed projects as JSON lines to FILE and exit
    #[arg(long, value_name = "FILE", conflicts_with_all = ["seed", "stats", "dry_run"])]
    export: Option<PathBuf>,

    /// Show the configuration and the projects the next batch would fetch
    #[arg(long, conflicts_with_all = ["seed", "stats", "export"])]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.log, cli.logfile.as_deref(), cli.logfile_level)?;

    // Load and validate configuration
    match &cli.config {
        Some(path) => tracing::info!("Loading configuration from: {}", path.display()),
        None => tracing::info!("No configuration file given, using defaults"),
    }
    let (config, config_hash) = match load_config_with_hash(cli.config.as_deref()) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Open the record store
    let busy_timeout = Duration::from_secs(config.store.busy_timeout_secs);
    let mut storage = match SqliteStorage::new(&cli.database, &cli.table, busy_timeout) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(
                "Failed to open table '{}' in {}: {}",
                cli.table,
                cli.database.display(),
                e
            );
            return Err(e.into());
        }
    };

    // Handle different modes
    if let Some(seed) = &cli.seed {
        handle_seed(&mut storage, seed)?;
    } else if cli.stats {
        handle_stats(&storage)?;
    } else if let Some(path) = &cli.export {
        handle_export(&storage, path)?;
    } else if cli.dry_run {
        handle_dry_run(&config, &config_hash, &storage, cli.batch_size)?;
    } else {
        handle_harvest(&config, &config_hash, storage, cli.batch_size).await?;
    }

    Ok(())
}

/// Installs the console layer and, when requested, a file layer
///
/// Each layer has its own level; the levels apply to this crate, while
/// dependencies only log warnings and errors.
fn setup_logging(
    console_level: Level,
    logfile: Option<&Path>,
    logfile_level: Level,
) -> Result<(), Box<dyn std::error::Error>> {
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(crate_filter(console_level));

    let file = match logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(crate_filter(logfile_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();

    Ok(())
}

fn crate_filter(level: Level) -> EnvFilter {
    let level = level.to_string().to_lowercase();
    EnvFilter::new(format!("contrib_harvest={},warn", level))
}

/// Handles the --seed mode: loads package names as pending projects
fn handle_seed(storage: &mut SqliteStorage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    tracing::info!("Seeding {} names from {}", names.len(), path.display());
    let inserted = storage.seed_projects(&names)?;

    println!(
        "✓ Seeded {} new projects into '{}' ({} already present)",
        inserted,
        storage.table(),
        names.len().saturating_sub(inserted)
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(storage: &SqliteStorage) -> Result<(), Box<dyn std::error::Error>> {
    let stats = load_statistics(storage)?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the --export mode: writes completed projects as JSON lines
fn handle_export(storage: &SqliteStorage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let summary = export_to_file(storage, path)?;

    println!(
        "✓ Exported {} projects ({} contributors) to: {}",
        summary.projects,
        summary.contributors,
        path.display()
    );
    if summary.skipped > 0 {
        println!(
            "  {} projects skipped because a stored page could not be decoded",
            summary.skipped
        );
    }

    Ok(())
}

/// Handles the --dry-run mode: shows configuration and the next batch
fn handle_dry_run(
    config: &Config,
    config_hash: &str,
    storage: &SqliteStorage,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Contrib-Harvest Dry Run ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Per page: {}", config.api.per_page);
    println!(
        "  Timeouts: {}s request, {}s connect",
        config.api.timeout_secs, config.api.connect_timeout_secs
    );
    let key_state = if ApiKey::from_env(&config.api.api_key_env).is_ok() {
        "set"
    } else {
        "NOT SET"
    };
    println!("  API key variable: {} ({})", config.api.api_key_env, key_state);

    println!("\nRate Limit:");
    println!(
        "  {} calls per {}s, up to {} waits",
        config.rate_limit.calls, config.rate_limit.period_secs, config.rate_limit.max_attempts
    );
    println!(
        "  429 retries: {} (base delay {}ms)",
        config.retry_429.max_attempts, config.retry_429.base_delay_ms
    );

    println!("\nStore:");
    println!("  Table: {}", storage.table());
    println!("  Write attempts: {}", config.store.write_attempts);
    println!("  Workers: {}", config.harvest.workers);
    println!("  Config hash: {}", config_hash);

    let pending = storage.select_pending(batch_size)?;
    println!("\nNext batch ({} of at most {}):", pending.len(), batch_size);
    for name in &pending {
        println!("  - {}", name);
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: &Config,
    config_hash: &str,
    storage: SqliteStorage,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    // No request is made without a credential
    let api_key = match ApiKey::from_env(&config.api.api_key_env) {
        Ok(key) => key,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    let shutdown = ShutdownSignal::new();
    let harvester = Harvester::from_config(config, api_key, storage)?.with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current project");
            shutdown.trigger();
        }
    });

    let (run_id, report) = match harvester.run_batch_tracked(batch_size, config_hash).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Batch failed: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!(
        "Run {} finished: {} records written",
        run_id,
        report.records_written
    );

    Ok(())
}
