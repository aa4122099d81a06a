//! Customodoro command line driver.
//!
//! Runs the offline cache and the daily stats store against a data
//! directory on disk, so installs, updates, resets and session recording
//! can be exercised from a terminal.

mod app;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use customodoro_core::cache::{ClearOutcome, ClearReport, NoticeOutcome, UpdateStatus};
use customodoro_core::models::{MigrationResult, SessionKind};
use customodoro_core::Config;

use app::App;

/// Log file prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "customodoro.log";

/// Upper bound for `stats --days`, roughly ten years
const MAX_STATS_DAYS: i64 = 3660;

#[derive(Parser)]
#[command(name = "customodoro")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured cache version for offline use
    Install,
    /// Check whether a newer version is waiting
    Check(CheckArgs),
    /// Clear caches and app data, keeping settings, then reload
    Clear,
    /// Re-key daily stats to the local time zone
    Migrate(MigrateArgs),
    /// Show today's date and stats in the local time zone
    Today,
    /// Record a finished session
    Record(RecordArgs),
    /// Show recent daily stats
    Stats(StatsArgs),
    /// Poll for updates until interrupted
    Watch,
}

#[derive(Args)]
struct CheckArgs {
    /// Offer a waiting update, applying it after the grace period
    #[arg(long, default_value_t = false)]
    apply: bool,
}

#[derive(Args)]
struct MigrateArgs {
    /// Run again even if the stats were already migrated
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Args)]
struct RecordArgs {
    /// Session kind (classic, reverse, break)
    kind: SessionKind,
    /// Session length in minutes
    minutes: f64,
}

#[derive(Args)]
struct StatsArgs {
    /// Number of days to show, ending today
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=MAX_STATS_DAYS))]
    days: u32,

    /// Print every stored day as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). The returned guard
/// flushes the log file and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(version = %config.cache_version, "Customodoro starting");

    let app = App::new(config)?;

    match cli.command {
        Commands::Install => install(&app).await,
        Commands::Check(args) => check(&app, args.apply).await,
        Commands::Clear => {
            print_clear(app.controller().apply_update().await);
            Ok(())
        }
        Commands::Migrate(args) => migrate(&app, args.force),
        Commands::Today => today(&app),
        Commands::Record(args) => {
            app.record(args.kind, args.minutes)?;
            Ok(())
        }
        Commands::Stats(args) => stats(&app, args.days, args.json),
        Commands::Watch => watch(&app).await,
    }
}

async fn install(app: &App) -> Result<()> {
    let worker = app.deployed_worker()?;
    let status = app.controller().register(Arc::clone(&worker)).await;
    if worker.is_installed().await {
        println!("Cache {} installed in {}", worker.cache_name(), app.data_dir().display());
    } else {
        println!("Cache {} is not installed yet", worker.cache_name());
    }
    print_status(&status);
    Ok(())
}

async fn check(app: &App, apply: bool) -> Result<()> {
    let status = app.controller().register(app.deployed_worker()?).await;
    print_status(&status);

    if apply && status.is_update() {
        let notice = app.controller().notify_update_available();
        match notice.outcome().await {
            NoticeOutcome::Applied(outcome) | NoticeOutcome::AutoApplied(outcome) => {
                print_clear(outcome)
            }
            NoticeOutcome::Dismissed => println!("Update deferred"),
            NoticeOutcome::Cancelled => println!("Update prompt closed"),
        }
    }
    Ok(())
}

fn print_status(status: &UpdateStatus) {
    match status {
        UpdateStatus::UpdateAvailable { current, next } => {
            println!("Update available: {current} -> {next} (run `customodoro clear` to apply)")
        }
        UpdateStatus::NoUpdate => println!("Up to date"),
    }
}

fn print_clear(outcome: ClearOutcome) {
    match outcome {
        ClearOutcome::Completed(ClearReport {
            caches_deleted,
            worker_acknowledged,
            keys_removed,
            warnings,
            ..
        }) => {
            println!(
                "Deleted {caches_deleted} cache(s), removed {keys_removed} stored key(s){}",
                if worker_acknowledged { ", worker acknowledged" } else { "" }
            );
            for warning in warnings {
                eprintln!("warning: {warning}");
            }
        }
        ClearOutcome::AlreadyInProgress => println!("A clear is already in progress"),
    }
}

fn migrate(app: &App, force: bool) -> Result<()> {
    let stats = app.stats();
    if force {
        stats.reset_migration().context("Failed to reset migration flag")?;
    }
    match stats.migrate().context("Stats migration failed")? {
        MigrationResult::AlreadyMigrated => {
            let state = stats.migration_state()?;
            println!(
                "Already migrated (time zone {})",
                state.detected_timezone.as_deref().unwrap_or("unknown")
            );
        }
        MigrationResult::Migrated {
            entries_migrated,
            timezone,
            log,
        } => {
            println!("Migrated {entries_migrated} day(s) to {timezone}");
            println!("{}", serde_json::to_string_pretty(&log)?);
        }
    }
    Ok(())
}

fn today(app: &App) -> Result<()> {
    let stats = app.stats();
    let date = stats.today();
    let record = stats.stats_for(date)?.unwrap_or_default();
    println!("{date} ({})", stats.timezone().name());
    println!(
        "{} classic, {} reverse, {} breaks, {:.0} min",
        record.classic, record.reverse, record.breaks, record.total_minutes
    );
    Ok(())
}

fn stats(app: &App, days: u32, json: bool) -> Result<()> {
    if json {
        let (all, _) = app.summary()?;
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for (date, record) in app.recent_days(days)? {
        println!(
            "{date}  classic {:>3}  reverse {:>3}  break {:>3}  {:>6.0} min",
            record.classic, record.reverse, record.breaks, record.total_minutes
        );
    }
    let (_, summary) = app.summary()?;
    println!(
        "\n{} active day(s), {} focus session(s), {:.0} min, streak {} day(s)",
        summary.days_active,
        summary.classic + summary.reverse,
        summary.total_minutes,
        summary.current_streak
    );
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    let interval = app.config().update_poll_interval();
    println!("Checking for updates every {}s, Ctrl-C to stop", interval.as_secs());

    let poller = app.controller().spawn_update_polling(app.worker_factory());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    poller.abort();
    info!("Stopped update polling");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_record() {
        let cli = Cli::try_parse_from(["customodoro", "record", "classic", "25"]).unwrap();
        match cli.command {
            Commands::Record(args) => {
                assert_eq!(args.kind, SessionKind::Classic);
                assert_eq!(args.minutes, 25.0);
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["customodoro", "record", "nap", "25"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "customodoro",
            "stats",
            "--days",
            "30",
            "--log-dir",
            "/tmp/logs",
        ])
        .unwrap();
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/logs")));
        match cli.command {
            Commands::Stats(args) => assert_eq!(args.days, 30),
            _ => panic!("expected stats"),
        }
    }

    #[test]
    fn test_cli_bounds_stats_days() {
        assert!(Cli::try_parse_from(["customodoro", "stats", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["customodoro", "stats", "--days", "100000"]).is_err());
        let cli = Cli::try_parse_from(["customodoro", "stats", "--days", "3660"]).unwrap();
        assert!(matches!(cli.command, Commands::Stats(StatsArgs { days: 3660, .. })));
    }

    #[test]
    fn test_migrate_force_flag() {
        let cli = Cli::try_parse_from(["customodoro", "migrate", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate(MigrateArgs { force: true })));
    }
}
