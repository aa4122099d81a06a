//! Wiring of the core library over a data directory on disk.
//!
//! `App` owns the persisted store, the stats manager and the cache
//! controller. Constructing it runs the stats migration, the same as every
//! app load does.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use customodoro_core::cache::{
    CacheController, ControllerSettings, DiskCacheStorage, HttpFetcher, Registration,
    ServiceWorker, CACHES_DIR,
};
use customodoro_core::models::{DailyStatRecord, DailyStats, MigrationResult, SessionKind};
use customodoro_core::notify::{Notifier, Reloader, Toast, ToastLevel};
use customodoro_core::storage::{FileStore, KeyValueStore, STORE_FILE};
use customodoro_core::timezone::{
    summarize, ContributionGraphObserver, StatsSummary, StatsView, StreakObserver,
    UserStatsObserver,
};
use customodoro_core::{Config, MigrationManager};

// ============================================================================
// Terminal collaborators
// ============================================================================

/// Prints toasts and the update prompt to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn toast(&self, toast: Toast) {
        let tag = match toast.level {
            ToastLevel::Info => "info",
            ToastLevel::Success => "ok",
            ToastLevel::Warning => "warning",
            ToastLevel::Error => "error",
        };
        eprintln!("[{tag}] {}", toast.message);
    }

    fn show_update_prompt(&self) {
        eprintln!("A new version is available. Applying shortly unless interrupted.");
    }
}

/// There is no page to reload in a terminal; the URL is reported instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReloader;

impl Reloader for ConsoleReloader {
    fn reload(&self, url: &str) {
        info!(url = %url, "Reload requested");
        println!("Reload: {url}");
    }
}

/// Prints the refreshed streak after a session is recorded.
#[derive(Debug, Default, Clone, Copy)]
struct ConsoleStatsView;

impl StatsView for ConsoleStatsView {
    fn update_streak(&self, streak: u32, today: &DailyStatRecord) -> Result<()> {
        println!(
            "Today: {} classic, {} reverse, {} breaks ({:.0} min). Streak: {} day(s)",
            today.classic, today.reverse, today.breaks, today.total_minutes, streak
        );
        Ok(())
    }
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    config: Config,
    data_dir: PathBuf,
    storage: Arc<DiskCacheStorage>,
    stats: MigrationManager,
    controller: Arc<CacheController>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        debug!(path = %data_dir.display(), "Using data directory");

        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::new(data_dir.join(STORE_FILE)).context("Failed to open local store")?,
        );
        let storage = Arc::new(
            DiskCacheStorage::new(data_dir.join(CACHES_DIR))
                .context("Failed to open cache storage")?,
        );

        let stats = MigrationManager::new(Arc::clone(&store), &config)?;
        let view: Arc<dyn StatsView> = Arc::new(ConsoleStatsView);
        stats.register_observer(Arc::new(ContributionGraphObserver::new(None)));
        stats.register_observer(Arc::new(StreakObserver::new(Some(view))));
        stats.register_observer(Arc::new(UserStatsObserver::new(None)));

        // Stats migration runs first on every load; failures are not fatal.
        match stats.migrate() {
            Ok(MigrationResult::Migrated { entries_migrated, ref timezone, .. }) => {
                info!(entries = entries_migrated, timezone = %timezone, "Stats migrated");
            }
            Ok(MigrationResult::AlreadyMigrated) => {}
            Err(e) => warn!(error = %e, "Stats migration failed, will retry on next run"),
        }

        let controller = CacheController::new(
            storage.clone(),
            Arc::clone(&store),
            Arc::new(ConsoleReloader),
            ControllerSettings::from_config(&config),
        )
        .with_notifier(Arc::new(ConsoleNotifier))
        .with_registration_file(Registration::default_path(&data_dir));

        Ok(Self {
            config,
            data_dir,
            storage,
            stats,
            controller: Arc::new(controller),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn stats(&self) -> &MigrationManager {
        &self.stats
    }

    pub fn controller(&self) -> &Arc<CacheController> {
        &self.controller
    }

    /// The worker for the version named in the config.
    pub fn deployed_worker(&self) -> Result<Arc<ServiceWorker>> {
        build_worker(&self.config, &self.storage)
    }

    /// Polling needs to rebuild the worker on every tick; config errors are
    /// logged and the tick skipped.
    pub fn worker_factory(&self) -> impl Fn() -> Option<Arc<ServiceWorker>> + Send + Sync + 'static {
        let config = self.config.clone();
        let storage = self.storage.clone();
        move || match build_worker(&config, &storage) {
            Ok(worker) => Some(worker),
            Err(e) => {
                warn!(error = %e, "Cannot build worker for update check");
                None
            }
        }
    }

    /// Records for the `days` days ending today, oldest first. Days without
    /// sessions are included as empty records.
    pub fn recent_days(&self, days: u32) -> Result<Vec<(NaiveDate, DailyStatRecord)>> {
        let stats = self.stats.all_stats()?;
        let today = self.stats.today();
        Ok((0..days as i64)
            .rev()
            .filter_map(|back| today.checked_sub_signed(Duration::days(back)))
            .map(|date| {
                let record = stats.get(&date).cloned().unwrap_or_default();
                (date, record)
            })
            .collect())
    }

    pub fn summary(&self) -> Result<(DailyStats, StatsSummary)> {
        let stats = self.stats.all_stats()?;
        let summary = summarize(&stats, self.stats.today());
        Ok((stats, summary))
    }

    pub fn record(&self, kind: SessionKind, minutes: f64) -> Result<DailyStatRecord> {
        self.stats
            .record_session(kind, minutes)
            .with_context(|| format!("Failed to record {kind} session"))
    }
}

fn build_worker(config: &Config, storage: &Arc<DiskCacheStorage>) -> Result<Arc<ServiceWorker>> {
    let fetcher = HttpFetcher::new(&config.app_url).context("Invalid app URL")?;
    Ok(Arc::new(ServiceWorker::new(
        config.cache_version(),
        config.asset_manifest()?,
        storage.clone(),
        Arc::new(fetcher),
    )))
}
