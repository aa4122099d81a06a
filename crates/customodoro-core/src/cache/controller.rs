//! Page-side offline cache controller.
//!
//! Registers workers, detects when a new version is waiting, offers the
//! update to the user, and runs the settings-preserving clear-and-reload.
//! Cache failures never escape this module: they are logged and turned
//! into toasts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registration::{Registration, UpdateStatus};
use super::storage::CacheStorage;
use super::worker::{ServiceWorker, WorkerHandle, WorkerReply};
use crate::config::Config;
use crate::models::{CacheVersion, SettingsKeySet};
use crate::notify::{cache_busted_url, Notifier, Reloader, Toast};
use crate::storage::KeyValueStore;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub app_url: String,
    pub preserve: SettingsKeySet,
    pub auto_apply_grace: Duration,
    pub notice_dismiss_after: Duration,
    pub worker_ack_timeout: Duration,
    pub poll_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_url: config.app_url.clone(),
            preserve: config.settings_key_set(),
            auto_apply_grace: config.auto_apply_grace(),
            notice_dismiss_after: config.notice_dismiss_after(),
            worker_ack_timeout: config.worker_ack_timeout(),
            poll_interval: config.update_poll_interval(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one full clear-and-reload did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub caches_deleted: usize,
    pub worker_acknowledged: bool,
    pub keys_removed: usize,
    pub reload_url: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    Completed(ClearReport),
    /// Another clear was running; this call did nothing.
    AlreadyInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeOutcome {
    Applied(ClearOutcome),
    AutoApplied(ClearOutcome),
    Dismissed,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum NoticeDecision {
    Apply,
    Dismiss,
}

/// Handle to a visible update prompt.
pub struct UpdateNotice {
    decision: Option<oneshot::Sender<NoticeDecision>>,
    task: JoinHandle<NoticeOutcome>,
}

impl UpdateNotice {
    /// Update right away.
    pub fn apply(&mut self) {
        if let Some(tx) = self.decision.take() {
            let _ = tx.send(NoticeDecision::Apply);
        }
    }

    /// Defer the update and cancel the pending auto-apply.
    pub fn dismiss(&mut self) {
        if let Some(tx) = self.decision.take() {
            let _ = tx.send(NoticeDecision::Dismiss);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the prompt to resolve. Without a decision this is the
    /// auto-apply after the grace window.
    pub async fn outcome(self) -> NoticeOutcome {
        self.task.await.unwrap_or(NoticeOutcome::Cancelled)
    }
}

/// Resets the in-progress flag when a clear finishes or is cancelled.
struct ClearingGuard<'a>(&'a AtomicBool);

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ActiveWorker {
    handle: WorkerHandle,
    task: JoinHandle<()>,
}

pub struct CacheController {
    storage: Arc<dyn CacheStorage>,
    store: Arc<dyn KeyValueStore>,
    reloader: Arc<dyn Reloader>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: ControllerSettings,
    registration: Mutex<Registration>,
    registration_path: Option<PathBuf>,
    active: Mutex<Option<ActiveWorker>>,
    clearing: AtomicBool,
}

impl CacheController {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        store: Arc<dyn KeyValueStore>,
        reloader: Arc<dyn Reloader>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            storage,
            store,
            reloader,
            notifier: None,
            settings,
            registration: Mutex::new(Registration::default()),
            registration_path: None,
            active: Mutex::new(None),
            clearing: AtomicBool::new(false),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Persist the registration at `path`, loading what is already there.
    pub fn with_registration_file(mut self, path: PathBuf) -> Self {
        let registration = match Registration::load(&path) {
            Ok(reg) => reg,
            Err(e) => {
                warn!(error = %e, "Failed to load registration, starting fresh");
                Registration::default()
            }
        };
        self.registration = Mutex::new(registration);
        self.registration_path = Some(path);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn registration(&self) -> Registration {
        match self.registration.lock() {
            Ok(reg) => reg.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_clearing(&self) -> bool {
        self.clearing.load(Ordering::SeqCst)
    }

    fn update_registration<R>(&self, f: impl FnOnce(&mut Registration) -> R) -> R {
        let mut guard = match self.registration.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = f(&mut guard);
        if let Some(ref path) = self.registration_path {
            if let Err(e) = guard.save(path) {
                warn!(error = %e, "Failed to persist registration");
            }
        }
        out
    }

    fn toast(&self, toast: Toast) {
        if let Some(ref notifier) = self.notifier {
            notifier.toast(toast);
        }
    }

    fn active_handle(&self) -> Option<WorkerHandle> {
        let guard = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(|a| a.handle.clone())
    }

    fn attach(&self, worker: Arc<ServiceWorker>) {
        let (handle, task) = worker.spawn();
        let mut guard = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(ActiveWorker { handle, task }) {
            previous.task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_handle(&self, handle: WorkerHandle) {
        let task = tokio::spawn(async {});
        let mut guard = self.active.lock().unwrap();
        *guard = Some(ActiveWorker { handle, task });
    }

    /// Register the deployed worker, installing it when needed.
    ///
    /// A failed install is retried on the next registration; it is never
    /// reported as an update.
    pub async fn register(&self, worker: Arc<ServiceWorker>) -> UpdateStatus {
        let version = worker.version().clone();
        let reg = self.registration();
        let controls = reg.controller() == Some(version.clone());
        let waiting = reg.waiting() == Some(version.clone());

        if (controls || waiting) && worker.is_installed().await {
            if controls && !self.is_attached(&version) {
                self.attach(worker);
            }
            return self.activate_detection();
        }

        if let Err(e) = worker.install().await {
            warn!(version = %version, error = %e, "Worker install failed");
            self.toast(Toast::warning(
                "Offline files could not be downloaded. Will retry on next load.",
            ));
            return self.activate_detection();
        }

        let first_install = reg.controller.is_none();
        self.update_registration(|r| r.worker_installed(&version));

        if first_install || controls {
            worker.activate().await;
            self.attach(worker);
            if first_install {
                info!(version = %version, "Ready for offline use");
                self.toast(Toast::info("Ready for offline use"));
            }
        }
        self.activate_detection()
    }

    fn is_attached(&self, version: &CacheVersion) -> bool {
        self.active_handle()
            .map(|h| h.version() == version)
            .unwrap_or(false)
    }

    pub fn activate_detection(&self) -> UpdateStatus {
        let status = self.registration().activate_detection();
        if let UpdateStatus::UpdateAvailable { ref current, ref next } = status {
            info!(current = %current, next = %next, "Update available");
        }
        status
    }

    /// Clear with the configured whitelist.
    pub async fn apply_update(&self) -> ClearOutcome {
        let preserve = self.settings.preserve.clone();
        self.clear_and_reload(&preserve).await
    }

    /// Delete caches and non-whitelisted storage, then reload.
    ///
    /// Only one clear runs at a time; overlapping calls return
    /// `AlreadyInProgress` without doing anything. Cache and worker
    /// failures are reported but never stop the storage clear or the
    /// reload.
    pub async fn clear_and_reload(&self, preserve: &SettingsKeySet) -> ClearOutcome {
        if self
            .clearing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Cache clear already in progress, ignoring request");
            return ClearOutcome::AlreadyInProgress;
        }
        let _guard = ClearingGuard(&self.clearing);
        let mut report = ClearReport::default();

        info!("Clearing caches and app data");

        // (a) every named cache store
        let (deleted, failures) = self.delete_all_caches().await;
        report.caches_deleted = deleted;
        if !failures.is_empty() {
            self.toast(Toast::warning(
                "Some cached files could not be removed. Reloading anyway.",
            ));
            report.warnings.extend(failures);
        }

        // (b) the worker's own caches
        match self.active_handle() {
            Some(handle) => {
                match tokio::time::timeout(self.settings.worker_ack_timeout, handle.clear_cache())
                    .await
                {
                    Ok(Ok(WorkerReply::CacheCleared { deleted })) => {
                        debug!(deleted, "Worker acknowledged cache clear");
                        report.worker_acknowledged = true;
                    }
                    Ok(Ok(WorkerReply::Failed(reason))) => {
                        warn!(reason = %reason, "Worker failed to clear its cache");
                        report.worker_acknowledged = true;
                        report.warnings.push(format!("worker: {reason}"));
                        self.toast(Toast::warning("The offline worker could not clear its cache."));
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Worker did not answer cache clear");
                        report.warnings.push(format!("worker: {e}"));
                        self.toast(Toast::warning("The offline worker did not respond."));
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.settings.worker_ack_timeout.as_millis() as u64,
                            "Timed out waiting for worker to clear its cache"
                        );
                        report.warnings.push("worker: timed out".to_string());
                        self.toast(Toast::warning("The offline worker did not respond."));
                    }
                }
            }
            None => debug!("No active worker to message"),
        }

        // (c) everything but the whitelisted settings
        let mut removed = 0;
        let cleared = self.store.transaction(&mut |map| {
            let before = map.len();
            map.retain(|key, _| preserve.contains(key));
            removed = before - map.len();
            Ok(())
        });
        match cleared {
            Ok(()) => {
                info!(removed, "Cleared app data, settings preserved");
                report.keys_removed = removed;
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear app data");
                report.warnings.push(format!("storage: {e}"));
                self.toast(Toast::warning("Saved data could not be cleared."));
            }
        }

        // (d) reload onto the newest worker
        if let Some(next) = self.update_registration(|r| r.skip_waiting()) {
            info!(version = %next, "Waiting worker takes control on reload");
        }
        report.reload_url = cache_busted_url(&self.settings.app_url, Utc::now().timestamp_millis());
        info!(url = %report.reload_url, "Reloading");
        self.reloader.reload(&report.reload_url);

        ClearOutcome::Completed(report)
    }

    async fn delete_all_caches(&self) -> (usize, Vec<String>) {
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list caches");
                return (0, vec![format!("list caches: {e}")]);
            }
        };

        let mut deleted = 0;
        let mut failures = Vec::new();
        for name in names {
            match self.storage.delete(&name).await {
                Ok(true) => {
                    debug!(cache = %name, "Deleted cache");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete cache");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }
        (deleted, failures)
    }

    /// Offer the waiting update; auto-applies after the grace window.
    pub fn notify_update_available(self: &Arc<Self>) -> UpdateNotice {
        let (tx, rx) = oneshot::channel();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run_notice(rx).await });
        UpdateNotice {
            decision: Some(tx),
            task,
        }
    }

    async fn run_notice(&self, mut rx: oneshot::Receiver<NoticeDecision>) -> NoticeOutcome {
        if let Some(ref notifier) = self.notifier {
            notifier.show_update_prompt();
        }

        let grace = tokio::time::sleep(self.settings.auto_apply_grace);
        let hide = tokio::time::sleep(self.settings.notice_dismiss_after);
        tokio::pin!(grace);
        tokio::pin!(hide);

        let mut hidden = false;
        let mut listening = true;
        let decision = loop {
            tokio::select! {
                d = &mut rx, if listening => match d {
                    Ok(d) => break Some(d),
                    // Handle dropped: keep waiting for the grace window.
                    Err(_) => listening = false,
                },
                _ = &mut grace => break None,
                _ = &mut hide, if !hidden => {
                    self.hide_prompt();
                    hidden = true;
                }
            }
        };
        if !hidden {
            self.hide_prompt();
        }

        match decision {
            Some(NoticeDecision::Apply) => {
                info!("Update accepted");
                NoticeOutcome::Applied(self.apply_update().await)
            }
            Some(NoticeDecision::Dismiss) => {
                info!("Update deferred");
                NoticeOutcome::Dismissed
            }
            None => {
                info!("No response to update prompt, applying");
                NoticeOutcome::AutoApplied(self.apply_update().await)
            }
        }
    }

    fn hide_prompt(&self) {
        if let Some(ref notifier) = self.notifier {
            notifier.hide_update_prompt();
        }
    }

    /// Re-check for updates on a fixed interval.
    ///
    /// `deployed` yields the worker for the currently deployed version.
    /// A prompt is shown once per newly waiting version. The task runs
    /// until the returned handle is aborted.
    pub fn spawn_update_polling<F>(self: &Arc<Self>, deployed: F) -> JoinHandle<()>
    where
        F: Fn() -> Option<Arc<ServiceWorker>> + Send + Sync + 'static,
    {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.settings.poll_interval);
            let mut notified: Option<CacheVersion> = None;
            let mut notice: Option<UpdateNotice> = None;
            loop {
                ticker.tick().await;
                let Some(worker) = deployed() else {
                    debug!("No deployed worker to check");
                    continue;
                };
                let status = controller.register(worker).await;
                if let UpdateStatus::UpdateAvailable { next, .. } = status {
                    let showing = notice.as_ref().map(|n| !n.is_finished()).unwrap_or(false);
                    if notified.as_ref() != Some(&next) && !showing && !controller.is_clearing() {
                        notice = Some(controller.notify_update_available());
                        notified = Some(next);
                    }
                }
            }
        })
    }
}

impl Drop for CacheController {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.active.lock() {
            if let Some(active) = guard.take() {
                active.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use super::*;
    use crate::cache::storage::MemoryCacheStorage;
    use crate::cache::worker::tests::{manifest, StaticFetcher};
    use crate::notify::ToastLevel;
    use crate::storage::MemoryStore;

    #[derive(Default)]
    struct RecordingReloader {
        urls: Mutex<Vec<String>>,
    }

    impl Reloader for RecordingReloader {
        fn reload(&self, url: &str) {
            self.urls.lock().unwrap().push(url.to_string());
        }
    }

    impl RecordingReloader {
        fn count(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        toasts: Mutex<Vec<Toast>>,
        shown: AtomicUsize,
        hidden: AtomicUsize,
    }

    impl Notifier for RecordingNotifier {
        fn toast(&self, toast: Toast) {
            self.toasts.lock().unwrap().push(toast);
        }

        fn show_update_prompt(&self) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }

        fn hide_update_prompt(&self) {
            self.hidden.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        controller: Arc<CacheController>,
        storage: Arc<MemoryCacheStorage>,
        store: Arc<MemoryStore>,
        reloader: Arc<RecordingReloader>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = Arc::new(MemoryStore::with_entries([
            ("theme", "dark"),
            ("volume", "0.4"),
            ("alarmSound", "bell"),
            ("customodoroStatsByDay", r#"{"2025-10-12":{"classic":1}}"#),
            ("customodoroTimezoneV2", "true"),
            ("migrationLog", "[]"),
            ("leaderboardCache", "{}"),
        ]));
        let reloader = Arc::new(RecordingReloader::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = CacheController::new(
            storage.clone(),
            store.clone(),
            reloader.clone(),
            ControllerSettings::default(),
        )
        .with_notifier(notifier.clone());
        Fixture {
            controller: Arc::new(controller),
            storage,
            store,
            reloader,
            notifier,
        }
    }

    fn worker(version: &str, storage: &Arc<MemoryCacheStorage>) -> Arc<ServiceWorker> {
        Arc::new(ServiceWorker::new(
            CacheVersion::new(version),
            manifest(&["/", "/script.js"]),
            storage.clone(),
            Arc::new(StaticFetcher::with(&["/", "/script.js"])),
        ))
    }

    #[tokio::test]
    async fn test_clear_preserves_only_whitelisted_settings() {
        let f = fixture();
        f.storage.put("customodoro-v1", "/", vec![1]).await.unwrap();
        f.storage.put("other-cache", "/", vec![1]).await.unwrap();

        let outcome = f.controller.apply_update().await;
        let ClearOutcome::Completed(report) = outcome else {
            panic!("expected a completed clear");
        };

        assert_eq!(report.caches_deleted, 2);
        assert_eq!(report.keys_removed, 4);
        assert!(report.warnings.is_empty());
        assert!(f.storage.keys().await.unwrap().is_empty());

        let remaining = f.store.entries().unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(remaining.get("volume").map(String::as_str), Some("0.4"));
        assert_eq!(remaining.get("alarmSound").map(String::as_str), Some("bell"));

        assert_eq!(f.reloader.count(), 1);
        assert!(report.reload_url.starts_with("https://customodoro.app/?_cb="));
    }

    #[tokio::test]
    async fn test_overlapping_clears_run_once() {
        let f = fixture();
        f.controller.register(worker("v1", &f.storage)).await;

        let (first, second) = tokio::join!(
            f.controller.apply_update(),
            f.controller.apply_update()
        );

        assert!(matches!(first, ClearOutcome::Completed(_)));
        assert_eq!(second, ClearOutcome::AlreadyInProgress);
        assert_eq!(f.reloader.count(), 1);
        assert!(!f.controller.is_clearing());

        // The flag is released afterwards.
        assert!(matches!(
            f.controller.apply_update().await,
            ClearOutcome::Completed(_)
        ));
        assert_eq!(f.reloader.count(), 2);
    }

    #[tokio::test]
    async fn test_cache_delete_failure_still_clears_storage_and_reloads() {
        let f = fixture();
        f.storage.put("customodoro-v1", "/", vec![1]).await.unwrap();
        f.storage.set_fail_deletes(true);

        let ClearOutcome::Completed(report) = f.controller.apply_update().await else {
            panic!("expected a completed clear");
        };
        assert_eq!(report.caches_deleted, 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.keys_removed, 4);
        assert_eq!(f.reloader.count(), 1);

        let toasts = f.notifier.toasts.lock().unwrap();
        assert!(toasts.iter().any(|t| t.level == ToastLevel::Warning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_worker_does_not_block_clear() {
        let f = fixture();
        let (tx, _rx) = mpsc::channel(1);
        f.controller
            .attach_handle(WorkerHandle::from_parts(CacheVersion::new("v1"), tx));

        let ClearOutcome::Completed(report) = f.controller.apply_update().await else {
            panic!("expected a completed clear");
        };
        assert!(!report.worker_acknowledged);
        assert!(report.warnings.iter().any(|w| w.contains("timed out")));
        assert_eq!(f.reloader.count(), 1);
    }

    #[tokio::test]
    async fn test_register_first_install_then_update() {
        let f = fixture();

        let status = f.controller.register(worker("v1", &f.storage)).await;
        assert_eq!(status, UpdateStatus::NoUpdate);
        assert_eq!(f.controller.registration().controller(), Some(CacheVersion::new("v1")));
        assert!(f
            .notifier
            .toasts
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.message.contains("offline")));

        // Same version again: nothing to do.
        let status = f.controller.register(worker("v1", &f.storage)).await;
        assert_eq!(status, UpdateStatus::NoUpdate);

        let status = f.controller.register(worker("v2", &f.storage)).await;
        assert!(status.is_update());
        let mut names = f.storage.keys().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["customodoro-v1".to_string(), "customodoro-v2".to_string()]);

        // Clearing adopts the waiting worker; the next load reinstalls it.
        f.controller.apply_update().await;
        assert_eq!(f.controller.registration().controller(), Some(CacheVersion::new("v2")));
        let status = f.controller.register(worker("v2", &f.storage)).await;
        assert_eq!(status, UpdateStatus::NoUpdate);
        assert_eq!(f.storage.keys().await.unwrap(), vec!["customodoro-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_install_is_not_an_update() {
        let f = fixture();
        f.controller.register(worker("v1", &f.storage)).await;

        let broken = Arc::new(ServiceWorker::new(
            CacheVersion::new("v2"),
            manifest(&["/", "/gone.js"]),
            f.storage.clone(),
            Arc::new(StaticFetcher::with(&["/"])),
        ));
        assert_eq!(f.controller.register(broken).await, UpdateStatus::NoUpdate);
        assert!(f.controller.registration().waiting.is_none());
        assert_eq!(f.storage.keys().await.unwrap(), vec!["customodoro-v1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_auto_applies_after_grace() {
        let f = fixture();
        let notice = f.controller.notify_update_available();

        let outcome = notice.outcome().await;
        assert!(matches!(outcome, NoticeOutcome::AutoApplied(ClearOutcome::Completed(_))));
        assert_eq!(f.reloader.count(), 1);
        assert_eq!(f.notifier.shown.load(Ordering::SeqCst), 1);
        assert_eq!(f.notifier.hidden.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_cancels_auto_apply() {
        let f = fixture();
        let mut notice = f.controller.notify_update_available();
        tokio::time::sleep(Duration::from_secs(1)).await;
        notice.dismiss();

        assert_eq!(notice.outcome().await, NoticeOutcome::Dismissed);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.reloader.count(), 0);
        assert_eq!(f.notifier.hidden.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.get("leaderboardCache").unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_now() {
        let f = fixture();
        let mut notice = f.controller.notify_update_available();
        notice.apply();
        assert!(matches!(
            notice.outcome().await,
            NoticeOutcome::Applied(ClearOutcome::Completed(_))
        ));
        assert_eq!(f.reloader.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_prompts_once_per_new_version() {
        let f = fixture();
        f.controller.register(worker("v1", &f.storage)).await;

        let storage = f.storage.clone();
        let poller = f
            .controller
            .spawn_update_polling(move || Some(worker("v2", &storage)));

        // First tick fires immediately; the prompt auto-applies after 3s.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.notifier.shown.load(Ordering::SeqCst), 1);
        assert_eq!(f.reloader.count(), 1);

        // v2 controls now; later ticks find nothing new.
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert_eq!(f.notifier.shown.load(Ordering::SeqCst), 1);
        assert_eq!(f.controller.registration().controller(), Some(CacheVersion::new("v2")));

        poller.abort();
    }
}
