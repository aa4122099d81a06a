//! Observers notified after a session is recorded.
//!
//! Every observer runs inside its own failure boundary: an error or a panic
//! is logged and the next observer still runs. The stored record is already
//! committed by the time observers see it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::models::{DailyStatRecord, DailyStats, SessionKind};

/// One committed stats change.
#[derive(Debug, Clone)]
pub struct StatsChange {
    pub date: NaiveDate,
    pub kind: SessionKind,
    pub minutes: f64,
    pub record: DailyStatRecord,
    pub stats: DailyStats,
}

pub trait StatsObserver: Send + Sync {
    fn name(&self) -> &str;

    fn stats_changed(&self, change: &StatsChange) -> Result<()>;
}

#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn StatsObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn StatsObserver>) {
        match self.observers.write() {
            Ok(mut guard) => guard.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every observer; returns how many failed.
    pub fn publish(&self, change: &StatsChange) -> usize {
        let observers: Vec<Arc<dyn StatsObserver>> = match self.observers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let mut failures = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.stats_changed(change))) {
                Ok(Ok(())) => debug!(observer = observer.name(), "Observer notified"),
                Ok(Err(e)) => {
                    warn!(observer = observer.name(), error = %e, "Observer failed");
                    failures += 1;
                }
                Err(_) => {
                    warn!(observer = observer.name(), "Observer panicked");
                    failures += 1;
                }
            }
        }
        failures
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Consecutive days with at least one focus session, ending today.
///
/// A day without sessions yet does not break the streak until it is over,
/// so counting starts from yesterday when today is still empty.
pub fn compute_streak(stats: &DailyStats, today: NaiveDate) -> u32 {
    let active = |d: NaiveDate| stats.get(&d).map(|r| r.focus_sessions() > 0).unwrap_or(false);

    let mut day = if active(today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0;
    while active(day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSummary {
    pub days_active: usize,
    pub classic: u64,
    pub reverse: u64,
    pub breaks: u64,
    pub total_minutes: f64,
    pub current_streak: u32,
}

pub fn summarize(stats: &DailyStats, today: NaiveDate) -> StatsSummary {
    let mut summary = StatsSummary {
        current_streak: compute_streak(stats, today),
        ..Default::default()
    };
    for record in stats.values() {
        if record.focus_sessions() > 0 || record.breaks > 0 {
            summary.days_active += 1;
        }
        summary.classic += u64::from(record.classic);
        summary.reverse += u64::from(record.reverse);
        summary.breaks += u64::from(record.breaks);
        summary.total_minutes += record.total_minutes;
    }
    summary
}

// ============================================================================
// Collaborator hooks
// ============================================================================

/// Display surfaces that refresh after a change. All optional.
pub trait StatsView: Send + Sync {
    fn render_contribution_graph(&self, _stats: &DailyStats) -> Result<()> {
        Ok(())
    }

    fn update_streak(&self, _streak: u32, _today: &DailyStatRecord) -> Result<()> {
        Ok(())
    }

    fn update_user_stats(&self, _summary: &StatsSummary) -> Result<()> {
        Ok(())
    }
}

pub trait RemoteSync: Send + Sync {
    fn request_sync(&self, change: &StatsChange) -> Result<()>;
}

pub trait AuthSession: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

pub struct ContributionGraphObserver {
    view: Option<Arc<dyn StatsView>>,
}

impl ContributionGraphObserver {
    pub fn new(view: Option<Arc<dyn StatsView>>) -> Self {
        Self { view }
    }
}

impl StatsObserver for ContributionGraphObserver {
    fn name(&self) -> &str {
        "contribution-graph"
    }

    fn stats_changed(&self, change: &StatsChange) -> Result<()> {
        match self.view {
            Some(ref view) => view.render_contribution_graph(&change.stats),
            None => Ok(()),
        }
    }
}

pub struct StreakObserver {
    view: Option<Arc<dyn StatsView>>,
}

impl StreakObserver {
    pub fn new(view: Option<Arc<dyn StatsView>>) -> Self {
        Self { view }
    }
}

impl StatsObserver for StreakObserver {
    fn name(&self) -> &str {
        "streak"
    }

    fn stats_changed(&self, change: &StatsChange) -> Result<()> {
        match self.view {
            Some(ref view) => {
                let streak = compute_streak(&change.stats, change.date);
                view.update_streak(streak, &change.record)
            }
            None => Ok(()),
        }
    }
}

pub struct UserStatsObserver {
    view: Option<Arc<dyn StatsView>>,
}

impl UserStatsObserver {
    pub fn new(view: Option<Arc<dyn StatsView>>) -> Self {
        Self { view }
    }
}

impl StatsObserver for UserStatsObserver {
    fn name(&self) -> &str {
        "user-stats"
    }

    fn stats_changed(&self, change: &StatsChange) -> Result<()> {
        match self.view {
            Some(ref view) => view.update_user_stats(&summarize(&change.stats, change.date)),
            None => Ok(()),
        }
    }
}

/// Triggers a remote sync, but only with both a sync collaborator and a
/// signed-in session.
pub struct RemoteSyncObserver {
    sync: Option<Arc<dyn RemoteSync>>,
    session: Option<Arc<dyn AuthSession>>,
}

impl RemoteSyncObserver {
    pub fn new(sync: Option<Arc<dyn RemoteSync>>, session: Option<Arc<dyn AuthSession>>) -> Self {
        Self { sync, session }
    }
}

impl StatsObserver for RemoteSyncObserver {
    fn name(&self) -> &str {
        "remote-sync"
    }

    fn stats_changed(&self, change: &StatsChange) -> Result<()> {
        match (&self.sync, &self.session) {
            (Some(sync), Some(session)) if session.is_authenticated() => sync.request_sync(change),
            _ => {
                debug!("Remote sync unavailable, skipping");
                Ok(())
            }
        }
    }
}
