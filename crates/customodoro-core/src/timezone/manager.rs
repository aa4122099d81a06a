use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::detect::{rekey, resolve_timezone};
use super::observers::{ObserverSet, StatsChange, StatsObserver};
use crate::config::Config;
use crate::error::{MigrationError, StoreError};
use crate::models::{
    date_key, DailyStatRecord, DailyStats, MigrationLogEntry, MigrationResult, MigrationState,
    SessionKind,
};
use crate::storage::{KeyValueStore, StatsRepository};

/// "true" once the stats store has been re-keyed to the user's zone.
pub const TIMEZONE_MIGRATED_KEY: &str = "customodoroTimezoneV2";

/// IANA name of the zone the migration ran in.
pub const USER_TIMEZONE_KEY: &str = "userTimezone";

/// JSON array of `MigrationLogEntry`.
pub const MIGRATION_LOG_KEY: &str = "migrationLog";

/// Attempts at a stats write before a revision conflict is returned.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Owns the day-bucketed stats: the one-shot re-keying from the legacy
/// offset, and the only write path for recording sessions.
pub struct MigrationManager {
    repo: StatsRepository,
    timezone: Tz,
    legacy_offset: FixedOffset,
    clock: Arc<dyn Clock>,
    observers: ObserverSet,
}

impl MigrationManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config) -> Result<Self> {
        let manager = Self {
            repo: StatsRepository::new(store),
            timezone: resolve_timezone(config.timezone.as_deref()),
            legacy_offset: config.legacy_offset()?,
            clock: Arc::new(SystemClock),
            observers: ObserverSet::new(),
        };
        debug!(
            timezone = manager.timezone.name(),
            migrated = manager.is_migrated().unwrap_or(false),
            "Migration manager ready"
        );
        Ok(manager)
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_observer(&self, observer: Arc<dyn StatsObserver>) {
        self.observers.register(observer);
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.repo.store()
    }

    pub fn is_migrated(&self) -> Result<bool, StoreError> {
        Ok(self.store().get(TIMEZONE_MIGRATED_KEY)?.as_deref() == Some("true"))
    }

    pub fn migration_state(&self) -> Result<MigrationState, StoreError> {
        let migration_log = match self.store().get(MIGRATION_LOG_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Stored migration log is unreadable");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(MigrationState {
            migrated: self.is_migrated()?,
            detected_timezone: self.store().get(USER_TIMEZONE_KEY)?,
            migration_log,
        })
    }

    /// Re-key every legacy day bucket into the detected zone, once.
    ///
    /// Entries that cannot be converted are logged as failed and carried
    /// over under their old key. The new stats, the flag, the zone and the
    /// log are committed together.
    pub fn migrate(&self) -> Result<MigrationResult, MigrationError> {
        if self.is_migrated()? {
            debug!("Stats already migrated");
            return Ok(MigrationResult::AlreadyMigrated);
        }

        let snapshot = self.repo.load()?;
        let mut migrated: BTreeMap<NaiveDate, DailyStatRecord> = BTreeMap::new();
        let mut failed: Vec<(&String, &Value)> = Vec::new();
        let mut log = Vec::with_capacity(snapshot.entries.len());

        for (old_key, value) in &snapshot.entries {
            let outcome = self.convert(old_key, value).and_then(|(new_date, record)| {
                let combined = match migrated.get(&new_date) {
                    Some(existing) => existing.merged(&record),
                    None => Some(record.clone()),
                };
                combined
                    .map(|combined| (new_date, record, combined))
                    .ok_or_else(|| MigrationError::InvalidRecord {
                        key: old_key.clone(),
                        reason: format!("counts overflow when merged into {}", date_key(new_date)),
                    })
            });
            match outcome {
                Ok((new_date, record, combined)) => {
                    log.push(MigrationLogEntry::Success {
                        old_key: old_key.clone(),
                        new_key: date_key(new_date),
                        minutes: record.total_minutes,
                        classic: record.classic,
                        reverse: record.reverse,
                    });
                    migrated.insert(new_date, combined);
                }
                Err(e) => {
                    warn!(key = %old_key, error = %e, "Failed to migrate stats entry");
                    log.push(MigrationLogEntry::Failed {
                        old_key: old_key.clone(),
                        error: e.to_string(),
                    });
                    failed.push((old_key, value));
                }
            }
        }

        let mut entries = BTreeMap::new();
        for (date, record) in &migrated {
            entries.insert(date_key(*date), serde_json::to_value(record).map_err(StoreError::from)?);
        }
        for (old_key, value) in failed {
            if entries.contains_key(old_key) {
                warn!(key = %old_key, "Dropping unmigratable entry shadowed by a migrated day");
                continue;
            }
            entries.insert(old_key.clone(), value.clone());
        }

        let timezone = self.timezone.name().to_string();
        let log_json = serde_json::to_string(&log).map_err(StoreError::from)?;
        self.repo.replace_all(
            &entries,
            &[
                (TIMEZONE_MIGRATED_KEY, "true".to_string()),
                (USER_TIMEZONE_KEY, timezone.clone()),
                (MIGRATION_LOG_KEY, log_json),
            ],
        )?;

        let entries_migrated = log.iter().filter(|e| !e.is_failed()).count();
        info!(
            timezone = %timezone,
            entries = entries_migrated,
            failed = log.len() - entries_migrated,
            "Migrated daily stats to local time zone"
        );

        Ok(MigrationResult::Migrated {
            entries_migrated,
            timezone,
            log,
        })
    }

    fn convert(
        &self,
        old_key: &str,
        value: &Value,
    ) -> Result<(NaiveDate, DailyStatRecord), MigrationError> {
        let record: DailyStatRecord =
            serde_json::from_value(value.clone()).map_err(|e| MigrationError::InvalidRecord {
                key: old_key.to_string(),
                reason: e.to_string(),
            })?;
        let date = rekey(old_key, &record, self.legacy_offset, self.timezone)?;
        Ok((date, record))
    }

    /// Clear the one-shot flag so the next `migrate` runs again. Stats are
    /// left as they are.
    pub fn reset_migration(&self) -> Result<(), StoreError> {
        warn!("Resetting stats migration flag");
        self.store().remove(TIMEZONE_MIGRATED_KEY)
    }

    /// Current calendar date in the detected zone.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.timezone).date_naive()
    }

    /// Count one finished session against today's bucket.
    ///
    /// Retries when another writer got in between the read and the write.
    /// Observers run after the record is committed.
    pub fn record_session(
        &self,
        kind: SessionKind,
        minutes: f64,
    ) -> Result<DailyStatRecord, StoreError> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(StoreError::InvalidInput(format!(
                "session minutes must be a non-negative number, got {minutes}"
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now();
            let date = now.with_timezone(&self.timezone).date_naive();

            let mut snapshot = self.repo.load()?;
            let mut record = snapshot.record(date)?.unwrap_or_default();
            record.record(kind, minutes, now);
            snapshot.put(date, &record)?;

            match self.repo.save(&snapshot) {
                Ok(revision) => {
                    debug!(date = %date, kind = %kind, minutes, revision, "Recorded session");
                    let change = StatsChange {
                        date,
                        kind,
                        minutes,
                        record: record.clone(),
                        stats: snapshot.decode(),
                    };
                    self.observers.publish(&change);
                    return Ok(record);
                }
                Err(StoreError::Conflict { expected, found }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(attempt, expected, found, "Stats changed underneath, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn stats_for(&self, date: NaiveDate) -> Result<Option<DailyStatRecord>, StoreError> {
        self.repo.load()?.record(date)
    }

    pub fn all_stats(&self) -> Result<DailyStats, StoreError> {
        Ok(self.repo.load()?.decode())
    }
}
