use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::warn;

use super::kv::{KeyValueStore, StoreMap};
use crate::error::StoreError;
use crate::models::{date_key, parse_date_key, DailyStatRecord, DailyStats};

/// JSON map of date key to `DailyStatRecord`.
pub const STATS_KEY: &str = "customodoroStatsByDay";

/// Bumped on every stats write; used to detect lost updates.
pub const STATS_REVISION_KEY: &str = "customodoroStatsRevision";

/// Raw copy of an unreadable stats value, taken before it is overwritten.
pub const STATS_BACKUP_KEY: &str = "customodoroStatsByDayBackup";

/// Raw stats entries plus the revision they were read at.
///
/// Entries stay as JSON values so records this version cannot decode are
/// written back untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub entries: BTreeMap<String, Value>,
    pub revision: u64,
}

impl StatsSnapshot {
    pub fn record(&self, date: NaiveDate) -> Result<Option<DailyStatRecord>, StoreError> {
        match self.entries.get(&date_key(date)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn put(&mut self, date: NaiveDate, record: &DailyStatRecord) -> Result<(), StoreError> {
        self.entries.insert(date_key(date), serde_json::to_value(record)?);
        Ok(())
    }

    /// Decode every well-formed entry, skipping the rest.
    pub fn decode(&self) -> DailyStats {
        let mut out = DailyStats::new();
        for (key, value) in &self.entries {
            let date = match parse_date_key(key) {
                Ok(date) => date,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping stats entry with malformed date key");
                    continue;
                }
            };
            match serde_json::from_value::<DailyStatRecord>(value.clone()) {
                Ok(record) => {
                    out.insert(date, record);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable stats entry"),
            }
        }
        out
    }
}

/// Sole owner of the day-bucketed stats key.
#[derive(Clone)]
pub struct StatsRepository {
    store: Arc<dyn KeyValueStore>,
}

impl StatsRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Entries of a raw stats value. Missing, blank and `null` values are
    /// empty; anything but a JSON object is an error.
    fn parse_entries(raw: Option<&String>) -> Result<BTreeMap<String, Value>, String> {
        let raw = match raw {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(BTreeMap::new()),
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Null) => Ok(BTreeMap::new()),
            Ok(Value::Object(entries)) => Ok(entries.into_iter().collect()),
            Ok(other) => Err(format!("expected an object, found {}", json_kind(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// An unreadable stats value loads as empty so recording keeps working.
    fn read_snapshot(map: &StoreMap) -> StatsSnapshot {
        let entries = Self::parse_entries(map.get(STATS_KEY)).unwrap_or_else(|reason| {
            warn!(reason = %reason, "Stored stats are unreadable, starting empty");
            BTreeMap::new()
        });
        StatsSnapshot {
            entries,
            revision: Self::read_revision(map),
        }
    }

    /// Copy an unreadable stats value aside before it gets overwritten.
    fn back_up_unreadable(map: &mut StoreMap) {
        let raw = match map.get(STATS_KEY) {
            Some(raw) if Self::parse_entries(Some(raw)).is_err() => raw.clone(),
            _ => return,
        };
        warn!(key = STATS_BACKUP_KEY, bytes = raw.len(), "Backing up unreadable stats");
        map.insert(STATS_BACKUP_KEY.to_string(), raw);
    }

    fn read_revision(map: &StoreMap) -> u64 {
        map.get(STATS_REVISION_KEY)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    fn write_snapshot(
        map: &mut StoreMap,
        entries: &BTreeMap<String, Value>,
        revision: u64,
    ) -> Result<(), StoreError> {
        map.insert(STATS_KEY.to_string(), serde_json::to_string(entries)?);
        map.insert(STATS_REVISION_KEY.to_string(), revision.to_string());
        Ok(())
    }

    pub fn load(&self) -> Result<StatsSnapshot, StoreError> {
        Ok(Self::read_snapshot(&self.store.entries()?))
    }

    /// Write `snapshot` back if nobody else wrote since it was loaded.
    ///
    /// Returns the new revision.
    pub fn save(&self, snapshot: &StatsSnapshot) -> Result<u64, StoreError> {
        let mut new_revision = snapshot.revision;
        self.store.transaction(&mut |map| {
            let found = Self::read_revision(map);
            if found != snapshot.revision {
                return Err(StoreError::Conflict {
                    expected: snapshot.revision,
                    found,
                });
            }
            new_revision = found + 1;
            Self::back_up_unreadable(map);
            Self::write_snapshot(map, &snapshot.entries, new_revision)
        })?;
        Ok(new_revision)
    }

    /// Unconditionally replace every entry, bumping the revision.
    ///
    /// `extra` keys are written in the same commit.
    pub fn replace_all(
        &self,
        entries: &BTreeMap<String, Value>,
        extra: &[(&str, String)],
    ) -> Result<u64, StoreError> {
        let mut new_revision = 0;
        self.store.transaction(&mut |map| {
            new_revision = Self::read_revision(map) + 1;
            Self::back_up_unreadable(map);
            Self::write_snapshot(map, entries, new_revision)?;
            for (key, value) in extra {
                map.insert(key.to_string(), value.clone());
            }
            Ok(())
        })?;
        Ok(new_revision)
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
