use serde::{Deserialize, Serialize};

/// One line of the migration log, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MigrationLogEntry {
    #[serde(rename_all = "camelCase")]
    Success {
        old_key: String,
        new_key: String,
        minutes: f64,
        classic: u32,
        reverse: u32,
    },
    #[serde(rename_all = "camelCase")]
    Failed { old_key: String, error: String },
}

impl MigrationLogEntry {
    pub fn old_key(&self) -> &str {
        match self {
            MigrationLogEntry::Success { old_key, .. } | MigrationLogEntry::Failed { old_key, .. } => {
                old_key
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationLogEntry::Failed { .. })
    }
}

/// Persisted one-shot migration state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationState {
    pub migrated: bool,
    pub detected_timezone: Option<String>,
    pub migration_log: Vec<MigrationLogEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationResult {
    AlreadyMigrated,
    Migrated {
        entries_migrated: usize,
        timezone: String,
        log: Vec<MigrationLogEntry>,
    },
}

impl MigrationResult {
    pub fn already_migrated(&self) -> bool {
        matches!(self, MigrationResult::AlreadyMigrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_json_shape() {
        let ok = MigrationLogEntry::Success {
            old_key: "2025-10-11".into(),
            new_key: "2025-10-12".into(),
            minutes: 50.0,
            classic: 2,
            reverse: 0,
        };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["oldKey"], "2025-10-11");
        assert_eq!(value["newKey"], "2025-10-12");

        let failed = MigrationLogEntry::Failed {
            old_key: "not-a-date".into(),
            error: "bad".into(),
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["oldKey"], "not-a-date");
        assert!(failed.is_failed());
        assert_eq!(failed.old_key(), "not-a-date");
    }
}
