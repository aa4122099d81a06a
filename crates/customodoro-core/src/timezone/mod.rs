//! Local time zone handling for the daily stats store.
//!
//! Day buckets used to be keyed by dates at a fixed +05:30 offset. This
//! module detects the user's zone, re-keys the store once, and owns every
//! read and write of the stats afterwards:
//! - `detect`: zone detection and the legacy-to-local key mapping
//! - `MigrationManager`: the one-shot migration and `record_session`
//! - `observers`: collaborators refreshed after each recorded session

pub mod detect;
pub mod manager;
pub mod observers;

pub use detect::{detect_timezone, legacy_offset, parse_timezone, rekey, resolve_timezone};
pub use manager::{
    Clock, MigrationManager, SystemClock, MIGRATION_LOG_KEY, TIMEZONE_MIGRATED_KEY,
    USER_TIMEZONE_KEY,
};
pub use observers::{
    compute_streak, summarize, AuthSession, ContributionGraphObserver, ObserverSet, RemoteSync,
    RemoteSyncObserver, StatsChange, StatsObserver, StatsSummary, StatsView, StreakObserver,
    UserStatsObserver,
};
