//! Data models shared by the cache and stats modules.
//!
//! - `CacheVersion`, `AssetManifest`, `SettingsKeySet`: offline cache inputs
//! - `DailyStatRecord`, `SessionKind`: per-day session aggregates
//! - `MigrationLogEntry`, `MigrationState`, `MigrationResult`: the one-shot
//!   time zone re-keying

pub mod assets;
pub mod migration;
pub mod stats;

pub use assets::{AssetManifest, CacheVersion, SettingsKeySet, CACHE_NAME_PREFIX};
pub use migration::{MigrationLogEntry, MigrationResult, MigrationState};
pub use stats::{date_key, parse_date_key, DailyStatRecord, DailyStats, SessionKind};
