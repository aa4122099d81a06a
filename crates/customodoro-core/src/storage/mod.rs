//! Persisted key/value storage.
//!
//! - `KeyValueStore`: the string-keyed store every collaborator shares
//! - `FileStore` / `MemoryStore`: on-disk and in-process implementations
//! - `StatsRepository`: revision-checked access to the daily stats key

pub mod kv;
pub mod stats;

pub use kv::{FileStore, KeyValueStore, MemoryStore, StoreMap};
pub use stats::{
    StatsRepository, StatsSnapshot, STATS_BACKUP_KEY, STATS_KEY, STATS_REVISION_KEY,
};

/// File name of the persisted store inside the data directory.
pub const STORE_FILE: &str = "storage.json";
