//! Offline cache and local stats management for Customodoro.
//!
//! Two independent subsystems share one persisted key/value store:
//! - `cache`: the versioned offline asset cache and its update flow
//! - `timezone`: the day-bucketed stats, migrated once to the user's zone
//!
//! Everything is driven through `Config`; see the `customodoro` binary for
//! the wiring.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod storage;
pub mod timezone;

pub use config::Config;
pub use error::{CacheError, MigrationError, StoreError};
pub use timezone::MigrationManager;
