//! Offline asset cache.
//!
//! This module keeps a single versioned cache of the app's static assets so
//! it keeps working offline:
//! - `ServiceWorker`: installs a version atomically, sweeps stale versions,
//!   serves cache-first with a network fallback
//! - `CacheController`: detects waiting updates, prompts for them, and runs
//!   the settings-preserving clear-and-reload
//! - `CacheStorage` / `AssetFetcher`: the seams to disk and network

pub mod controller;
pub mod fetcher;
pub mod registration;
pub mod storage;
pub mod worker;

pub use controller::{
    CacheController, ClearOutcome, ClearReport, ControllerSettings, NoticeOutcome, UpdateNotice,
};
pub use fetcher::{AssetFetcher, HttpFetcher};
pub use registration::{Registration, UpdateStatus, REGISTRATION_FILE};
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use worker::{ServiceWorker, WorkerHandle, WorkerMessage, WorkerReply};

/// Directory under the data directory holding the cache stores.
pub const CACHES_DIR: &str = "caches";
