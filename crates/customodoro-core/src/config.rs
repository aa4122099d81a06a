//! Application configuration management.
//!
//! This module loads the application configuration, which includes the app URL, the cache version and asset manifest, the
//! preserved-settings whitelist, and the timing knobs for update handling.
//!
//! Configuration is read from `~/.config/customodoro/config.json` and is
//! edited by hand; a missing file means defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::models::{AssetManifest, CacheVersion, SettingsKeySet};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "customodoro";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// How often the page asks the registration whether a new worker is waiting.
const DEFAULT_UPDATE_POLL_SECS: u64 = 300;

/// How long the update prompt waits for a decision before applying on its own.
const DEFAULT_AUTO_APPLY_GRACE_SECS: u64 = 3;

/// The update prompt is removed after this long no matter what.
const DEFAULT_NOTICE_DISMISS_SECS: u64 = 10;

/// Upper bound on waiting for the worker to acknowledge a cache clear.
const DEFAULT_WORKER_ACK_TIMEOUT_MS: u64 = 2000;

/// The stats store was keyed by dates at +05:30 before zone detection existed.
const DEFAULT_LEGACY_UTC_OFFSET_MINUTES: i32 = 330;

const DEFAULT_APP_URL: &str = "https://customodoro.app/";

const DEFAULT_CACHE_VERSION: &str = "v4";

const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/reverse.html",
    "/style.css",
    "/script.js",
    "/reverse.js",
    "/cache-manager.js",
    "/timezone-manager.js",
    "/manifest.json",
    "/images/icon-192.png",
    "/images/icon-512.png",
    "/audio/alarm.mp3",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_url: String,
    pub cache_version: String,
    pub manifest: Vec<String>,
    pub preserved_keys: Vec<String>,
    pub update_poll_interval_secs: u64,
    pub auto_apply_grace_secs: u64,
    pub notice_dismiss_secs: u64,
    pub worker_ack_timeout_ms: u64,
    pub legacy_utc_offset_minutes: i32,
    /// IANA zone name that overrides detection, e.g. "America/Chicago"
    pub timezone: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_url: DEFAULT_APP_URL.to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            preserved_keys: SettingsKeySet::default().iter().map(str::to_string).collect(),
            update_poll_interval_secs: DEFAULT_UPDATE_POLL_SECS,
            auto_apply_grace_secs: DEFAULT_AUTO_APPLY_GRACE_SECS,
            notice_dismiss_secs: DEFAULT_NOTICE_DISMISS_SECS,
            worker_ack_timeout_ms: DEFAULT_WORKER_ACK_TIMEOUT_MS,
            legacy_utc_offset_minutes: DEFAULT_LEGACY_UTC_OFFSET_MINUTES,
            timezone: None,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted store and the cache stores.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_version(&self) -> CacheVersion {
        CacheVersion::new(self.cache_version.clone())
    }

    pub fn asset_manifest(&self) -> Result<AssetManifest> {
        AssetManifest::new(self.manifest.clone()).context("Invalid asset manifest in config")
    }

    pub fn settings_key_set(&self) -> SettingsKeySet {
        SettingsKeySet::new(self.preserved_keys.iter().cloned())
    }

    pub fn update_poll_interval(&self) -> Duration {
        Duration::from_secs(self.update_poll_interval_secs)
    }

    pub fn auto_apply_grace(&self) -> Duration {
        Duration::from_secs(self.auto_apply_grace_secs)
    }

    pub fn notice_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.notice_dismiss_secs)
    }

    pub fn worker_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ack_timeout_ms)
    }

    pub fn legacy_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.legacy_utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!(
                "legacy_utc_offset_minutes out of range: {}",
                self.legacy_utc_offset_minutes
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.cache_version, DEFAULT_CACHE_VERSION);
        assert_eq!(config.update_poll_interval(), Duration::from_secs(300));
        assert_eq!(config.auto_apply_grace(), Duration::from_secs(3));
        assert_eq!(config.notice_dismiss_after(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache_version": "v9", "timezone": "Europe/Berlin"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache_version, "v9");
        assert_eq!(config.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(config.manifest.len(), DEFAULT_MANIFEST.len());
        assert_eq!(config.legacy_offset().unwrap().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn test_out_of_range_legacy_offset() {
        let config = Config {
            legacy_utc_offset_minutes: 24 * 60,
            ..Config::default()
        };
        assert!(config.legacy_offset().is_err());
    }

    #[test]
    fn test_data_dir_override() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/customodoro-test")),
            ..Config::default()
        };
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/customodoro-test"));
    }
}
