use std::collections::HashSet;
use std::fmt;

use crate::error::CacheError;

/// Prefix shared by every cache store this app creates.
pub const CACHE_NAME_PREFIX: &str = "customodoro-";

/// Identifies the installed set of cached assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the cache store holding this version's assets.
    pub fn cache_name(&self) -> String {
        format!("{}{}", CACHE_NAME_PREFIX, self.0)
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of resource paths required for offline use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest(Vec<String>);

impl AssetManifest {
    pub fn new(paths: Vec<String>) -> Result<Self, CacheError> {
        let mut seen = HashSet::with_capacity(paths.len());
        for path in &paths {
            if !seen.insert(path.as_str()) {
                return Err(CacheError::DuplicateEntry(path.clone()));
            }
        }
        Ok(Self(paths))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

const DEFAULT_PRESERVED_KEYS: &[&str] = &[
    "theme",
    "pomodoroDuration",
    "shortBreakDuration",
    "longBreakDuration",
    "volume",
    "alarmSound",
    "reverseMode",
    "autoStartBreaks",
    "autoStartPomodoros",
    "tickingSound",
    "fullscreenMode",
];

/// Storage keys that survive a clear-and-reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsKeySet(Vec<String>);

impl SettingsKeySet {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for key in keys {
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Self(out)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for SettingsKeySet {
    fn default() -> Self {
        Self::new(DEFAULT_PRESERVED_KEYS.iter().map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_name() {
        assert_eq!(CacheVersion::new("v4").cache_name(), "customodoro-v4");
    }

    #[test]
    fn test_manifest_rejects_duplicates() {
        let err = AssetManifest::new(vec!["/".into(), "/app.js".into(), "/".into()]).unwrap_err();
        assert!(matches!(err, CacheError::DuplicateEntry(p) if p == "/"));
    }

    #[test]
    fn test_manifest_keeps_order() {
        let manifest = AssetManifest::new(vec!["/b".into(), "/a".into()]).unwrap();
        assert_eq!(manifest.iter().collect::<Vec<_>>(), vec!["/b", "/a"]);
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_settings_key_set_dedups() {
        let keys = SettingsKeySet::new(vec!["theme".into(), "volume".into(), "theme".into()]);
        assert_eq!(keys.iter().count(), 2);
        assert!(keys.contains("volume"));
        assert!(!keys.contains("customodoroStatsByDay"));
        assert!(SettingsKeySet::default().contains("alarmSound"));
    }
}
