use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CacheVersion;

/// Registration file name in the data directory
pub const REGISTRATION_FILE: &str = "registration.json";

/// Outcome of comparing the installed worker with the controlling one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpdateAvailable {
        current: CacheVersion,
        next: CacheVersion,
    },
    NoUpdate,
}

impl UpdateStatus {
    pub fn is_update(&self) -> bool {
        matches!(self, UpdateStatus::UpdateAvailable { .. })
    }
}

/// Which worker controls the app and which one finished installing
/// behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub controller: Option<String>,
    pub waiting: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Registration {
    /// Load from disk, starting fresh when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registration file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse registration file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(REGISTRATION_FILE)
    }

    pub fn controller(&self) -> Option<CacheVersion> {
        self.controller.clone().map(CacheVersion::new)
    }

    pub fn waiting(&self) -> Option<CacheVersion> {
        self.waiting.clone().map(CacheVersion::new)
    }

    /// Record a worker that finished installing.
    ///
    /// With no controller the worker takes control straight away; that is
    /// a first install, not an update.
    pub fn worker_installed(&mut self, version: &CacheVersion) {
        if self.controller.is_none() {
            self.controller = Some(version.as_str().to_string());
            self.waiting = None;
        } else if self.controller.as_deref() != Some(version.as_str()) {
            self.waiting = Some(version.as_str().to_string());
        }
        self.updated_at = Some(Utc::now());
    }

    /// Promote the waiting worker to controller.
    pub fn skip_waiting(&mut self) -> Option<CacheVersion> {
        let next = self.waiting.take()?;
        self.controller = Some(next.clone());
        self.updated_at = Some(Utc::now());
        Some(CacheVersion::new(next))
    }

    /// `UpdateAvailable` exactly when a newly installed worker is waiting
    /// behind a different controlling worker.
    pub fn activate_detection(&self) -> UpdateStatus {
        match (self.controller(), self.waiting()) {
            (Some(current), Some(next)) if current != next => {
                UpdateStatus::UpdateAvailable { current, next }
            }
            _ => UpdateStatus::NoUpdate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> CacheVersion {
        CacheVersion::new(s)
    }

    #[test]
    fn test_first_install_is_not_an_update() {
        let mut reg = Registration::default();
        reg.worker_installed(&v("v1"));
        assert_eq!(reg.controller(), Some(v("v1")));
        assert_eq!(reg.activate_detection(), UpdateStatus::NoUpdate);
    }

    #[test]
    fn test_new_worker_behind_controller_is_an_update() {
        let mut reg = Registration::default();
        reg.worker_installed(&v("v1"));
        reg.worker_installed(&v("v2"));
        assert_eq!(
            reg.activate_detection(),
            UpdateStatus::UpdateAvailable {
                current: v("v1"),
                next: v("v2")
            }
        );
    }

    #[test]
    fn test_reinstalling_the_controller_is_not_an_update() {
        let mut reg = Registration::default();
        reg.worker_installed(&v("v1"));
        reg.worker_installed(&v("v1"));
        assert!(reg.waiting.is_none());
        assert!(!reg.activate_detection().is_update());
    }

    #[test]
    fn test_skip_waiting_promotes() {
        let mut reg = Registration::default();
        assert!(reg.skip_waiting().is_none());
        reg.worker_installed(&v("v1"));
        reg.worker_installed(&v("v2"));
        assert_eq!(reg.skip_waiting(), Some(v("v2")));
        assert_eq!(reg.controller(), Some(v("v2")));
        assert_eq!(reg.activate_detection(), UpdateStatus::NoUpdate);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Registration::default_path(dir.path());
        assert_eq!(Registration::load(&path).unwrap(), Registration::default());

        let mut reg = Registration::default();
        reg.worker_installed(&v("v1"));
        reg.save(&path).unwrap();
        assert_eq!(Registration::load(&path).unwrap(), reg);
    }
}
