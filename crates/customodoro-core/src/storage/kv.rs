use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use fs2::FileExt;
use tracing::debug;

use crate::error::StoreError;

/// Whole contents of a key/value store.
pub type StoreMap = BTreeMap<String, String>;

/// String-keyed persistent storage shared by every part of the app.
///
/// `transaction` runs the closure against a private copy of the map under
/// the store's lock and commits it only if the closure returns `Ok`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Consistent copy of every key and value.
    fn entries(&self) -> Result<StoreMap, StoreError>;

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut StoreMap) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries()?.into_keys().collect())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.transaction(&mut |map| {
            map.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.transaction(&mut |map| {
            map.remove(key);
            Ok(())
        })
    }
}

/// In-process store, used by tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            data: RwLock::new(data),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn entries(&self) -> Result<StoreMap, StoreError> {
        Ok(self.data.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut StoreMap) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut guard = self.data.write().map_err(|_| StoreError::Poisoned)?;
        let mut working = guard.clone();
        f(&mut working)?;
        *guard = working;
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// Every operation re-reads the file so that writes from another handle or
/// process are observed. Reads hold a shared lock and transactions an
/// exclusive lock on a sidecar `.lock` file for the whole read-modify-write;
/// commits go through a per-writer temp file and a rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Distinguishes temp files of concurrent writers within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Held advisory lock; released on drop.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = Self::sibling(&path, ".lock");
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        path.with_file_name(name)
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLock, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(StoreLock { file })
    }

    fn read_map(&self) -> Result<StoreMap, StoreError> {
        if !self.path.exists() {
            return Ok(StoreMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(StoreMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(&self, map: &StoreMap) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(map)?;
        let tmp = Self::sibling(
            &self.path,
            &format!(
                ".{}.{}.tmp",
                std::process::id(),
                TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
        );
        let committed =
            std::fs::write(&tmp, contents).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = committed {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), keys = map.len(), "Store written");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _lock = self.lock(false)?;
        Ok(self.read_map()?.remove(key))
    }

    fn entries(&self) -> Result<StoreMap, StoreError> {
        let _lock = self.lock(false)?;
        self.read_map()
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut StoreMap) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let _lock = self.lock(true)?;
        let mut map = self.read_map()?;
        f(&mut map)?;
        self.write_map(&map)
    }
}
