use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CacheError;

/// Named containers of cached responses.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Add every entry to the store, or none of them. The store only
    /// exists once a batch has been committed.
    async fn put_all(&self, name: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), CacheError>;

    async fn get(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Names of every existing store.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Paths cached in one store.
    async fn paths(&self, name: &str) -> Result<Vec<String>, CacheError>;

    /// Returns whether a store was removed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    async fn put(&self, name: &str, path: &str, body: Vec<u8>) -> Result<(), CacheError> {
        self.put_all(name, vec![(path.to_string(), body)]).await
    }
}

// ============================================================================
// Disk
// ============================================================================

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// Percent-escape anything outside `[A-Za-z0-9._-]` so a path or store
/// name becomes a single file name.
fn escape_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') || (b == b'.' && !out.is_empty()) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn unescape_name(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// One directory per store, one file per cached path.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(escape_name(name))
    }

    async fn copy_dir(from: &Path, to: &Path) -> Result<(), CacheError> {
        let mut entries = tokio::fs::read_dir(from).await?;
        while let Some(entry) = entries.next_entry().await? {
            tokio::fs::copy(entry.path(), to.join(entry.file_name())).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn put_all(&self, name: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        let target = self.store_dir(name);
        let nonce = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let staging = self
            .root
            .join(format!("{}{}-{}", STAGING_PREFIX, escape_name(name), nonce));
        let trash = self
            .root
            .join(format!("{}{}-{}", TRASH_PREFIX, escape_name(name), nonce));

        tokio::fs::create_dir_all(&staging).await?;
        let staged = async {
            if tokio::fs::try_exists(&target).await? {
                Self::copy_dir(&target, &staging).await?;
            }
            for (path, body) in &entries {
                tokio::fs::write(staging.join(escape_name(path)), body).await?;
            }
            Ok::<(), CacheError>(())
        }
        .await;

        if let Err(e) = staged {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if tokio::fs::try_exists(&target).await? {
            tokio::fs::rename(&target, &trash).await?;
        }
        tokio::fs::rename(&staging, &target).await?;
        let _ = tokio::fs::remove_dir_all(&trash).await;

        debug!(store = name, count = entries.len(), "Cache entries committed");
        Ok(())
    }

    async fn get(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let file = self.store_dir(name).join(escape_name(path));
        match tokio::fs::read(&file).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = unescape_name(&file_name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn paths(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let dir = self.store_dir(name);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(CacheError::StoreNotFound(name.to_string()));
        }
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(path) = unescape_name(&entry.file_name().to_string_lossy()) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.store_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

type Stores = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-process cache storage with switchable failures, for tests.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: Mutex<Stores>,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> CacheError {
        CacheError::Io(std::io::Error::other(format!("injected {what} failure")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Stores>, CacheError> {
        self.stores
            .lock()
            .map_err(|_| CacheError::Io(std::io::Error::other("cache storage lock poisoned")))
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn put_all(&self, name: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        let mut stores = self.lock()?;
        let store = stores.entry(name.to_string()).or_default();
        store.extend(entries);
        Ok(())
    }

    async fn get(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("read"));
        }
        Ok(self
            .lock()?
            .get(name)
            .and_then(|store| store.get(path))
            .cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn paths(&self, name: &str) -> Result<Vec<String>, CacheError> {
        self.lock()?
            .get(name)
            .map(|store| store.keys().cloned().collect())
            .ok_or_else(|| CacheError::StoreNotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        Ok(self.lock()?.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        for raw in ["/", "/index.html", "/images/icon 192.png", "customodoro-v4", ".hidden"] {
            let escaped = escape_name(raw);
            assert!(!escaped.contains('/'));
            assert!(!escaped.starts_with('.'));
            assert_eq!(unescape_name(&escaped).as_deref(), Some(raw));
        }
    }

    #[tokio::test]
    async fn test_disk_storage_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();

        storage
            .put_all(
                "customodoro-v1",
                vec![("/".into(), b"<html>".to_vec()), ("/style.css".into(), b"body{}".to_vec())],
            )
            .await
            .unwrap();
        storage.put("customodoro-v1", "/script.js", b"go()".to_vec()).await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["customodoro-v1".to_string()]);
        assert_eq!(
            storage.paths("customodoro-v1").await.unwrap(),
            vec!["/".to_string(), "/script.js".to_string(), "/style.css".to_string()]
        );
        assert_eq!(
            storage.get("customodoro-v1", "/style.css").await.unwrap().as_deref(),
            Some(&b"body{}"[..])
        );
        assert!(storage.get("customodoro-v1", "/missing").await.unwrap().is_none());

        assert!(storage.delete("customodoro-v1").await.unwrap());
        assert!(!storage.delete("customodoro-v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_storage_ignores_staging_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".staging-leftover")).unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        storage.put("customodoro-v2", "/", b"<html>".to_vec()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["customodoro-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_storage_failure_injection() {
        let storage = MemoryCacheStorage::new();
        storage.put("a", "/", vec![1]).await.unwrap();
        storage.set_fail_reads(true);
        assert!(storage.get("a", "/").await.is_err());
        storage.set_fail_deletes(true);
        assert!(storage.delete("a").await.is_err());
        storage.set_fail_deletes(false);
        assert!(storage.delete("a").await.unwrap());
    }
}
