//! The worker side of the offline cache.
//!
//! A `ServiceWorker` owns one cache version: it installs the asset manifest
//! into its store, sweeps stale stores on activation, answers requests
//! cache-first, and handles messages from the page.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fetcher::AssetFetcher;
use super::storage::CacheStorage;
use crate::error::CacheError;
use crate::models::{AssetManifest, CacheVersion};

/// Maximum concurrent asset fetches during install.
const MAX_CONCURRENT_FETCHES: usize = 6;

/// Buffer size for the page-to-worker message channel.
const MESSAGE_BUFFER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    CacheCleared { deleted: usize },
    Failed(String),
}

#[derive(Debug)]
pub enum WorkerMessage {
    ClearCache { ack: oneshot::Sender<WorkerReply> },
}

pub struct ServiceWorker {
    version: CacheVersion,
    manifest: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn AssetFetcher>,
}

impl ServiceWorker {
    pub fn new(
        version: CacheVersion,
        manifest: AssetManifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Self {
        Self {
            version,
            manifest,
            storage,
            fetcher,
        }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn cache_name(&self) -> String {
        self.version.cache_name()
    }

    /// Whether this version's store exists.
    pub async fn is_installed(&self) -> bool {
        match self.storage.keys().await {
            Ok(names) => names.contains(&self.cache_name()),
            Err(e) => {
                warn!(error = %e, "Failed to list cache stores");
                false
            }
        }
    }

    /// Fetch every manifest entry, then commit them in one batch.
    ///
    /// Nothing is written unless every fetch succeeds.
    pub async fn install(&self) -> Result<(), CacheError> {
        let name = self.cache_name();
        info!(cache = %name, assets = self.manifest.len(), "Installing worker");

        let fetcher = Arc::clone(&self.fetcher);
        let entries: Vec<(String, Vec<u8>)> = stream::iter(self.manifest.iter().map(str::to_string))
            .map(|path| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let body = fetcher.fetch(&path).await?;
                    debug!(path = %path, bytes = body.len(), "Fetched asset");
                    Ok::<_, CacheError>((path, body))
                }
            })
            .buffered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await?;

        self.storage.put_all(&name, entries).await?;
        info!(cache = %name, "Worker installed");
        Ok(())
    }

    /// Delete every store that does not belong to this version.
    ///
    /// Returns how many stores were removed.
    pub async fn activate(&self) -> usize {
        let current = self.cache_name();
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list cache stores during activation");
                return 0;
            }
        };

        let mut removed = 0;
        for name in names.into_iter().filter(|n| *n != current) {
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(cache = %name, "Deleted stale cache");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete stale cache"),
            }
        }
        info!(cache = %current, removed, "Worker activated");
        removed
    }

    /// Answer a request cache-first, falling back to the network.
    pub async fn respond(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        match self.storage.get(&self.cache_name(), path).await {
            Ok(Some(body)) => return Ok(body),
            Ok(None) => debug!(path, "Cache miss"),
            Err(e) => warn!(path, error = %e, "Cache read failed, serving from network"),
        }
        self.fetcher.fetch(path).await
    }

    /// Delete every cache store the worker can see.
    pub async fn clear_caches(&self) -> Result<usize, CacheError> {
        let names = self.storage.keys().await?;
        let mut deleted = 0;
        for name in names {
            if self.storage.delete(&name).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub async fn handle_message(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::ClearCache { ack } => {
                let reply = match self.clear_caches().await {
                    Ok(deleted) => {
                        info!(deleted, "Worker cleared its caches");
                        WorkerReply::CacheCleared { deleted }
                    }
                    Err(e) => {
                        warn!(error = %e, "Worker failed to clear caches");
                        WorkerReply::Failed(e.to_string())
                    }
                };
                // The page may have stopped waiting.
                let _ = ack.send(reply);
            }
        }
    }

    /// Run the message loop on its own task.
    pub fn spawn(self: Arc<Self>) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(MESSAGE_BUFFER_SIZE);
        let handle = WorkerHandle {
            version: self.version.clone(),
            tx,
        };
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                self.handle_message(message).await;
            }
            debug!(version = %self.version, "Worker message loop ended");
        });
        (handle, task)
    }
}

/// Page-side handle for messaging a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    version: CacheVersion,
    tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    #[cfg(test)]
    pub(crate) fn from_parts(version: CacheVersion, tx: mpsc::Sender<WorkerMessage>) -> Self {
        Self { version, tx }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    /// Ask the worker to clear its caches and wait for the reply.
    pub async fn clear_cache(&self) -> Result<WorkerReply, CacheError> {
        let (ack, reply) = oneshot::channel();
        self.tx
            .send(WorkerMessage::ClearCache { ack })
            .await
            .map_err(|_| CacheError::WorkerUnresponsive("worker is not running".into()))?;
        reply
            .await
            .map_err(|_| CacheError::WorkerUnresponsive("worker dropped the reply".into()))
    }
}
