//! ConfigStore: the single owner of the active snapshot.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{SnapshotError, SnapshotResult};
use crate::mime;
use crate::snapshot::{ConfigSnapshot, Entry, join};

/// File name served in place of a directory.
const DIRECTORY_INDEX: &str = "index.json";

/// A served configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub mime_type: &'static str,
    pub content: Bytes,
}

/// Holds the active snapshot behind a read/write lock.
///
/// Readers receive an `Arc` to an immutable snapshot, so a swap never
/// exposes a half-replaced tree.
#[derive(Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Option<Arc<ConfigSnapshot>>>>,
    serving_root: Arc<str>,
}

impl ConfigStore {
    pub fn new(serving_root: &str) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            serving_root: Arc::from(serving_root),
        }
    }

    /// The active snapshot, if any.
    pub async fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.current.read().await.clone()
    }

    /// Hash of the active snapshot, if any.
    pub async fn current_hash(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|snapshot| snapshot.hash().to_string())
    }

    /// Serve `name` relative to the serving root.
    ///
    /// Falls back to the lowercased name once, and serves `index.json` for
    /// directories. The serving root is never lowercased, and `..` in the
    /// name cannot leave it.
    pub async fn get_file(&self, name: &str) -> SnapshotResult<ConfigFile> {
        let snapshot = self.current().await.ok_or(SnapshotError::NotLoaded)?;

        let mut path = join(&self.serving_root, name);
        let mut entry = snapshot.resolve(&path);
        if entry.is_none() {
            path = join(&self.serving_root, &name.to_lowercase());
            entry = snapshot.resolve(&path);
        }

        let (path, content) = match entry {
            Some(Entry::File(content)) => (path, content),
            Some(Entry::Directory) => {
                let index = join(&path, DIRECTORY_INDEX);
                let content = snapshot
                    .file(&index)
                    .cloned()
                    .ok_or_else(|| SnapshotError::NotFound(name.to_string()))?;
                (index, content)
            }
            None => return Err(SnapshotError::NotFound(name.to_string())),
        };

        debug!(%name, %path, bytes = content.len(), "config file served");
        Ok(ConfigFile {
            mime_type: mime::from_path(&path),
            content,
        })
    }

    /// Every file path in the active snapshot, depth-first.
    pub async fn list_config(&self) -> Vec<String> {
        self.current()
            .await
            .map(|snapshot| snapshot.paths())
            .unwrap_or_default()
    }

    /// Take the write side of the lock for a fetch-and-swap.
    ///
    /// Readers wait until the returned guard is dropped or installed.
    pub async fn begin_update(&self) -> SnapshotUpdate<'_> {
        SnapshotUpdate {
            guard: self.current.write().await,
        }
    }

    /// Swap in `snapshot` directly.
    pub async fn replace(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        self.begin_update().await.install(snapshot)
    }
}

/// Exclusive access to the active snapshot during a rollout step.
pub struct SnapshotUpdate<'a> {
    guard: RwLockWriteGuard<'a, Option<Arc<ConfigSnapshot>>>,
}

impl SnapshotUpdate<'_> {
    /// Hash of the snapshot about to be replaced.
    pub fn current_hash(&self) -> Option<&str> {
        self.guard.as_ref().map(|snapshot| snapshot.hash())
    }

    /// Replace the active snapshot and release the write lock.
    pub fn install(mut self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let snapshot = Arc::new(snapshot);
        let previous = self.guard.replace(snapshot.clone());
        info!(
            hash = %snapshot.hash(),
            previous = previous.as_ref().map(|p| p.hash()).unwrap_or("none"),
            files = snapshot.len(),
            "config snapshot installed"
        );
        snapshot
    }
}
