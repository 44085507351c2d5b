//! Cross-replica mutual exclusion over the shared store.
//!
//! A lock is a single `lock:{resource}` key holding an opaque ownership
//! handle with a TTL. Acquisition is a set-if-absent and never waits;
//! release is a compare-and-delete against the caller's handle, so a party
//! whose lock expired and was re-acquired by someone else cannot release
//! the new holder's lock. There is no lease renewal.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle(String);

impl LockHandle {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a raw handle string (e.g. one carried across a process boundary).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// TTL'd, non-blocking distributed lock.
#[derive(Clone)]
pub struct DistributedLock {
    store: StateStore,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: StateStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try to take the lock on `resource`.
    ///
    /// Fails immediately with [`StateError::Conflict`] if a live lock exists.
    pub async fn acquire(&self, resource: &str) -> StateResult<LockHandle> {
        let handle = LockHandle::generate();
        if self
            .store
            .set_nx(&lock_key(resource), handle.as_str(), Some(self.ttl))
            .await?
        {
            info!(%resource, ttl_secs = self.ttl.as_secs(), "lock acquired");
            Ok(handle)
        } else {
            debug!(%resource, "lock already held");
            Err(StateError::Conflict(resource.to_string()))
        }
    }

    /// Release `resource` if `handle` is the current holder. Returns true if released.
    pub async fn release(&self, resource: &str, handle: &LockHandle) -> StateResult<bool> {
        let released = self
            .store
            .delete_if_eq(&lock_key(resource), handle.as_str())
            .await?;
        if released {
            info!(%resource, "lock released");
        } else {
            warn!(%resource, "lock not released: handle does not match current holder");
        }
        Ok(released)
    }

    /// Whether a live lock exists on `resource`.
    pub async fn is_locked(&self, resource: &str) -> StateResult<bool> {
        Ok(self.store.get(&lock_key(resource)).await?.is_some())
    }
}

fn lock_key(resource: &str) -> String {
    format!("lock:{resource}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_lock(ttl: Duration) -> DistributedLock {
        DistributedLock::new(StateStore::open_in_memory().unwrap(), ttl)
    }

    #[tokio::test]
    async fn second_acquire_conflicts() {
        let lock = test_lock(Duration::from_secs(60));
        let handle = lock.acquire("config").await.unwrap();
        assert!(matches!(lock.acquire("config").await, Err(StateError::Conflict(_))));

        // Other resources are independent.
        lock.acquire("other").await.unwrap();

        assert!(lock.release("config", &handle).await.unwrap());
        lock.acquire("config").await.unwrap();
    }

    #[tokio::test]
    async fn forged_handle_cannot_release() {
        let lock = test_lock(Duration::from_secs(60));
        let _handle = lock.acquire("config").await.unwrap();

        let forged = LockHandle::from_raw("not-the-owner");
        assert!(!lock.release("config", &forged).await.unwrap());
        assert!(lock.is_locked("config").await.unwrap());
        assert!(matches!(lock.acquire("config").await, Err(StateError::Conflict(_))));
    }

    #[tokio::test]
    async fn expired_holder_cannot_release_new_holder() {
        let lock = test_lock(Duration::from_millis(20));
        let stale = lock.acquire("config").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // TTL elapsed: a new initiator reclaims the lock.
        let fresh = lock.acquire("config").await.unwrap();
        assert_ne!(stale, fresh);

        assert!(!lock.release("config", &stale).await.unwrap());
        assert!(lock.is_locked("config").await.unwrap());
        assert!(lock.release("config", &fresh).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_have_one_winner() {
        let lock = test_lock(Duration::from_secs(60));
        let winners = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                let winners = winners.clone();
                tokio::spawn(async move {
                    if lock.acquire("config").await.is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
