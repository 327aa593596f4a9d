//! Advisory "fetch in flight" markers layered on the shared store.
//!
//! A lock entry carries no owner and no fencing token. It only tells other
//! callers that someone is probably fetching the resource right now. It can
//! expire while the holder is still working, after which a second caller may
//! also fetch; the TTL bounds how long a crashed holder can stall everyone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::TtlStore;

const LOCK_MARKER: &str = "locked";

#[derive(Clone)]
pub struct AdvisoryLock {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl AdvisoryLock {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Take the lock if no live marker exists.
    ///
    /// Only as atomic as the store's `put_if_absent`.
    pub async fn try_acquire(&self, lock_key: &str) -> Option<LockGuard> {
        let acquired = self
            .store
            .put_if_absent(lock_key, LOCK_MARKER.to_owned(), self.ttl)
            .await;
        if !acquired {
            return None;
        }
        debug!(lock = lock_key, "advisory lock acquired");
        Some(LockGuard::new(self.store.clone(), lock_key))
    }

    /// Take the lock regardless of any existing marker.
    ///
    /// Used once a waiter has decided the current holder is gone.
    pub async fn force_acquire(&self, lock_key: &str) -> LockGuard {
        self.store
            .put(lock_key, LOCK_MARKER.to_owned(), self.ttl)
            .await;
        debug!(lock = lock_key, "advisory lock taken over");
        LockGuard::new(self.store.clone(), lock_key)
    }

    pub async fn is_held(&self, lock_key: &str) -> bool {
        self.store.get(lock_key).await.is_some()
    }
}

/// Scoped ownership of a lock marker.
///
/// Call [`LockGuard::release`] on every normal exit path. If the guard is
/// dropped unreleased (the owning future was cancelled, or a panic unwound
/// through it) the marker is removed from a spawned task instead.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    store: Arc<dyn TtlStore>,
    key: String,
    released: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn TtlStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_owned(),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) {
        self.store.remove(&self.key).await;
        self.released = true;
        debug!(lock = %self.key, "advisory lock released");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(lock = %key, "releasing abandoned lock guard in background");
                handle.spawn(async move { store.remove(&key).await });
            }
            Err(_) => {
                warn!(lock = %key, "lock guard dropped outside a runtime; marker will expire on its own");
            }
        }
    }
}
