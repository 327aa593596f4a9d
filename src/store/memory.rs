//! In-process [`TtlStore`] backed by a `DashMap`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use super::TtlStore;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-wide store. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were evicted.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.is_live(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            trace!(evicted, "purged expired store entries");
        }
        evicted
    }

    /// Periodically purge expired entries until the returned handle is aborted.
    pub fn spawn_purge(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(stored) = self.entries.get(key) {
            if stored.is_live(now) {
                return Some(stored.value.clone());
            }
        }
        // The read guard is gone by now, so removing cannot deadlock the shard.
        self.entries.remove_if(key, |_, stored| !stored.is_live(now));
        None
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(key.to_owned(), StoredValue::new(value, ttl));
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Atomic with respect to other callers of this store: the shard stays
    /// write-locked between the liveness check and the insert.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(StoredValue::new(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                true
            }
        }
    }
}
