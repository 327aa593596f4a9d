//! Shared key/value store with per-entry expiry.
//!
//! The store is the only mutable state shared between concurrent lookups.
//! Implementations only promise last-write-wins on a single key; the
//! coalescing protocol layered on top tolerates lost updates.

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Fetch a live value. Entries older than their TTL are never returned.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing whatever was there.
    async fn put(&self, key: &str, value: String, ttl: Duration);

    async fn remove(&self, key: &str);

    /// Store `value` only if no live entry exists, returning whether it was stored.
    ///
    /// The default is a plain check-then-act and is racy: two callers can both
    /// observe an empty slot and both write. Stores with a native conditional
    /// write should override this.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        if self.get(key).await.is_some() {
            return false;
        }
        self.put(key, value, ttl).await;
        true
    }
}
