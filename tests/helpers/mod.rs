//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quotecache::CoalesceConfig;
use quotecache::QuoteService;
use quotecache::fetch::{RawResponse, RetryPolicy, RetryingFetcher, Transport, TransportError};
use quotecache::source::SourceRegistry;
use quotecache::store::{MemoryStore, TtlStore};
use url::Url;

pub const LOCK_TTL: Duration = Duration::from_secs(30);

pub const SHARE_BODY: &str = r#"{
    "marketdata": {"columns": ["LAST"], "data": [[318.5]]},
    "securities": {"columns": ["SHORTNAME"], "data": [["Сбербанк"]]}
}"#;

/// ISS answer for a ticker the board does not list.
pub const UNKNOWN_TICKER_BODY: &str = r#"{
    "marketdata": {"columns": ["LAST"], "data": []},
    "securities": {"columns": ["SHORTNAME"], "data": []}
}"#;

/// Replays queued responses, then repeats the fallback forever.
pub struct Scripted {
    queue: Mutex<VecDeque<RawResponse>>,
    fallback: RawResponse,
    latency: Duration,
    calls: AtomicU32,
}

impl Scripted {
    pub fn always(body: &str) -> Arc<Self> {
        Self::new(Vec::new(), RawResponse::ok(body), Duration::ZERO)
    }

    pub fn status(status: u16) -> Arc<Self> {
        Self::new(
            Vec::new(),
            RawResponse {
                status,
                body: String::new(),
            },
            Duration::ZERO,
        )
    }

    pub fn slow(body: &str, latency: Duration) -> Arc<Self> {
        Self::new(Vec::new(), RawResponse::ok(body), latency)
    }

    pub fn new(queue: Vec<RawResponse>, fallback: RawResponse, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(queue.into()),
            fallback,
            latency,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn get(&self, _url: &str) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.queue.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// A store with no conditional write of its own, so locking falls back to
/// the trait's check-then-act. Each read yields, letting concurrent callers
/// interleave between the check and the write.
#[derive(Clone, Default)]
pub struct CheckThenActStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl TtlStore for CheckThenActStore {
    async fn get(&self, key: &str) -> Option<String> {
        let value = self.inner.get(key).await;
        tokio::task::yield_now().await;
        value
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        self.inner.put(key, value, ttl).await;
    }

    async fn remove(&self, key: &str) {
        self.inner.remove(key).await;
    }
}

pub fn sources() -> SourceRegistry {
    SourceRegistry::standard(
        Url::parse("https://iss.test/iss").unwrap(),
        Url::parse("https://spot.test").unwrap(),
    )
}

/// Polling without jitter so virtual-clock assertions are exact.
pub fn steady_config(wait_iterations: u32) -> CoalesceConfig {
    CoalesceConfig {
        wait_iterations,
        wait_jitter: Duration::ZERO,
        ..CoalesceConfig::default()
    }
}

pub fn service_over(
    store: Arc<dyn TtlStore>,
    transport: Arc<Scripted>,
    config: CoalesceConfig,
) -> QuoteService {
    QuoteService::new(
        store,
        sources(),
        RetryingFetcher::new(transport, RetryPolicy::default()),
        LOCK_TTL,
        config,
    )
}

pub fn service(transport: Arc<Scripted>, config: CoalesceConfig) -> (QuoteService, MemoryStore) {
    let store = MemoryStore::new();
    let service = service_over(Arc::new(store.clone()), transport, config);
    (service, store)
}
