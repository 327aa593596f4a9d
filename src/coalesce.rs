//! Single-flight lookups over the shared store.
//!
//! Each lookup walks a small state machine:
//!
//! 1. **Check cache**: a live result entry is returned as-is.
//! 2. **Try lock**: claim the in-process slot for the key, then the shared
//!    advisory lock. Whoever gets both fetches, parses, stores and releases.
//! 3. **Wait**: everyone else sleeps (with jitter) and goes back to 1,
//!    holding nothing while asleep.
//!
//! The wait loop is bounded. Once it runs out the cache is checked one last
//! time and the configured [`AbandonedLockPolicy`] decides between fetching
//! anyway and giving up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::QuoteError;
use crate::fetch::RetryingFetcher;
use crate::key::{ResourceClass, ResourceKey};
use crate::lock::{AdvisoryLock, LockGuard};
use crate::parse::{Record, Scalar};
use crate::source::{DataSource, SourceRegistry};
use crate::store::TtlStore;
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_FETCH_THRESHOLD: Duration = Duration::from_secs(5);

/// What a waiter does once its polling budget is spent and the cache is still empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbandonedLockPolicy {
    /// Assume the holder died, take the lock over and fetch.
    #[default]
    SelfFetch,
    /// Report [`QuoteError::CoalesceTimeout`].
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct CoalesceConfig {
    pub result_ttl: Duration,
    /// `None` disables raw-body staging.
    pub staging_ttl: Option<Duration>,
    pub wait_iterations: u32,
    pub wait_interval: Duration,
    /// Upper bound of the random delay added to each wait.
    pub wait_jitter: Duration,
    /// Overall budget for one lookup; `None` means unbounded.
    pub call_timeout: Option<Duration>,
    pub abandoned_lock: AbandonedLockPolicy,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(30 * 60),
            staging_ttl: Some(Duration::from_secs(2 * 60)),
            wait_iterations: 15,
            wait_interval: Duration::from_secs(1),
            wait_jitter: Duration::from_secs(1),
            call_timeout: Some(Duration::from_secs(60)),
            abandoned_lock: AbandonedLockPolicy::SelfFetch,
        }
    }
}

impl CoalesceConfig {
    /// Clamp the staging TTL so a staged body never outlives the result it
    /// was parsed into.
    pub fn capped(mut self) -> Self {
        if let Some(staging) = self.staging_ttl
            && staging > self.result_ttl
        {
            warn!(
                staging_ttl = fmt_duration(staging),
                result_ttl = fmt_duration(self.result_ttl),
                "staging TTL exceeds result TTL, capping"
            );
            self.staging_ttl = Some(self.result_ttl);
        }
        self
    }
}

/// Running totals, mostly useful to see coalescing at work.
#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    upstream_fetches: AtomicU64,
    staged_reuses: AtomicU64,
    waits: AtomicU64,
    takeovers: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub cache_hits: u64,
    pub upstream_fetches: u64,
    pub staged_reuses: u64,
    pub waits: u64,
    pub takeovers: u64,
}

/// In-process "already requested" slot for one key.
///
/// Lets concurrent lookups inside this process skip the shared lock entirely
/// when a sibling task is already fetching.
struct LocalClaim {
    inflight: Arc<DashSet<String>>,
    key: String,
}

impl Drop for LocalClaim {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

/// The public query surface: cached, coalesced lookups by resource.
#[derive(Clone)]
pub struct QuoteService {
    store: Arc<dyn TtlStore>,
    lock: AdvisoryLock,
    fetcher: RetryingFetcher,
    sources: Arc<SourceRegistry>,
    config: CoalesceConfig,
    /// Lock keys some task in this process is currently fetching.
    inflight: Arc<DashSet<String>>,
    counters: Arc<Counters>,
}

impl QuoteService {
    pub fn new(
        store: Arc<dyn TtlStore>,
        sources: SourceRegistry,
        fetcher: RetryingFetcher,
        lock_ttl: Duration,
        config: CoalesceConfig,
    ) -> Self {
        Self {
            lock: AdvisoryLock::new(store.clone(), lock_ttl),
            store,
            fetcher,
            sources: Arc::new(sources),
            config: config.capped(),
            inflight: Arc::new(DashSet::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.config
    }

    pub fn stats(&self) -> ServiceStats {
        let c = &self.counters;
        ServiceStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            upstream_fetches: c.upstream_fetches.load(Ordering::Relaxed),
            staged_reuses: c.staged_reuses.load(Ordering::Relaxed),
            waits: c.waits.load(Ordering::Relaxed),
            takeovers: c.takeovers.load(Ordering::Relaxed),
        }
    }

    /// Fetch one field of a resource.
    ///
    /// The field name is checked against the class schema before anything
    /// touches the store or the network.
    pub async fn get_field(
        &self,
        instrument: &str,
        class: ResourceClass,
        board: Option<&str>,
        field: &str,
    ) -> Result<Scalar, QuoteError> {
        let key = ResourceKey::new(class, board, instrument)?;
        let source = self.sources.get(class)?;
        if !source.schema().has_field(field) {
            return Err(QuoteError::InvalidField {
                class,
                field: field.to_owned(),
            });
        }

        let record = self.get_record(&key).await?;
        record.get(field).cloned()
    }

    /// Return the cached snapshot for `key`, fetching it if needed.
    pub async fn get_record(&self, key: &ResourceKey) -> Result<Record, QuoteError> {
        match self.config.call_timeout {
            Some(budget) => tokio::time::timeout(budget, self.resolve(key))
                .await
                .map_err(|_| QuoteError::Timeout(budget))?,
            None => self.resolve(key).await,
        }
    }

    /// Drop the cached result and any staged body so the next lookup refetches.
    pub async fn invalidate(&self, key: &ResourceKey) {
        self.store.remove(&key.result_key()).await;
        self.store.remove(&key.staging_key()).await;
        debug!(key = %key, "resource invalidated");
    }

    async fn resolve(&self, key: &ResourceKey) -> Result<Record, QuoteError> {
        let source = self.sources.get(key.class())?.clone();
        let lock_key = key.lock_key();

        let budget = self.config.wait_iterations;
        let mut poll = 0;
        loop {
            if let Some(record) = self.cached(key).await {
                return Ok(record);
            }

            if let Some(_claim) = self.claim_local(&lock_key)
                && let Some(guard) = self.lock.try_acquire(&lock_key).await
            {
                return self.fetch_locked(key, source.as_ref(), guard).await;
            }

            // The check above doubles as the final one once the budget is spent.
            if poll == budget {
                break;
            }
            poll += 1;

            let pause = self.wait_pause();
            self.counters.waits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, poll, pause = fmt_duration(pause), "fetch in flight elsewhere, waiting");
            tokio::time::sleep(pause).await;
        }

        match self.config.abandoned_lock {
            AbandonedLockPolicy::SelfFetch => {
                warn!(
                    key = %key,
                    polls = budget,
                    "lock holder never delivered, fetching anyway"
                );
                self.counters.takeovers.fetch_add(1, Ordering::Relaxed);
                let guard = self.lock.force_acquire(&lock_key).await;
                self.fetch_locked(key, source.as_ref(), guard).await
            }
            AbandonedLockPolicy::Fail => Err(QuoteError::CoalesceTimeout {
                key: key.to_string(),
                iterations: budget,
            }),
        }
    }

    /// Run the fetch with the lock held, releasing it whatever the outcome.
    async fn fetch_locked(
        &self,
        key: &ResourceKey,
        source: &dyn DataSource,
        guard: LockGuard,
    ) -> Result<Record, QuoteError> {
        let result = self.fetch_and_store(key, source).await;
        guard.release().await;
        result
    }

    async fn fetch_and_store(
        &self,
        key: &ResourceKey,
        source: &dyn DataSource,
    ) -> Result<Record, QuoteError> {
        let start = Instant::now();
        let staging_key = key.staging_key();

        let staged = match self.config.staging_ttl {
            Some(_) => self.store.get(&staging_key).await,
            None => None,
        };
        let reused = staged.is_some();

        let raw = match staged {
            Some(raw) => {
                self.counters.staged_reuses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "reusing staged upstream body");
                raw
            }
            None => {
                let url = source.build_url(key)?;
                self.counters.upstream_fetches.fetch_add(1, Ordering::Relaxed);
                let raw = self.fetcher.fetch(url.as_str()).await?;
                if let Some(ttl) = self.config.staging_ttl {
                    self.store.put(&staging_key, raw.clone(), ttl).await;
                }
                raw
            }
        };

        let record = match source.parse(&raw, key) {
            Ok(record) => record,
            Err(e) => {
                // A bad body may be transient upstream corruption; make sure
                // the next attempt goes back to the network.
                if self.config.staging_ttl.is_some() {
                    self.store.remove(&staging_key).await;
                }
                warn!(key = %key, error = %e, "upstream payload rejected");
                return Err(e.into());
            }
        };

        let encoded = serde_json::to_string(&record)?;
        self.store
            .put(&key.result_key(), encoded, self.config.result_ttl)
            .await;

        log_if_slow(start, SLOW_FETCH_THRESHOLD, "resource fetch", key);
        info!(
            key = %key,
            staged = reused,
            fields = record.fields.len(),
            duration = fmt_duration(start.elapsed()),
            "resource cached"
        );
        Ok(record)
    }

    async fn cached(&self, key: &ResourceKey) -> Option<Record> {
        let result_key = key.result_key();
        let raw = self.store.get(&result_key).await?;
        match serde_json::from_str::<Record>(&raw) {
            Ok(record) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "cache hit");
                Some(record)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                self.store.remove(&result_key).await;
                None
            }
        }
    }

    /// Try to claim the in-process slot for a lock key.
    fn claim_local(&self, lock_key: &str) -> Option<LocalClaim> {
        self.inflight.insert(lock_key.to_owned()).then(|| LocalClaim {
            inflight: self.inflight.clone(),
            key: lock_key.to_owned(),
        })
    }

    fn wait_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.wait_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.config.wait_interval;
        }
        self.config.wait_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}
