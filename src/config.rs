//! Runtime configuration, read from the environment (and an optional
//! `quotecache.toml`) through figment.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::coalesce::{AbandonedLockPolicy, CoalesceConfig, QuoteService};
use crate::fetch::{HttpTransport, RetryPolicy, RetryingFetcher};
use crate::source::SourceRegistry;
use crate::store::TtlStore;

/// Optional file layered beneath the environment.
pub const CONFIG_FILE: &str = "quotecache.toml";

pub const DEFAULT_ISS_BASE_URL: &str = "https://iss.moex.com/iss";
pub const DEFAULT_CRYPTO_BASE_URL: &str = "https://cryptoprices.cc";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub iss_base_url: Url,
    pub crypto_base_url: Url,

    #[serde(default = "default_result_ttl", deserialize_with = "duration")]
    pub result_ttl: Duration,
    /// Zero disables raw-body staging.
    #[serde(default = "default_staging_ttl", deserialize_with = "duration")]
    pub staging_ttl: Duration,
    #[serde(default = "default_lock_ttl", deserialize_with = "duration")]
    pub lock_ttl: Duration,

    #[serde(default = "default_wait_iterations")]
    pub wait_iterations: u32,
    #[serde(default = "default_wait_interval", deserialize_with = "duration")]
    pub wait_interval: Duration,
    #[serde(default = "default_wait_jitter", deserialize_with = "duration")]
    pub wait_jitter: Duration,
    #[serde(default)]
    pub abandoned_lock_policy: AbandonedLockPolicy,

    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_backoff", deserialize_with = "duration")]
    pub fetch_backoff: Duration,
    /// Zero disables the overall per-lookup budget.
    #[serde(default = "default_call_timeout", deserialize_with = "duration")]
    pub call_timeout: Duration,
    #[serde(default = "default_http_timeout", deserialize_with = "duration")]
    pub http_timeout: Duration,
    #[serde(default = "default_upstream_rate")]
    pub upstream_rate_per_second: NonZeroU32,
}

impl Config {
    /// Load `quotecache.toml` (if present) overridden by the process environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Path::new(CONFIG_FILE)).extract()
    }

    pub fn figment(file: &Path) -> Figment {
        Self::defaults().merge(Toml::file(file)).merge(Env::raw())
    }

    /// Values that serde defaults cannot express without parsing at runtime.
    pub fn defaults() -> Figment {
        Figment::from(Serialized::default("iss_base_url", DEFAULT_ISS_BASE_URL))
            .merge(Serialized::default("crypto_base_url", DEFAULT_CRYPTO_BASE_URL))
    }

    /// Wire the HTTP transport, sources and coalescing service over `store`.
    pub fn build_service(&self, store: Arc<dyn TtlStore>) -> anyhow::Result<QuoteService> {
        let transport = HttpTransport::new(self.http_timeout, self.upstream_rate_per_second)
            .context("Failed to build HTTP client")?;
        let fetcher = RetryingFetcher::new(Arc::new(transport), self.retry());
        let sources =
            SourceRegistry::standard(self.iss_base_url.clone(), self.crypto_base_url.clone());

        Ok(QuoteService::new(
            store,
            sources,
            fetcher,
            self.lock_ttl,
            self.coalesce(),
        ))
    }

    pub fn coalesce(&self) -> CoalesceConfig {
        CoalesceConfig {
            result_ttl: self.result_ttl,
            staging_ttl: non_zero(self.staging_ttl),
            wait_iterations: self.wait_iterations,
            wait_interval: self.wait_interval,
            wait_jitter: self.wait_jitter,
            call_timeout: non_zero(self.call_timeout),
            abandoned_lock: self.abandoned_lock_policy,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.fetch_attempts,
            backoff_step: self.fetch_backoff,
        }
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_result_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_staging_ttl() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_wait_iterations() -> u32 {
    15
}

fn default_wait_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_wait_jitter() -> Duration {
    Duration::from_secs(1)
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_upstream_rate() -> NonZeroU32 {
    NonZeroU32::MIN.saturating_add(4)
}

/// Accept plain seconds (`30`) or a unit-suffixed string (`"1500ms"`, `"30m"`).
fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ]);
    let parsed = parser
        .parse(text.trim())
        .map_err(|e| format!("invalid duration '{text}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{text}': {e}"))
}
