//! Upstream HTTP access with bounded retries.
//!
//! [`RetryingFetcher`] knows nothing about caching or coalescing. It turns a
//! flaky upstream into "a 200 body, or one error describing the last failure".

mod transport;

pub use transport::{HttpTransport, TransportLogger};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::utils::fmt_duration;

/// Status and body of one upstream response, whatever the status was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

/// One-shot GET. Non-2xx statuses are returned, not raised.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{url} failed after {attempts} attempts: {last_reason}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    pub last_reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep before retry `n` (1-based) is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// GET `url`, retrying non-200 responses and transport faults.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let start = Instant::now();
            match self.transport.get(url).await {
                Ok(response) if response.status == 200 => {
                    debug!(
                        url,
                        attempt,
                        bytes = response.body.len(),
                        duration = fmt_duration(start.elapsed()),
                        "upstream fetch succeeded"
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    last_reason = format!("HTTP {}", response.status);
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }

            warn!(url, attempt, attempts, reason = %last_reason, "upstream fetch attempt failed");

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(FetchError {
            url: url.to_owned(),
            attempts,
            last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed script of outcomes, repeating the last one forever.
    struct Scripted {
        script: Mutex<VecDeque<Result<RawResponse, String>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<RawResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get(&self, _url: &str) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            next.map_err(TransportError::Other)
        }
    }

    fn status(code: u16) -> Result<RawResponse, String> {
        Ok(RawResponse {
            status: code,
            body: String::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_immediately() {
        let transport = Scripted::new(vec![Ok(RawResponse::ok("body"))]);
        let fetcher = RetryingFetcher::new(transport.clone(), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        assert_eq!(fetcher.fetch("http://x").await.unwrap(), "body");
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_then_succeeds() {
        let transport = Scripted::new(vec![
            status(503),
            Err("connection reset".to_owned()),
            Ok(RawResponse::ok("third")),
        ]);
        let fetcher = RetryingFetcher::new(transport.clone(), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        assert_eq!(fetcher.fetch("http://x").await.unwrap(), "third");
        assert_eq!(transport.calls(), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_reason() {
        let transport = Scripted::new(vec![
            Err("timed out".to_owned()),
            status(500),
            status(429),
        ]);
        let fetcher = RetryingFetcher::new(transport.clone(), RetryPolicy::default());

        let err = fetcher.fetch("http://x").await.unwrap_err();
        assert_eq!(transport.calls(), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_reason, "HTTP 429");
        assert_eq!(err.url, "http://x");
    }

    #[tokio::test(start_paused = true)]
    async fn non_200_success_codes_are_failures() {
        let transport = Scripted::new(vec![status(204)]);
        let fetcher = RetryingFetcher::new(transport.clone(), RetryPolicy::default());

        let err = fetcher.fetch("http://x").await.unwrap_err();
        assert_eq!(err.last_reason, "HTTP 204");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let transport = Scripted::new(vec![Ok(RawResponse::ok("x"))]);
        let policy = RetryPolicy {
            attempts: 0,
            ..RetryPolicy::default()
        };
        let fetcher = RetryingFetcher::new(transport.clone(), policy);
        assert!(fetcher.fetch("http://x").await.is_ok());
        assert_eq!(transport.calls(), 1);
    }
}
