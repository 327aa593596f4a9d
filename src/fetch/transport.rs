//! Production [`Transport`] over reqwest with a rate-limiting, logging middleware.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use tracing::{debug, trace, warn};

use super::{RawResponse, Transport, TransportError};
use crate::utils::fmt_duration;

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// Throttles outgoing requests to the upstream budget and logs each exchange.
pub struct TransportLogger {
    limiter: DefaultDirectRateLimiter,
}

impl TransportLogger {
    pub fn new(requests_per_second: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(requests_per_second)),
        }
    }
}

#[async_trait]
impl Middleware for TransportLogger {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let wait_start = Instant::now();
        self.limiter.until_ready().await;
        let throttled = wait_start.elapsed();
        if throttled > Duration::from_millis(1) {
            trace!(throttled = fmt_duration(throttled), "upstream request throttled");
        }

        let method = req.method().clone();
        let url = req.url().clone();
        let start = Instant::now();
        let result = next.run(req, extensions).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                debug!(
                    method = %method,
                    url = %url,
                    status = response.status().as_u16(),
                    duration = fmt_duration(elapsed),
                    "upstream response"
                );
                if elapsed > SLOW_REQUEST_THRESHOLD {
                    warn!(url = %url, duration = fmt_duration(elapsed), "slow upstream response");
                }
            }
            Err(e) => {
                debug!(
                    method = %method,
                    url = %url,
                    error = %e,
                    duration = fmt_duration(elapsed),
                    "upstream request failed"
                );
            }
        }

        result
    }
}

/// reqwest-backed transport shared by every data source.
#[derive(Clone)]
pub struct HttpTransport {
    client: ClientWithMiddleware,
}

impl HttpTransport {
    pub fn new(timeout: Duration, requests_per_second: NonZeroU32) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, requests_per_second))
    }

    /// Wrap an already configured reqwest client in the throttling logger.
    pub fn with_client(http: reqwest::Client, requests_per_second: NonZeroU32) -> Self {
        let client = ClientBuilder::new(http)
            .with(TransportLogger::new(requests_per_second))
            .build();
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve every connection with the same canned HTTP/1.1 response.
    async fn serve(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/iss/securities.json")
    }

    fn transport(rps: u32) -> HttpTransport {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpTransport::with_client(http, NonZeroU32::new(rps).unwrap())
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let url = serve("503 Service Unavailable", "busy").await;

        let response = transport(10).get(&url).await.unwrap();

        assert_eq!(
            response,
            RawResponse {
                status: 503,
                body: "busy".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn ok_body_is_returned() {
        let url = serve("200 OK", "64250.5").await;
        let response = transport(10).get(&url).await.unwrap();
        assert_eq!(response, RawResponse::ok("64250.5"));
    }

    #[tokio::test]
    async fn requests_are_spaced_by_the_rate_limit() {
        let url = serve("200 OK", "1").await;
        let transport = transport(1);

        transport.get(&url).await.unwrap();
        let start = Instant::now();
        transport.get(&url).await.unwrap();

        assert!(
            start.elapsed() >= Duration::from_millis(900),
            "second request went out after {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn connection_failure_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = transport(10).get(&format!("http://{addr}/")).await;
        assert!(result.is_err());
    }
}
