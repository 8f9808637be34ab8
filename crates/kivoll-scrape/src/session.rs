//! HTTP session handling.
//!
//! All outbound requests go through [`RetryingHttpSession`], which wraps
//! a pluggable [`HttpTransport`]. Transient failures are retried a fixed
//! number of times with no exponential backoff; a `Retry-After` header
//! is honored when the server sends one. [`CachingSession`] additionally
//! memoizes successful responses for a TTL so repeated fetches within a
//! run do not hit the origin again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Total attempts per request: one initial try plus three retries.
pub const TOTAL_ATTEMPTS: u32 = 4;

/// Status codes treated as transient.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Methods that are safe to retry.
pub const RETRY_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

/// File in the data directory holding the last successfully fetched page.
pub const CACHE_FILE: &str = "last_request.html";

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Seconds from a `Retry-After` header, if the server sent one.
    pub retry_after: Option<u64>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Low-level request execution, separated out so tests can count and
/// script attempts without a live origin.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse>;
}

/// Production transport backed by reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Session applying the retry policy on top of a transport.
pub struct RetryingHttpSession<T: HttpTransport> {
    transport: T,
    /// Fixed delay between attempts when no `Retry-After` was sent.
    spacing: Duration,
}

impl<T: HttpTransport> RetryingHttpSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            spacing: Duration::ZERO,
        }
    }

    /// Access the wrapped transport (used by tests to inspect attempts).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform a GET with retries.
    pub async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.request("GET", url, headers).await
    }

    /// Perform a request, retrying transient failures for safe methods.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let retryable_method = RETRY_METHODS.contains(&method);
        let attempts = if retryable_method { TOTAL_ATTEMPTS } else { 1 };

        for attempt in 1..=attempts {
            let delay = match self.transport.request(method, url, headers).await {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        debug!("Request to {} succeeded on attempt {}", url, attempt);
                    }
                    return Ok(response);
                }
                Ok(response) if RETRY_STATUSES.contains(&response.status) => {
                    warn!(
                        "Request to {} returned {} (attempt {}/{})",
                        url, response.status, attempt, attempts
                    );
                    response
                        .retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(self.spacing)
                }
                Ok(response) => {
                    return Err(Error::Status {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(Error::Transport(e)) if retryable_method => {
                    warn!(
                        "Request to {} failed: {} (attempt {}/{})",
                        url, e, attempt, attempts
                    );
                    self.spacing
                }
                Err(e) => return Err(e),
            };

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        Err(Error::RetryExhausted {
            url: url.to_string(),
            attempts,
        })
    }
}

/// Session memoizing successful responses by method and URL.
///
/// Within the TTL a repeated request is answered from memory, even when
/// the origin has since become unreachable.
pub struct CachingSession<T: HttpTransport> {
    inner: RetryingHttpSession<T>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, HttpResponse)>>,
}

impl<T: HttpTransport> CachingSession<T> {
    pub fn new(transport: T, ttl: Duration) -> Self {
        Self {
            inner: RetryingHttpSession::new(transport),
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.request("GET", url, headers).await
    }

    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let key = format!("{method} {url}");

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((stored_at, response)) = cache.get(&key) {
                if stored_at.elapsed() < self.ttl {
                    debug!("Serving {} from cache", url);
                    return Ok(response.clone());
                }
            }
        }

        let response = self.inner.request(method, url, headers).await?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, (Instant::now(), response.clone()));
        Ok(response)
    }
}

/// Persist a fetched page body for later dry runs.
pub fn cache_body(data_dir: &Path, body: &str) -> Result<PathBuf> {
    let path = data_dir.join(CACHE_FILE);
    std::fs::write(&path, body)?;
    Ok(path)
}

/// Load the page body cached by a previous live run.
pub fn load_cached_body(data_dir: &Path) -> Result<String> {
    let path = data_dir.join(CACHE_FILE);
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::CacheMiss { path }
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[tokio::test]
    async fn test_success_takes_one_attempt() {
        let transport = MockTransport::new();
        transport.push_status(200, "ok");

        let session = RetryingHttpSession::new(transport);
        let response = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "ok");
        assert_eq!(session.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_then_success() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_status(500, "");
        }
        transport.push_status(200, "finally");

        let session = RetryingHttpSession::new(transport);
        let response = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(response.body, "finally");
        assert_eq!(session.transport.attempts(), 4);
    }

    #[tokio::test]
    async fn test_four_failures_exhaust_retries() {
        let transport = MockTransport::new();
        for _ in 0..4 {
            transport.push_status(503, "");
        }

        let session = RetryingHttpSession::new(transport);
        let err = session.get("http://example.test/", &[]).await.unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 4, .. }));
        assert_eq!(session.transport.attempts(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let transport = MockTransport::new();
        transport.push_status(404, "gone");

        let session = RetryingHttpSession::new(transport);
        let err = session.get("http://example.test/", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert_eq!(session.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_method_is_not_retried() {
        let transport = MockTransport::new();
        transport.push_status(500, "");

        let session = RetryingHttpSession::new(transport);
        let err = session
            .request("POST", "http://example.test/", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 1, .. }));
        assert_eq!(session.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_header_is_honored() {
        let transport = MockTransport::new();
        transport.push_retry_after(429, 0);
        transport.push_status(200, "ok");

        let session = RetryingHttpSession::new(transport);
        let response = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(session.transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let transport = MockTransport::new();
        transport.push_transport_error("connection refused");
        transport.push_status(200, "ok");

        let session = RetryingHttpSession::new(transport);
        let response = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(session.transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_caching_session_survives_dead_origin() {
        let transport = MockTransport::new();
        transport.push_status(200, "cached page");
        // Everything after the first reply fails.
        for _ in 0..TOTAL_ATTEMPTS {
            transport.push_transport_error("connection refused");
        }

        let session = CachingSession::new(transport, Duration::from_secs(60));
        let first = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(first.body, "cached page");

        // Origin is dead now, but the cache answers.
        let second = session.get("http://example.test/", &[]).await.unwrap();
        assert_eq!(second.body, "cached page");
        assert_eq!(session.inner.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_caching_session_expires_entries() {
        let transport = MockTransport::new();
        transport.push_status(200, "first");
        transport.push_status(200, "second");

        let session = CachingSession::new(transport, Duration::ZERO);
        assert_eq!(
            session.get("http://example.test/", &[]).await.unwrap().body,
            "first"
        );
        assert_eq!(
            session.get("http://example.test/", &[]).await.unwrap().body,
            "second"
        );
    }

    #[test]
    fn test_cache_body_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        cache_body(dir.path(), "<html></html>").unwrap();
        assert_eq!(load_cached_body(dir.path()).unwrap(), "<html></html>");
    }

    #[test]
    fn test_missing_cache_file_is_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_cached_body(dir.path()),
            Err(Error::CacheMiss { .. })
        ));
    }
}
