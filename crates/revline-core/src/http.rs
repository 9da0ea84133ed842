//! Blocking HTTP facade over a shared async client.
//!
//! Uses async reqwest internally with tokio::time::timeout for the
//! per-request deadline, but presents a sync interface so worker threads
//! stay plain threads. Adapters must not retry or rate-limit here; that
//! belongs to the worker loop.

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::SearchError;

/// Connect timeout (separate from the per-request deadline)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// A completed HTTP exchange. Non-2xx statuses are returned here rather
/// than as errors so the caller classifies them once, in one place.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed Retry-After header (seconds form only)
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Convert a non-2xx response into a classified [`SearchError`].
    pub fn error_for_status(self) -> Result<Self, SearchError> {
        if self.status >= 400 {
            Err(SearchError::from_status(
                self.status,
                &self.body,
                self.retry_after,
            ))
        } else {
            Ok(self)
        }
    }
}

/// Blocking GET with extra headers and a hard per-request deadline.
///
/// A deadline overrun is a NETWORK error, as are transport failures
/// before a response arrives; status-code handling is the caller's job
/// via [`HttpResponse::error_for_status`].
pub fn get(
    url: &str,
    headers: &[(&str, String)],
    timeout: Duration,
) -> Result<HttpResponse, SearchError> {
    SHARED_RUNTIME.handle().block_on(async {
        let request = async {
            let mut req = SHARED_CLIENT.get(url);
            for (name, value) in headers {
                req = req.header(*name, value);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| SearchError::network(format!("request failed: {e}")))?;

            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            let body = resp
                .text()
                .await
                .map_err(|e| SearchError::network(format!("failed to read body: {e}")))?;

            Ok(HttpResponse {
                status,
                body,
                retry_after,
            })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::network(format!(
                "request timed out after {}s",
                timeout.as_secs()
            ))),
        }
    })
}
