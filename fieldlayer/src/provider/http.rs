//! HTTP client abstraction for testability

use super::types::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Trait for asynchronous HTTP client operations.
///
/// Implementations normalize every non-success outcome into a
/// [`ProviderError`] via [`classify_status`], so adapters never see raw
/// status codes.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs an async HTTP GET request with custom headers.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    /// * `headers` - Slice of (header_name, header_value) tuples
    fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;

    /// Performs an async HTTP POST request with a JSON body.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    /// * `json_body` - JSON body as a string
    /// * `headers` - Extra headers, e.g. `Authorization`
    fn post_json(
        &self,
        url: &str,
        json_body: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;
}

/// Maps a non-success HTTP status onto the provider error taxonomy.
///
/// 429 is rate limiting, 401/403 are credential problems, 204/404/422 mean
/// the source has nothing for the requested area or date. Everything else
/// (5xx, unexpected 4xx) is treated as transient.
pub fn classify_status(status: u16, retry_after: Option<Duration>, url: &str) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::AuthFailed(format!("HTTP {} from {}", status, url)),
        204 | 404 | 422 => ProviderError::NoCoverage(format!("HTTP {} from {}", status, url)),
        _ => ProviderError::Transient(format!("HTTP {} from {}", status, url)),
    }
}

/// Default User-Agent string for HTTP requests.
const DEFAULT_USER_AGENT: &str = concat!("fieldlayer/", env!("CARGO_PKG_VERSION"));

/// Async HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct AsyncReqwestClient {
    client: reqwest::Client,
}

impl AsyncReqwestClient {
    /// Creates a new AsyncReqwestClient with default configuration.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(60)
    }

    /// Creates a new AsyncReqwestClient with custom timeout.
    ///
    /// Imagery requests are few and large, so the pool is small but kept warm.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                ProviderError::Transient(format!("Failed to create async HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    async fn finish(
        response: Result<reqwest::Response, reqwest::Error>,
        url: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = response.map_err(|e| {
            if e.is_timeout() {
                warn!(url = url, "HTTP request timed out");
            }
            ProviderError::Transient(format!("Request failed: {}", e))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT || !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            debug!(url = url, status = status.as_u16(), "HTTP request rejected");
            return Err(classify_status(status.as_u16(), retry_after, url));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to read response: {}", e)))?;
        trace!(url = url, bytes = bytes.len(), "HTTP response received");
        Ok(bytes.to_vec())
    }
}

impl AsyncHttpClient for AsyncReqwestClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, ProviderError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Self::finish(request.send().await, url).await
    }

    async fn post_json(
        &self,
        url: &str,
        json_body: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, ProviderError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(json_body.to_string());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Self::finish(request.send().await, url).await
    }
}
