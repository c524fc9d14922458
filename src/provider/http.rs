use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::types::{ErrorResponse, SearchResponse};
use super::{Photo, ProviderError, SearchPage, SearchProvider, SearchRequest};
use crate::config::Config;
use crate::feed::ErrorKind;
use crate::util::validate_base_url;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_ERROR_BODY_SIZE: usize = 64 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 2;
/// First backoff delay; doubles per retry (250ms, 500ms, 1s, ...)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Search provider backed by an Unsplash-compatible HTTP API.
///
/// Issues `GET {base}/search/photos?query=..&page=..&per_page=..` and maps the
/// JSON body into [`Photo`] values.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    base_url: Url,
    access_key: Option<SecretString>,
    timeout: Duration,
    max_retries: u32,
}

impl HttpSearchProvider {
    /// Create a provider for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] if the URL does not parse or
    /// uses plain HTTP for a non-loopback host.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client,
            base_url: validate_base_url(base_url)?,
            access_key: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Build a provider from the loaded configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, ProviderError> {
        let mut provider = Self::new(client, &config.api_base_url)?
            .with_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_max_retries(config.max_retries);
        if let Some(key) = config.access_key() {
            provider = provider.with_access_key(key);
        }
        Ok(provider)
    }

    pub fn with_access_key(mut self, key: SecretString) -> Self {
        self.access_key = Some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn search_url(&self, request: &SearchRequest) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/search/photos", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair("query", &request.query)
            .append_pair("page", &request.page.to_string())
            .append_pair("per_page", &request.per_page.to_string());
        url
    }

    /// Single attempt: send, check status, read and decode the body.
    ///
    /// Not time-limited itself; `search` bounds the whole attempt, body
    /// included, by `self.timeout`.
    async fn fetch_page(&self, url: &Url, page: u32) -> Result<SearchPage, ProviderError> {
        let mut request = self
            .client
            .get(url.as_str())
            .header("Accept-Version", "v1");
        if let Some(key) = &self.access_key {
            request = request.header(
                "Authorization",
                format!("Client-ID {}", key.expose_secret()),
            );
        }

        let response = request.send().await.map_err(ProviderError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        let body: SearchResponse =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(SearchPage {
            has_more: page < body.total_pages,
            photos: body.results.into_iter().map(Photo::from).collect(),
        })
    }
}

impl SearchProvider for HttpSearchProvider {
    /// Fetch one page, retrying transient failures with exponential backoff.
    ///
    /// Both the request and the backoff sleep stop as soon as `cancel` fires.
    async fn search(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> Result<SearchPage, ProviderError> {
        let url = self.search_url(&request);
        let mut retry_count = 0;

        loop {
            let attempt = tokio::time::timeout(self.timeout, self.fetch_page(&url, request.page));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                result = attempt => result.unwrap_or_else(|_| Err(ProviderError::Timeout)),
            };

            match result {
                Ok(page) => {
                    tracing::debug!(
                        query = %request.query,
                        page = request.page,
                        photos = page.photos.len(),
                        has_more = page.has_more,
                        "Search page fetched"
                    );
                    return Ok(page);
                }
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(retry_count));
                    tracing::warn!(
                        query = %request.query,
                        page = request.page,
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Search request failed, retrying after delay"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Turn a non-2xx response into a provider error.
///
/// A 403 with `X-Ratelimit-Remaining: 0` means the hourly quota is spent; it
/// is tagged as rate limited instead of being left as a bare status.
async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let quota_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    let message = match read_limited_bytes(response, MAX_ERROR_BODY_SIZE).await {
        Ok(bytes) => error_message(&bytes),
        Err(e) => {
            tracing::debug!(status, error = %e, "Failed to read error response body");
            None
        }
    };

    if quota_exhausted && status == 403 {
        return ProviderError::Tagged {
            kind: ErrorKind::RateLimited,
            message: message.unwrap_or_else(|| "Rate Limit Exceeded".to_string()),
        };
    }

    ProviderError::HttpStatus { status, message }
}

/// Extract a message from `{"errors": [...]}` or fall back to a short text body.
fn error_message(bytes: &[u8]) -> Option<String> {
    if let Ok(body) = serde_json::from_slice::<ErrorResponse>(bytes) {
        if !body.errors.is_empty() {
            return Some(body.errors.join("; "));
        }
    }
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty() && text.len() <= 200 && !text.starts_with('{')).then(|| text.to_string())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ProviderError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ProviderError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ProviderError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ProviderError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
