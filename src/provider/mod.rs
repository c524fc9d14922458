//! Photo search providers.
//!
//! The feed controller only depends on the [`SearchProvider`] trait. The
//! [`HttpSearchProvider`] talks to an Unsplash-compatible `/search/photos`
//! endpoint and is what the binary wires in.
//!
//! # Cancellation
//!
//! Every call receives a [`CancellationToken`]. Providers should return
//! [`ProviderError::Cancelled`] promptly once it fires, but the controller does
//! not rely on it: late results from superseded requests are discarded anyway.

mod http;
mod types;

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feed::ErrorKind;
use crate::util::UrlValidationError;

pub use http::HttpSearchProvider;
pub use types::{Author, Photo, PhotoUrls};

/// One page request against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub photos: Vec<Photo>,
    /// Whether a page after this one exists.
    pub has_more: bool,
}

/// Errors raised by a search provider.
///
/// These are raw transport/provider failures; the controller maps them onto
/// [`ErrorKind`] once, at its boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request's cancellation token fired before a result was produced
    #[error("Request cancelled")]
    Cancelled,
    /// No response within the request timeout
    #[error("Request timed out")]
    Timeout,
    /// Network-level error (DNS, connection, TLS, interrupted body)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-2xx response, with the provider's error message when it sent one
    #[error("HTTP error: status {status}{}", message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    HttpStatus { status: u16, message: Option<String> },
    /// Failure the provider already classified itself
    #[error("{message}")]
    Tagged { kind: ErrorKind, message: String },
    /// Response body was not the expected JSON
    #[error("Invalid response: {0}")]
    Decode(String),
    /// Response body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Provider base URL rejected at construction
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] UrlValidationError),
}

impl ProviderError {
    /// Returns true if this error is transient and the request may be retried.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::HttpStatus { status, .. } => *status >= 500,
            ProviderError::Cancelled
            | ProviderError::Tagged { .. }
            | ProviderError::Decode(_)
            | ProviderError::ResponseTooLarge(_)
            | ProviderError::InvalidBaseUrl(_) => false,
        }
    }
}

/// Source of photo search results.
///
/// Implementations must be shareable across tasks: the controller calls
/// `search` from a spawned task per request.
pub trait SearchProvider: Send + Sync + 'static {
    fn search(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<SearchPage, ProviderError>> + Send;
}
