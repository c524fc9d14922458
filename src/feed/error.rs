use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::ProviderError;

/// Normalized failure category surfaced through `FeedState::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider refused the request because of its quota.
    RateLimited,
    /// No response was received (timeout, DNS, connect, TLS).
    Network,
    /// The provider answered with an error status.
    ProviderError,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error record stored in the feed while `phase == Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FeedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a provider failure.
    ///
    /// Returns `None` for cancellation: a cancelled request has no result and
    /// is never reported as a failure.
    pub fn from_provider(err: &ProviderError) -> Option<Self> {
        let kind = match err {
            ProviderError::Cancelled => return None,
            ProviderError::Tagged { kind, .. } => *kind,
            ProviderError::HttpStatus { status, message } => {
                classify_status(*status, message.as_deref())
            }
            ProviderError::Timeout => ErrorKind::Network,
            ProviderError::Transport(e) => match e.status() {
                Some(status) => classify_status(status.as_u16(), None),
                None if e.is_decode() => ErrorKind::Unknown,
                None => ErrorKind::Network,
            },
            ProviderError::Decode(_)
            | ProviderError::ResponseTooLarge(_)
            | ProviderError::InvalidBaseUrl(_) => ErrorKind::Unknown,
        };
        Some(Self::new(kind, err.to_string()))
    }
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FeedError {}

fn classify_status(status: u16, message: Option<&str>) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited,
        // Some providers signal an exhausted hourly quota with 403 instead of 429
        403 if message.is_some_and(|m| m.to_ascii_lowercase().contains("rate limit")) => {
            ErrorKind::RateLimited
        }
        _ => ErrorKind::ProviderError,
    }
}
