//! Configuration file parser for ~/.config/photofeed/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged as a warning,
//! since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `access_key`.
pub const ACCESS_KEY_ENV: &str = "PHOTOFEED_ACCESS_KEY";

/// Largest page size the provider accepts.
pub const MAX_PER_PAGE: u32 = 30;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES: u32 = 5;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `Debug` masks `access_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the photo search API.
    pub api_base_url: String,

    /// API access key. `PHOTOFEED_ACCESS_KEY` takes precedence.
    pub access_key: Option<String>,

    /// Photos requested per page (1..=30).
    pub per_page: u32,

    /// Per-request timeout for the HTTP provider.
    pub request_timeout_secs: u64,

    /// Retries for transient HTTP failures (at most 5).
    pub max_retries: u32,

    /// Minimum time between two viewport-triggered load-more calls.
    pub load_more_interval_ms: u64,

    /// How far ahead of the sentinel load-more fires.
    pub root_margin_px: f64,

    /// Visible fraction of the sentinel required (0.0..=1.0).
    pub visibility_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.unsplash.com".to_string(),
            access_key: None,
            per_page: 20,
            request_timeout_secs: 20,
            max_retries: 2,
            load_more_interval_ms: 500,
            root_margin_px: 200.0,
            visibility_threshold: 0.1,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("access_key", &self.access_key.as_ref().map(|_| "[REDACTED]"))
            .field("per_page", &self.per_page)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("load_more_interval_ms", &self.load_more_interval_ms)
            .field("root_margin_px", &self.root_margin_px)
            .field("visibility_threshold", &self.visibility_threshold)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "api_base_url",
        "access_key",
        "per_page",
        "request_timeout_secs",
        "max_retries",
        "load_more_interval_ms",
        "root_margin_px",
        "visibility_threshold",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Out-of-range `per_page`, `max_retries`, margin or threshold → clamped, logged
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            api_base_url = %config.api_base_url,
            per_page = config.per_page,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse TOML text. Blank input yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        Ok(config.clamped())
    }

    fn clamped(mut self) -> Self {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE);
        if per_page != self.per_page {
            tracing::warn!(value = self.per_page, clamped = per_page, "per_page out of range");
            self.per_page = per_page;
        }
        let threshold = if self.visibility_threshold.is_nan() {
            Self::default().visibility_threshold
        } else {
            self.visibility_threshold.clamp(0.0, 1.0)
        };
        if threshold != self.visibility_threshold {
            tracing::warn!(
                value = self.visibility_threshold,
                clamped = threshold,
                "visibility_threshold out of range"
            );
            self.visibility_threshold = threshold;
        }
        if self.max_retries > MAX_RETRIES {
            tracing::warn!(
                value = self.max_retries,
                clamped = MAX_RETRIES,
                "max_retries out of range"
            );
            self.max_retries = MAX_RETRIES;
        }
        let margin = if self.root_margin_px.is_nan() {
            Self::default().root_margin_px
        } else {
            self.root_margin_px.max(0.0)
        };
        if margin != self.root_margin_px {
            tracing::warn!(
                value = self.root_margin_px,
                clamped = margin,
                "root_margin_px out of range"
            );
            self.root_margin_px = margin;
        }
        self
    }

    /// Resolve the access key, preferring `PHOTOFEED_ACCESS_KEY` over the file.
    pub fn access_key(&self) -> Option<SecretString> {
        self.access_key_with_env(std::env::var(ACCESS_KEY_ENV).ok())
    }

    fn access_key_with_env(&self, env: Option<String>) -> Option<SecretString> {
        env.filter(|k| !k.trim().is_empty())
            .or_else(|| self.access_key.clone().filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }

    pub fn load_more_interval(&self) -> Duration {
        Duration::from_millis(self.load_more_interval_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
