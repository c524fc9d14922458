use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a provider base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a remote host would expose the access key.
    #[error("Insecure base URL: HTTPS required for {0} (plain HTTP is only allowed for localhost)")]
    InsecureScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates the base URL of a search provider.
///
/// The access key travels in a request header, so the base URL must use HTTPS.
/// Plain HTTP is accepted only for loopback hosts (local mock servers).
/// A trailing slash is trimmed from the path so endpoint paths can be joined.
///
/// # Examples
///
/// ```
/// use photofeed::util::validate_base_url;
///
/// assert!(validate_base_url("https://api.unsplash.com").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://api.example.com").is_err());
/// assert!(validate_base_url("ftp://api.example.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    let host = url
        .host_str()
        .ok_or(UrlValidationError::MissingHost)?
        .to_owned();

    match url.scheme() {
        "https" => {}
        "http" if is_loopback_host(&host) => {
            tracing::warn!(base_url = %url, "Using non-HTTPS provider base URL (localhost only)");
        }
        "http" => return Err(UrlValidationError::InsecureScheme(host)),
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let trimmed = url.path().trim_end_matches('/').to_owned();
    url.set_path(&trimmed);
    Ok(url)
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    // Strip brackets from IPv6 addresses for parsing
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
