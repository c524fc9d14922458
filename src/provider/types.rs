use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A photo returned by the search provider.
///
/// Opaque to the feed controller, which only moves values around.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub width: u32,
    pub height: u32,
    /// Dominant color as a CSS hex string, used for placeholders
    pub color: Option<String>,
    pub blur_hash: Option<String>,
    pub description: Option<String>,
    pub alt_description: Option<String>,
    pub urls: PhotoUrls,
    pub author: Author,
    /// Photo page on the provider's site
    pub html_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Photo {
    /// Photo with only an identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Best available caption: description, then alt text.
    pub fn caption(&self) -> Option<&str> {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|c| !c.is_empty())
        }
        non_empty(&self.description).or_else(|| non_empty(&self.alt_description))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoUrls {
    pub raw: String,
    pub full: String,
    pub regular: String,
    pub small: String,
    pub thumb: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Author {
    pub name: String,
    pub username: String,
}

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `GET /search/photos`.
#[derive(Debug, Deserialize)]
pub(super) struct SearchResponse {
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub results: Vec<WirePhoto>,
}

/// Body of an error response: `{"errors": ["..."]}`.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WirePhoto {
    pub id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub color: Option<String>,
    pub blur_hash: Option<String>,
    pub description: Option<String>,
    pub alt_description: Option<String>,
    #[serde(default)]
    pub urls: PhotoUrls,
    pub user: Option<WireUser>,
    pub links: Option<WireLinks>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireLinks {
    pub html: Option<String>,
}

impl From<WirePhoto> for Photo {
    fn from(wire: WirePhoto) -> Self {
        let author = wire
            .user
            .map(|u| Author {
                name: u.name,
                username: u.username,
            })
            .unwrap_or_default();

        Photo {
            id: wire.id,
            width: wire.width,
            height: wire.height,
            color: wire.color,
            blur_hash: wire.blur_hash,
            description: wire.description,
            alt_description: wire.alt_description,
            urls: wire.urls,
            author,
            html_url: wire.links.and_then(|l| l.html),
            created_at: wire.created_at,
        }
    }
}
