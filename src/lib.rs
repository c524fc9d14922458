//! Paginated photo search feed.
//!
//! [`feed::FeedController`] owns one feed: it issues searches through a
//! [`provider::SearchProvider`], appends further pages on request and drops
//! results of requests that were superseded or cancelled. A
//! [`feed::LoadMoreTrigger`] turns sentinel visibility reported by a
//! [`viewport::Viewport`] into throttled load-more calls.

pub mod config;
pub mod feed;
pub mod provider;
pub mod util;
pub mod viewport;
