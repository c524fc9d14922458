use std::sync::Arc;

use super::FeedError;
use crate::provider::Photo;

/// Fetch lifecycle of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing requested yet (or reset).
    #[default]
    Idle,
    /// First page of a new query in flight; `photos` is empty.
    FetchingInitial,
    /// Settled with at least the first page.
    Ready,
    /// Next page in flight; `photos` holds everything loaded so far.
    LoadingMore,
    /// Last request failed; `error` is set.
    Failed,
}

/// Snapshot of one feed.
///
/// Only the reducer produces new values; consumers receive clones. `photos` is
/// behind an `Arc` so cloning a snapshot for every subscriber stays O(1).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedState {
    pub photos: Arc<Vec<Photo>>,
    pub phase: Phase,
    pub query: String,
    /// Last committed page for `query`. `0` until the first page succeeds.
    pub page: u32,
    pub has_more: bool,
    /// Present only while `phase == Phase::Failed`.
    pub error: Option<FeedError>,
}

impl FeedState {
    /// True while any request is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::FetchingInitial | Phase::LoadingMore)
    }

    /// Whether `load_more` would start a request right now.
    pub fn can_load_more(&self) -> bool {
        self.phase == Phase::Ready && self.has_more
    }
}
