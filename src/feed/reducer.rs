//! Pure state transitions for [`FeedState`].
//!
//! `reduce` is the only way a feed changes. Actions whose preconditions do not
//! hold for the current phase leave the state untouched: a late completion
//! racing a new search is an expected event, not an error.

use std::sync::Arc;

use super::state::{FeedState, Phase};
use super::FeedError;
use crate::provider::Photo;

/// Something that happened to the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedAction {
    /// A new search started. Valid from any phase.
    FetchStart { query: String },
    /// First page arrived. Valid only while `FetchingInitial`.
    FetchSuccess {
        photos: Vec<Photo>,
        page: u32,
        has_more: bool,
    },
    /// A request failed. Valid while `FetchingInitial` or `LoadingMore`.
    FetchError { error: FeedError },
    /// Next page requested. Valid only while `Ready`.
    LoadMoreStart,
    /// Next page arrived. Valid only while `LoadingMore`.
    LoadMoreSuccess { photos: Vec<Photo>, has_more: bool },
    /// Back to the initial state. Valid from any phase.
    Reset,
}

impl FeedAction {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FeedAction::FetchStart { .. } => "fetch_start",
            FeedAction::FetchSuccess { .. } => "fetch_success",
            FeedAction::FetchError { .. } => "fetch_error",
            FeedAction::LoadMoreStart => "load_more_start",
            FeedAction::LoadMoreSuccess { .. } => "load_more_success",
            FeedAction::Reset => "reset",
        }
    }

    /// Whether this action applies in `phase`.
    pub fn is_valid_in(&self, phase: Phase) -> bool {
        match self {
            FeedAction::FetchStart { .. } | FeedAction::Reset => true,
            FeedAction::FetchSuccess { .. } => phase == Phase::FetchingInitial,
            FeedAction::FetchError { .. } => {
                matches!(phase, Phase::FetchingInitial | Phase::LoadingMore)
            }
            FeedAction::LoadMoreStart => phase == Phase::Ready,
            FeedAction::LoadMoreSuccess { .. } => phase == Phase::LoadingMore,
        }
    }
}

/// Apply `action` to `state`.
///
/// Returns `state` unchanged when the action is not valid in its phase.
pub fn reduce(mut state: FeedState, action: FeedAction) -> FeedState {
    if !action.is_valid_in(state.phase) {
        return state;
    }

    match action {
        FeedAction::FetchStart { query } => FeedState {
            phase: Phase::FetchingInitial,
            query,
            ..FeedState::default()
        },
        FeedAction::FetchSuccess {
            photos,
            page,
            has_more,
        } => {
            state.phase = Phase::Ready;
            state.photos = Arc::new(photos);
            state.page = page;
            state.has_more = has_more;
            state
        }
        FeedAction::FetchError { error } => {
            state.phase = Phase::Failed;
            state.error = Some(error);
            state
        }
        FeedAction::LoadMoreStart => {
            state.phase = Phase::LoadingMore;
            state.error = None;
            state
        }
        FeedAction::LoadMoreSuccess { photos, has_more } => {
            Arc::make_mut(&mut state.photos).extend(photos);
            state.phase = Phase::Ready;
            state.page += 1;
            state.has_more = has_more;
            state
        }
        FeedAction::Reset => FeedState::default(),
    }
}
