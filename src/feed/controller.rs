//! Feed controller: owns one feed, talks to the provider, supersedes stale work.
//!
//! Every request gets a generation number and a fresh [`CancellationToken`].
//! Starting a request cancels the previous token and aborts its task. When a
//! response arrives, the task re-checks under the state lock that its
//! generation is still current; otherwise the result is dropped. This keeps
//! the published state equal to the most recently issued intent even if the
//! provider ignores cancellation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reducer::{reduce, FeedAction};
use super::state::FeedState;
use super::trigger::PageLoader;
use super::FeedError;
use crate::provider::{ProviderError, SearchPage, SearchProvider, SearchRequest};

/// Default page size when none is configured.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Outcome sent to whoever waits on a request: `Err` when it failed.
/// The sender is dropped without a value when the request is superseded.
type Completion = oneshot::Receiver<Result<(), FeedError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Initial,
    More,
}

/// The request currently allowed to dispatch.
struct Operation {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Operation {
    fn cancel(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct Inner {
    state: FeedState,
    generation: u64,
    current: Option<Operation>,
    disposed: bool,
}

struct Shared<P> {
    provider: P,
    per_page: u32,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<FeedState>,
}

impl<P> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent across a panic: reduce never panics and the
        // state is swapped in a single assignment.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `action` and publish the new snapshot. Caller holds the lock.
    fn dispatch(&self, inner: &mut Inner, action: FeedAction) {
        if !action.is_valid_in(inner.state.phase) {
            tracing::debug!(
                action = action.name(),
                phase = ?inner.state.phase,
                "Ignoring feed action not valid in current phase"
            );
            return;
        }
        let name = action.name();
        let state = std::mem::take(&mut inner.state);
        inner.state = reduce(state, action);
        tracing::trace!(action = name, phase = ?inner.state.phase, "Feed action applied");
        self.state_tx.send_replace(inner.state.clone());
    }

    /// Handle a provider result for request `generation`.
    ///
    /// Returns `None` when the result was superseded or cancelled and nothing
    /// was dispatched.
    fn complete(
        &self,
        generation: u64,
        kind: RequestKind,
        request: &SearchRequest,
        result: Result<SearchPage, ProviderError>,
    ) -> Option<Result<(), FeedError>> {
        let mut inner = self.lock();

        if inner.disposed || inner.generation != generation {
            tracing::debug!(
                query = %request.query,
                page = request.page,
                generation,
                current = inner.generation,
                "Discarding superseded feed result"
            );
            return None;
        }
        if inner
            .current
            .as_ref()
            .is_some_and(|op| op.generation == generation)
        {
            inner.current = None;
        }

        let (action, outcome) = match result {
            Ok(SearchPage { photos, has_more }) => {
                tracing::info!(
                    query = %request.query,
                    page = request.page,
                    photos = photos.len(),
                    has_more,
                    "Feed page loaded"
                );
                let action = match kind {
                    RequestKind::Initial => FeedAction::FetchSuccess {
                        photos,
                        page: request.page,
                        has_more,
                    },
                    RequestKind::More => FeedAction::LoadMoreSuccess { photos, has_more },
                };
                (action, Ok(()))
            }
            Err(e) => {
                let Some(error) = FeedError::from_provider(&e) else {
                    tracing::debug!(query = %request.query, page = request.page, "Feed request cancelled");
                    return None;
                };
                tracing::warn!(
                    query = %request.query,
                    page = request.page,
                    kind = %error.kind,
                    error = %e,
                    "Feed request failed"
                );
                (
                    FeedAction::FetchError {
                        error: error.clone(),
                    },
                    Err(error),
                )
            }
        };

        self.dispatch(&mut inner, action);
        Some(outcome)
    }
}

impl<P: SearchProvider> Shared<P> {
    /// Invalidate the current request, then spawn `request` as the new one.
    /// Caller holds the lock and has already dispatched the start action.
    fn spawn(
        self: &Arc<Self>,
        inner: &mut Inner,
        kind: RequestKind,
        request: SearchRequest,
    ) -> Completion {
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        tracing::debug!(
            query = %request.query,
            page = request.page,
            generation,
            ?kind,
            "Starting feed request"
        );

        let shared = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = shared.provider.search(request.clone(), token.clone()) => result,
            };
            if let Some(outcome) = shared.complete(generation, kind, &request, result) {
                // Receiver may be gone; nobody waiting is fine
                let _ = done_tx.send(outcome);
            }
        });

        inner.current = Some(Operation {
            generation,
            cancel,
            handle,
        });
        done_rx
    }
}

/// Cancel whatever request is current. Caller holds the lock.
fn supersede(inner: &mut Inner) {
    if let Some(op) = inner.current.take() {
        tracing::debug!(generation = op.generation, "Cancelling in-flight feed request");
        op.cancel();
    }
}

/// Owns the state of one photo feed.
///
/// All methods are synchronous and return immediately; provider calls run on
/// spawned tokio tasks, so the controller must be used inside a tokio runtime.
/// Observe results through [`FeedController::subscribe`].
///
/// Dropping the controller disposes it.
pub struct FeedController<P> {
    shared: Arc<Shared<P>>,
}

impl<P: SearchProvider> FeedController<P> {
    pub fn new(provider: P) -> Self {
        Self::with_page_size(provider, DEFAULT_PER_PAGE)
    }

    /// Controller requesting `per_page` photos per page (at least 1).
    pub fn with_page_size(provider: P, per_page: u32) -> Self {
        let (state_tx, _) = watch::channel(FeedState::default());
        Self {
            shared: Arc::new(Shared {
                provider,
                per_page: per_page.max(1),
                inner: Mutex::new(Inner {
                    state: FeedState::default(),
                    generation: 0,
                    current: None,
                    disposed: false,
                }),
                state_tx,
            }),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> FeedState {
        self.shared.lock().state.clone()
    }

    /// Receiver that sees every published snapshot, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.shared.state_tx.subscribe()
    }

    pub fn per_page(&self) -> u32 {
        self.shared.per_page
    }

    /// Start a new search for `query`, superseding anything in flight.
    ///
    /// The feed enters `FetchingInitial` before this returns.
    pub fn fetch(&self, query: impl Into<String>) {
        let _ = self.begin_fetch(query.into());
    }

    /// Re-run the current query from page 1. No-op without a query.
    pub fn refresh(&self) -> bool {
        let query = self.shared.lock().state.query.clone();
        if query.is_empty() {
            return false;
        }
        self.fetch(query);
        true
    }

    /// Request the next page.
    ///
    /// Returns `false` without doing anything unless the feed is `Ready` and
    /// has more pages.
    pub fn load_more(&self) -> bool {
        self.begin_load_more().is_some()
    }

    /// Cancel in-flight work and return to the initial state.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        if inner.disposed {
            return;
        }
        supersede(&mut inner);
        inner.generation = inner.generation.wrapping_add(1);
        self.shared.dispatch(&mut inner, FeedAction::Reset);
    }

    /// Cancel in-flight work. Nothing is dispatched afterwards.
    pub fn dispose(&self) {
        let mut inner = self.shared.lock();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        supersede(&mut inner);
        tracing::debug!(query = %inner.state.query, "Feed controller disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    fn begin_fetch(&self, query: String) -> Option<Completion> {
        let mut inner = self.shared.lock();
        if inner.disposed {
            tracing::warn!(query = %query, "fetch called on disposed feed controller");
            return None;
        }

        supersede(&mut inner);
        self.shared.dispatch(
            &mut inner,
            FeedAction::FetchStart {
                query: query.clone(),
            },
        );
        let request = SearchRequest {
            query,
            page: 1,
            per_page: self.shared.per_page,
        };
        Some(self.shared.spawn(&mut inner, RequestKind::Initial, request))
    }

    fn begin_load_more(&self) -> Option<Completion> {
        let mut inner = self.shared.lock();
        if inner.disposed || !inner.state.can_load_more() {
            tracing::debug!(
                phase = ?inner.state.phase,
                has_more = inner.state.has_more,
                disposed = inner.disposed,
                "load_more skipped"
            );
            return None;
        }

        supersede(&mut inner);
        let request = SearchRequest {
            query: inner.state.query.clone(),
            page: inner.state.page + 1,
            per_page: self.shared.per_page,
        };
        self.shared.dispatch(&mut inner, FeedAction::LoadMoreStart);
        Some(self.shared.spawn(&mut inner, RequestKind::More, request))
    }
}

impl<P: SearchProvider> PageLoader for FeedController<P> {
    /// Start a load-more and wait for it to settle.
    ///
    /// Resolves `Ok(false)` when nothing was started and `Ok(true)` once the
    /// started request settled or was superseded. `Err` when it failed.
    async fn load_next_page(&self) -> Result<bool, FeedError> {
        let Some(done) = self.begin_load_more() else {
            return Ok(false);
        };
        done.await.unwrap_or(Ok(())).map(|()| true)
    }
}

impl<P> Drop for FeedController<P> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if !inner.disposed {
            inner.disposed = true;
            supersede(&mut inner);
        }
    }
}
