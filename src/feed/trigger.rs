//! Viewport-driven "load more".
//!
//! A [`LoadMoreTrigger`] watches one sentinel through a [`Viewport`] and asks
//! its [`PageLoader`] for the next page whenever the sentinel becomes visible.
//! Three guards must pass first: more pages exist, nothing is loading, and
//! `min_interval` has elapsed since the last successful invocation. A failed
//! load clears the interval so the next visibility event retries right away,
//! and a call that started nothing leaves the interval as it was.
//!
//! An intersection that arrives while a load is still in flight is remembered
//! and replayed once that load settles, so a host that reacts to the new page
//! by scrolling the sentinel back into view never loses the event.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::state::FeedState;
use super::FeedError;
use crate::viewport::{ObserveOptions, SentinelId, Viewport};

/// Default minimum time between two load-more invocations.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Loads the next page of a feed.
pub trait PageLoader: Send + Sync + 'static {
    /// Resolve once the load settles. `Ok(false)` means no load was started,
    /// for example because the feed is busy or exhausted. `Err` means the
    /// page was not loaded and the caller may retry.
    fn load_next_page(&self) -> impl Future<Output = Result<bool, FeedError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Mirrors the feed: false stops observation entirely.
    pub has_more: bool,
    /// True while a load is in flight elsewhere.
    pub loading: bool,
    pub root_margin_px: f64,
    pub threshold: f64,
    pub min_interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            has_more: false,
            loading: false,
            root_margin_px: 200.0,
            threshold: 0.1,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl TriggerConfig {
    /// Copy `has_more` and `loading` from a feed snapshot.
    pub fn with_feed_state(mut self, state: &FeedState) -> Self {
        self.has_more = state.has_more;
        self.loading = state.is_loading();
        self
    }

    fn observe_options(&self) -> ObserveOptions {
        ObserveOptions {
            root_margin_px: self.root_margin_px,
            threshold: self.threshold,
        }
    }
}

/// Why an intersection did not invoke the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoMorePages,
    Loading,
    TooSoon,
    InFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// The loader started a load, which settled with this result.
    Invoked(Result<(), FeedError>),
    /// The loader was called but had nothing to start.
    NotStarted,
    Skipped(Skip),
}

#[derive(Debug, Default)]
struct GuardState {
    in_flight: bool,
    last_invoked: Option<Instant>,
    /// Latest config of an intersection skipped as in flight.
    pending: Option<TriggerConfig>,
}

/// Rate limit and reentrancy guard shared by every invocation of one trigger.
#[derive(Debug, Default)]
pub struct InvocationGuard {
    state: Mutex<GuardState>,
}

/// Clears the in-flight flag when the invocation ends, however it ends.
struct InFlight<'a>(&'a InvocationGuard);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight = false;
    }
}

impl InvocationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the in-flight slot. On success returns the guard together with
    /// the previous `last_invoked`.
    fn begin(&self, config: &TriggerConfig) -> Result<(InFlight<'_>, Option<Instant>), Skip> {
        if !config.has_more {
            return Err(Skip::NoMorePages);
        }
        if config.loading {
            return Err(Skip::Loading);
        }

        let mut state = self.lock();
        if state.in_flight {
            state.pending = Some(config.clone());
            return Err(Skip::InFlight);
        }
        if let Some(last) = state.last_invoked {
            if last.elapsed() < config.min_interval {
                return Err(Skip::TooSoon);
            }
        }
        state.in_flight = true;
        let previous = state.last_invoked.replace(Instant::now());
        Ok((InFlight(self), previous))
    }

    /// Run `loader` if every guard passes.
    ///
    /// Intersections skipped while this call was in flight are replayed before
    /// it returns. The outcome is that of the last call that ran.
    pub async fn invoke<L: PageLoader>(
        &self,
        config: &TriggerConfig,
        loader: &L,
    ) -> Invocation {
        let mut config = config.clone();
        let mut outcome = None;
        loop {
            let (in_flight, previous) = match self.begin(&config) {
                Ok(started) => started,
                Err(skip) => {
                    tracing::trace!(?skip, "Load-more skipped");
                    return outcome.unwrap_or(Invocation::Skipped(skip));
                }
            };

            tracing::debug!("Load-more triggered");
            let invocation = match loader.load_next_page().await {
                Ok(true) => Invocation::Invoked(Ok(())),
                Ok(false) => {
                    tracing::debug!("Load-more started nothing, interval unchanged");
                    self.lock().last_invoked = previous;
                    Invocation::NotStarted
                }
                Err(e) => {
                    tracing::warn!(kind = %e.kind, error = %e, "Load-more failed, retry allowed");
                    self.lock().last_invoked = None;
                    Invocation::Invoked(Err(e))
                }
            };
            drop(in_flight);

            let Some(next) = self.lock().pending.take() else {
                return invocation;
            };
            tracing::debug!("Replaying load-more skipped while in flight");
            outcome = Some(invocation);
            config = next;
        }
    }

    fn clear_pending(&self) {
        self.lock().pending = None;
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }
}

/// Calls a [`PageLoader`] when a sentinel scrolls into view.
///
/// Must be used inside a tokio runtime. Dropping the trigger stops
/// observation; an invocation already running is allowed to finish.
pub struct LoadMoreTrigger<L: PageLoader> {
    loader: Arc<L>,
    config: TriggerConfig,
    guard: Arc<InvocationGuard>,
    target: Option<(Arc<dyn Viewport>, SentinelId)>,
    observation: Option<JoinHandle<()>>,
}

impl<L: PageLoader> LoadMoreTrigger<L> {
    pub fn new(loader: Arc<L>, config: TriggerConfig) -> Self {
        Self {
            loader,
            config,
            guard: Arc::new(InvocationGuard::new()),
            target: None,
            observation: None,
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Whether a sentinel is currently being observed.
    pub fn is_observing(&self) -> bool {
        self.observation
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Observe `sentinel` in `viewport`, replacing any previous target.
    pub fn attach(&mut self, viewport: Arc<dyn Viewport>, sentinel: SentinelId) {
        self.target = Some((viewport, sentinel));
        self.observe();
    }

    /// Stop observing and forget the target.
    pub fn detach(&mut self) {
        self.target = None;
        self.stop();
    }

    /// Replace the configuration and restart observation with it.
    pub fn configure(&mut self, config: TriggerConfig) {
        self.config = config;
        self.observe();
    }

    /// Reconfigure from a feed snapshot when `has_more` or `loading` changed.
    pub fn sync_with(&mut self, state: &FeedState) {
        let next = self.config.clone().with_feed_state(state);
        if next != self.config {
            self.configure(next);
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.observation.take() {
            handle.abort();
        }
        self.guard.clear_pending();
    }

    fn observe(&mut self) {
        self.stop();

        let Some((viewport, sentinel)) = &self.target else {
            return;
        };
        if !self.config.has_more {
            tracing::debug!(?sentinel, "No more pages, not observing sentinel");
            return;
        }

        let mut entries = viewport.observe(*sentinel, self.config.observe_options());
        let loader = Arc::clone(&self.loader);
        let guard = Arc::clone(&self.guard);
        let config = self.config.clone();

        self.observation = Some(tokio::spawn(async move {
            while let Some(entry) = entries.recv().await {
                if !entry.is_intersecting {
                    continue;
                }
                tracing::trace!(sentinel = ?entry.sentinel, ratio = entry.ratio, "Sentinel visible");
                let loader = Arc::clone(&loader);
                let guard = Arc::clone(&guard);
                let config = config.clone();
                tokio::spawn(async move {
                    guard.invoke(&config, &*loader).await;
                });
            }
        }));
    }
}

impl<L: PageLoader> Drop for LoadMoreTrigger<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ErrorKind;
    use crate::viewport::ScrollViewport;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
        failures_left: AtomicUsize,
        gate: Option<Notify>,
    }

    impl CountingLoader {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PageLoader for CountingLoader {
        async fn load_next_page(&self) -> Result<bool, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(FeedError::new(ErrorKind::Network, "offline"))
            } else {
                Ok(true)
            }
        }
    }

    /// Loader for a feed that never has a page to start.
    struct IdleLoader;

    impl PageLoader for IdleLoader {
        async fn load_next_page(&self) -> Result<bool, FeedError> {
            Ok(false)
        }
    }

    fn config() -> TriggerConfig {
        TriggerConfig {
            has_more: true,
            loading: false,
            root_margin_px: 0.0,
            threshold: 0.0,
            min_interval: Duration::from_millis(500),
        }
    }

    /// Viewport whose sentinel starts visible.
    fn visible_sentinel() -> (Arc<ScrollViewport>, SentinelId) {
        let viewport = Arc::new(ScrollViewport::new(100.0));
        viewport.set_content_height(1000.0);
        let sentinel = viewport.add_sentinel(50.0, 1.0);
        (viewport, sentinel)
    }

    /// Scroll the sentinel out of view and back.
    fn bounce(viewport: &ScrollViewport) {
        viewport.scroll_to(500.0);
        viewport.scroll_to(0.0);
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_per_interval() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(loader.calls(), 1);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(50)).await;
            bounce(&viewport);
            settle().await;
        }
        assert_eq!(loader.calls(), 1);

        tokio::time::advance(Duration::from_millis(300)).await;
        bounce(&viewport);
        settle().await;
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_allows_immediate_retry() {
        let loader = Arc::new(CountingLoader::failing(1));
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(loader.calls(), 1);

        bounce(&viewport);
        settle().await;
        assert_eq!(loader.calls(), 2);

        // second call succeeded, so the interval applies again
        bounce(&viewport);
        settle().await;
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_concurrent_and_replays_once() {
        let loader = Arc::new(CountingLoader::gated());
        let gate = || loader.gate.as_ref().unwrap().notify_one();
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(
            Arc::clone(&loader),
            TriggerConfig {
                min_interval: Duration::ZERO,
                ..config()
            },
        );
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(loader.calls(), 1);

        // two entries while in flight collapse into one replay
        bounce(&viewport);
        bounce(&viewport);
        settle().await;
        assert_eq!(loader.calls(), 1);

        gate();
        settle().await;
        assert_eq!(loader.calls(), 2);
        assert!(trigger.guard.is_in_flight());

        gate();
        settle().await;
        assert!(!trigger.guard.is_in_flight());
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_still_honors_interval() {
        let loader = Arc::new(CountingLoader::gated());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(loader.calls(), 1);

        bounce(&viewport);
        settle().await;
        loader.gate.as_ref().unwrap().notify_one();
        settle().await;
        assert!(!trigger.guard.is_in_flight());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_drops_pending_replay() {
        let loader = Arc::new(CountingLoader::gated());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(
            Arc::clone(&loader),
            TriggerConfig {
                min_interval: Duration::ZERO,
                ..config()
            },
        );
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        bounce(&viewport);
        settle().await;

        trigger.detach();
        loader.gate.as_ref().unwrap().notify_one();
        settle().await;
        assert!(!trigger.guard.is_in_flight());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_observation_without_more_pages() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(
            Arc::clone(&loader),
            TriggerConfig {
                has_more: false,
                ..config()
            },
        );
        trigger.attach(viewport.clone(), sentinel);
        settle().await;

        assert!(!trigger.is_observing());
        assert_eq!(viewport.observer_count(), 0);
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_more_false_stops_observation() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(viewport.observer_count(), 1);

        trigger.sync_with(&FeedState {
            has_more: false,
            ..FeedState::default()
        });
        settle().await;
        assert!(!trigger.is_observing());
        assert_eq!(viewport.observer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_sentinel_ends_observation() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert!(trigger.is_observing());

        viewport.remove_sentinel(sentinel);
        settle().await;
        assert!(!trigger.is_observing());
        assert_eq!(viewport.observer_count(), 0);
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_blocks_invocation() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(
            Arc::clone(&loader),
            TriggerConfig {
                loading: true,
                ..config()
            },
        );
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(loader.calls(), 0);

        // reconfiguring re-observes and reports the still-visible sentinel
        trigger.configure(config());
        settle().await;
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_and_reattach_replace_observation() {
        let loader = Arc::new(CountingLoader::default());
        let (viewport, sentinel) = visible_sentinel();
        let mut trigger = LoadMoreTrigger::new(Arc::clone(&loader), config());

        trigger.attach(viewport.clone(), sentinel);
        trigger.attach(viewport.clone(), sentinel);
        settle().await;
        assert_eq!(viewport.observer_count(), 1);

        trigger.detach();
        settle().await;
        assert!(!trigger.is_observing());
        assert_eq!(viewport.observer_count(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        bounce(&viewport);
        settle().await;
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_reports_skip_reasons() {
        let guard = InvocationGuard::new();
        let loader = CountingLoader::default();

        let no_more = TriggerConfig {
            has_more: false,
            ..config()
        };
        assert_eq!(
            guard.invoke(&no_more, &loader).await,
            Invocation::Skipped(Skip::NoMorePages)
        );

        let loading = TriggerConfig {
            loading: true,
            ..config()
        };
        assert_eq!(
            guard.invoke(&loading, &loader).await,
            Invocation::Skipped(Skip::Loading)
        );

        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Invoked(Ok(()))
        );
        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Skipped(Skip::TooSoon)
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Invoked(Ok(()))
        );
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_started_keeps_interval() {
        let guard = InvocationGuard::new();
        let loader = CountingLoader::default();

        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Invoked(Ok(()))
        );
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(
            guard.invoke(&config(), &IdleLoader).await,
            Invocation::NotStarted
        );

        // the idle call did not restart the interval
        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Invoked(Ok(()))
        );
        assert_eq!(
            guard.invoke(&config(), &loader).await,
            Invocation::Skipped(Skip::TooSoon)
        );
        assert_eq!(loader.calls(), 2);
    }

    #[test]
    fn test_config_from_feed_state() {
        use crate::feed::Phase;

        let state = FeedState {
            phase: Phase::LoadingMore,
            has_more: true,
            ..FeedState::default()
        };
        let config = TriggerConfig::default().with_feed_state(&state);
        assert!(config.has_more);
        assert!(config.loading);
        assert_eq!(config.min_interval, DEFAULT_MIN_INTERVAL);
    }
}
