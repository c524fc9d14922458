//! Visibility reporting for load-more sentinels.
//!
//! [`Viewport`] is the seam between the feed and whatever knows where things
//! are on screen. [`ScrollViewport`] is an in-memory scroll model used by the
//! terminal binary and by tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

/// Identifies one sentinel within a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentinelId(pub u64);

/// How an observation decides "intersecting".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserveOptions {
    /// Distance by which the visible area is grown on every side, so the
    /// sentinel counts as visible before it actually scrolls into view.
    pub root_margin_px: f64,
    /// Fraction of the sentinel (0.0 to 1.0) that must be inside the grown area.
    pub threshold: f64,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            root_margin_px: 200.0,
            threshold: 0.1,
        }
    }
}

/// One visibility report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityEntry {
    pub sentinel: SentinelId,
    pub is_intersecting: bool,
    /// Visible fraction of the sentinel within the grown area.
    pub ratio: f64,
}

/// Something that can report sentinel visibility.
pub trait Viewport: Send + Sync {
    /// Start observing `sentinel`.
    ///
    /// The receiver gets the current visibility right away (once the sentinel
    /// exists) and then one entry per change of `is_intersecting`. Dropping
    /// the receiver ends the observation.
    fn observe(
        &self,
        sentinel: SentinelId,
        options: ObserveOptions,
    ) -> mpsc::UnboundedReceiver<VisibilityEntry>;
}

#[derive(Debug, Clone, Copy)]
struct Span {
    top: f64,
    height: f64,
}

struct Observer {
    sentinel: SentinelId,
    options: ObserveOptions,
    last: Option<bool>,
    tx: mpsc::UnboundedSender<VisibilityEntry>,
}

struct Layout {
    height: f64,
    offset: f64,
    content_height: f64,
    sentinels: HashMap<SentinelId, Span>,
    observers: Vec<Observer>,
    next_id: u64,
}

impl Layout {
    fn max_offset(&self) -> f64 {
        (self.content_height - self.height).max(0.0)
    }

    fn measure(
        &self,
        sentinel: SentinelId,
        span: Span,
        options: ObserveOptions,
    ) -> VisibilityEntry {
        let margin = options.root_margin_px.max(0.0);
        let root_top = self.offset - margin;
        let root_bottom = self.offset + self.height + margin;
        let bottom = span.top + span.height;

        let ratio = if span.height <= 0.0 {
            if span.top >= root_top && span.top <= root_bottom {
                1.0
            } else {
                0.0
            }
        } else {
            let overlap = bottom.min(root_bottom) - span.top.max(root_top);
            (overlap / span.height).clamp(0.0, 1.0)
        };
        let threshold = options.threshold.clamp(0.0, 1.0);

        VisibilityEntry {
            sentinel,
            is_intersecting: ratio > 0.0 && ratio >= threshold,
            ratio,
        }
    }

    /// Send an entry to every observer whose intersection state changed.
    fn notify(&mut self) {
        let mut observers = std::mem::take(&mut self.observers);
        observers.retain_mut(|observer| {
            if observer.tx.is_closed() {
                return false;
            }
            let Some(span) = self.sentinels.get(&observer.sentinel).copied() else {
                return true;
            };
            let entry = self.measure(observer.sentinel, span, observer.options);
            if observer.last == Some(entry.is_intersecting) {
                return true;
            }
            observer.last = Some(entry.is_intersecting);
            observer.tx.send(entry).is_ok()
        });
        self.observers = observers;
    }
}

/// A vertical scroll container with a fixed-height window.
///
/// Coordinates are in arbitrary units (pixels in a browser, rows in a
/// terminal). The scroll offset is clamped to `0..=content_height - height`.
pub struct ScrollViewport {
    layout: Mutex<Layout>,
}

impl ScrollViewport {
    pub fn new(height: f64) -> Self {
        Self {
            layout: Mutex::new(Layout {
                height: height.max(0.0),
                offset: 0.0,
                content_height: 0.0,
                sentinels: HashMap::new(),
                observers: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Layout> {
        self.layout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sentinel at `top` with the given height.
    pub fn add_sentinel(&self, top: f64, height: f64) -> SentinelId {
        let mut layout = self.lock();
        let id = SentinelId(layout.next_id);
        layout.next_id += 1;
        layout.sentinels.insert(
            id,
            Span {
                top,
                height: height.max(0.0),
            },
        );
        layout.notify();
        id
    }

    /// Move a sentinel. Unknown ids are ignored.
    pub fn move_sentinel(&self, id: SentinelId, top: f64) {
        let mut layout = self.lock();
        if let Some(span) = layout.sentinels.get_mut(&id) {
            span.top = top;
            layout.notify();
        }
    }

    /// Remove a sentinel. Its observers are dropped, closing their receivers.
    pub fn remove_sentinel(&self, id: SentinelId) {
        let mut layout = self.lock();
        layout.sentinels.remove(&id);
        layout.observers.retain(|o| o.sentinel != id);
    }

    /// Change the scrollable height, clamping the current offset.
    pub fn set_content_height(&self, content_height: f64) {
        let mut layout = self.lock();
        layout.content_height = content_height.max(0.0);
        layout.offset = layout.offset.min(layout.max_offset());
        layout.notify();
    }

    pub fn scroll_to(&self, offset: f64) {
        let mut layout = self.lock();
        layout.offset = offset.clamp(0.0, layout.max_offset());
        layout.notify();
    }

    pub fn scroll_by(&self, delta: f64) {
        let offset = self.offset() + delta;
        self.scroll_to(offset);
    }

    pub fn scroll_to_bottom(&self) {
        let mut layout = self.lock();
        layout.offset = layout.max_offset();
        layout.notify();
    }

    pub fn offset(&self) -> f64 {
        self.lock().offset
    }

    /// Number of live observations. Closed receivers are pruned on the next
    /// layout change.
    pub fn observer_count(&self) -> usize {
        self.lock()
            .observers
            .iter()
            .filter(|o| !o.tx.is_closed())
            .count()
    }
}

impl Viewport for ScrollViewport {
    fn observe(
        &self,
        sentinel: SentinelId,
        options: ObserveOptions,
    ) -> mpsc::UnboundedReceiver<VisibilityEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut layout = self.lock();
        layout.observers.push(Observer {
            sentinel,
            options,
            last: None,
            tx,
        });
        layout.notify();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(root_margin_px: f64, threshold: f64) -> ObserveOptions {
        ObserveOptions {
            root_margin_px,
            threshold,
        }
    }

    /// Window of 100 over 1000 of content, sentinel at the very end.
    fn long_page() -> (ScrollViewport, SentinelId) {
        let viewport = ScrollViewport::new(100.0);
        viewport.set_content_height(1000.0);
        let sentinel = viewport.add_sentinel(999.0, 1.0);
        (viewport, sentinel)
    }

    #[test]
    fn test_initial_entry_reports_current_state() {
        let (viewport, sentinel) = long_page();
        let mut rx = viewport.observe(sentinel, options(0.0, 0.0));

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.sentinel, sentinel);
        assert!(!entry.is_intersecting);
        assert_eq!(entry.ratio, 0.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scrolling_into_view_emits_transition() {
        let (viewport, sentinel) = long_page();
        let mut rx = viewport.observe(sentinel, options(0.0, 0.0));
        let _ = rx.try_recv();

        viewport.scroll_to(500.0);
        assert!(rx.try_recv().is_err());

        viewport.scroll_to_bottom();
        assert_eq!(viewport.offset(), 900.0);
        let entry = rx.try_recv().unwrap();
        assert!(entry.is_intersecting);
        assert_eq!(entry.ratio, 1.0);

        // no repeat while still intersecting
        viewport.scroll_by(-0.5);
        assert!(rx.try_recv().is_err());

        viewport.scroll_to(0.0);
        assert!(!rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_root_margin_triggers_early() {
        let (viewport, sentinel) = long_page();
        let mut rx = viewport.observe(sentinel, options(200.0, 0.0));
        assert!(!rx.try_recv().unwrap().is_intersecting);

        // window bottom at 800, grown to 1000
        viewport.scroll_to(700.0);
        assert!(rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_threshold_requires_fraction_visible() {
        let viewport = ScrollViewport::new(100.0);
        viewport.set_content_height(1000.0);
        let sentinel = viewport.add_sentinel(190.0, 20.0);
        let mut rx = viewport.observe(sentinel, options(0.0, 0.6));
        let _ = rx.try_recv();

        // window 0..200 shows 10 of 20
        viewport.scroll_to(100.0);
        assert!(rx.try_recv().is_err());

        // window 5..205 shows 15 of 20
        viewport.scroll_to(105.0);
        let entry = rx.try_recv().unwrap();
        assert!(entry.is_intersecting);
        assert_eq!(entry.ratio, 0.75);
    }

    #[test]
    fn test_zero_height_sentinel() {
        let viewport = ScrollViewport::new(100.0);
        viewport.set_content_height(300.0);
        let sentinel = viewport.add_sentinel(300.0, 0.0);
        let mut rx = viewport.observe(sentinel, options(0.0, 0.1));
        assert!(!rx.try_recv().unwrap().is_intersecting);

        viewport.scroll_to_bottom();
        assert!(rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_moving_sentinel_after_content_grows() {
        let viewport = ScrollViewport::new(100.0);
        viewport.set_content_height(200.0);
        let sentinel = viewport.add_sentinel(199.0, 1.0);
        viewport.scroll_to_bottom();
        let mut rx = viewport.observe(sentinel, options(0.0, 0.0));
        assert!(rx.try_recv().unwrap().is_intersecting);

        viewport.set_content_height(400.0);
        viewport.move_sentinel(sentinel, 399.0);
        assert!(!rx.try_recv().unwrap().is_intersecting);

        viewport.scroll_to_bottom();
        assert!(rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_unknown_sentinel_reports_once_added() {
        let viewport = ScrollViewport::new(100.0);
        let mut rx = viewport.observe(SentinelId(1), options(0.0, 0.0));
        assert!(rx.try_recv().is_err());

        let id = viewport.add_sentinel(10.0, 1.0);
        assert_eq!(id, SentinelId(1));
        assert!(rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let (viewport, sentinel) = long_page();
        let rx = viewport.observe(sentinel, ObserveOptions::default());
        assert_eq!(viewport.observer_count(), 1);

        drop(rx);
        assert_eq!(viewport.observer_count(), 0);
        viewport.scroll_to_bottom();
        assert_eq!(viewport.lock().observers.len(), 0);
    }

    #[test]
    fn test_remove_sentinel_closes_observers() {
        use tokio::sync::mpsc::error::TryRecvError;

        let (viewport, sentinel) = long_page();
        let other = viewport.add_sentinel(0.0, 1.0);
        let mut rx = viewport.observe(sentinel, options(0.0, 0.0));
        let mut other_rx = viewport.observe(other, options(0.0, 0.0));
        let _ = rx.try_recv();
        assert!(other_rx.try_recv().unwrap().is_intersecting);

        viewport.remove_sentinel(sentinel);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(viewport.observer_count(), 1);

        // later layout changes only reach the remaining sentinel
        viewport.scroll_to_bottom();
        viewport.move_sentinel(sentinel, 10.0);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert!(!other_rx.try_recv().unwrap().is_intersecting);
    }

    #[test]
    fn test_scroll_clamped_to_content() {
        let viewport = ScrollViewport::new(100.0);
        viewport.set_content_height(50.0);
        viewport.scroll_to(30.0);
        assert_eq!(viewport.offset(), 0.0);

        viewport.set_content_height(500.0);
        viewport.scroll_by(1000.0);
        assert_eq!(viewport.offset(), 400.0);

        viewport.set_content_height(250.0);
        assert_eq!(viewport.offset(), 150.0);
    }
}
