//! Photo feed state, pagination and cancellation.
//!
//! - [`state`]: the [`FeedState`] snapshot and its [`Phase`]
//! - [`reducer`]: [`reduce`], the only function that produces a new state
//! - [`controller`]: [`FeedController`], which calls the provider and drops
//!   results of superseded requests
//! - [`trigger`]: [`LoadMoreTrigger`], which turns sentinel visibility into
//!   throttled load-more calls
//!
//! # Example
//!
//! ```ignore
//! let controller = Arc::new(FeedController::new(provider));
//! controller.fetch("mountains");
//!
//! let mut trigger = LoadMoreTrigger::new(Arc::clone(&controller), TriggerConfig::default());
//! trigger.attach(viewport, sentinel);
//! ```

pub mod controller;
mod error;
pub mod reducer;
pub mod state;
pub mod trigger;

pub use controller::{FeedController, DEFAULT_PER_PAGE};
pub use error::{ErrorKind, FeedError};
pub use reducer::{reduce, FeedAction};
pub use state::{FeedState, Phase};
pub use trigger::{
    Invocation, InvocationGuard, LoadMoreTrigger, PageLoader, Skip, TriggerConfig,
    DEFAULT_MIN_INTERVAL,
};
