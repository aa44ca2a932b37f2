//! Viewport-driven fetching, prefetch and live-end tracking.

pub mod bracket;
pub mod controller;
pub mod prefetch;

pub use bracket::{should_poll, BracketPoller, BracketUpdate};
pub use controller::{RepaintOutcome, ViewportController};
pub use prefetch::{PrefetchRequest, PrefetchStep};
