//! # plotcache
//!
//! Multi-resolution time-series cache and viewport-driven fetch engine for
//! interactive plotting.
//!
//! Given a visible time window and a pixel width, the engine works out which
//! cached data can serve the view, fetches only the missing gaps from the
//! backend, merges them into a sorted non-overlapping cache per stream and
//! resolution, prefetches neighbouring ranges and resolutions, and keeps the
//! total point count bounded.
//!
//! ```text
//! ViewportController ──► Fetcher ──► IntervalCache (gaps)
//!        │                  │
//!        │                  └──► RequestScheduler ──► DataService
//!        │                                               │
//!        └──◄── RenderSink ◄── merge into DataCache ◄────┘
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod service;
pub mod session;
pub mod storage;
pub mod types;
pub mod viewport;

pub use config::{PlotterConfig, ServiceConfig};
pub use error::{ConfigError, FetchError};
pub use fetch::{Fetcher, RequestScheduler, StreamData};
pub use service::{
    Bracket, DataService, HttpDataService, RenderSink, StreamSnapshot, StreamStatus,
};
pub use session::{BracketChange, PlotSession};
pub use storage::{CacheRecord, CacheStats, DataCache, IntervalCache};
pub use types::{DataPoint, Generation, Pwe, StreamId, Viewport};
pub use viewport::{RepaintOutcome, ViewportController};
