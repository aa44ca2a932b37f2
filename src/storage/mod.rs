//! Multi-resolution point storage.
//!
//! Three layers:
//! - **IntervalCache**: sorted, non-overlapping records for one stream at one resolution
//! - **DataCache**: stream → resolution → IntervalCache, plus the point counters
//! - **memory**: threshold-driven eviction across the whole DataCache

pub mod data_cache;
pub mod interval_cache;
pub mod memory;
pub mod types;

pub use data_cache::DataCache;
pub use interval_cache::{Gap, GapCoverage, IntervalCache};
pub use memory::{limit_memory, EvictionReport, EvictionStage, MemoryLimits};
pub use types::{CacheRecord, CacheStats, LoadedCounters, PointDelta};
