//! Storage data structures.
//!
//! Defines the cache record and the bookkeeping types shared by the
//! interval cache, the per-stream cache and the memory limiter.

use crate::types::{DataPoint, StreamId, NANOS_PER_MILLI};
use std::collections::HashMap;

/// A contiguous run of points covering `[start_ms, end_ms)` at one resolution.
///
/// An empty `points` vector is meaningful: the backend had no data there.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub start_ms: i64,
    pub end_ms: i64,
    /// Sorted by time, strictly increasing
    pub points: Vec<DataPoint>,
}

impl CacheRecord {
    pub fn new(start_ms: i64, end_ms: i64, points: Vec<DataPoint>) -> Self {
        Self {
            start_ms,
            end_ms,
            points,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the record touches the closed window `[start_ms, end_ms]`.
    #[inline]
    pub fn intersects(&self, start_ms: i64, end_ms: i64) -> bool {
        self.start_ms <= end_ms && self.end_ms >= start_ms
    }

    #[inline]
    pub(crate) fn start_ns(&self) -> i64 {
        self.start_ms * NANOS_PER_MILLI
    }

    #[inline]
    pub(crate) fn end_ns(&self) -> i64 {
        self.end_ms * NANOS_PER_MILLI
    }
}

/// Point count change produced by one cache mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointDelta {
    pub removed: usize,
    pub added: usize,
}

impl PointDelta {
    pub fn removed(count: usize) -> Self {
        Self {
            removed: count,
            added: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.added == 0
    }
}

/// Running point totals, kept in lock-step with every cache mutation.
///
/// Only used for eviction decisions, but a mismatch with the real cache
/// contents is a bug: see [`crate::storage::DataCache::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadedCounters {
    pub total: usize,
    pub per_stream: HashMap<StreamId, usize>,
}

impl LoadedCounters {
    pub fn for_stream(&self, stream: &StreamId) -> usize {
        self.per_stream.get(stream).copied().unwrap_or(0)
    }

    pub(crate) fn apply(&mut self, stream: StreamId, delta: PointDelta) {
        let entry = self.per_stream.entry(stream).or_insert(0);
        debug_assert!(*entry >= delta.removed, "per-stream counter underflow");
        debug_assert!(self.total >= delta.removed, "total counter underflow");
        *entry = *entry + delta.added - delta.removed;
        self.total = self.total + delta.added - delta.removed;
    }

    pub(crate) fn forget(&mut self, stream: &StreamId) -> usize {
        let count = self.per_stream.remove(stream).unwrap_or(0);
        self.total -= count;
        count
    }
}

/// Snapshot of cache occupancy and fetch activity.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Points held across every stream and resolution
    pub total_points: usize,
    /// Streams with at least one resolution tier
    pub streams: usize,
    /// Resolution tiers across all streams
    pub tiers: usize,
    /// Cache records across all tiers
    pub records: usize,
    /// `ensure_data` calls answered without touching the network
    pub cache_hits: u64,
    /// Gap requests handed to the scheduler
    pub requests_issued: u64,
    /// Gap requests that failed or returned garbage
    pub requests_failed: u64,
    /// `limit_memory` calls that removed something
    pub evictions: u64,
}
