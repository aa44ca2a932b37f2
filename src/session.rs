//! Per-viewer shared state.
//!
//! One [`PlotSession`] is created per plot and shared as `Arc<PlotSession>`
//! between the fetcher, scheduled jobs, the viewport controller and the
//! bracket poller. The cache and its point counters live behind a single
//! lock so a mutation can never update one without the other.

use crate::config::PlotterConfig;
use crate::service::StreamSnapshot;
use crate::storage::{limit_memory, CacheStats, DataCache, EvictionReport, MemoryLimits};
use crate::types::{Generation, Pwe, StreamId, Viewport};
use log::{debug, info};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of recording a freshly polled stream end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BracketChange {
    /// No end was known before
    First,
    Unchanged,
    /// The end moved forward; data past `previous_ms` was dropped
    Advanced { previous_ms: i64, trimmed: usize },
    /// The end moved backwards; data past the new end was dropped
    Retreated { previous_ms: i64, trimmed: usize },
}

pub struct PlotSession {
    config: PlotterConfig,
    cache: RwLock<DataCache>,
    last_known_end: RwLock<HashMap<StreamId, i64>>,
    generation: AtomicU64,

    cache_hits: AtomicU64,
    requests_issued: AtomicU64,
    requests_failed: AtomicU64,
    evictions: AtomicU64,
}

impl PlotSession {
    pub fn new(config: PlotterConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(DataCache::new()),
            last_known_end: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            requests_issued: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PlotterConfig {
        &self.config
    }

    /// Shared read access to the cache. Do not hold across an `.await`.
    pub fn cache(&self) -> RwLockReadGuard<'_, DataCache> {
        self.cache.read()
    }

    /// Exclusive access to the cache. Do not hold across an `.await`.
    pub fn cache_mut(&self) -> RwLockWriteGuard<'_, DataCache> {
        self.cache.write()
    }

    // ============================================================================================
    // GENERATIONS
    // ============================================================================================

    /// Start a new fetch cycle and return its tag.
    ///
    /// Wraps to zero past `generation_wrap`.
    pub fn next_generation(&self) -> Generation {
        let wrap = self.config.generation_wrap;
        let step = |g: Generation| if g >= wrap { 0 } else { g + 1 };
        let prev = self
            .generation
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |g| Some(step(g)))
            .unwrap_or_else(|g| g);
        step(prev)
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current_generation() == generation
    }

    // ============================================================================================
    // STREAM ENDS
    // ============================================================================================

    pub fn last_known_end(&self, stream: &StreamId) -> Option<i64> {
        self.last_known_end.read().get(stream).copied()
    }

    /// Record the latest end reported by the backend for `stream`.
    ///
    /// When the end moves, every resolution of the stream is trimmed at the
    /// older of the two ends: the final bucket before an advance may have
    /// been partial, and anything past a retreat no longer exists upstream.
    pub fn record_bracket_end(&self, stream: StreamId, end_ms: i64) -> BracketChange {
        let previous = self.last_known_end.write().insert(stream, end_ms);
        match previous {
            None => BracketChange::First,
            Some(prev) if prev == end_ms => BracketChange::Unchanged,
            Some(prev) => {
                let cutoff = prev.min(end_ms);
                let trimmed = self.cache.write().trim_stream(&stream, cutoff);
                debug!(
                    "stream {} end moved {} -> {}, trimmed {} points",
                    stream, prev, end_ms, trimmed
                );
                if prev < end_ms {
                    BracketChange::Advanced {
                        previous_ms: prev,
                        trimmed,
                    }
                } else {
                    BracketChange::Retreated {
                        previous_ms: prev,
                        trimmed,
                    }
                }
            }
        }
    }

    // ============================================================================================
    // READ PATH
    // ============================================================================================

    /// The cached record spanning `[start_ms, end_ms)` at `pwe`, if any.
    pub fn snapshot(
        &self,
        stream: StreamId,
        pwe: Pwe,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<StreamSnapshot> {
        self.cache
            .read()
            .covering(&stream, pwe, start_ms, end_ms)
            .map(|record| StreamSnapshot::from_record(stream, pwe, record))
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        let (tiers, records) = cache.shape();
        CacheStats {
            total_points: cache.loaded_total(),
            streams: cache.stream_ids().len(),
            tiers,
            records,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.cache.read().validate()
    }

    // ============================================================================================
    // EVICTION
    // ============================================================================================

    /// Apply the memory limiter for the given selection and viewport.
    ///
    /// Limits scale with the number of selected streams. Streams evicted
    /// entirely also lose their recorded end.
    pub fn limit_memory(&self, selected: &[StreamId], viewport: &Viewport, pwe: Pwe) -> EvictionReport {
        let (threshold, target) = self.config.memory_limits(selected.len());
        let report = limit_memory(
            &mut self.cache.write(),
            selected,
            viewport.start_ms,
            viewport.end_ms,
            pwe,
            MemoryLimits { threshold, target },
        );

        if report.evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            if !report.removed_streams.is_empty() {
                let mut ends = self.last_known_end.write();
                for stream in &report.removed_streams {
                    ends.remove(stream);
                }
                info!("forgot {} unselected stream(s)", report.removed_streams.len());
            }
        }
        report
    }

    // ============================================================================================
    // COUNTERS
    // ============================================================================================

    pub(crate) fn note_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_request(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }
}
