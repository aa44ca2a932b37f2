//! Stream → resolution → interval cache mapping with point counters.
//!
//! All mutation goes through this type so that [`LoadedCounters`] moves in
//! lock-step with the records it describes.

use super::interval_cache::IntervalCache;
use super::types::{CacheRecord, LoadedCounters, PointDelta};
use crate::types::{DataPoint, Pwe, StreamId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct DataCache {
    streams: HashMap<StreamId, BTreeMap<Pwe, IntervalCache>>,
    counters: LoadedCounters,
    next_tier_id: u64,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    pub fn counters(&self) -> &LoadedCounters {
        &self.counters
    }

    /// Total points cached across every stream and resolution.
    pub fn loaded_total(&self) -> usize {
        self.counters.total
    }

    pub fn loaded_for(&self, stream: &StreamId) -> usize {
        self.counters.for_stream(stream)
    }

    pub fn contains_stream(&self, stream: &StreamId) -> bool {
        self.streams.contains_key(stream)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    /// Resolutions cached for `stream`, ascending.
    pub fn tiers(&self, stream: &StreamId) -> Vec<Pwe> {
        self.streams
            .get(stream)
            .map(|tiers| tiers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn tier(&self, stream: &StreamId, pwe: Pwe) -> Option<&IntervalCache> {
        self.streams.get(stream).and_then(|tiers| tiers.get(&pwe))
    }

    /// Fetch the tier, creating the stream and tier entries if missing.
    pub fn tier_or_create(&mut self, stream: StreamId, pwe: Pwe) -> &IntervalCache {
        let next_id = &mut self.next_tier_id;
        self.counters.per_stream.entry(stream).or_insert(0);
        self.streams
            .entry(stream)
            .or_default()
            .entry(pwe)
            .or_insert_with(|| {
                *next_id += 1;
                IntervalCache::new(*next_id)
            })
    }

    /// Record covering `[start_ms, end_ms)` at `pwe`, if fully cached.
    pub fn covering(
        &self,
        stream: &StreamId,
        pwe: Pwe,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<&CacheRecord> {
        self.tier(stream, pwe)
            .and_then(|tier| tier.covering(start_ms, end_ms))
    }

    /// (tiers, records) across every stream.
    pub fn shape(&self) -> (usize, usize) {
        self.streams
            .values()
            .flat_map(|tiers| tiers.values())
            .fold((0, 0), |(tiers, records), tier| (tiers + 1, records + tier.len()))
    }

    // ============================================================================================
    // MUTATION
    // ============================================================================================

    /// Merge points into the tier identified by `tier_id`.
    ///
    /// Returns `None` when that tier no longer exists (evicted, or evicted
    /// and recreated) so a late response cannot resurrect dropped data.
    pub fn merge(
        &mut self,
        stream: StreamId,
        pwe: Pwe,
        tier_id: u64,
        start_ms: i64,
        end_ms: i64,
        points: Vec<DataPoint>,
    ) -> Option<PointDelta> {
        let tier = self
            .streams
            .get_mut(&stream)
            .and_then(|tiers| tiers.get_mut(&pwe))
            .filter(|tier| tier.id() == tier_id)?;
        let delta = tier.merge(start_ms, end_ms, points);
        self.counters.apply(stream, delta);
        Some(delta)
    }

    /// Trim every resolution of `stream` past `cutoff_ms`.
    pub fn trim_stream(&mut self, stream: &StreamId, cutoff_ms: i64) -> usize {
        let Some(tiers) = self.streams.get_mut(stream) else {
            return 0;
        };
        let removed: usize = tiers.values_mut().map(|tier| tier.trim(cutoff_ms)).sum();
        self.counters.apply(*stream, PointDelta::removed(removed));
        removed
    }

    /// Drop a stream entirely. Returns the number of points released.
    pub fn remove_stream(&mut self, stream: &StreamId) -> usize {
        self.streams.remove(stream);
        self.counters.forget(stream)
    }

    /// Drop one resolution tier of a stream.
    pub fn remove_tier(&mut self, stream: &StreamId, pwe: Pwe) -> usize {
        let removed = self
            .streams
            .get_mut(stream)
            .and_then(|tiers| tiers.remove(&pwe))
            .map(|tier| tier.point_count())
            .unwrap_or(0);
        self.counters.apply(*stream, PointDelta::removed(removed));
        removed
    }

    /// Drop records of one tier that do not touch `[start_ms, end_ms]`.
    pub fn evict_outside(&mut self, stream: &StreamId, pwe: Pwe, start_ms: i64, end_ms: i64) -> usize {
        let removed = self
            .streams
            .get_mut(stream)
            .and_then(|tiers| tiers.get_mut(&pwe))
            .map(|tier| tier.evict_outside(start_ms, end_ms))
            .unwrap_or(0);
        self.counters.apply(*stream, PointDelta::removed(removed));
        removed
    }

    /// Shrink one tier's records to the window plus a point of margin.
    pub fn truncate_around(&mut self, stream: &StreamId, pwe: Pwe, start_ms: i64, end_ms: i64) -> usize {
        let removed = self
            .streams
            .get_mut(stream)
            .and_then(|tiers| tiers.get_mut(&pwe))
            .map(|tier| tier.truncate_around(start_ms, end_ms))
            .unwrap_or(0);
        self.counters.apply(*stream, PointDelta::removed(removed));
        removed
    }

    // ============================================================================================
    // VALIDATION
    // ============================================================================================

    /// Check every tier's ordering invariant and that the counters equal
    /// the real point totals.
    pub fn validate(&self) -> Result<(), String> {
        let mut total = 0;
        for (stream, tiers) in &self.streams {
            let mut stream_total = 0;
            for (pwe, tier) in tiers {
                tier.validate()
                    .map_err(|e| format!("stream {} pwe {}: {}", stream, pwe, e))?;
                stream_total += tier.point_count();
            }
            let counted = self.counters.for_stream(stream);
            if counted != stream_total {
                return Err(format!(
                    "stream {} holds {} points but counter says {}",
                    stream, stream_total, counted
                ));
            }
            total += stream_total;
        }
        if total != self.counters.total {
            return Err(format!(
                "cache holds {} points but total counter says {}",
                total, self.counters.total
            ));
        }
        Ok(())
    }
}
