//! Bounded-memory eviction over the data cache.
//!
//! Once the cache holds more than `threshold` points, data is released in a
//! fixed order until at most `target` remain:
//! 1. streams that are no longer selected,
//! 2. resolution tiers other than the one nearest the viewed resolution,
//!    farthest first and round-robin across streams so that no single
//!    stream loses everything first,
//! 3. records of that nearest tier that lie outside the viewport,
//! 4. points of the remaining records beyond one point of the viewport.
//!
//! Nothing overlapping the viewport is ever released.

use super::data_cache::DataCache;
use crate::types::{Pwe, StreamId};
use log::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLimits {
    pub threshold: usize,
    pub target: usize,
}

/// Last eviction stage that ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvictionStage {
    Streams,
    Tiers,
    Records,
    Points,
}

#[derive(Clone, Debug, Default)]
pub struct EvictionReport {
    pub evicted: bool,
    pub stage: Option<EvictionStage>,
    /// Streams dropped entirely in the first stage
    pub removed_streams: Vec<StreamId>,
    pub points_before: usize,
    pub points_after: usize,
}

/// Reduce the cache below `limits.target` if it is above `limits.threshold`.
///
/// `current_pwe` is the resolution the viewport is drawn at. Per stream the
/// existing tier nearest to it is the last to be touched.
pub fn limit_memory(
    cache: &mut DataCache,
    selected: &[StreamId],
    viewport_start_ms: i64,
    viewport_end_ms: i64,
    current_pwe: Pwe,
    limits: MemoryLimits,
) -> EvictionReport {
    let mut report = EvictionReport {
        points_before: cache.loaded_total(),
        ..Default::default()
    };
    if cache.loaded_total() < limits.threshold {
        report.points_after = report.points_before;
        return report;
    }
    report.evicted = true;

    let target = limits.target;

    // 1. Unselected streams
    for stream in cache.stream_ids() {
        if !selected.contains(&stream) {
            cache.remove_stream(&stream);
            report.removed_streams.push(stream);
        }
    }
    if reached(cache, &mut report, target, EvictionStage::Streams) {
        return finish(report);
    }

    // 2. Other resolution tiers, interleaved across streams. Each stream
    // keeps the existing tier nearest the viewed one.
    let mut queues: Vec<(StreamId, Option<Pwe>, Vec<Pwe>)> = selected
        .iter()
        .map(|stream| {
            let tiers = cache.tiers(stream);
            let kept = nearest_tier(&tiers, current_pwe);
            let others = tiers.into_iter().filter(|pwe| Some(*pwe) != kept).collect();
            (*stream, kept, others)
        })
        .collect();
    while queues.iter().any(|(_, _, others)| !others.is_empty()) {
        for (stream, _, others) in queues.iter_mut() {
            if let Some(pwe) = take_farthest(others, current_pwe) {
                cache.remove_tier(stream, pwe);
            }
        }
        if reached(cache, &mut report, target, EvictionStage::Tiers) {
            return finish(report);
        }
    }
    let kept: Vec<(StreamId, Pwe)> = queues
        .into_iter()
        .filter_map(|(stream, kept, _)| kept.map(|pwe| (stream, pwe)))
        .collect();

    // 3. Off-screen records of the kept tier
    for (stream, pwe) in &kept {
        cache.evict_outside(stream, *pwe, viewport_start_ms, viewport_end_ms);
        if reached(cache, &mut report, target, EvictionStage::Records) {
            return finish(report);
        }
    }

    // 4. Off-screen points of what is left
    for (stream, pwe) in &kept {
        cache.truncate_around(stream, *pwe, viewport_start_ms, viewport_end_ms);
    }
    reached(cache, &mut report, target, EvictionStage::Points);
    finish(report)
}

/// Existing tier closest to `current_pwe`; the finer one wins a tie.
fn nearest_tier(tiers: &[Pwe], current_pwe: Pwe) -> Option<Pwe> {
    tiers.iter().copied().min_by_key(|pwe| pwe.abs_diff(current_pwe))
}

/// Remove and return whichever end of the sorted `tiers` lies further from
/// `current_pwe`.
fn take_farthest(tiers: &mut Vec<Pwe>, current_pwe: Pwe) -> Option<Pwe> {
    let first = *tiers.first()?;
    let last = *tiers.last()?;
    if first.abs_diff(current_pwe) > last.abs_diff(current_pwe) {
        Some(tiers.remove(0))
    } else {
        tiers.pop()
    }
}

fn reached(cache: &DataCache, report: &mut EvictionReport, target: usize, stage: EvictionStage) -> bool {
    report.stage = Some(stage);
    report.points_after = cache.loaded_total();
    cache.loaded_total() <= target
}

fn finish(report: EvictionReport) -> EvictionReport {
    info!(
        "memory limit: {} -> {} points (stage {:?}, {} stream(s) dropped)",
        report.points_before,
        report.points_after,
        report.stage,
        report.removed_streams.len()
    );
    report
}
