//! Cache invariants under long mixed sequences of merge, trim and eviction.
//!
//! After every operation:
//! - records of every tier are sorted and non-overlapping
//! - the point counters equal the real point totals

use plotcache::storage::{limit_memory, DataCache, MemoryLimits};
use plotcache::types::{DataPoint, Pwe, StreamId, NANOS_PER_MILLI};
use uuid::Uuid;

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next() % (hi - lo) as u64) as i64
    }
}

fn points(start: i64, end: i64, step: i64) -> Vec<DataPoint> {
    let mut out = Vec::new();
    let mut ms = start;
    while ms < end {
        out.push(DataPoint::from_nanos(ms * NANOS_PER_MILLI, 0.0, 0.5, 1.0, 2));
        ms += step;
    }
    out
}

fn fill_gaps(cache: &mut DataCache, stream: StreamId, pwe: Pwe, start: i64, end: i64) {
    let tier = cache.tier_or_create(stream, pwe);
    let id = tier.id();
    for gap in tier.gaps(start, end) {
        cache
            .merge(stream, pwe, id, gap.start_ms, gap.end_ms, points(gap.start_ms, gap.end_ms, 3))
            .unwrap();
    }
}

#[test]
fn test_random_fills_keep_invariants() {
    let mut rng = Lcg(7);
    let streams: Vec<StreamId> = (0..3).map(|_| Uuid::new_v4()).collect();
    let mut cache = DataCache::new();

    for _ in 0..500 {
        let stream = streams[rng.range(0, 3) as usize];
        let pwe = rng.range(8, 12) as Pwe;
        let start = rng.range(0, 10_000);
        let end = start + rng.range(0, 800);
        fill_gaps(&mut cache, stream, pwe, start, end);
        cache.validate().unwrap();

        // The window just filled is now one record.
        if end > start {
            let record = cache.covering(&stream, pwe, start, end).unwrap();
            assert!(record.start_ms <= start && record.end_ms >= end);
        }
    }
}

#[test]
fn test_overlapping_raw_merges_never_duplicate_points() {
    let mut rng = Lcg(11);
    let stream = Uuid::new_v4();
    let mut cache = DataCache::new();
    let id = cache.tier_or_create(stream, 4).id();

    for _ in 0..300 {
        let start = rng.range(0, 5_000);
        let end = start + rng.range(1, 400);
        cache.merge(stream, 4, id, start, end, points(start, end, 1));
        cache.validate().unwrap();
    }

    let tier = cache.tier(&stream, 4).unwrap();
    for record in tier.records() {
        assert!(record
            .points
            .windows(2)
            .all(|w| w[0].time_ns() < w[1].time_ns()));
    }
}

#[test]
fn test_trims_and_evictions_interleaved() {
    let mut rng = Lcg(23);
    let streams: Vec<StreamId> = (0..4).map(|_| Uuid::new_v4()).collect();
    let mut cache = DataCache::new();

    for round in 0..200 {
        let stream = streams[rng.range(0, 4) as usize];
        let pwe = rng.range(5, 9) as Pwe;
        let start = rng.range(0, 20_000);
        fill_gaps(&mut cache, stream, pwe, start, start + rng.range(1, 2_000));
        cache.validate().unwrap();

        match round % 4 {
            0 => {
                cache.trim_stream(&stream, rng.range(0, 20_000));
            }
            1 => {
                let vp_start = rng.range(0, 18_000);
                let selected = &streams[..rng.range(1, 4) as usize];
                let before = cache.loaded_total();
                let report = limit_memory(
                    &mut cache,
                    selected,
                    vp_start,
                    vp_start + 2_000,
                    pwe,
                    MemoryLimits {
                        threshold: 3_000,
                        target: 1_500,
                    },
                );
                assert_eq!(report.points_before, before);
                assert_eq!(report.points_after, cache.loaded_total());
                assert!(report.evicted || before < 3_000);
            }
            2 => {
                cache.remove_tier(&stream, pwe);
            }
            _ => {}
        }
        cache.validate().unwrap();
    }
}

#[test]
fn test_eviction_never_touches_viewport_data() {
    let stream = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut cache = DataCache::new();
    for pwe in [6, 7, 8] {
        fill_gaps(&mut cache, stream, pwe, 0, 3_000);
    }
    fill_gaps(&mut cache, stream, 7, 5_000, 9_000);
    fill_gaps(&mut cache, other, 7, 0, 9_000);

    let before: Vec<DataPoint> = cache
        .covering(&stream, 7, 1_000, 2_000)
        .unwrap()
        .points
        .iter()
        .filter(|p| (1_000..=2_000).contains(&p.time_millis))
        .copied()
        .collect();

    let report = limit_memory(
        &mut cache,
        &[stream],
        1_000,
        2_000,
        7,
        MemoryLimits {
            threshold: 100,
            target: 10,
        },
    );
    assert!(report.evicted);
    cache.validate().unwrap();

    let after = cache.covering(&stream, 7, 1_000, 2_000).unwrap();
    let kept: Vec<DataPoint> = after
        .points
        .iter()
        .filter(|p| (1_000..=2_000).contains(&p.time_millis))
        .copied()
        .collect();
    assert_eq!(before, kept);
    assert!(!cache.contains_stream(&other));
    assert_eq!(cache.tiers(&stream), vec![7]);
}
