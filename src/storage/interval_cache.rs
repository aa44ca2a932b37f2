//! Sorted, non-overlapping interval cache for one (stream, resolution) tier.
//!
//! Records are ordered by start time and satisfy
//! `records[i].end_ms <= records[i + 1].start_ms`. A query boundary that
//! lands exactly on a record edge belongs to that record, so touching
//! records are always coalesced by [`IntervalCache::merge`].

use super::types::{CacheRecord, PointDelta};
use crate::types::{DataPoint, Pwe};
use log::debug;
use std::ops::Range;

/// A missing sub-interval of a query, `[start_ms, end_ms)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Where a query lands relative to the existing records.
///
/// `records` is the run of records the query overlaps (possibly empty when
/// the query falls entirely between two records, or the cache is empty).
/// `starts_before` is set when the query start is not inside the first
/// record of the run; `ends_after` likewise for the query end and the last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GapCoverage {
    pub records: Range<usize>,
    pub starts_before: bool,
    pub ends_after: bool,
}

impl GapCoverage {
    /// True when a single existing record already spans the whole query.
    pub fn is_covered(&self) -> bool {
        self.records.len() == 1 && !self.starts_before && !self.ends_after
    }

    /// Number of network requests needed to fill the query.
    pub fn request_count(&self) -> usize {
        let count = self.records.len() as isize - 1
            + self.starts_before as isize
            + self.ends_after as isize;
        count.max(0) as usize
    }
}

#[derive(Debug)]
pub struct IntervalCache {
    /// Identity of this tier; a recreated tier gets a fresh id
    id: u64,
    records: Vec<CacheRecord>,
}

impl IntervalCache {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            records: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn records(&self) -> &[CacheRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.records.iter().map(CacheRecord::len).sum()
    }

    /// Locate the run of records overlapping `[start_ms, end_ms)`.
    pub fn find_gap_coverage(&self, start_ms: i64, end_ms: i64) -> GapCoverage {
        let end_ms = end_ms.max(start_ms);
        let len = self.records.len();
        if len == 0 {
            return GapCoverage {
                records: 0..0,
                starts_before: true,
                ends_after: true,
            };
        }

        // Last record starting at or before the query start.
        let p = self.records.partition_point(|r| r.start_ms <= start_ms);
        let (first, starts_before) = if p == 0 {
            (0, true)
        } else if start_ms <= self.records[p - 1].end_ms {
            (p - 1, false)
        } else {
            (p, true)
        };

        // First record ending at or after the query end.
        let q = self.records.partition_point(|r| r.end_ms < end_ms);
        let (last_excl, ends_after) = if q == len {
            (len, true)
        } else if end_ms >= self.records[q].start_ms {
            (q + 1, false)
        } else {
            (q, true)
        };

        if last_excl <= first {
            // Zero-length query sitting on a record edge.
            return if !starts_before {
                GapCoverage {
                    records: first..first + 1,
                    starts_before: false,
                    ends_after: false,
                }
            } else if !ends_after {
                GapCoverage {
                    records: last_excl - 1..last_excl,
                    starts_before: false,
                    ends_after: false,
                }
            } else {
                GapCoverage {
                    records: first..first,
                    starts_before: true,
                    ends_after: true,
                }
            };
        }

        GapCoverage {
            records: first..last_excl,
            starts_before,
            ends_after,
        }
    }

    /// The sub-intervals of `[start_ms, end_ms)` not yet cached, in order.
    pub fn gaps(&self, start_ms: i64, end_ms: i64) -> Vec<Gap> {
        let coverage = self.find_gap_coverage(start_ms, end_ms);
        self.gaps_for(&coverage, start_ms, end_ms)
    }

    pub(crate) fn gaps_for(&self, coverage: &GapCoverage, start_ms: i64, end_ms: i64) -> Vec<Gap> {
        let run = &self.records[coverage.records.clone()];
        if run.is_empty() {
            return vec![Gap { start_ms, end_ms }];
        }

        let mut gaps = Vec::with_capacity(coverage.request_count());
        if coverage.starts_before {
            gaps.push(Gap {
                start_ms,
                end_ms: run[0].start_ms,
            });
        }
        for pair in run.windows(2) {
            gaps.push(Gap {
                start_ms: pair[0].end_ms,
                end_ms: pair[1].start_ms,
            });
        }
        if coverage.ends_after {
            gaps.push(Gap {
                start_ms: run[run.len() - 1].end_ms,
                end_ms,
            });
        }
        gaps
    }

    /// The single record spanning `[start_ms, end_ms)`, if there is one.
    pub fn covering(&self, start_ms: i64, end_ms: i64) -> Option<&CacheRecord> {
        let coverage = self.find_gap_coverage(start_ms, end_ms);
        if coverage.is_covered() {
            self.records.get(coverage.records.start)
        } else {
            None
        }
    }

    /// Splice freshly fetched `points` for `[start_ms, end_ms)` into the cache.
    ///
    /// Every record the interval touches is replaced by one record spanning
    /// the union. Points already held by the boundary records win over the
    /// new ones where they overlap, so seam times are never duplicated.
    pub fn merge(&mut self, start_ms: i64, end_ms: i64, mut points: Vec<DataPoint>) -> PointDelta {
        let coverage = self.find_gap_coverage(start_ms, end_ms);
        if coverage.is_covered() {
            return PointDelta::default();
        }
        if start_ms >= end_ms && points.is_empty() {
            return PointDelta::default();
        }

        points.sort_by_key(DataPoint::time_ns);
        points.dedup_by_key(|p| p.time_ns());

        let run = coverage.records.clone();
        let (merged_start, m) = if coverage.starts_before {
            (start_ms, 0)
        } else {
            let first = &self.records[run.start];
            let cut = first.end_ns();
            (first.start_ms, points.partition_point(|p| p.time_ns() < cut))
        };
        let (merged_end, n) = if coverage.ends_after {
            (end_ms, points.len())
        } else {
            let last = &self.records[run.end - 1];
            let cut = last.start_ns();
            (last.end_ms, points.partition_point(|p| p.time_ns() < cut))
        };
        let n = n.max(m);

        let mut removed: Vec<CacheRecord> = self.records.drain(run.clone()).collect();
        let removed_points: usize = removed.iter().map(CacheRecord::len).sum();

        let mut merged = Vec::with_capacity(removed_points + (n - m));
        if !coverage.starts_before {
            merged.append(&mut removed[0].points);
        }
        merged.extend_from_slice(&points[m..n]);
        if !coverage.ends_after {
            let last = removed.len() - 1;
            merged.append(&mut removed[last].points);
        }

        let added = merged.len();
        debug!(
            "merged [{}, {}) over {} record(s) into [{}, {}) with {} points",
            start_ms,
            end_ms,
            removed.len(),
            merged_start,
            merged_end,
            added
        );
        self.records
            .insert(run.start, CacheRecord::new(merged_start, merged_end, merged));
        debug_assert!(self.validate().is_ok(), "{:?}", self.validate());

        PointDelta {
            removed: removed_points,
            added,
        }
    }

    /// Drop every point later than `cutoff_ms` (compared at millisecond
    /// granularity), shortening or removing the records that held them.
    /// Returns the number of points removed.
    pub fn trim(&mut self, cutoff_ms: i64) -> usize {
        let mut removed = 0;
        self.records.retain_mut(|record| {
            if record.start_ms > cutoff_ms {
                removed += record.len();
                return false;
            }
            if record.end_ms > cutoff_ms + 1 {
                let keep = record.points.partition_point(|p| p.time_millis <= cutoff_ms);
                let dropped = record.len() - keep;
                record.points.truncate(keep);
                record.end_ms = cutoff_ms + 1;
                removed += dropped;
                if dropped > 0 && record.points.is_empty() {
                    return false;
                }
            }
            true
        });
        debug_assert!(self.validate().is_ok(), "{:?}", self.validate());
        removed
    }

    /// Remove records that do not touch `[start_ms, end_ms]`.
    pub fn evict_outside(&mut self, start_ms: i64, end_ms: i64) -> usize {
        let mut removed = 0;
        self.records.retain(|record| {
            let keep = record.intersects(start_ms, end_ms);
            if !keep {
                removed += record.len();
            }
            keep
        });
        removed
    }

    /// Shrink each record to the points inside `[start_ms, end_ms]` plus
    /// one point of margin on either side. Returns the number removed.
    pub fn truncate_around(&mut self, start_ms: i64, end_ms: i64) -> usize {
        let mut removed = 0;
        for record in &mut self.records {
            let n = record.len();
            if n == 0 {
                continue;
            }
            let j = record
                .points
                .partition_point(|p| p.time_millis < start_ms)
                .saturating_sub(1);
            let k = (record.points.partition_point(|p| p.time_millis <= end_ms) + 1).min(n);
            if j >= k || (j == 0 && k == n) {
                continue;
            }

            if k < n {
                record.end_ms = record.points[k].time_millis.max(record.start_ms);
            }
            if j > 0 {
                record.start_ms = record.points[j].time_millis.min(record.end_ms);
            }
            record.points.truncate(k);
            record.points.drain(..j);
            removed += n - record.len();
        }
        debug_assert!(self.validate().is_ok(), "{:?}", self.validate());
        removed
    }

    /// Check ordering and non-overlap. Errors describe the first violation.
    pub fn validate(&self) -> Result<(), String> {
        for (i, record) in self.records.iter().enumerate() {
            if record.start_ms > record.end_ms {
                return Err(format!(
                    "record {} ends before it starts: [{}, {})",
                    i, record.start_ms, record.end_ms
                ));
            }
            if i > 0 && self.records[i - 1].end_ms > record.start_ms {
                return Err(format!(
                    "record {} [{}, {}) overlaps record {} [{}, {})",
                    i,
                    record.start_ms,
                    record.end_ms,
                    i - 1,
                    self.records[i - 1].start_ms,
                    self.records[i - 1].end_ms
                ));
            }
            if record.points.windows(2).any(|w| w[0].time_ns() >= w[1].time_ns()) {
                return Err(format!("record {} has unsorted or duplicate points", i));
            }
        }
        Ok(())
    }

    /// Whether every record is free of internal holes at resolution `pwe`.
    pub fn is_contiguous(&self, pwe: Pwe) -> bool {
        let width = 1i64 << pwe;
        let mut contiguous = true;
        for (i, record) in self.records.iter().enumerate() {
            for (di, pair) in record.points.windows(2).enumerate() {
                let step = pair[1].time_ns() - pair[0].time_ns();
                if step != width {
                    debug!(
                        "hole in record {} after point {}: step {} ns, expected {}",
                        i, di, step, width
                    );
                    contiguous = false;
                }
            }
        }
        contiguous
    }
}
