//! Core value types shared by every layer of the cache engine.
//!
//! Times on the cache side are expressed in milliseconds since the UNIX
//! epoch (UTC); the backend speaks nanoseconds. A point carries both halves
//! so that no precision is lost when it is re-emitted to the renderer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one time series.
pub type StreamId = Uuid;

/// Point-width exponent: consecutive points are nominally `2^pwe` ns apart.
pub type Pwe = u8;

/// Viewport fetch cycle identifier, see [`crate::session::PlotSession::next_generation`].
pub type Generation = u64;

pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Highest exponent the backend accepts at all.
pub const PWE_MAX: Pwe = 63;

/// One statistical point returned by the backend.
///
/// `count == 1` marks a raw sample; anything larger is an aggregate over
/// the `2^pwe` ns bucket starting at the point's time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time_millis: i64,
    /// Sub-millisecond remainder, always in `0..1_000_000`.
    pub time_nanos: u32,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub count: u64,
}

impl DataPoint {
    /// Build a point from an absolute nanosecond timestamp.
    pub fn from_nanos(time_ns: i64, min: f64, mean: f64, max: f64, count: u64) -> Self {
        let (millis, nanos) = split_nanos(time_ns);
        Self {
            time_millis: millis,
            time_nanos: nanos,
            min,
            mean,
            max,
            count,
        }
    }

    /// Absolute timestamp in nanoseconds.
    #[inline]
    pub fn time_ns(&self) -> i64 {
        self.time_millis * NANOS_PER_MILLI + self.time_nanos as i64
    }

    /// Whether this is a single raw sample rather than an aggregate bucket.
    #[inline]
    pub fn is_raw(&self) -> bool {
        self.count == 1
    }
}

/// Split nanoseconds into (millis, remainder) with a non-negative remainder.
pub fn split_nanos(time_ns: i64) -> (i64, u32) {
    let millis = time_ns.div_euclid(NANOS_PER_MILLI);
    let nanos = time_ns.rem_euclid(NANOS_PER_MILLI) as u32;
    (millis, nanos)
}

/// Half of a point width, minus one nanosecond.
///
/// The backend returns every bucket that merely touches the query window;
/// shrinking the window by this much on both sides makes the returned
/// buckets' midpoints land inside the window that was asked for.
#[inline]
pub fn half_width_nanos(pwe: Pwe) -> i64 {
    if pwe == 0 {
        0
    } else {
        (1i64 << (pwe - 1)) - 1
    }
}

/// Resolution that puts roughly one point under each pixel:
/// `round(log2(duration_ns / pixel_width))`, floored at zero.
pub fn pwe_for_width(duration_ms: f64, pixel_width: f64) -> Pwe {
    if !(duration_ms > 0.0) || !(pixel_width > 0.0) {
        return 0;
    }
    let nanos_per_pixel = duration_ms * NANOS_PER_MILLI as f64 / pixel_width;
    if nanos_per_pixel <= 1.0 {
        return 0;
    }
    let exp = nanos_per_pixel.log2().round();
    exp.min(PWE_MAX as f64) as Pwe
}

/// The visible window, in milliseconds, together with the pixel width it
/// is drawn into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub start_ms: i64,
    pub end_ms: i64,
    pub pixel_width: f64,
}

impl Viewport {
    pub fn new(start_ms: i64, end_ms: i64, pixel_width: f64) -> Self {
        Self {
            start_ms,
            end_ms,
            pixel_width,
        }
    }

    #[inline]
    pub fn width_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Target resolution before clamping to the configured ceiling.
    pub fn pwe(&self) -> Pwe {
        pwe_for_width(self.width_ms() as f64, self.pixel_width)
    }

    /// Whether `[start_ms, end_ms]` touches this window.
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        start_ms <= self.end_ms && end_ms >= self.start_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_nanos_negative_time() {
        assert_eq!(split_nanos(-1), (-1, 999_999));
        assert_eq!(split_nanos(2_000_001), (2, 1));
    }

    #[test]
    fn test_point_time_roundtrip() {
        let p = DataPoint::from_nanos(1_500_000_123, 1.0, 2.0, 3.0, 4);
        assert_eq!(p.time_millis, 1500);
        assert_eq!(p.time_nanos, 123);
        assert_eq!(p.time_ns(), 1_500_000_123);
        assert!(!p.is_raw());
    }

    #[test]
    fn test_half_width() {
        assert_eq!(half_width_nanos(0), 0);
        assert_eq!(half_width_nanos(1), 0);
        assert_eq!(half_width_nanos(10), 511);
    }

    #[test]
    fn test_pwe_for_width() {
        // 1024 ms over 1000 px is ~1.05 ms per pixel: log2(1_048_576) = 20
        assert_eq!(pwe_for_width(1024.0, 1000.0), 20);
        assert_eq!(pwe_for_width(0.0, 1000.0), 0);
        assert_eq!(pwe_for_width(1.0, 1_000_000_000.0), 0);
    }

    #[test]
    fn test_viewport_overlap() {
        let v = Viewport::new(100, 200, 10.0);
        assert!(v.overlaps(50, 100));
        assert!(v.overlaps(200, 300));
        assert!(!v.overlaps(201, 300));
        assert_eq!(v.width_ms(), 100);
    }
}
