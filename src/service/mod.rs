//! Interfaces to the external time-series backend and renderer.
//!
//! The engine only ever talks to these traits; [`HttpDataService`] is the
//! production implementation and tests substitute in-memory mocks.

pub mod http;
pub mod wire;

pub use http::HttpDataService;

use crate::error::FetchError;
use crate::storage::CacheRecord;
use crate::types::{DataPoint, Generation, Pwe, StreamId, NANOS_PER_MILLI};
use async_trait::async_trait;
use std::collections::HashMap;

/// Earliest and latest timestamps the backend holds for one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bracket {
    pub earliest_ns: i64,
    pub latest_ns: i64,
}

impl Bracket {
    /// Latest time, floored to milliseconds.
    pub fn latest_ms(&self) -> i64 {
        self.latest_ns.div_euclid(NANOS_PER_MILLI)
    }
}

/// Source of point data and stream extents.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Points at resolution `pwe` whose buckets touch `[start_ns, end_ns)`.
    async fn fetch_range(
        &self,
        stream: StreamId,
        start_ns: i64,
        end_ns: i64,
        pwe: Pwe,
    ) -> Result<Vec<DataPoint>, FetchError>;

    /// Current extent of each requested stream.
    async fn fetch_bracket(
        &self,
        streams: &[StreamId],
    ) -> Result<HashMap<StreamId, Bracket>, FetchError>;
}

/// Per-stream state shown next to the plot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Fetching,
    Caching,
    Ready,
    NoData,
}

/// Data for one stream, as handed to the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSnapshot {
    pub stream: StreamId,
    pub pwe: Pwe,
    pub start_ms: i64,
    pub end_ms: i64,
    pub points: Vec<DataPoint>,
}

impl StreamSnapshot {
    pub fn from_record(stream: StreamId, pwe: Pwe, record: &CacheRecord) -> Self {
        Self {
            stream,
            pwe,
            start_ms: record.start_ms,
            end_ms: record.end_ms,
            points: record.points.clone(),
        }
    }
}

/// Consumer of finished repaints. Owned by the drawing layer.
pub trait RenderSink: Send + Sync {
    /// All selected streams for `generation` have resolved.
    fn data_ready(
        &self,
        generation: Generation,
        streams: &[StreamId],
        data: &HashMap<StreamId, StreamSnapshot>,
    );

    /// Status change for one stream; ignored by default.
    fn stream_status(&self, _stream: StreamId, _status: StreamStatus) {}
}
