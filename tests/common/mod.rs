//! Shared fixtures: an in-memory backend and a recording render sink.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plotcache::service::{Bracket, DataService, RenderSink, StreamSnapshot, StreamStatus};
use plotcache::types::{half_width_nanos, DataPoint, Generation, Pwe, StreamId, NANOS_PER_MILLI};
use plotcache::{FetchError, PlotSession, PlotterConfig, ViewportController};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeCall {
    pub stream: StreamId,
    pub start_ns: i64,
    pub end_ns: i64,
    pub pwe: Pwe,
}

impl RangeCall {
    /// Start of the window in milliseconds, with the half-width shift removed.
    pub fn start_ms(&self) -> i64 {
        (self.start_ns - half_width_nanos(self.pwe)) / NANOS_PER_MILLI
    }

    pub fn end_ms(&self) -> i64 {
        (self.end_ns - half_width_nanos(self.pwe)) / NANOS_PER_MILLI
    }
}

/// Backend that synthesises one point every `step_ms` across each window.
///
/// With `gated` set, every range request parks until [`MockService::release`]
/// is called for its start time.
pub struct MockService {
    pub step_ms: i64,
    pub gated: bool,
    calls: Mutex<Vec<RangeCall>>,
    waiting: Mutex<HashMap<i64, oneshot::Sender<()>>>,
    failing: Mutex<HashSet<StreamId>>,
    latest_ms: Mutex<HashMap<StreamId, i64>>,
    bracket_calls: Mutex<usize>,
}

impl MockService {
    pub fn new(step_ms: i64) -> Self {
        Self {
            step_ms,
            gated: false,
            calls: Mutex::new(Vec::new()),
            waiting: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            latest_ms: Mutex::new(HashMap::new()),
            bracket_calls: Mutex::new(0),
        }
    }

    pub fn gated(step_ms: i64) -> Self {
        Self {
            gated: true,
            ..Self::new(step_ms)
        }
    }

    pub fn calls(&self) -> Vec<RangeCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn waiting(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_waiting(&self, start_ms: i64) -> bool {
        self.waiting.lock().contains_key(&start_ms)
    }

    /// Let the parked request starting at `start_ms` answer.
    pub fn release(&self, start_ms: i64) {
        let gate = self.waiting.lock().remove(&start_ms);
        if let Some(gate) = gate {
            let _ = gate.send(());
        }
    }

    pub fn fail_stream(&self, stream: StreamId) {
        self.failing.lock().insert(stream);
    }

    pub fn set_latest(&self, stream: StreamId, latest_ms: i64) {
        self.latest_ms.lock().insert(stream, latest_ms);
    }

    pub fn bracket_calls(&self) -> usize {
        *self.bracket_calls.lock()
    }
}

#[async_trait]
impl DataService for MockService {
    async fn fetch_range(
        &self,
        stream: StreamId,
        start_ns: i64,
        end_ns: i64,
        pwe: Pwe,
    ) -> Result<Vec<DataPoint>, FetchError> {
        let call = RangeCall {
            stream,
            start_ns,
            end_ns,
            pwe,
        };
        self.calls.lock().push(call);

        if self.gated {
            let (tx, rx) = oneshot::channel();
            self.waiting.lock().insert(call.start_ms(), tx);
            let _ = rx.await;
        }

        if self.failing.lock().contains(&stream) {
            return Err(FetchError::Malformed("Timed out".to_string()));
        }

        let mut points = Vec::new();
        let mut ms = call.start_ms();
        while ms < call.end_ms() {
            points.push(DataPoint::from_nanos(ms * NANOS_PER_MILLI, -1.0, 0.0, 1.0, 3));
            ms += self.step_ms;
        }
        Ok(points)
    }

    async fn fetch_bracket(
        &self,
        streams: &[StreamId],
    ) -> Result<HashMap<StreamId, Bracket>, FetchError> {
        *self.bracket_calls.lock() += 1;
        let latest = self.latest_ms.lock();
        Ok(streams
            .iter()
            .filter_map(|s| {
                latest.get(s).map(|ms| {
                    (
                        *s,
                        Bracket {
                            earliest_ns: 0,
                            latest_ns: ms * NANOS_PER_MILLI,
                        },
                    )
                })
            })
            .collect())
    }
}

pub struct Render {
    pub generation: Generation,
    pub streams: Vec<StreamId>,
    pub data: HashMap<StreamId, StreamSnapshot>,
}

#[derive(Default)]
pub struct RecordingSink {
    renders: Mutex<Vec<Render>>,
    statuses: Mutex<Vec<(StreamId, StreamStatus)>>,
}

impl RecordingSink {
    pub fn render_count(&self) -> usize {
        self.renders.lock().len()
    }

    pub fn generations(&self) -> Vec<Generation> {
        self.renders.lock().iter().map(|r| r.generation).collect()
    }

    pub fn last_snapshot(&self, stream: &StreamId) -> Option<StreamSnapshot> {
        self.renders
            .lock()
            .last()
            .and_then(|r| r.data.get(stream).cloned())
    }

    pub fn last_streams(&self) -> Vec<StreamId> {
        self.renders
            .lock()
            .last()
            .map(|r| r.streams.clone())
            .unwrap_or_default()
    }

    pub fn statuses_for(&self, stream: &StreamId) -> Vec<StreamStatus> {
        self.statuses
            .lock()
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, status)| *status)
            .collect()
    }
}

impl RenderSink for RecordingSink {
    fn data_ready(
        &self,
        generation: Generation,
        streams: &[StreamId],
        data: &HashMap<StreamId, StreamSnapshot>,
    ) {
        self.renders.lock().push(Render {
            generation,
            streams: streams.to_vec(),
            data: data.clone(),
        });
    }

    fn stream_status(&self, stream: StreamId, status: StreamStatus) {
        self.statuses.lock().push((stream, status));
    }
}

/// Config with prefetch and bracket polling off, for focused tests.
pub fn quiet_config() -> PlotterConfig {
    PlotterConfig {
        prefetch: false,
        bracket_poll_interval_ms: 0,
        ..Default::default()
    }
}

pub fn controller(
    config: PlotterConfig,
    service: &Arc<MockService>,
    sink: &Arc<RecordingSink>,
) -> Arc<ViewportController> {
    let session = Arc::new(PlotSession::new(config));
    ViewportController::new(session, service.clone(), sink.clone())
}

/// Yield to spawned tasks until `cond` holds.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
