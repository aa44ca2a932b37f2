//! Drives fetching from the visible window.
//!
//! Each [`ViewportController::request_repaint`] starts a new generation,
//! ensures data for every selected stream at the resolution matching the
//! pixel density, and notifies the [`RenderSink`] exactly once, if and only
//! if that generation is still the latest when every stream has answered.
//! Results of superseded generations still land in the cache.

use super::bracket::{self, BracketPoller};
use super::prefetch;
use crate::fetch::{Fetcher, StreamData};
use crate::service::{DataService, RenderSink, StreamSnapshot, StreamStatus};
use crate::session::PlotSession;
use crate::types::{Generation, Pwe, StreamId, Viewport};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepaintOutcome {
    /// The sink was notified for this generation.
    Rendered(Generation),
    /// A newer repaint started before this one finished.
    Superseded(Generation),
}

#[derive(Default)]
struct ViewState {
    selected: Vec<StreamId>,
    viewport: Option<Viewport>,
    /// Last data handed to the sink, per stream
    shown: HashMap<StreamId, StreamSnapshot>,
    shown_generation: Option<Generation>,
}

pub struct ViewportController {
    session: Arc<PlotSession>,
    fetcher: Fetcher,
    sink: Arc<dyn RenderSink>,
    state: RwLock<ViewState>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ViewportController {
    pub fn new(
        session: Arc<PlotSession>,
        service: Arc<dyn DataService>,
        sink: Arc<dyn RenderSink>,
    ) -> Arc<Self> {
        let fetcher = Fetcher::new(Arc::clone(&session), service);
        Arc::new(Self {
            session,
            fetcher,
            sink,
            state: RwLock::new(ViewState::default()),
            poller: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Arc<PlotSession> {
        &self.session
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    // ============================================================================================
    // VIEW STATE
    // ============================================================================================

    /// Replace the set of plotted streams. Takes effect at the next repaint.
    pub fn set_selected(&self, streams: Vec<StreamId>) {
        let mut state = self.state.write();
        state.shown.retain(|id, _| streams.contains(id));
        state.selected = streams;
    }

    pub fn selected(&self) -> Vec<StreamId> {
        self.state.read().selected.clone()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.state.read().viewport
    }

    /// Generation of the most recent render, if any.
    pub fn shown_generation(&self) -> Option<Generation> {
        self.state.read().shown_generation
    }

    /// What the sink was last given for `stream`.
    pub fn shown(&self, stream: &StreamId) -> Option<StreamSnapshot> {
        self.state.read().shown.get(stream).cloned()
    }

    /// Resolution used for `viewport`, capped at the configured ceiling.
    pub fn target_pwe(&self, viewport: &Viewport) -> Pwe {
        viewport.pwe().min(self.session.config().pwe_high)
    }

    // ============================================================================================
    // REPAINT
    // ============================================================================================

    /// Fetch everything needed to draw `[start_ms, end_ms)` across
    /// `pixel_width` pixels, then notify the sink.
    ///
    /// With `stop_prefetch` set no neighbouring data is warmed afterwards,
    /// which suits intermediate frames of a continuous gesture.
    pub async fn request_repaint(
        self: &Arc<Self>,
        start_ms: i64,
        end_ms: i64,
        pixel_width: f64,
        stop_prefetch: bool,
    ) -> RepaintOutcome {
        let viewport = Viewport::new(start_ms, end_ms, pixel_width);
        let generation = self.session.next_generation();
        let pwe = self.target_pwe(&viewport);

        let selected = {
            let mut state = self.state.write();
            state.viewport = Some(viewport);
            state.selected.clone()
        };
        debug!(
            "repaint generation {} [{}, {}) at pwe {} for {} stream(s)",
            generation,
            start_ms,
            end_ms,
            pwe,
            selected.len()
        );

        let mut tasks = JoinSet::new();
        for stream in selected.iter().copied() {
            self.sink.stream_status(stream, StreamStatus::Fetching);
            let fetcher = self.fetcher.clone();
            tasks.spawn(async move {
                let data = fetcher.ensure_data(stream, pwe, start_ms, end_ms, false).await;
                (stream, data)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (stream, data) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("fetch task for generation {} failed: {}", generation, e);
                    continue;
                }
            };
            if !self.session.is_current(generation) {
                continue;
            }
            self.on_stream_data(generation, stream, pwe, &viewport, &selected, data, stop_prefetch);
        }

        if !self.session.is_current(generation) {
            debug!("generation {} superseded, not rendering", generation);
            return RepaintOutcome::Superseded(generation);
        }
        self.render(generation, &selected);
        RepaintOutcome::Rendered(generation)
    }

    /// Repaint the current viewport in the background.
    pub fn spawn_repaint(self: &Arc<Self>) -> Option<JoinHandle<RepaintOutcome>> {
        let viewport = self.viewport()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.request_repaint(viewport.start_ms, viewport.end_ms, viewport.pixel_width, false)
                .await
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn on_stream_data(
        self: &Arc<Self>,
        generation: Generation,
        stream: StreamId,
        pwe: Pwe,
        viewport: &Viewport,
        selected: &[StreamId],
        data: StreamData,
        stop_prefetch: bool,
    ) {
        let margin = self.session.config().poll_margin_widths;
        if bracket::should_poll(self.session.last_known_end(&stream), viewport, margin) {
            self.ensure_polling();
        }

        self.session.limit_memory(selected, viewport, pwe);

        match data {
            StreamData::Ready(record) => {
                let status = if record.is_empty() {
                    StreamStatus::NoData
                } else {
                    StreamStatus::Ready
                };
                self.state
                    .write()
                    .shown
                    .insert(stream, StreamSnapshot::from_record(stream, pwe, &record));
                self.sink.stream_status(stream, status);
            }
            StreamData::Unavailable => {
                // Whatever was shown before stays up.
                self.sink.stream_status(stream, StreamStatus::NoData);
            }
        }

        if stop_prefetch || !self.session.config().prefetch {
            return;
        }
        let steps = prefetch::plan(pwe, viewport, self.session.config().pwe_high);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.sink.stream_status(stream, StreamStatus::Caching);
            let done = prefetch::run(&this.fetcher, stream, generation, &steps).await;
            if done == steps.len() && this.session.is_current(generation) {
                this.sink.stream_status(stream, StreamStatus::Ready);
            }
        });
    }

    fn render(&self, generation: Generation, selected: &[StreamId]) {
        let data: HashMap<StreamId, StreamSnapshot> = {
            let mut state = self.state.write();
            state.shown_generation = Some(generation);
            state
                .shown
                .iter()
                .filter(|(id, _)| selected.contains(id))
                .map(|(id, snap)| (*id, snap.clone()))
                .collect()
        };
        self.sink.data_ready(generation, selected, &data);
    }

    // ============================================================================================
    // BRACKET POLLING
    // ============================================================================================

    /// Start the bracket poller unless it is already running.
    ///
    /// Returns whether a new poller was started.
    pub fn ensure_polling(self: &Arc<Self>) -> bool {
        let period = self.session.config().bracket_poll_interval();
        if period.is_zero() {
            return false;
        }
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        info!("starting bracket polling every {} ms", period.as_millis());
        let task = BracketPoller::new(Arc::downgrade(self), period);
        *poller = Some(tokio::spawn(task.start()));
        true
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ViewportController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
