//! Gap-filling fetches into the shared cache.

use super::scheduler::{Job, RequestScheduler};
use crate::error::FetchError;
use crate::service::DataService;
use crate::session::PlotSession;
use crate::storage::{CacheRecord, Gap};
use crate::types::{half_width_nanos, Pwe, StreamId, NANOS_PER_MILLI};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome of [`Fetcher::ensure_data`].
#[derive(Clone, Debug, PartialEq)]
pub enum StreamData {
    /// The cache record now covering the requested window.
    Ready(CacheRecord),
    /// At least one gap could not be filled; earlier data is still cached.
    Unavailable,
}

impl StreamData {
    pub fn record(&self) -> Option<&CacheRecord> {
        match self {
            StreamData::Ready(record) => Some(record),
            StreamData::Unavailable => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StreamData::Ready(_))
    }
}

type Outcome = Result<(), FetchError>;

/// One gap request: stream, resolution, tier id and gap bounds.
type InFlightKey = (StreamId, Pwe, u64, i64, i64);

type InFlight = Arc<Mutex<HashMap<InFlightKey, broadcast::Sender<Outcome>>>>;

/// Registration of a submitted gap request. Completing it publishes the
/// outcome to every waiting caller; dropping it unrun closes their channels.
struct InFlightSlot {
    in_flight: InFlight,
    key: InFlightKey,
    sender: Option<broadcast::Sender<Outcome>>,
}

impl InFlightSlot {
    fn complete(mut self, outcome: Outcome) {
        self.in_flight.lock().remove(&self.key);
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.in_flight.lock().remove(&self.key);
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    session: Arc<PlotSession>,
    service: Arc<dyn DataService>,
    scheduler: RequestScheduler,
    in_flight: InFlight,
}

impl Fetcher {
    pub fn new(session: Arc<PlotSession>, service: Arc<dyn DataService>) -> Self {
        let scheduler = RequestScheduler::new(session.config().secondary_debounce());
        Self {
            session,
            service,
            scheduler,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn session(&self) -> &Arc<PlotSession> {
        &self.session
    }

    pub fn service(&self) -> &Arc<dyn DataService> {
        &self.service
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// Distinct gap requests submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Clamp a request to the configured ceiling and query bounds.
    ///
    /// The window is pulled in by half a point width at each bound so that
    /// the shifted request sent to the backend stays within range.
    pub fn clamp(&self, pwe: Pwe, start_ms: i64, end_ms: i64) -> (Pwe, i64, i64) {
        let config = self.session.config();
        let pwe = pwe.min(config.pwe_high);
        let half_ms = (half_width_nanos(pwe) + NANOS_PER_MILLI - 1) / NANOS_PER_MILLI;
        let low = config.query_low_ms + half_ms;
        let high = config.query_high_ms - half_ms;

        let start = start_ms.max(low).min(high - 1);
        let end = end_ms.max(low + 1).min(high);
        (pwe, start, end)
    }

    /// Make sure `[start_ms, end_ms)` is cached for `stream` at `pwe`,
    /// fetching whatever is missing, and return the covering record.
    ///
    /// A fully cached window returns without touching the network. Otherwise
    /// one request per gap is handed to the scheduler and this resolves once
    /// all of them have. A gap already being fetched by another caller is
    /// waited on rather than requested again. Failures are logged and
    /// reported as [`StreamData::Unavailable`]; points that did arrive stay
    /// cached.
    pub async fn ensure_data(
        &self,
        stream: StreamId,
        pwe: Pwe,
        start_ms: i64,
        end_ms: i64,
        is_prefetch: bool,
    ) -> StreamData {
        let (pwe, start, end) = self.clamp(pwe, start_ms, end_ms);
        if end <= start {
            return StreamData::Ready(CacheRecord::new(start, start, Vec::new()));
        }

        let (tier_id, gaps) = {
            let mut cache = self.session.cache_mut();
            let tier = cache.tier_or_create(stream, pwe);
            let coverage = tier.find_gap_coverage(start, end);
            if coverage.is_covered() {
                let record = tier.records()[coverage.records.start].clone();
                self.session.note_cache_hit();
                return StreamData::Ready(record);
            }
            (tier.id(), tier.gaps_for(&coverage, start, end))
        };

        debug!(
            "{} {} pwe {} [{}, {}): {} gap(s)",
            if is_prefetch { "prefetch" } else { "fetch" },
            stream,
            pwe,
            start,
            end,
            gaps.len()
        );

        let mut replies = Vec::with_capacity(gaps.len());
        for gap in gaps {
            let key = (stream, pwe, tier_id, gap.start_ms, gap.end_ms);
            let slot = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.entry(key) {
                    Entry::Occupied(existing) => {
                        replies.push(existing.get().subscribe());
                        None
                    }
                    Entry::Vacant(vacant) => {
                        let (sender, receiver) = broadcast::channel(1);
                        vacant.insert(sender.clone());
                        replies.push(receiver);
                        Some(InFlightSlot {
                            in_flight: Arc::clone(&self.in_flight),
                            key,
                            sender: Some(sender),
                        })
                    }
                }
            };
            match slot {
                Some(slot) => {
                    self.session.note_request();
                    self.scheduler.submit(pwe, self.gap_job(stream, pwe, tier_id, gap, slot));
                }
                None => debug!(
                    "joining in-flight request for {} pwe {} [{}, {})",
                    stream, pwe, gap.start_ms, gap.end_ms
                ),
            }
        }

        let mut complete = true;
        for mut reply in replies {
            match reply.recv().await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => complete = false,
                Err(_) => {
                    debug!("request for {} at pwe {} was superseded", stream, pwe);
                    complete = false;
                }
            }
        }
        if !complete {
            return StreamData::Unavailable;
        }

        match self.session.cache().covering(&stream, pwe, start, end) {
            Some(record) => StreamData::Ready(record.clone()),
            // Evicted between the merge and now.
            None => StreamData::Unavailable,
        }
    }

    fn gap_job(
        &self,
        stream: StreamId,
        pwe: Pwe,
        tier_id: u64,
        gap: Gap,
        slot: InFlightSlot,
    ) -> Job {
        let service = Arc::clone(&self.service);
        let session = Arc::clone(&self.session);
        Box::pin(async move {
            let half = half_width_nanos(pwe);
            let start_ns = gap.start_ms * NANOS_PER_MILLI + half;
            let end_ns = gap.end_ms * NANOS_PER_MILLI + half;

            let outcome = match service.fetch_range(stream, start_ns, end_ns, pwe).await {
                Ok(points) => {
                    let count = points.len();
                    let merged = session
                        .cache_mut()
                        .merge(stream, pwe, tier_id, gap.start_ms, gap.end_ms, points);
                    match merged {
                        Some(delta) => {
                            debug!(
                                "merged {} point(s) for {} pwe {} [{}, {}): +{} -{}",
                                count, stream, pwe, gap.start_ms, gap.end_ms, delta.added, delta.removed
                            );
                            Ok(())
                        }
                        None => {
                            debug!("tier {} of {} evicted while in flight, discarding", pwe, stream);
                            Err(FetchError::Cancelled)
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "fetch failed for {} pwe {} [{}, {}): {}",
                        stream, pwe, gap.start_ms, gap.end_ms, e
                    );
                    session.note_failure();
                    Err(e)
                }
            };
            slot.complete(outcome);
        })
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
