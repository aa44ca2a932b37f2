//! Resolution-aware request scheduling.
//!
//! Only one resolution is "current" at a time. Jobs at the current
//! resolution run immediately and concurrently; jobs at any other
//! resolution wait in a secondary batch until whichever comes first:
//! - every current-resolution job has finished, at which point the whole
//!   batch becomes current and runs at once;
//! - the job's own debounce delay elapses, at which point it runs on its
//!   own without joining the current batch.
//!
//! The secondary batch holds a single resolution. Submitting a job for a
//! different off-current resolution discards the batch, so a burst of
//! viewport changes collapses into requests for the latest one only.
//! Discarded jobs are dropped without running.

use crate::types::Pwe;
use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A unit of network work. Dropping it unrun is how cancellation is signalled.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

/// How a submitted job was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Dispatched(RequestId),
    Deferred(RequestId),
}

struct Deferred {
    job: Job,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    current_pwe: Option<Pwe>,
    /// Current-resolution jobs still running
    pending: usize,
    secondary_pwe: Option<Pwe>,
    secondary: BTreeMap<RequestId, Deferred>,
    next_id: u64,
    dispatched: u64,
    superseded: u64,
}

impl SchedulerState {
    fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    fn clear_secondary(&mut self) {
        for (_, deferred) in std::mem::take(&mut self.secondary) {
            deferred.timer.abort();
            self.superseded += 1;
        }
    }

    /// Make the secondary batch current, cancelling its debounce timers.
    fn promote_secondary(&mut self) -> Vec<Job> {
        if self.secondary.is_empty() {
            return Vec::new();
        }
        self.current_pwe = self.secondary_pwe.take();
        let jobs: Vec<Job> = std::mem::take(&mut self.secondary)
            .into_values()
            .map(|deferred| {
                deferred.timer.abort();
                deferred.job
            })
            .collect();
        self.pending += jobs.len();
        jobs
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    debounce: Duration,
}

/// Cloneable handle; clones share one queue.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl RequestScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::default()),
                debounce,
            }),
        }
    }

    // ============================================================================================
    // INSPECTION
    // ============================================================================================

    pub fn current_pwe(&self) -> Option<Pwe> {
        self.inner.state.lock().current_pwe
    }

    /// Current-resolution jobs in flight.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }

    pub fn secondary_pwe(&self) -> Option<Pwe> {
        self.inner.state.lock().secondary_pwe
    }

    /// Jobs waiting in the secondary batch.
    pub fn deferred(&self) -> usize {
        self.inner.state.lock().secondary.len()
    }

    /// Total jobs started since creation.
    pub fn dispatched(&self) -> u64 {
        self.inner.state.lock().dispatched
    }

    /// Total deferred jobs dropped in favour of a newer resolution.
    pub fn superseded(&self) -> u64 {
        self.inner.state.lock().superseded
    }

    // ============================================================================================
    // SUBMISSION
    // ============================================================================================

    /// Queue `job` for resolution `pwe`. Must be called inside a tokio runtime.
    pub fn submit(&self, pwe: Pwe, job: Job) -> Submission {
        let mut state = self.inner.state.lock();
        if state.pending == 0 {
            state.current_pwe = Some(pwe);
        }
        let id = state.allocate_id();

        if state.current_pwe == Some(pwe) {
            state.pending += 1;
            drop(state);
            self.dispatch(vec![job]);
            return Submission::Dispatched(id);
        }

        if state.secondary_pwe != Some(pwe) {
            if !state.secondary.is_empty() {
                debug!(
                    "dropping {} deferred request(s) at pwe {:?} for pwe {}",
                    state.secondary.len(),
                    state.secondary_pwe,
                    pwe
                );
            }
            state.clear_secondary();
            state.secondary_pwe = Some(pwe);
        }

        let scheduler = self.clone();
        let debounce = self.inner.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            scheduler.on_debounce_elapsed(id);
        });
        state.secondary.insert(id, Deferred { job, timer });
        Submission::Deferred(id)
    }

    /// Run a deferred job whose debounce ran out before the current batch
    /// drained. It does not count towards the current batch.
    fn on_debounce_elapsed(&self, id: RequestId) {
        let job = {
            let mut state = self.inner.state.lock();
            // Superseded or already promoted.
            let Some(deferred) = state.secondary.remove(&id) else {
                return;
            };
            let pwe = state.secondary_pwe;
            if state.secondary.is_empty() {
                state.secondary_pwe = None;
            }
            state.dispatched += 1;
            debug!(
                "debounce elapsed, sending deferred request {:?} at pwe {:?}",
                id, pwe
            );
            deferred.job
        };
        tokio::spawn(job);
    }

    fn on_job_done(&self) {
        let jobs = {
            let mut state = self.inner.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.pending > 0 {
                return;
            }
            let jobs = state.promote_secondary();
            if !jobs.is_empty() {
                debug!(
                    "promoting {} deferred request(s) at pwe {:?}",
                    jobs.len(),
                    state.current_pwe
                );
            }
            jobs
        };
        self.dispatch(jobs);
    }

    fn dispatch(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        self.inner.state.lock().dispatched += jobs.len() as u64;
        for job in jobs {
            let scheduler = self.clone();
            tokio::spawn(async move {
                job.await;
                scheduler.on_job_done();
            });
        }
    }
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestScheduler")
            .field("current_pwe", &state.current_pwe)
            .field("pending", &state.pending)
            .field("secondary_pwe", &state.secondary_pwe)
            .field("deferred", &state.secondary.len())
            .finish()
    }
}
