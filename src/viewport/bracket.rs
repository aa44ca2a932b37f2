//! Periodic polling of stream extents.
//!
//! While the viewport sits near the live end of at least one selected
//! stream, the poller asks the backend for each stream's bracket on a fixed
//! interval. A stream whose end moved has its cache trimmed, and if the
//! newly available span is on screen the controller repaints. Polling stops
//! once no stream is near its end; the next repaint that brings one back
//! into range restarts it.

use super::controller::ViewportController;
use crate::service::Bracket;
use crate::session::BracketChange;
use crate::types::{StreamId, Viewport};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::interval;

/// Whether the view is close enough to `last_end_ms` to keep polling.
///
/// A stream with no known end is always polled.
pub fn should_poll(last_end_ms: Option<i64>, viewport: &Viewport, margin_widths: f64) -> bool {
    match last_end_ms {
        None => true,
        Some(end) => {
            let margin = margin_widths * viewport.width_ms() as f64;
            viewport.end_ms as f64 >= end as f64 - margin
        }
    }
}

/// Result of applying one bracket response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BracketUpdate {
    /// Streams whose end moved
    pub changed: Vec<StreamId>,
    /// New data intersects the viewport
    pub repaint: bool,
    pub keep_polling: bool,
}

/// Record `brackets` in the session and decide what to do next.
pub fn apply_brackets(
    controller: &ViewportController,
    brackets: &HashMap<StreamId, Bracket>,
) -> BracketUpdate {
    let session = controller.session();
    let margin = session.config().poll_margin_widths;
    let selected = controller.selected();
    let Some(viewport) = controller.viewport() else {
        return BracketUpdate::default();
    };

    let mut update = BracketUpdate::default();
    for stream in &selected {
        let Some(bracket) = brackets.get(stream) else {
            continue;
        };
        let latest = bracket.latest_ms();
        match session.record_bracket_end(*stream, latest) {
            BracketChange::Advanced { previous_ms, .. } => {
                update.changed.push(*stream);
                if viewport.overlaps(previous_ms, latest) {
                    update.repaint = true;
                }
            }
            BracketChange::Retreated { previous_ms, .. } => {
                update.changed.push(*stream);
                if viewport.overlaps(latest, previous_ms) {
                    update.repaint = true;
                }
            }
            BracketChange::First | BracketChange::Unchanged => {}
        }
    }

    update.keep_polling = selected
        .iter()
        .any(|stream| should_poll(session.last_known_end(stream), &viewport, margin));
    update
}

/// One poll round. Returns whether polling should continue.
pub async fn poll_once(controller: &Arc<ViewportController>) -> bool {
    let selected = controller.selected();
    if selected.is_empty() {
        return false;
    }

    let service = Arc::clone(controller.fetcher().service());
    let brackets = match service.fetch_bracket(&selected).await {
        Ok(brackets) => brackets,
        Err(e) => {
            // Transient; try again next tick.
            warn!("bracket poll failed: {}", e);
            return true;
        }
    };

    let update = apply_brackets(controller, &brackets);
    if !update.changed.is_empty() {
        debug!("stream end moved for {} stream(s)", update.changed.len());
    }
    if update.repaint {
        controller.spawn_repaint();
    }
    update.keep_polling
}

/// Background task polling brackets for one controller.
///
/// Holds the controller weakly so a dropped plot ends the loop.
pub struct BracketPoller {
    controller: Weak<ViewportController>,
    period: Duration,
}

impl BracketPoller {
    pub fn new(controller: Weak<ViewportController>, period: Duration) -> Self {
        Self { controller, period }
    }

    /// Poll immediately, then every `period`, until told to stop.
    pub async fn start(self) {
        let mut ticker = interval(self.period);
        loop {
            ticker.tick().await;
            let Some(controller) = self.controller.upgrade() else {
                break;
            };
            if !poll_once(&controller).await {
                info!("bracket polling stopped: view is away from live data");
                break;
            }
        }
    }
}
