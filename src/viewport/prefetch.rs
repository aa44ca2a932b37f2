//! Neighbouring-range and neighbouring-resolution prefetch.
//!
//! After a stream's primary data for a repaint arrives, the controller warms
//! the cache for the most likely next interactions, in this order:
//!
//! | step      | resolution | window                         |
//! |-----------|------------|--------------------------------|
//! | `Before`  | `pwe`      | `[start - w, start)`           |
//! | `After`   | `pwe`      | `[end, end + w)`               |
//! | `Finer`   | `pwe - 1`  | `[start - w, end + w)`         |
//! | `Coarser` | `pwe + 1`  | `[start - w, end + w)`         |
//! | `Finest`  | `pwe - 2`  | `[start - w, end + w)`         |
//!
//! where `w` is the viewport width. Steps whose resolution would fall
//! outside `0..=pwe_high` are skipped. The chain stops as soon as the
//! generation it was planned for is no longer current.

use crate::fetch::Fetcher;
use crate::types::{Generation, Pwe, StreamId, Viewport};
use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchStep {
    Before,
    After,
    Finer,
    Coarser,
    Finest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub step: PrefetchStep,
    pub pwe: Pwe,
    pub start_ms: i64,
    pub end_ms: i64,
}

pub fn plan(pwe: Pwe, viewport: &Viewport, pwe_high: Pwe) -> Vec<PrefetchRequest> {
    let width = viewport.width_ms();
    let (start, end) = (viewport.start_ms, viewport.end_ms);
    let wide = (start - width, end + width);

    let candidates = [
        (PrefetchStep::Before, Some(pwe), (start - width, start)),
        (PrefetchStep::After, Some(pwe), (end, end + width)),
        (PrefetchStep::Finer, pwe.checked_sub(1), wide),
        (
            PrefetchStep::Coarser,
            pwe.checked_add(1).filter(|p| *p <= pwe_high),
            wide,
        ),
        (PrefetchStep::Finest, pwe.checked_sub(2), wide),
    ];

    candidates
        .into_iter()
        .filter_map(|(step, pwe, (start_ms, end_ms))| {
            pwe.map(|pwe| PrefetchRequest {
                step,
                pwe,
                start_ms,
                end_ms,
            })
        })
        .collect()
}

/// Run `steps` in order while `generation` stays current.
///
/// Returns how many steps completed.
pub async fn run(
    fetcher: &Fetcher,
    stream: StreamId,
    generation: Generation,
    steps: &[PrefetchRequest],
) -> usize {
    let session = fetcher.session();
    let mut completed = 0;
    for request in steps {
        if !session.is_current(generation) {
            debug!(
                "prefetch for {} abandoned at {:?}: generation {} superseded",
                stream, request.step, generation
            );
            break;
        }
        fetcher
            .ensure_data(stream, request.pwe, request.start_ms, request.end_ms, true)
            .await;
        completed += 1;
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(plan: &[PrefetchRequest]) -> Vec<(PrefetchStep, Pwe)> {
        plan.iter().map(|r| (r.step, r.pwe)).collect()
    }

    #[test]
    fn test_full_plan() {
        let vp = Viewport::new(1000, 2000, 100.0);
        let plan = plan(10, &vp, 61);

        assert_eq!(
            steps(&plan),
            vec![
                (PrefetchStep::Before, 10),
                (PrefetchStep::After, 10),
                (PrefetchStep::Finer, 9),
                (PrefetchStep::Coarser, 11),
                (PrefetchStep::Finest, 8),
            ]
        );
        assert_eq!((plan[0].start_ms, plan[0].end_ms), (0, 1000));
        assert_eq!((plan[1].start_ms, plan[1].end_ms), (2000, 3000));
        assert_eq!((plan[2].start_ms, plan[2].end_ms), (0, 3000));
    }

    #[test]
    fn test_finest_resolutions_skip_lower_steps() {
        let vp = Viewport::new(0, 10, 10.0);
        assert_eq!(
            steps(&plan(0, &vp, 61)),
            vec![
                (PrefetchStep::Before, 0),
                (PrefetchStep::After, 0),
                (PrefetchStep::Coarser, 1),
            ]
        );
        assert_eq!(steps(&plan(1, &vp, 61)).len(), 4);
    }

    #[test]
    fn test_ceiling_skips_coarser() {
        let vp = Viewport::new(0, 10, 10.0);
        let plan = plan(61, &vp, 61);
        assert!(plan.iter().all(|r| r.step != PrefetchStep::Coarser));
        assert_eq!(plan.len(), 4);
    }
}
