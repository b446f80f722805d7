//! Ingest progress reporting.
//!
//! Each item being ingested gets one [`IngestProgress`] whose total is the
//! sum of its components' weights ([`COMPONENT_WEIGHT`] units each). A
//! component task holds a [`ComponentProgress`] and advances it as it
//! fetches and classifies; when the handle finishes (or is dropped) any
//! remaining units are credited, so every component contributes its weight
//! exactly once whether it succeeded, failed, or was cancelled.
//!
//! ```text
//! IngestProgress (total = n × 2)
//!   ├── ComponentProgress  ▓▓  fetch + classify
//!   ├── ComponentProgress  ▓░  fetching...
//!   └── ComponentProgress  ░░  waiting for the gate
//! ```
//!
//! Observers implement [`ProgressReporter`]. The library ships a no-op
//! reporter and one that logs through `tracing`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Units each component contributes: one for the fetch, one for classification.
pub const COMPONENT_WEIGHT: u64 = 2;

/// How a component's ingest ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComponentOutcome {
    Classified,
    Failed,
    Aborted,
}

/// A single progress event for an item.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Started {
        item: Uuid,
        components: usize,
        total: u64,
    },
    Advanced {
        item: Uuid,
        completed: u64,
        total: u64,
    },
    ComponentFinished {
        item: Uuid,
        component: Uuid,
        outcome: ComponentOutcome,
    },
    Finished {
        item: Uuid,
    },
}

/// Receives progress events. Called from ingest tasks, so it must be cheap.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter when progress is not observed.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Logs progress as structured `tracing` events.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                item,
                components,
                total,
            } => tracing::info!(%item, components, total, "ingest started"),
            ProgressEvent::Advanced {
                item,
                completed,
                total,
            } => tracing::debug!(%item, completed, total, "ingest progress"),
            ProgressEvent::ComponentFinished {
                item,
                component,
                outcome,
            } => tracing::debug!(%item, %component, ?outcome, "component finished"),
            ProgressEvent::Finished { item } => tracing::info!(%item, "ingest finished"),
        }
    }
}

/// Item-level progress.
pub struct IngestProgress {
    item: Uuid,
    components: usize,
    total: u64,
    completed: AtomicU64,
    finished: AtomicBool,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for IngestProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestProgress")
            .field("item", &self.item)
            .field("components", &self.components)
            .field("completed", &self.completed())
            .field("total", &self.total)
            .finish()
    }
}

impl IngestProgress {
    pub fn new(item: Uuid, components: usize, reporter: Arc<dyn ProgressReporter>) -> Arc<Self> {
        let total = components as u64 * COMPONENT_WEIGHT;
        let progress = Arc::new(Self {
            item,
            components,
            total,
            completed: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            reporter,
        });
        progress.reporter.report(ProgressEvent::Started {
            item,
            components,
            total,
        });
        if total == 0 {
            progress.mark_finished();
        }
        progress
    }

    pub fn item(&self) -> Uuid {
        self.item
    }

    /// Number of components this progress tracks.
    pub fn component_count(&self) -> usize {
        self.components
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed() as f64 / self.total as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Handle for one component's share of the total.
    pub fn component(self: &Arc<Self>, component: Uuid) -> ComponentProgress {
        ComponentProgress {
            parent: Arc::clone(self),
            component,
            credited: 0,
            done: false,
        }
    }

    fn credit(&self, units: u64) {
        if units == 0 {
            return;
        }
        let total = self.total;
        let before = self
            .completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + units).min(total))
            })
            .unwrap_or(total);
        let after = (before + units).min(total);
        if after == before {
            return;
        }
        self.reporter.report(ProgressEvent::Advanced {
            item: self.item,
            completed: after,
            total,
        });
        if after == total {
            self.mark_finished();
        }
    }

    fn mark_finished(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.reporter
                .report(ProgressEvent::Finished { item: self.item });
        }
    }
}

/// One component's share of an [`IngestProgress`].
///
/// Dropping an unfinished handle credits the remaining units, so a task that
/// bails out early still counts as complete.
#[derive(Debug)]
pub struct ComponentProgress {
    parent: Arc<IngestProgress>,
    component: Uuid,
    credited: u64,
    done: bool,
}

impl ComponentProgress {
    /// Credit `units`, never more than the component's weight in total.
    pub fn advance(&mut self, units: u64) {
        if self.done {
            return;
        }
        let units = units.min(COMPONENT_WEIGHT - self.credited);
        self.credited += units;
        self.parent.credit(units);
    }

    /// Credit whatever is left and report the outcome. Only the first call counts.
    pub fn finish(&mut self, outcome: ComponentOutcome) {
        if self.done {
            return;
        }
        let remaining = COMPONENT_WEIGHT - self.credited;
        self.credited = COMPONENT_WEIGHT;
        self.done = true;
        self.parent.reporter.report(ProgressEvent::ComponentFinished {
            item: self.parent.item,
            component: self.component,
            outcome,
        });
        self.parent.credit(remaining);
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }
}

impl Drop for ComponentProgress {
    fn drop(&mut self) {
        if !self.done {
            self.finish(ComponentOutcome::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn advance_is_clamped_to_weight() {
        let progress = IngestProgress::new(Uuid::new_v4(), 2, Arc::new(NoProgress));
        let mut a = progress.component(Uuid::new_v4());
        a.advance(1);
        a.advance(5);
        assert_eq!(progress.completed(), COMPONENT_WEIGHT);
        a.finish(ComponentOutcome::Classified);
        assert_eq!(progress.completed(), COMPONENT_WEIGHT);
        assert!(!progress.is_finished());
    }

    #[test]
    fn finish_counts_once() {
        let progress = IngestProgress::new(Uuid::new_v4(), 1, Arc::new(NoProgress));
        let mut a = progress.component(Uuid::new_v4());
        a.finish(ComponentOutcome::Failed);
        a.finish(ComponentOutcome::Classified);
        a.advance(1);
        drop(a);
        assert_eq!(progress.completed(), progress.total());
        assert!(progress.is_finished());
    }

    #[test]
    fn dropped_handle_still_completes() {
        let progress = IngestProgress::new(Uuid::new_v4(), 1, Arc::new(NoProgress));
        {
            let mut a = progress.component(Uuid::new_v4());
            a.advance(1);
        }
        assert!(progress.is_finished());
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn events_are_monotonic_and_finish_once() {
        let recorder = Arc::new(Recorder::default());
        let item = Uuid::new_v4();
        let progress = IngestProgress::new(item, 3, recorder.clone());
        let mut handles: Vec<_> = (0..3).map(|_| progress.component(Uuid::new_v4())).collect();
        handles[1].advance(1);
        handles[0].finish(ComponentOutcome::Aborted);
        handles[2].advance(1);
        handles[1].finish(ComponentOutcome::Classified);
        handles[2].finish(ComponentOutcome::Failed);
        drop(handles);

        let events = recorder.0.lock().unwrap();
        let completed: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Advanced { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        assert!(completed.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(completed.last().copied(), Some(6));
        let finished = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn empty_progress_is_finished_immediately() {
        let progress = IngestProgress::new(Uuid::new_v4(), 0, Arc::new(NoProgress));
        assert!(progress.is_finished());
        assert_eq!(progress.total(), 0);
    }
}
