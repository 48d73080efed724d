//! Execution timeline events.
//!
//! Each pooled orchestrator carries a [`DagEventTracker`]; the scheduler
//! appends one event per vertex settle and per run phase. When the
//! orchestrator returns to its pool the accumulated timeline is drained to
//! the store's `event_reporter`, if one is configured.

use crate::types::VertexResult;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DagEventPhase {
    /// Config settings evaluated for a run.
    ConfigEval,
    /// A processor vertex executed.
    VertexExecute,
    /// A sub-graph vertex completed (all loop iterations included).
    SubGraph,
    /// A pooled context was reset and returned.
    ContextRelease,
}

/// One entry in a run's execution timeline.
#[derive(Clone, Debug, Serialize)]
pub struct DagEvent {
    pub phase: DagEventPhase,
    pub graph: String,
    pub vertex: String,
    pub processor: String,
    pub start_us: u64,
    pub end_us: u64,
    /// Raw execution code, before any ignore-error mapping.
    pub code: i32,
    pub result: Option<VertexResult>,
}

/// Sink receiving drained timelines.
pub type EventReporter = std::sync::Arc<dyn Fn(Vec<DagEvent>) + Send + Sync>;

#[derive(Default)]
pub struct DagEventTracker {
    events: Mutex<Vec<DagEvent>>,
}

impl DagEventTracker {
    pub fn record(&self, event: DagEvent) {
        self.events.lock().push(event);
    }

    /// Take everything recorded so far.
    #[must_use]
    pub fn drain(&self) -> Vec<DagEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
