//! Runtime execution layer.
//!
//! The static model built by [`crate::graph`] is shared; everything in this
//! module is per-run plumbing: [`VertexContext`] tracks one vertex's
//! dependency countdown and settle, [`GraphContext`] schedules a graph,
//! [`ClusterContext`] orchestrates a cluster (config flags, deadlines,
//! sub-graph routing). The scheduler never owns threads — ready work is
//! handed to the configured [`AsyncExecutor`].

pub mod cluster;
pub mod graph_ctx;
pub mod vertex;

pub use cluster::ClusterContext;
pub use graph_ctx::GraphContext;
pub use vertex::VertexContext;

use crate::params::Params;
use crate::trace::EventReporter;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Task sink the scheduler fans out to.
pub type AsyncExecutor = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Completion callback, invoked exactly once with the run's code.
pub type DoneClosure = Box<dyn FnOnce(i32) + Send>;

/// The default executor: `tokio::spawn`.
#[must_use]
pub fn tokio_executor() -> AsyncExecutor {
    Arc::new(|fut| {
        tokio::spawn(fut);
    })
}

/// Options shared by every run dispatched through a [`GraphStore`].
///
/// [`GraphStore`]: crate::store::GraphStore
#[derive(Clone)]
pub struct ExecuteOptions {
    pub executor: AsyncExecutor,
    /// Lowest-precedence parameter layer under every run.
    pub params: Option<Arc<Params>>,
    /// Receives each run's event timeline on pooled-context release.
    pub event_reporter: Option<EventReporter>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            executor: tokio_executor(),
            params: None,
            event_reporter: None,
        }
    }
}
