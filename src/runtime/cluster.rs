//! Per-run cluster orchestration.
//!
//! A [`ClusterContext`] is the pooled unit of execution for one cluster: it
//! owns the cluster-level data context where config flags are published,
//! lazily materializes a [`GraphContext`] per graph, carries the run's
//! parameter scope and deadline, and accumulates the event timeline drained
//! on release. Contexts are reused: [`reset`](ClusterContext::reset) returns
//! one to a clean state without rebuilding processor instances.

use crate::data::DataContext;
use crate::graph::BuildError;
use crate::graph::build::GraphCluster;
use crate::params::ExecParams;
use crate::processor::{Processor, VertexIo};
use crate::runtime::graph_ctx::GraphContext;
use crate::runtime::vertex::configured_instance;
use crate::runtime::{AsyncExecutor, DoneClosure};
use crate::store::{GraphClusterHandle, StoreInner};
use crate::trace::{DagEvent, DagEventPhase, DagEventTracker, EventReporter};
use crate::types::{CODE_DISPATCH_FAILED, VertexResult};
use crate::utils::time::ustime;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

pub struct ClusterContext {
    cluster: Arc<GraphCluster>,
    store: Weak<StoreInner>,
    handle: Weak<GraphClusterHandle>,
    data_ctx: Arc<DataContext>,
    graphs: Mutex<FxHashMap<String, Arc<GraphContext>>>,
    /// Config evaluators, instantiated and configured once per context.
    config: Vec<(String, Arc<dyn Processor>)>,
    run_scope: RwLock<ExecParams>,
    /// Absolute deadline in epoch microseconds; `0` means none.
    deadline_us: AtomicU64,
    tracker: Arc<DagEventTracker>,
    reporter: Option<EventReporter>,
    executor: AsyncExecutor,
}

impl ClusterContext {
    pub(crate) fn new(
        cluster: Arc<GraphCluster>,
        store: Weak<StoreInner>,
        handle: Weak<GraphClusterHandle>,
        executor: AsyncExecutor,
        reporter: Option<EventReporter>,
    ) -> Result<Arc<Self>, BuildError> {
        let data_ctx = DataContext::new();
        let mut config = Vec::with_capacity(cluster.config_settings.len());
        for setting in &cluster.config_settings {
            let instance = configured_instance(&setting.meta, &setting.args, &setting.name)?;
            let _ = data_ctx.register(setting.name.clone());
            config.push((setting.name.clone(), instance));
        }
        Ok(Arc::new(ClusterContext {
            cluster,
            store,
            handle,
            data_ctx,
            graphs: Mutex::new(FxHashMap::default()),
            config,
            run_scope: RwLock::new(ExecParams::new()),
            deadline_us: AtomicU64::new(0),
            tracker: Arc::new(DagEventTracker::default()),
            reporter,
            executor,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    #[must_use]
    pub fn data_context(&self) -> &Arc<DataContext> {
        &self.data_ctx
    }

    pub(crate) fn expr_meta(&self) -> &Arc<crate::processor::ProcessorMeta> {
        &self.cluster.expr_meta
    }

    pub(crate) fn executor(&self) -> AsyncExecutor {
        self.executor.clone()
    }

    pub(crate) fn tracker(&self) -> &Arc<DagEventTracker> {
        &self.tracker
    }

    /// Current layered parameter scope of the run.
    #[must_use]
    pub fn run_scope(&self) -> ExecParams {
        self.run_scope.read().clone()
    }

    pub(crate) fn set_run_scope(&self, scope: ExecParams) {
        *self.run_scope.write() = scope;
    }

    pub(crate) fn set_deadline(&self, deadline_us: u64) {
        self.deadline_us.store(deadline_us, Ordering::Release);
    }

    pub(crate) fn inherit_deadline(&self, parent: &Arc<ClusterContext>) {
        self.set_deadline(parent.deadline_us.load(Ordering::Acquire));
    }

    pub(crate) fn deadline_exceeded(&self) -> bool {
        let deadline = self.deadline_us.load(Ordering::Acquire);
        deadline != 0 && ustime() > deadline
    }

    /// The per-run context of a graph, created on first use and reused
    /// across pooled runs.
    pub(crate) fn graph_context(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Arc<GraphContext>, BuildError> {
        if let Some(gctx) = self.graphs.lock().get(name) {
            return Ok(gctx.clone());
        }
        let graph = self
            .cluster
            .graph(name)
            .ok_or_else(|| BuildError::UnknownGraph {
                graph: name.to_string(),
            })?
            .clone();
        let gctx = GraphContext::new(graph, self)?;
        let gctx = self
            .graphs
            .lock()
            .entry(name.to_string())
            .or_insert(gctx)
            .clone();
        // Child link makes the graph's outputs visible to lookups that
        // enter through the cluster (and the caller's context above it).
        self.data_ctx.add_child(gctx.data_context().clone());
        Ok(gctx)
    }

    /// Borrow a pooled context of a sibling cluster from the shared store.
    pub(crate) fn acquire_sibling_cluster(&self, name: &str) -> Option<Arc<ClusterContext>> {
        self.store.upgrade()?.acquire_cluster(name)
    }

    /// Evaluate every `config_setting` against the run scope and publish the
    /// outcomes as boolean flags in the cluster data context.
    async fn eval_config(&self) {
        if self.config.is_empty() {
            return;
        }
        let scope = self.run_scope();
        let started = ustime();
        for (name, evaluator) in &self.config {
            let mut io = VertexIo::new(self.data_ctx.clone());
            let code = evaluator.execute(&mut io, &scope).await;
            let _ = self.data_ctx.set(name, code == 0);
        }
        self.tracker.record(DagEvent {
            phase: DagEventPhase::ConfigEval,
            graph: String::new(),
            vertex: String::new(),
            processor: String::new(),
            start_us: started,
            end_us: ustime(),
            code: 0,
            result: Some(VertexResult::Ok),
        });
    }

    /// Entry point for one run: evaluate config flags, then drive the named
    /// graph. `done` always fires exactly once.
    pub(crate) async fn run_graph(self: Arc<Self>, graph: String, done: DoneClosure) {
        let gctx = match self.graph_context(&graph) {
            Ok(gctx) => gctx,
            Err(err) => {
                error!(cluster = %self.cluster.name, %graph, %err, "run dispatch failed");
                done(CODE_DISPATCH_FAILED);
                return;
            }
        };
        self.eval_config().await;
        gctx.run(done).await;
    }

    /// Return the context to a clean state for the next pooled run.
    pub(crate) fn reset(&self) {
        let graphs = self.graphs.lock();
        for gctx in graphs.values() {
            gctx.reset();
        }
        self.data_ctx.reset();
        // A reset drops every tree link; restore the cluster-internal ones.
        for gctx in graphs.values() {
            gctx.data_context().set_parent(&self.data_ctx);
            self.data_ctx.add_child(gctx.data_context().clone());
        }
        drop(graphs);
        self.set_deadline(0);
        *self.run_scope.write() = ExecParams::new();
    }

    /// Reset and hand the context back to its pool, draining the event
    /// timeline to the configured reporter.
    pub(crate) fn release(self: &Arc<Self>) {
        let released_at = ustime();
        self.reset();
        if let Some(reporter) = &self.reporter {
            let mut events = self.tracker.drain();
            events.push(DagEvent {
                phase: DagEventPhase::ContextRelease,
                graph: String::new(),
                vertex: String::new(),
                processor: String::new(),
                start_us: released_at,
                end_us: ustime(),
                code: 0,
                result: None,
            });
            reporter(events);
        } else if !self.tracker.is_empty() {
            let _ = self.tracker.drain();
        }
        if let Some(handle) = self.handle.upgrade() {
            handle.reclaim(self.clone());
        }
    }
}
