//! Graph scheduler.
//!
//! A [`GraphContext`] drives one graph to completion: start vertices fan
//! out, each settle feeds successor countdowns, and an atomic join counter
//! fires the completion callback when the last vertex settles. Fan-out
//! keeps one ready vertex on the current task: with a batch, the first
//! non-I/O-bound vertex runs inline and the rest are handed to the
//! executor.

use crate::data::DataContext;
use crate::graph::BuildError;
use crate::graph::build::{Graph, Vertex};
use crate::params::ExecParams;
use crate::processor::VertexIo;
use crate::runtime::vertex::VertexContext;
use crate::runtime::{AsyncExecutor, ClusterContext, DoneClosure, tokio_executor};
use crate::trace::{DagEvent, DagEventPhase};
use crate::types::{CODE_DISPATCH_FAILED, VertexResult};
use crate::utils::time::ustime;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

pub struct GraphContext {
    pub(crate) graph: Arc<Graph>,
    cluster: Weak<ClusterContext>,
    pub(crate) vertices: Vec<VertexContext>,
    data_ctx: Arc<DataContext>,
    join: AtomicU32,
    done: Mutex<Option<DoneClosure>>,
    exit_code: AtomicI32,
    exit_set: AtomicBool,
}

impl GraphContext {
    pub(crate) fn new(
        graph: Arc<Graph>,
        cluster: &Arc<ClusterContext>,
    ) -> Result<Arc<Self>, BuildError> {
        let data_ctx = DataContext::new();
        let mut vertices = Vec::with_capacity(graph.vertices.len());
        for v in &graph.vertices {
            vertices.push(VertexContext::new(v.clone(), cluster.expr_meta())?);
            for out in &v.outputs {
                let _ = data_ctx.register(out.data_id());
            }
        }
        data_ctx.set_parent(cluster.data_context());
        Ok(Arc::new(GraphContext {
            graph,
            cluster: Arc::downgrade(cluster),
            vertices,
            data_ctx,
            join: AtomicU32::new(0),
            done: Mutex::new(None),
            exit_code: AtomicI32::new(0),
            exit_set: AtomicBool::new(false),
        }))
    }

    /// The data context holding this graph's outputs for the current run.
    #[must_use]
    pub fn data_context(&self) -> &Arc<DataContext> {
        &self.data_ctx
    }

    /// Settled result of a vertex by id, for inspection after a run.
    #[must_use]
    pub fn vertex_result(&self, id: &str) -> Option<VertexResult> {
        let idx = *self.graph.by_id.get(id)?;
        self.vertices[idx].result()
    }

    fn executor(&self) -> AsyncExecutor {
        self.cluster
            .upgrade()
            .map_or_else(tokio_executor, |c| c.executor())
    }

    /// Run the graph once. `done` fires from whichever task settles the
    /// final vertex.
    pub(crate) async fn run(self: Arc<Self>, done: DoneClosure) {
        {
            let mut slot = self.done.lock();
            if slot.is_some() {
                warn!(graph = %self.graph.name, "graph context already running");
                done(CODE_DISPATCH_FAILED);
                return;
            }
            *slot = Some(done);
        }
        if self.vertices.is_empty() {
            let done = self.done.lock().take();
            if let Some(done) = done {
                done(0);
            }
            return;
        }
        self.join
            .store(self.vertices.len() as u32, Ordering::Release);
        self.exit_set.store(false, Ordering::Release);
        self.exit_code.store(0, Ordering::Release);
        self.data_ctx.freeze();
        let start = self.graph.start.clone();
        self.dispatch(start).await;
    }

    /// Fan a ready set out. Exactly one vertex stays on the current task:
    /// the first non-I/O-bound one, or the first in the batch when every
    /// candidate is I/O-bound.
    async fn dispatch(self: Arc<Self>, ready: Vec<usize>) {
        if ready.is_empty() {
            return;
        }
        if ready.len() == 1 {
            self.run_vertex(ready[0]).await;
            return;
        }
        let inline = ready
            .iter()
            .position(|&idx| !self.vertices[idx].vertex.io_bound)
            .unwrap_or(0);
        let executor = self.executor();
        for (i, &idx) in ready.iter().enumerate() {
            if i != inline {
                executor(self.clone().run_vertex(idx));
            }
        }
        self.run_vertex(ready[inline]).await;
    }

    /// Boxing seam breaking the settle -> dispatch -> run recursion.
    fn run_vertex(self: Arc<Self>, idx: usize) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.execute_vertex(idx).await })
    }

    async fn execute_vertex(self: Arc<Self>, idx: usize) {
        let v = self.vertices[idx].vertex.clone();
        let cluster = self.cluster.upgrade();

        if !self.vertices[idx].deps_satisfied() {
            return self.finish(idx, VertexResult::Skip, 0).await;
        }
        if let Some(c) = &cluster
            && c.deadline_exceeded()
        {
            debug!(graph = %self.graph.name, vertex = %v.id, "deadline passed");
            return self.finish(idx, VertexResult::Skip, 0).await;
        }
        if !v.expect_config.is_empty() && !self.config_gate_open(&v.expect_config) {
            return self.finish(idx, VertexResult::Skip, 0).await;
        }

        let params = self.resolve_exec_params(idx, cluster.as_ref()).await;
        let started = ustime();
        let (result, code, raw) = if v.is_sub_graph() {
            let raw = self.run_sub_graph(idx, &params, cluster.as_ref()).await;
            let code = if v.ignore_exec_error && !v.is_cond_type {
                0
            } else {
                raw
            };
            (VertexResult::from_code(code), code, raw)
        } else {
            self.run_processor(idx, &params).await
        };
        if let Some(c) = &cluster {
            c.tracker().record(DagEvent {
                phase: if v.is_sub_graph() {
                    DagEventPhase::SubGraph
                } else {
                    DagEventPhase::VertexExecute
                },
                graph: self.graph.name.clone(),
                vertex: v.id.clone(),
                processor: v.processor.clone(),
                start_us: started,
                end_us: ustime(),
                code: raw,
                result: Some(result),
            });
        }
        self.finish(idx, result, code).await;
    }

    async fn run_processor(&self, idx: usize, params: &ExecParams) -> (VertexResult, i32, i32) {
        let vc = &self.vertices[idx];
        let v = &vc.vertex;
        let Some(processor) = vc.processor.clone() else {
            // Non-strict cluster with an unregistered processor.
            return (VertexResult::Ok, 0, 0);
        };
        let mut io = VertexIo::new(self.data_ctx.clone());
        if let Err(err) = io.inject(&v.inputs) {
            debug!(graph = %self.graph.name, vertex = %v.id, %err, "input injection failed");
            return (VertexResult::Skip, 0, 0);
        }
        let raw = match AssertUnwindSafe(processor.execute(&mut io, params))
            .catch_unwind()
            .await
        {
            Ok(code) => code,
            Err(_) => {
                error!(graph = %self.graph.name, vertex = %v.id, "processor panicked");
                CODE_DISPATCH_FAILED
            }
        };
        if raw == 0 {
            io.publish(&v.outputs);
        }
        let code = if v.ignore_exec_error && !v.is_cond_type {
            0
        } else {
            raw
        };
        (VertexResult::from_code(code), code, raw)
    }

    async fn run_sub_graph(
        &self,
        idx: usize,
        params: &ExecParams,
        cluster: Option<&Arc<ClusterContext>>,
    ) -> i32 {
        let v = self.vertices[idx].vertex.clone();
        let Some(cluster) = cluster else {
            return CODE_DISPATCH_FAILED;
        };
        if v.sub_cluster.is_empty() || v.sub_cluster == cluster.name() {
            // Sibling graph, executed inside the same cluster context.
            let sub = match cluster.graph_context(&v.sub_graph) {
                Ok(sub) => sub,
                Err(err) => {
                    error!(vertex = %v.id, %err, "sub-graph unavailable");
                    return CODE_DISPATCH_FAILED;
                }
            };
            sub.data_context().set_parent(&self.data_ctx);
            self.data_ctx.add_child(sub.data_context().clone());
            if v.is_loop {
                self.drive_loop(&sub, &v).await
            } else {
                run_to_completion(&sub, None).await
            }
        } else {
            let Some(sub_ctx) = cluster.acquire_sibling_cluster(&v.sub_cluster) else {
                error!(vertex = %v.id, cluster = %v.sub_cluster, "cluster unavailable");
                return CODE_DISPATCH_FAILED;
            };
            sub_ctx.data_context().set_parent(&self.data_ctx);
            sub_ctx.set_run_scope(params.clone());
            sub_ctx.inherit_deadline(cluster);
            let (tx, rx) = flume::bounded(1);
            sub_ctx
                .clone()
                .run_graph(
                    v.sub_graph.clone(),
                    Box::new(move |code| {
                        let _ = tx.send(code);
                    }),
                )
                .await;
            let code = rx.recv_async().await.unwrap_or(CODE_DISPATCH_FAILED);
            if let Ok(sub) = sub_ctx.graph_context(&v.sub_graph) {
                self.data_ctx.add_child(sub.data_context().clone());
            }
            // Held until reset so the outputs stay readable.
            *self.vertices[idx].sub_ctx.lock() = Some(sub_ctx);
            code
        }
    }

    /// Drive a synthesized while-loop graph: re-run while its condition
    /// vertex settles OK, clearing only scheduling state in between.
    async fn drive_loop(&self, sub: &Arc<GraphContext>, v: &Vertex) -> i32 {
        let executor = if v.loop_async {
            Some(self.executor())
        } else {
            None
        };
        let Some(cond) = sub.graph.loop_cond else {
            return run_to_completion(sub, executor).await;
        };
        loop {
            let code = run_to_completion(sub, executor.clone()).await;
            if code != 0 {
                return code;
            }
            if sub.vertices[cond].result() != Some(VertexResult::Ok) {
                return 0;
            }
            sub.reset_state();
        }
    }

    /// Evaluate an `expect_config` gate against published config flags. An
    /// unset flag closes the gate.
    fn config_gate_open(&self, gate: &str) -> bool {
        let (negated, name) = match gate.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, gate),
        };
        let value = self.data_ctx.get::<bool>(name).is_some_and(|b| *b);
        value != negated
    }

    /// Build the layered parameter scope: the matched `select_args` branch
    /// first, then the vertex's own args, then the caller's run scope.
    async fn resolve_exec_params(
        &self,
        idx: usize,
        cluster: Option<&Arc<ClusterContext>>,
    ) -> ExecParams {
        let vc = &self.vertices[idx];
        let v = &vc.vertex;
        let caller = cluster.map(|c| c.run_scope()).unwrap_or_default();
        let mut scope = ExecParams::new();
        for (i, sel) in v.select_args.iter().enumerate() {
            let hit = match &vc.select_exprs[i] {
                Some(expr) => {
                    let mut io = VertexIo::new(self.data_ctx.clone());
                    AssertUnwindSafe(expr.execute(&mut io, &caller))
                        .catch_unwind()
                        .await
                        .unwrap_or(1)
                        == 0
                }
                None => self.config_gate_open(&sel.when),
            };
            if hit {
                scope.push_layer(sel.args.clone());
                break;
            }
        }
        scope.push_layer(v.args.clone());
        scope.extend(&caller);
        scope
    }

    async fn finish(self: Arc<Self>, idx: usize, result: VertexResult, code: i32) {
        let v = self.vertices[idx].vertex.clone();
        if result == VertexResult::Skip {
            self.apply_skip_moves(&v);
        }
        self.vertices[idx].settle(result, code);
        debug!(graph = %self.graph.name, vertex = %v.id, %result, code, "vertex settled");

        // Skips are the normal gate/deadline signal; only a hard failure
        // latches the run code.
        if result == VertexResult::Err
            && (self.graph.early_exit || v.early_exit)
            && !self.exit_set.swap(true, Ordering::AcqRel)
        {
            let latched = if code != 0 { code } else { CODE_DISPATCH_FAILED };
            self.exit_code.store(latched, Ordering::Release);
        }

        let mapped = if result == VertexResult::Skip && self.graph.vertex_skip_as_error {
            VertexResult::Err
        } else {
            result
        };
        let mut ready = Vec::new();
        for &s in &v.successors {
            if self.vertices[s].on_dependency(idx, mapped) {
                ready.push(s);
            }
        }
        if self.join.fetch_sub(1, Ordering::AcqRel) == 1 {
            let done = self.done.lock().take();
            if let Some(done) = done {
                done(self.exit_code.load(Ordering::Acquire));
            }
        }
        if !ready.is_empty() {
            self.dispatch(ready).await;
        }
    }

    fn apply_skip_moves(&self, v: &Vertex) {
        for def in &v.outputs {
            if !def.move_from_when_skipped.is_empty()
                && self
                    .data_ctx
                    .move_value(&def.move_from_when_skipped, def.data_id())
                    .is_err()
            {
                debug!(vertex = %v.id, from = %def.move_from_when_skipped, "skip-move source absent");
            }
        }
    }

    /// Clear scheduling state only, between while-loop iterations.
    pub(crate) fn reset_state(&self) {
        for vc in &self.vertices {
            vc.reset_state();
        }
    }

    /// Full reset between pooled runs.
    pub(crate) fn reset(&self) {
        for vc in &self.vertices {
            vc.reset();
        }
        *self.done.lock() = None;
        self.exit_set.store(false, Ordering::Release);
        self.exit_code.store(0, Ordering::Release);
        self.data_ctx.reset();
    }
}

/// Run a graph context and await its completion code. With an executor the
/// run is dispatched as a task; otherwise it is driven inline.
pub(crate) async fn run_to_completion(
    sub: &Arc<GraphContext>,
    executor: Option<AsyncExecutor>,
) -> i32 {
    let (tx, rx) = flume::bounded(1);
    let done: DoneClosure = Box::new(move |code| {
        let _ = tx.send(code);
    });
    match executor {
        Some(executor) => executor(Box::pin(sub.clone().run(done))),
        None => sub.clone().run(done).await,
    }
    rx.recv_async().await.unwrap_or(CODE_DISPATCH_FAILED)
}
