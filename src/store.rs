//! The graph store: registered clusters, context pools, and run dispatch.
//!
//! A [`GraphStore`] holds every built cluster behind a handle with a pool of
//! reusable [`ClusterContext`]s. Dispatching a run borrows a context, wires
//! it under the caller's data context, and installs a release hook there: the
//! borrowed context goes back to its pool only when the caller's context is
//! reset, dropped, or reused for the next run, so outputs stay readable
//! after the completion callback fires.

use crate::data::DataContext;
use crate::graph::BuildError;
use crate::graph::build::GraphCluster;
use crate::params::{ExecParams, Params};
use crate::runtime::{ClusterContext, DoneClosure, ExecuteOptions};
use crate::types::CODE_DISPATCH_FAILED;
use crate::utils::time::ustime;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

/// A registered cluster plus its pool of reusable run contexts.
pub(crate) struct GraphClusterHandle {
    cluster: Arc<GraphCluster>,
    store: Weak<StoreInner>,
    options: ExecuteOptions,
    pool: Mutex<Vec<Arc<ClusterContext>>>,
    self_weak: Weak<GraphClusterHandle>,
}

impl GraphClusterHandle {
    fn acquire(&self) -> Result<Arc<ClusterContext>, BuildError> {
        if let Some(ctx) = self.pool.lock().pop() {
            return Ok(ctx);
        }
        ClusterContext::new(
            self.cluster.clone(),
            self.store.clone(),
            self.self_weak.clone(),
            self.options.executor.clone(),
            self.options.event_reporter.clone(),
        )
    }

    /// Return a reset context to the pool, keeping it bounded.
    pub(crate) fn reclaim(&self, ctx: Arc<ClusterContext>) {
        let mut pool = self.pool.lock();
        if pool.len() < self.cluster.pool_size {
            pool.push(ctx);
        }
    }
}

pub(crate) struct StoreInner {
    options: ExecuteOptions,
    clusters: RwLock<FxHashMap<String, Arc<GraphClusterHandle>>>,
    /// Contexts whose deferred release has not fired yet.
    inflight: Mutex<usize>,
    drained: Condvar,
}

impl StoreInner {
    /// Borrow a pooled context for a cluster by name.
    pub(crate) fn acquire_cluster(&self, name: &str) -> Option<Arc<ClusterContext>> {
        let handle = self.clusters.read().get(name)?.clone();
        match handle.acquire() {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                error!(cluster = name, %err, "context acquisition failed");
                None
            }
        }
    }

    fn inc_inflight(&self) {
        *self.inflight.lock() += 1;
    }

    pub(crate) fn dec_inflight(&self) {
        let mut inflight = self.inflight.lock();
        *inflight -= 1;
        if *inflight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Entry point: register clusters once, dispatch runs concurrently.
pub struct GraphStore {
    inner: Arc<StoreInner>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(ExecuteOptions::default())
    }
}

impl GraphStore {
    #[must_use]
    pub fn new(options: ExecuteOptions) -> Self {
        GraphStore {
            inner: Arc::new(StoreInner {
                options,
                clusters: RwLock::new(FxHashMap::default()),
                inflight: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }

    /// Parse, build, and register a cluster from its JSON definition.
    pub fn load_json(&self, json: &str) -> Result<(), BuildError> {
        self.register(GraphCluster::from_json(json)?)
    }

    /// Register a built cluster and prewarm its context pool.
    pub fn register(&self, cluster: Arc<GraphCluster>) -> Result<(), BuildError> {
        let name = cluster.name.clone();
        let pool_size = cluster.pool_size;
        let handle = Arc::new_cyclic(|self_weak| GraphClusterHandle {
            cluster,
            store: Arc::downgrade(&self.inner),
            options: self.inner.options.clone(),
            pool: Mutex::new(Vec::with_capacity(pool_size)),
            self_weak: self_weak.clone(),
        });
        let mut warmed = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            warmed.push(handle.acquire()?);
        }
        for ctx in warmed {
            handle.reclaim(ctx);
        }
        info!(cluster = %name, pool_size, "cluster registered");
        if self
            .inner
            .clusters
            .write()
            .insert(name.clone(), handle)
            .is_some()
        {
            warn!(cluster = %name, "replacing registered cluster");
        }
        Ok(())
    }

    /// Dispatch one run. `done` fires exactly once with the run's code;
    /// the return value reports whether dispatch itself succeeded.
    ///
    /// The caller's `data_ctx` becomes the run's root: extern inputs are
    /// read from it, and the run's outputs stay visible through it until it
    /// is reset, dropped, or reused for another run.
    #[tracing::instrument(level = "debug", skip(self, data_ctx, params, done))]
    pub fn execute(
        &self,
        data_ctx: &Arc<DataContext>,
        cluster: &str,
        graph: &str,
        params: Option<Arc<Params>>,
        done: DoneClosure,
        timeout_ms: u64,
    ) -> bool {
        let handle = self.inner.clusters.read().get(cluster).cloned();
        let Some(handle) = handle else {
            warn!(cluster, "run dispatched for unregistered cluster");
            done(CODE_DISPATCH_FAILED);
            return false;
        };
        let ctx = match handle.acquire() {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(cluster, %err, "context acquisition failed");
                done(CODE_DISPATCH_FAILED);
                return false;
            }
        };

        ctx.data_context().set_parent(data_ctx);
        data_ctx.add_child(ctx.data_context().clone());
        let mut scope = ExecParams::new();
        if let Some(params) = params {
            scope.push_layer(params);
        }
        if let Some(base) = &self.inner.options.params {
            scope.push_layer(base.clone());
        }
        ctx.set_run_scope(scope);
        if timeout_ms > 0 {
            ctx.set_deadline(ustime() + timeout_ms * 1000);
        }

        // Deferred release: the borrowed context returns to its pool when
        // the caller's data context lets go of this run. The child link is
        // severed first so the caller can never read into a context that
        // has been handed to someone else.
        self.inner.inc_inflight();
        let store = Arc::downgrade(&self.inner);
        let root = Arc::downgrade(data_ctx);
        let released = ctx.clone();
        data_ctx.set_release_hook(Box::new(move || {
            if let Some(root) = root.upgrade() {
                root.remove_child(released.data_context());
            }
            released.release();
            if let Some(store) = store.upgrade() {
                store.dec_inflight();
            }
        }));

        let graph = graph.to_string();
        (self.inner.options.executor)(Box::pin(ctx.run_graph(graph, done)));
        true
    }

    /// Dispatch a run and await its completion code.
    pub async fn run(
        &self,
        data_ctx: &Arc<DataContext>,
        cluster: &str,
        graph: &str,
        params: Option<Arc<Params>>,
        timeout_ms: u64,
    ) -> i32 {
        let (tx, rx) = flume::bounded(1);
        self.execute(
            data_ctx,
            cluster,
            graph,
            params,
            Box::new(move |code| {
                let _ = tx.send(code);
            }),
            timeout_ms,
        );
        rx.recv_async().await.unwrap_or(CODE_DISPATCH_FAILED)
    }

    /// Blocking variant of [`run`](GraphStore::run), for callers outside the
    /// async runtime.
    pub fn sync_execute(
        &self,
        data_ctx: &Arc<DataContext>,
        cluster: &str,
        graph: &str,
        params: Option<Arc<Params>>,
        timeout_ms: u64,
    ) -> i32 {
        let (tx, rx) = flume::bounded(1);
        self.execute(
            data_ctx,
            cluster,
            graph,
            params,
            Box::new(move |code| {
                let _ = tx.send(code);
            }),
            timeout_ms,
        );
        rx.recv().unwrap_or(CODE_DISPATCH_FAILED)
    }
}

impl Drop for GraphStore {
    fn drop(&mut self) {
        let mut inflight = self.inner.inflight.lock();
        while *inflight > 0 {
            let timed_out = self
                .inner
                .drained
                .wait_for(&mut inflight, Duration::from_secs(1))
                .timed_out();
            if timed_out {
                warn!(inflight = *inflight, "waiting for deferred context releases");
            }
        }
    }
}
