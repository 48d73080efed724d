//! Per-run vertex state.
//!
//! A [`VertexContext`] pairs a static [`Vertex`] with the mutable pieces of
//! one run: the atomic dependency countdown, the per-dependency result
//! slots, the settled result, and the processor instance. Dependency slots
//! are single-fire — a slot transitions away from `RESULT_INVALID` exactly
//! once, and only that transition decrements the countdown, so a vertex can
//! never become ready twice no matter how settles interleave.

use crate::graph::build::Vertex;
use crate::graph::BuildError;
use crate::params::Params;
use crate::processor::expr::{EXPR_ARG_KEY, is_cond_expr};
use crate::processor::registry::ProcessorMeta;
use crate::processor::Processor;
use crate::runtime::ClusterContext;
use crate::types::{RESULT_INVALID, VertexResult};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering};

pub struct VertexContext {
    pub(crate) vertex: Arc<Vertex>,
    /// Shared processor instance, configured once at context creation.
    pub(crate) processor: Option<Arc<dyn Processor>>,
    /// Evaluators for expression-form `select_args` branches; `None` slots
    /// are plain config-flag names checked against the data context.
    pub(crate) select_exprs: Vec<Option<Arc<dyn Processor>>>,
    waiting: AtomicU32,
    dep_results: Vec<AtomicU8>,
    result: AtomicU8,
    code: AtomicI32,
    /// Pooled context borrowed for a cross-cluster sub-run, returned on
    /// reset so the caller's data context can keep reading its outputs.
    pub(crate) sub_ctx: Mutex<Option<Arc<ClusterContext>>>,
}

impl VertexContext {
    pub(crate) fn new(
        vertex: Arc<Vertex>,
        expr_meta: &Arc<ProcessorMeta>,
    ) -> Result<Self, BuildError> {
        let processor = match &vertex.meta {
            Some(meta) => Some(configured_instance(meta, &vertex.args, &vertex.id)?),
            None => None,
        };
        let mut select_exprs = Vec::with_capacity(vertex.select_args.len());
        for sel in &vertex.select_args {
            if is_cond_expr(&sel.when) {
                let args = Params::new(json!({ EXPR_ARG_KEY: sel.when.clone() }));
                select_exprs.push(Some(configured_instance(expr_meta, &args, &vertex.id)?));
            } else {
                select_exprs.push(None);
            }
        }
        let deps = vertex.deps.len();
        Ok(VertexContext {
            waiting: AtomicU32::new(deps as u32),
            dep_results: (0..deps).map(|_| AtomicU8::new(RESULT_INVALID)).collect(),
            result: AtomicU8::new(RESULT_INVALID),
            code: AtomicI32::new(0),
            sub_ctx: Mutex::new(None),
            vertex,
            processor,
            select_exprs,
        })
    }

    /// Record a dependency's settled result. Returns true when this call
    /// consumed the vertex's last outstanding dependency.
    pub(crate) fn on_dependency(&self, dep_idx: usize, result: VertexResult) -> bool {
        let Some(&slot) = self.vertex.dep_slot.get(&dep_idx) else {
            return false;
        };
        if self.dep_results[slot]
            .compare_exchange(
                RESULT_INVALID,
                result.mask(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.waiting.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// True when every dependency's recorded result intersects its edge's
    /// expected mask.
    pub(crate) fn deps_satisfied(&self) -> bool {
        self.vertex.deps.iter().enumerate().all(|(slot, dep)| {
            self.dep_results[slot].load(Ordering::Acquire) & dep.mask != 0
        })
    }

    pub(crate) fn settle(&self, result: VertexResult, code: i32) {
        self.code.store(code, Ordering::Release);
        self.result.store(result.mask(), Ordering::Release);
    }

    /// Settled result, `None` while still pending.
    #[must_use]
    pub fn result(&self) -> Option<VertexResult> {
        VertexResult::from_slot(self.result.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn code(&self) -> i32 {
        self.code.load(Ordering::Acquire)
    }

    /// Clear scheduling state only; data values and processor state stay,
    /// which is what lets while-loop bodies accumulate across iterations.
    pub(crate) fn reset_state(&self) {
        self.waiting
            .store(self.vertex.deps.len() as u32, Ordering::Release);
        for slot in &self.dep_results {
            slot.store(RESULT_INVALID, Ordering::Release);
        }
        self.result.store(RESULT_INVALID, Ordering::Release);
        self.code.store(0, Ordering::Release);
    }

    /// Full reset between pooled runs: scheduling state, processor state,
    /// and any borrowed sub-run context.
    pub(crate) fn reset(&self) {
        self.reset_state();
        if let Some(processor) = &self.processor {
            processor.reset();
        }
        for expr in self.select_exprs.iter().flatten() {
            expr.reset();
        }
        let sub = self.sub_ctx.lock().take();
        if let Some(sub) = sub {
            sub.release();
        }
    }
}

pub(crate) fn configured_instance(
    meta: &Arc<ProcessorMeta>,
    args: &Params,
    vertex: &str,
) -> Result<Arc<dyn Processor>, BuildError> {
    let mut instance = meta.instantiate();
    let code = instance.setup(args);
    if code != 0 {
        return Err(BuildError::ProcessorSetup {
            vertex: vertex.to_string(),
            processor: meta.name.clone(),
            code,
        });
    }
    Ok(Arc::from(instance))
}
