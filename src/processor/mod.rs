//! The processor plugin seam.
//!
//! A [`Processor`] is the unit of user logic bound to a vertex. Instances
//! are configured once via [`setup`](Processor::setup) while still
//! exclusively owned, then shared behind an `Arc` and executed at most once
//! per run. State that must survive `execute(&self)` (counters, caches)
//! lives behind interior mutability and is cleared by
//! [`reset`](Processor::reset) between pooled runs.
//!
//! Execution codes are plain `i32`: `0` is success, anything else a
//! domain-defined failure. For condition vertices the code doubles as the
//! branch selector (`0` fires `if` successors, non-zero fires `else`).

pub mod expr;
pub mod registry;

pub use expr::ExprProcessor;
pub use registry::{
    DEFAULT_EXPR_PROCESSOR, ProcessorMeta, processor_meta, register_func_processor,
    register_processor,
};

use crate::data::{AnyValue, DataContext, DataContextError};
use crate::graph::DataDef;
use crate::params::{ExecParams, Params};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::warn;

/// User logic bound to a vertex.
#[async_trait]
pub trait Processor: Send + Sync {
    /// One-time configuration with the vertex's static args, before the
    /// instance is shared. `0` accepts the configuration.
    fn setup(&mut self, _args: &Params) -> i32 {
        0
    }

    /// Run once per graph execution. Inputs are already injected into `io`;
    /// outputs staged through [`VertexIo::emit`] are published only after a
    /// successful settle.
    async fn execute(&self, io: &mut VertexIo, args: &ExecParams) -> i32;

    /// Clear accumulated interior state between pooled runs.
    fn reset(&self) {}
}

/// Per-execution view of a vertex's declared inputs and outputs.
///
/// Inputs are resolved from the data context tree before `execute` starts;
/// outputs are staged locally and published by the scheduler afterwards, so
/// concurrent vertices never observe half-written results.
pub struct VertexIo {
    ctx: Arc<DataContext>,
    inputs: FxHashMap<String, AnyValue>,
    aggregates: FxHashMap<String, Vec<AnyValue>>,
    staged: FxHashMap<String, AnyValue>,
}

impl VertexIo {
    pub(crate) fn new(ctx: Arc<DataContext>) -> Self {
        VertexIo {
            ctx,
            inputs: FxHashMap::default(),
            aggregates: FxHashMap::default(),
            staged: FxHashMap::default(),
        }
    }

    /// Inject declared inputs. A missing `required` entry aborts injection.
    pub(crate) fn inject(&mut self, defs: &[DataDef]) -> Result<(), DataContextError> {
        for def in defs {
            if !def.aggregate.is_empty() {
                let mut values = Vec::with_capacity(def.aggregate.len());
                for id in &def.aggregate {
                    if let Some(value) = self.ctx.get_any(id) {
                        values.push(value);
                    }
                }
                if def.required && values.is_empty() {
                    return Err(DataContextError::Missing {
                        name: def.field.clone(),
                    });
                }
                self.aggregates.insert(def.field.clone(), values);
                continue;
            }
            let id = def.data_id();
            let value = if def.move_data {
                self.ctx.take_any(id)
            } else {
                self.ctx.get_any(id)
            };
            match value {
                Some(value) => {
                    self.inputs.insert(def.field.clone(), value);
                }
                None if def.required => {
                    return Err(DataContextError::Missing {
                        name: id.to_string(),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Typed input by processor-side field name.
    #[must_use]
    pub fn input<T: Any + Send + Sync>(&self, field: &str) -> Option<Arc<T>> {
        self.inputs.get(field)?.clone().downcast::<T>().ok()
    }

    /// All values collected for an aggregate input, dropping entries of the
    /// wrong type.
    #[must_use]
    pub fn aggregate<T: Any + Send + Sync>(&self, field: &str) -> Vec<Arc<T>> {
        self.aggregates
            .get(field)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.clone().downcast::<T>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stage a typed output under its field name.
    pub fn emit<T: Send + Sync + 'static>(&mut self, field: &str, value: T) {
        self.staged.insert(field.to_string(), Arc::new(value));
    }

    /// Stage an already type-erased output.
    pub fn emit_any(&mut self, field: &str, value: AnyValue) {
        self.staged.insert(field.to_string(), value);
    }

    /// The data context this execution resolves against. Expression
    /// processors use it to read flags outside the declared inputs.
    #[must_use]
    pub fn data_context(&self) -> &Arc<DataContext> {
        &self.ctx
    }

    /// Publish staged outputs into the data context after a successful run.
    pub(crate) fn publish(&mut self, defs: &[DataDef]) {
        for def in defs {
            if let Some(value) = self.staged.remove(&def.field)
                && let Err(err) = self.ctx.set_any(def.data_id(), value)
            {
                warn!(field = %def.field, %err, "dropping unpublishable output");
            }
        }
    }
}

/// Boxed execution closure backing [`FnProcessor`].
pub type ExecFn =
    dyn for<'a> Fn(&'a mut VertexIo, &'a ExecParams) -> BoxFuture<'a, i32> + Send + Sync;

/// Adapter turning a closure into a [`Processor`], used by the builder API
/// and [`register_func_processor`].
pub struct FnProcessor {
    exec: Arc<ExecFn>,
}

impl FnProcessor {
    #[must_use]
    pub fn new(exec: Arc<ExecFn>) -> Self {
        FnProcessor { exec }
    }
}

#[async_trait]
impl Processor for FnProcessor {
    async fn execute(&self, io: &mut VertexIo, args: &ExecParams) -> i32 {
        (self.exec)(io, args).await
    }
}
