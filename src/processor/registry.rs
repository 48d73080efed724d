//! Process-wide processor registry.
//!
//! Processors are registered once at startup under a unique name; the build
//! pass resolves vertex processor names against this table and merges the
//! registered default input/output declarations into each vertex, which is
//! what lets graph definitions omit wiring the registry already knows.

use crate::graph::DataDef;
use crate::processor::expr::ExprProcessor;
use crate::processor::{ExecFn, FnProcessor, Processor};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, LazyLock};
use tracing::warn;

/// Name of the built-in expression evaluator, used as the cluster
/// `default_expr_processor` when none is configured.
pub const DEFAULT_EXPR_PROCESSOR: &str = "dagflow_expr";

/// Registered descriptor for a processor: scheduling hints, default I/O
/// declarations, and the instance factory.
pub struct ProcessorMeta {
    pub name: String,
    /// I/O-bound processors are never picked for inline execution when a
    /// ready batch fans out.
    pub io_bound: bool,
    pub inputs: Vec<DataDef>,
    pub outputs: Vec<DataDef>,
    factory: Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>,
}

impl ProcessorMeta {
    /// Build a fresh, un-setup instance.
    #[must_use]
    pub fn instantiate(&self) -> Box<dyn Processor> {
        (self.factory)()
    }
}

static REGISTRY: LazyLock<RwLock<FxHashMap<String, Arc<ProcessorMeta>>>> = LazyLock::new(|| {
    let mut map = FxHashMap::default();
    map.insert(
        DEFAULT_EXPR_PROCESSOR.to_string(),
        Arc::new(ProcessorMeta {
            name: DEFAULT_EXPR_PROCESSOR.to_string(),
            io_bound: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            factory: Box::new(|| Box::new(ExprProcessor::default())),
        }),
    );
    RwLock::new(map)
});

/// Register a processor under `name`. Re-registering replaces the previous
/// entry with a warning; graphs already built keep the old factory.
pub fn register_processor<F>(
    name: &str,
    io_bound: bool,
    inputs: Vec<DataDef>,
    outputs: Vec<DataDef>,
    factory: F,
) where
    F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
{
    let meta = Arc::new(ProcessorMeta {
        name: name.to_string(),
        io_bound,
        inputs,
        outputs,
        factory: Box::new(factory),
    });
    if REGISTRY.write().insert(name.to_string(), meta).is_some() {
        warn!(processor = name, "replacing registered processor");
    }
}

/// Register a closure-backed processor. The closure is shared across all
/// instances, so per-vertex state belongs in the data context, not in
/// captured variables.
pub fn register_func_processor<F>(name: &str, inputs: Vec<DataDef>, outputs: Vec<DataDef>, exec: F)
where
    F: for<'a> Fn(
            &'a mut crate::processor::VertexIo,
            &'a crate::params::ExecParams,
        ) -> futures_util::future::BoxFuture<'a, i32>
        + Send
        + Sync
        + 'static,
{
    let exec: Arc<ExecFn> = Arc::new(exec);
    register_processor(name, false, inputs, outputs, move || {
        Box::new(FnProcessor::new(exec.clone()))
    });
}

/// Look up a registered descriptor.
#[must_use]
pub fn processor_meta(name: &str) -> Option<Arc<ProcessorMeta>> {
    REGISTRY.read().get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn builtin_expr_is_always_present() {
        let meta = processor_meta(DEFAULT_EXPR_PROCESSOR).unwrap();
        assert!(!meta.io_bound);
        let _instance = meta.instantiate();
    }

    #[test]
    fn func_registration_resolves() {
        register_func_processor(
            "registry_test_noop",
            Vec::new(),
            vec![DataDef::named("out")],
            |io, _args| {
                async move {
                    io.emit("out", 1i64);
                    0
                }
                .boxed()
            },
        );
        let meta = processor_meta("registry_test_noop").unwrap();
        assert_eq!(meta.outputs.len(), 1);
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(processor_meta("registry_test_absent").is_none());
    }
}
