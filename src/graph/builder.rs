//! Fluent, code-first construction of cluster definitions.
//!
//! The JSON dialect stays the source of truth; these builders produce the
//! same [`GraphClusterDef`] structures for callers that assemble graphs in
//! Rust, typically in tests or embedding code that registers closure-backed
//! processors next to the wiring.

use crate::graph::build::{BuildError, GraphCluster};
use crate::graph::{ConfigSettingDef, CondParams, DataDef, GraphClusterDef, GraphDef, VertexDef};
use crate::params::Params;
use crate::processor::register_func_processor;
use serde_json::Value;
use std::sync::Arc;

/// Builds a [`GraphClusterDef`] and optionally the cluster itself.
#[derive(Default)]
pub struct GraphClusterBuilder {
    def: GraphClusterDef,
}

impl GraphClusterBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        GraphClusterBuilder {
            def: GraphClusterDef {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn strict_dsl(mut self, strict: bool) -> Self {
        self.def.strict_dsl = strict;
        self
    }

    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.def.default_context_pool_size = size;
        self
    }

    #[must_use]
    pub fn expr_processor(mut self, name: impl Into<String>) -> Self {
        self.def.default_expr_processor = name.into();
        self
    }

    /// Add a cluster-wide boolean flag evaluated once per run.
    #[must_use]
    pub fn config_setting(mut self, name: impl Into<String>, cond: impl Into<String>) -> Self {
        self.def.config_setting.push(ConfigSettingDef {
            name: name.into(),
            cond: cond.into(),
            processor: String::new(),
        });
        self
    }

    #[must_use]
    pub fn graph(mut self, graph: GraphBuilder) -> Self {
        self.def.graph.push(graph.into_def());
        self
    }

    #[must_use]
    pub fn into_def(self) -> GraphClusterDef {
        self.def
    }

    /// Run the build pass over the assembled definition.
    pub fn build(self) -> Result<Arc<GraphCluster>, BuildError> {
        GraphCluster::build(self.def)
    }
}

/// Builds one [`GraphDef`].
#[derive(Default)]
pub struct GraphBuilder {
    def: GraphDef,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        GraphBuilder {
            def: GraphDef {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn vertex_skip_as_error(mut self, enabled: bool) -> Self {
        self.def.vertex_skip_as_error = enabled;
        self
    }

    #[must_use]
    pub fn early_exit_if_failed(mut self, enabled: bool) -> Self {
        self.def.early_exit_graph_if_failed = enabled;
        self
    }

    #[must_use]
    pub fn vertex(mut self, vertex: VertexBuilder) -> Self {
        self.def.vertex.push(vertex.into_def());
        self
    }

    #[must_use]
    pub fn into_def(self) -> GraphDef {
        self.def
    }
}

/// Builds one [`VertexDef`].
#[derive(Default)]
pub struct VertexBuilder {
    def: VertexDef,
}

impl VertexBuilder {
    /// Vertex running a registered processor.
    #[must_use]
    pub fn processor(name: impl Into<String>) -> Self {
        VertexBuilder {
            def: VertexDef {
                processor: name.into(),
                ..Default::default()
            },
        }
    }

    /// Vertex running a closure, registered under `name` on the spot.
    #[must_use]
    pub fn func<F>(name: &str, inputs: Vec<DataDef>, outputs: Vec<DataDef>, exec: F) -> Self
    where
        F: for<'a> Fn(
                &'a mut crate::processor::VertexIo,
                &'a crate::params::ExecParams,
            ) -> futures_util::future::BoxFuture<'a, i32>
            + Send
            + Sync
            + 'static,
    {
        register_func_processor(name, inputs, outputs, exec);
        Self::processor(name)
    }

    /// Vertex evaluating a condition expression; its `if`/`else` successors
    /// follow the outcome.
    #[must_use]
    pub fn cond(expr: impl Into<String>) -> Self {
        VertexBuilder {
            def: VertexDef {
                cond: expr.into(),
                ..Default::default()
            },
        }
    }

    /// Vertex running another graph, in this cluster or a named one.
    #[must_use]
    pub fn sub_graph(cluster: impl Into<String>, graph: impl Into<String>) -> Self {
        VertexBuilder {
            def: VertexDef {
                cluster: cluster.into(),
                graph: graph.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.def.id = id.into();
        self
    }

    /// Gate behind an expression, synthesized into a hidden condition
    /// vertex this one depends on.
    #[must_use]
    pub fn expect(mut self, expr: impl Into<String>) -> Self {
        self.def.expect = expr.into();
        self
    }

    /// Gate behind a config-setting flag; `!` prefix negates.
    #[must_use]
    pub fn expect_config(mut self, flag: impl Into<String>) -> Self {
        self.def.expect_config = flag.into();
        self
    }

    /// Rewrap this vertex in a synthesized while-loop driven by `cond`.
    #[must_use]
    pub fn while_cond(mut self, cond: impl Into<String>) -> Self {
        self.def.while_cond = cond.into();
        self
    }

    /// Drive loop iterations inline instead of through the executor.
    #[must_use]
    pub fn sync_loop(mut self) -> Self {
        self.def.while_async = false;
        self
    }

    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.def.args = Params::new(args);
        self
    }

    /// Add a `select_args` branch tried in insertion order.
    #[must_use]
    pub fn select_args(mut self, when: impl Into<String>, args: Value) -> Self {
        self.def.select_args.push(CondParams {
            when: when.into(),
            args: Params::new(args),
        });
        self
    }

    #[must_use]
    pub fn deps(mut self, ids: &[&str]) -> Self {
        self.def.deps.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    #[must_use]
    pub fn deps_on_ok(mut self, ids: &[&str]) -> Self {
        self.def
            .deps_on_ok
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    #[must_use]
    pub fn deps_on_err(mut self, ids: &[&str]) -> Self {
        self.def
            .deps_on_err
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    #[must_use]
    pub fn successor(mut self, ids: &[&str]) -> Self {
        self.def.successor.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Successors fired when this vertex settles OK.
    #[must_use]
    pub fn consequent(mut self, ids: &[&str]) -> Self {
        self.def
            .consequent
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Successors fired when this vertex settles ERR.
    #[must_use]
    pub fn alternative(mut self, ids: &[&str]) -> Self {
        self.def
            .alternative
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    #[must_use]
    pub fn input(mut self, def: DataDef) -> Self {
        self.def.input.push(def);
        self
    }

    #[must_use]
    pub fn output(mut self, def: DataDef) -> Self {
        self.def.output.push(def);
        self
    }

    /// Surface non-zero execution codes instead of mapping them to OK.
    #[must_use]
    pub fn keep_exec_error(mut self) -> Self {
        self.def.ignore_processor_execute_error = false;
        self
    }

    /// Latch this vertex's failure code as the run's completion code.
    #[must_use]
    pub fn early_exit_if_failed(mut self) -> Self {
        self.def.early_exit_graph_if_failed = true;
        self
    }

    #[must_use]
    pub fn into_def(self) -> VertexDef {
        self.def
    }
}
