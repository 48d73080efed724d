//! Graph definition model and build pass.
//!
//! The `*Def` structs in this module mirror the on-disk dialect one to one
//! (`if` / `else` / `while` / `extern` / `match` keys included), so a
//! cluster can be deserialized straight from JSON with serde. [`build`]
//! turns a [`GraphClusterDef`] into the immutable, index-addressed form the
//! runtime executes.

pub mod build;
pub mod builder;

pub use build::{BuildError, DepEdge, Graph, GraphCluster, Vertex};
pub use builder::{GraphBuilder, GraphClusterBuilder, VertexBuilder};

use crate::params::Params;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    64
}

/// One input or output declaration of a vertex.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDef {
    /// Name the processor uses to address this entry.
    pub field: String,
    /// Name in the data context; defaults to `field` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Fan-in: collect every listed id instead of a single value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate: Vec<String>,
    /// Missing input fails injection and skips the vertex.
    #[serde(default)]
    pub required: bool,
    /// Resolved by the caller's context, never by a sibling vertex.
    #[serde(default, rename = "extern")]
    pub is_extern: bool,
    /// Consume the value out of the context instead of sharing it.
    #[serde(default, rename = "move")]
    pub move_data: bool,
    /// When the vertex is skipped, still move this source id into the
    /// output id so downstream consumers see a value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub move_from_when_skipped: String,
}

impl DataDef {
    #[must_use]
    pub fn named(field: impl Into<String>) -> Self {
        DataDef {
            field: field.into(),
            ..Default::default()
        }
    }

    /// Context-side name of this entry.
    #[must_use]
    pub fn data_id(&self) -> &str {
        if self.id.is_empty() { &self.field } else { &self.id }
    }
}

/// One `select_args` branch: when `match` evaluates true against the run
/// parameters, `args` becomes the highest-precedence parameter layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CondParams {
    #[serde(rename = "match")]
    pub when: String,
    #[serde(default)]
    pub args: Params,
}

/// A cluster-wide boolean evaluated once per run and published into the
/// data context under `name`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigSettingDef {
    pub name: String,
    pub cond: String,
    /// Evaluating processor; the cluster default when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub processor: String,
}

/// Definition of a single vertex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexDef {
    /// Unique id within the graph; defaults to the processor name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Processor to run; empty for sub-graph vertices.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub processor: String,
    /// Expression making this vertex itself a condition evaluator.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cond: String,
    /// Gate expression; synthesizes a hidden condition vertex this one
    /// depends on with an OK mask.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expect: String,
    /// Gate on a config-setting flag, `!` prefix negates.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expect_config: String,
    /// Target cluster for a sub-graph vertex; own cluster when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    /// Target graph for a sub-graph vertex.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub graph: String,
    /// Loop condition (expression or processor name); rewrites this vertex
    /// into a synthesized looping sub-graph.
    #[serde(default, rename = "while", skip_serializing_if = "String::is_empty")]
    pub while_cond: String,
    /// Dispatch each loop iteration through the executor.
    #[serde(default = "default_true", rename = "async")]
    pub while_async: bool,
    /// Force membership in the start set (only valid without deps).
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub args: Params,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_args: Vec<CondParams>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub successor: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub successor_on_ok: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub successor_on_err: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps_on_ok: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps_on_err: Vec<String>,
    /// Successors fired only when this vertex settles OK.
    #[serde(default, rename = "if", skip_serializing_if = "Vec::is_empty")]
    pub consequent: Vec<String>,
    /// Successors fired only when this vertex settles ERR.
    #[serde(default, rename = "else", skip_serializing_if = "Vec::is_empty")]
    pub alternative: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<DataDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<DataDef>,
    /// Treat a non-zero execution code as OK (condition vertices excepted).
    #[serde(default = "default_true")]
    pub ignore_processor_execute_error: bool,
    /// Latch this vertex's failure code as the run's completion code.
    #[serde(default)]
    pub early_exit_graph_if_failed: bool,
}

impl Default for VertexDef {
    fn default() -> Self {
        VertexDef {
            id: String::new(),
            processor: String::new(),
            cond: String::new(),
            expect: String::new(),
            expect_config: String::new(),
            cluster: String::new(),
            graph: String::new(),
            while_cond: String::new(),
            while_async: true,
            is_start: false,
            args: Params::default(),
            select_args: Vec::new(),
            successor: Vec::new(),
            successor_on_ok: Vec::new(),
            successor_on_err: Vec::new(),
            deps: Vec::new(),
            deps_on_ok: Vec::new(),
            deps_on_err: Vec::new(),
            consequent: Vec::new(),
            alternative: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
            ignore_processor_execute_error: true,
            early_exit_graph_if_failed: false,
        }
    }
}

/// Definition of one graph in a cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDef {
    pub name: String,
    #[serde(default)]
    pub vertex: Vec<VertexDef>,
    /// When matching successor edges, count a skipped dependency as failed.
    #[serde(default = "default_true")]
    pub vertex_skip_as_error: bool,
    /// Latch the first failing vertex's code as the completion code.
    #[serde(default)]
    pub early_exit_graph_if_failed: bool,
    /// Marks a synthesized while-loop body graph; its condition vertex
    /// decides whether the driving vertex runs another iteration.
    #[serde(default)]
    pub gen_while_subgraph: bool,
}

impl Default for GraphDef {
    fn default() -> Self {
        GraphDef {
            name: String::new(),
            vertex: Vec::new(),
            vertex_skip_as_error: true,
            early_exit_graph_if_failed: false,
            gen_while_subgraph: false,
        }
    }
}

/// Definition of a whole cluster: shared config settings plus its graphs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphClusterDef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Unknown processor names fail the build instead of degrading to
    /// warn-logged no-ops.
    #[serde(default = "default_true")]
    pub strict_dsl: bool,
    /// Processor evaluating `expect`, `select_args`, and `config_setting`
    /// expressions; the built-in evaluator when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_expr_processor: String,
    /// Pooled orchestrators pre-built per cluster.
    #[serde(default = "default_pool_size")]
    pub default_context_pool_size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_setting: Vec<ConfigSettingDef>,
    #[serde(default)]
    pub graph: Vec<GraphDef>,
}

impl Default for GraphClusterDef {
    fn default() -> Self {
        GraphClusterDef {
            name: String::new(),
            desc: String::new(),
            strict_dsl: true,
            default_expr_processor: String::new(),
            default_context_pool_size: 64,
            config_setting: Vec::new(),
            graph: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsl_field_names_deserialize() {
        let json = r#"{
            "name": "c0",
            "graph": [{
                "name": "g0",
                "vertex": [
                    {"processor": "p0", "if": ["a"], "else": ["b"]},
                    {"id": "a", "processor": "p1",
                     "input": [{"field": "x", "extern": true, "move": true}]},
                    {"id": "loop", "while": "cond", "async": false,
                     "processor": "body"}
                ]
            }]
        }"#;
        let def: GraphClusterDef = serde_json::from_str(json).unwrap();
        assert!(def.strict_dsl);
        assert_eq!(def.default_context_pool_size, 64);
        let g = &def.graph[0];
        assert!(g.vertex_skip_as_error);
        assert_eq!(g.vertex[0].consequent, vec!["a"]);
        assert_eq!(g.vertex[0].alternative, vec!["b"]);
        assert!(g.vertex[0].ignore_processor_execute_error);
        assert!(g.vertex[1].input[0].is_extern);
        assert!(g.vertex[1].input[0].move_data);
        assert_eq!(g.vertex[2].while_cond, "cond");
        assert!(!g.vertex[2].while_async);
    }

    #[test]
    fn data_id_falls_back_to_field() {
        let mut d = DataDef::named("v");
        assert_eq!(d.data_id(), "v");
        d.id = "other".into();
        assert_eq!(d.data_id(), "other");
    }
}
