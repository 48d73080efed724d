//! Build pass: definitions to executable graphs.
//!
//! Building a cluster runs, per graph: id defaulting, while-loop and
//! `expect` gate synthesis, processor resolution with descriptor merge,
//! explicit edge wiring (`deps*`, `successor*`, `if`/`else`), implicit
//! data-flow edges from producer/consumer declarations, validation
//! (duplicate ids, duplicate outputs, missing producers), and a DFS cycle
//! check. The result is immutable and shared by every pooled run.

use crate::graph::{DataDef, GraphClusterDef, GraphDef, VertexDef};
use crate::params::Params;
use crate::processor::expr::{EXPR_ARG_KEY, is_cond_expr};
use crate::processor::registry::{DEFAULT_EXPR_PROCESSOR, ProcessorMeta, processor_meta};
use crate::types::{MASK_ALL, MASK_ERR, MASK_OK};
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(code(dagflow::build::parse))]
    Parse(#[from] serde_json::Error),

    #[error("graph `{graph}` declares vertex id `{id}` more than once")]
    #[diagnostic(code(dagflow::build::duplicate_vertex))]
    DuplicateVertex { graph: String, id: String },

    #[error("cluster declares graph `{name}` more than once")]
    #[diagnostic(code(dagflow::build::duplicate_graph))]
    DuplicateGraph { name: String },

    #[error("data id `{id}` is produced by more than one vertex in graph `{graph}`")]
    #[diagnostic(code(dagflow::build::duplicate_output))]
    DuplicateOutput { graph: String, id: String },

    #[error("vertex `{vertex}` in graph `{graph}` names unregistered processor `{processor}`")]
    #[diagnostic(
        code(dagflow::build::unknown_processor),
        help("register the processor before building, or disable strict_dsl")
    )]
    UnknownProcessor {
        graph: String,
        vertex: String,
        processor: String,
    },

    #[error("vertex `{vertex}` in graph `{graph}` references unknown vertex `{reference}`")]
    #[diagnostic(code(dagflow::build::unknown_reference))]
    UnknownReference {
        graph: String,
        vertex: String,
        reference: String,
    },

    #[error(
        "vertex `{vertex}` in graph `{graph}` requires input `{id}` that no vertex produces"
    )]
    #[diagnostic(
        code(dagflow::build::missing_producer),
        help("mark the input `extern` if the caller provides it")
    )]
    MissingProducer {
        graph: String,
        vertex: String,
        id: String,
    },

    #[error("vertex `{vertex}` in graph `{graph}` has neither a processor nor a sub-graph")]
    #[diagnostic(code(dagflow::build::empty_vertex))]
    EmptyVertex { graph: String, vertex: String },

    #[error("vertex `{vertex}` in graph `{graph}` is marked is_start but has dependencies")]
    #[diagnostic(code(dagflow::build::start_with_deps))]
    StartWithDeps { graph: String, vertex: String },

    #[error("graph `{graph}` contains a dependency cycle")]
    #[diagnostic(code(dagflow::build::cycle))]
    Cycle { graph: String },

    #[error("processor `{processor}` for vertex `{vertex}` rejected its args with code {code}")]
    #[diagnostic(code(dagflow::build::processor_setup))]
    ProcessorSetup {
        vertex: String,
        processor: String,
        code: i32,
    },

    #[error("cluster has no graph named `{graph}`")]
    #[diagnostic(code(dagflow::build::unknown_graph))]
    UnknownGraph { graph: String },
}

/// Incoming dependency edge: the settled result of `vertex` must intersect
/// `mask` for the owner to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepEdge {
    pub vertex: usize,
    pub mask: u8,
}

/// A resolved `select_args` branch.
#[derive(Clone, Debug)]
pub struct SelectArgs {
    pub when: String,
    pub args: Arc<Params>,
}

/// A resolved config setting: name plus its evaluator.
#[derive(Clone)]
pub struct ConfigSetting {
    pub name: String,
    pub meta: Arc<ProcessorMeta>,
    pub args: Arc<Params>,
}

/// Immutable, fully wired vertex.
pub struct Vertex {
    pub idx: usize,
    pub id: String,
    pub processor: String,
    pub meta: Option<Arc<ProcessorMeta>>,
    pub sub_cluster: String,
    pub sub_graph: String,
    pub is_loop: bool,
    pub loop_async: bool,
    /// Condition vertices surface their raw execution code.
    pub is_cond_type: bool,
    pub expect_config: String,
    pub args: Arc<Params>,
    pub select_args: Vec<SelectArgs>,
    pub inputs: Vec<DataDef>,
    pub outputs: Vec<DataDef>,
    pub ignore_exec_error: bool,
    pub early_exit: bool,
    pub io_bound: bool,
    pub deps: Vec<DepEdge>,
    /// Dependency vertex index -> slot in `deps`.
    pub dep_slot: FxHashMap<usize, usize>,
    pub successors: Vec<usize>,
}

impl Vertex {
    #[must_use]
    pub fn is_sub_graph(&self) -> bool {
        !self.sub_graph.is_empty()
    }
}

/// Immutable, validated graph.
pub struct Graph {
    pub name: String,
    pub vertices: Vec<Arc<Vertex>>,
    pub by_id: FxHashMap<String, usize>,
    pub start: Vec<usize>,
    pub vertex_skip_as_error: bool,
    pub early_exit: bool,
    /// Condition vertex of a synthesized while-loop graph.
    pub loop_cond: Option<usize>,
}

/// A built cluster: validated graphs plus shared run configuration.
pub struct GraphCluster {
    pub name: String,
    pub strict: bool,
    pub pool_size: usize,
    pub config_settings: Vec<ConfigSetting>,
    pub graphs: FxHashMap<String, Arc<Graph>>,
    /// Evaluator for synthesized conditions and `select_args` branches.
    pub expr_meta: Arc<ProcessorMeta>,
}

impl GraphCluster {
    /// Parse and build a cluster from its JSON definition.
    pub fn from_json(json: &str) -> Result<Arc<GraphCluster>, BuildError> {
        let def: GraphClusterDef = serde_json::from_str(json)?;
        Self::build(def)
    }

    /// Build a cluster from an in-memory definition.
    pub fn build(def: GraphClusterDef) -> Result<Arc<GraphCluster>, BuildError> {
        Builder::new(def)?.run()
    }

    #[must_use]
    pub fn graph(&self, name: &str) -> Option<&Arc<Graph>> {
        self.graphs.get(name)
    }
}

const LOOP_COND_ID: &str = "__cond";
const LOOP_BODY_ID: &str = "__body";

fn expr_args(expr: &str) -> Params {
    Params::new(json!({ EXPR_ARG_KEY: expr }))
}

struct Builder {
    def: GraphClusterDef,
    expr_processor: String,
    expr_meta: Arc<ProcessorMeta>,
    loop_graphs: FxHashSet<String>,
}

impl Builder {
    fn new(def: GraphClusterDef) -> Result<Self, BuildError> {
        let expr_processor = if def.default_expr_processor.is_empty() {
            DEFAULT_EXPR_PROCESSOR.to_string()
        } else {
            def.default_expr_processor.clone()
        };
        let expr_meta =
            processor_meta(&expr_processor).ok_or_else(|| BuildError::UnknownProcessor {
                graph: def.name.clone(),
                vertex: "<config>".to_string(),
                processor: expr_processor.clone(),
            })?;
        Ok(Builder {
            def,
            expr_processor,
            expr_meta,
            loop_graphs: FxHashSet::default(),
        })
    }

    fn run(mut self) -> Result<Arc<GraphCluster>, BuildError> {
        let mut graph_defs = std::mem::take(&mut self.def.graph);
        for g in &mut graph_defs {
            assign_ids(g)?;
        }
        let synthesized = self.synthesize_loops(&mut graph_defs);
        graph_defs.extend(synthesized);
        self.loop_graphs = graph_defs
            .iter()
            .filter(|g| g.gen_while_subgraph)
            .map(|g| g.name.clone())
            .collect();
        for g in &mut graph_defs {
            synthesize_gates(g);
        }

        let config_settings = self.resolve_config_settings()?;

        let mut graphs = FxHashMap::default();
        for g in graph_defs {
            let name = g.name.clone();
            let built = self.build_graph(g)?;
            if graphs.insert(name.clone(), Arc::new(built)).is_some() {
                return Err(BuildError::DuplicateGraph { name });
            }
        }
        debug!(cluster = %self.def.name, graphs = graphs.len(), "cluster built");
        Ok(Arc::new(GraphCluster {
            name: self.def.name.clone(),
            strict: self.def.strict_dsl,
            pool_size: self.def.default_context_pool_size.max(1),
            config_settings,
            graphs,
            expr_meta: self.expr_meta.clone(),
        }))
    }

    fn resolve_config_settings(&self) -> Result<Vec<ConfigSetting>, BuildError> {
        let mut settings = Vec::with_capacity(self.def.config_setting.len());
        for s in &self.def.config_setting {
            let processor = if s.processor.is_empty() {
                &self.expr_processor
            } else {
                &s.processor
            };
            let meta = processor_meta(processor).ok_or_else(|| BuildError::UnknownProcessor {
                graph: self.def.name.clone(),
                vertex: s.name.clone(),
                processor: processor.clone(),
            })?;
            settings.push(ConfigSetting {
                name: s.name.clone(),
                meta,
                args: Arc::new(expr_args(&s.cond)),
            });
        }
        Ok(settings)
    }

    /// Rewrite each `while` vertex into a reference to a synthesized
    /// cond+body graph and return the new graph definitions.
    fn synthesize_loops(&self, graph_defs: &mut [GraphDef]) -> Vec<GraphDef> {
        let mut synthesized = Vec::new();
        for g in graph_defs.iter_mut() {
            for v in &mut g.vertex {
                if v.while_cond.is_empty() {
                    continue;
                }
                let loop_graph = format!("{}_{}_while", g.name, v.id);
                let mut cond = VertexDef {
                    id: LOOP_COND_ID.to_string(),
                    consequent: vec![LOOP_BODY_ID.to_string()],
                    ..Default::default()
                };
                if is_cond_expr(&v.while_cond) {
                    cond.cond = std::mem::take(&mut v.while_cond);
                } else {
                    cond.processor = std::mem::take(&mut v.while_cond);
                }
                let body = VertexDef {
                    id: LOOP_BODY_ID.to_string(),
                    processor: std::mem::take(&mut v.processor),
                    cluster: std::mem::take(&mut v.cluster),
                    graph: std::mem::take(&mut v.graph),
                    args: std::mem::take(&mut v.args),
                    select_args: std::mem::take(&mut v.select_args),
                    input: std::mem::take(&mut v.input),
                    output: std::mem::take(&mut v.output),
                    ignore_processor_execute_error: v.ignore_processor_execute_error,
                    ..Default::default()
                };
                synthesized.push(GraphDef {
                    name: loop_graph.clone(),
                    vertex: vec![cond, body],
                    vertex_skip_as_error: g.vertex_skip_as_error,
                    early_exit_graph_if_failed: false,
                    gen_while_subgraph: true,
                });
                v.graph = loop_graph;
            }
        }
        synthesized
    }

    fn build_graph(&self, g: GraphDef) -> Result<Graph, BuildError> {
        let graph_name = g.name.clone();
        let mut defs = g.vertex;

        let mut by_id = FxHashMap::default();
        for (idx, v) in defs.iter().enumerate() {
            if by_id.insert(v.id.clone(), idx).is_some() {
                return Err(BuildError::DuplicateVertex {
                    graph: graph_name,
                    id: v.id.clone(),
                });
            }
        }

        // Resolve processors and merge registered I/O declarations.
        let mut metas: Vec<Option<Arc<ProcessorMeta>>> = Vec::with_capacity(defs.len());
        for v in &mut defs {
            if !v.cond.is_empty() && v.processor.is_empty() {
                v.processor = self.expr_processor.clone();
                v.args.set(EXPR_ARG_KEY, json!(v.cond.clone()));
            }
            if v.processor.is_empty() {
                if v.graph.is_empty() {
                    return Err(BuildError::EmptyVertex {
                        graph: graph_name,
                        vertex: v.id.clone(),
                    });
                }
                metas.push(None);
                continue;
            }
            match processor_meta(&v.processor) {
                Some(meta) => {
                    merge_descriptor(v, &meta);
                    metas.push(Some(meta));
                }
                None if self.def.strict_dsl => {
                    return Err(BuildError::UnknownProcessor {
                        graph: graph_name,
                        vertex: v.id.clone(),
                        processor: v.processor.clone(),
                    });
                }
                None => {
                    warn!(
                        graph = %graph_name,
                        vertex = %v.id,
                        processor = %v.processor,
                        "unregistered processor degrades to a no-op"
                    );
                    metas.push(None);
                }
            }
        }

        // Duplicate-output check and producer table for implicit edges.
        let mut producers: FxHashMap<String, usize> = FxHashMap::default();
        for (idx, v) in defs.iter().enumerate() {
            for out in &v.output {
                if producers.insert(out.data_id().to_string(), idx).is_some() {
                    return Err(BuildError::DuplicateOutput {
                        graph: graph_name,
                        id: out.data_id().to_string(),
                    });
                }
            }
        }

        let mut edges: Vec<FxHashMap<usize, u8>> = vec![FxHashMap::default(); defs.len()];
        let mut cond_type = vec![false; defs.len()];
        let resolve = |name: &str, from: &str| -> Result<usize, BuildError> {
            by_id
                .get(name)
                .copied()
                .ok_or_else(|| BuildError::UnknownReference {
                    graph: graph_name.clone(),
                    vertex: from.to_string(),
                    reference: name.to_string(),
                })
        };

        for (idx, v) in defs.iter().enumerate() {
            cond_type[idx] =
                !v.cond.is_empty() || !v.consequent.is_empty() || !v.alternative.is_empty();
            for (names, mask) in [
                (&v.deps, MASK_ALL),
                (&v.deps_on_ok, MASK_OK),
                (&v.deps_on_err, MASK_ERR),
            ] {
                for name in names {
                    let dep = resolve(name, &v.id)?;
                    *edges[idx].entry(dep).or_insert(0) |= mask;
                }
            }
            for (names, mask) in [
                (&v.successor, MASK_ALL),
                (&v.successor_on_ok, MASK_OK),
                (&v.successor_on_err, MASK_ERR),
                (&v.consequent, MASK_OK),
                (&v.alternative, MASK_ERR),
            ] {
                for name in names {
                    let succ = resolve(name, &v.id)?;
                    *edges[succ].entry(idx).or_insert(0) |= mask;
                }
            }
        }

        // Implicit data-flow edges: consuming a sibling's output orders the
        // consumer after the producer even with no edge declared.
        for (idx, v) in defs.iter().enumerate() {
            for input in &v.input {
                if input.is_extern {
                    continue;
                }
                if !input.aggregate.is_empty() {
                    for id in &input.aggregate {
                        if let Some(&p) = producers.get(id.as_str())
                            && p != idx
                        {
                            *edges[idx].entry(p).or_insert(0) |= MASK_ALL;
                        }
                    }
                    continue;
                }
                match producers.get(input.data_id()) {
                    Some(&p) if p != idx => {
                        *edges[idx].entry(p).or_insert(0) |= MASK_ALL;
                    }
                    Some(_) => {}
                    None if input.required => {
                        return Err(BuildError::MissingProducer {
                            graph: graph_name,
                            vertex: v.id.clone(),
                            id: input.data_id().to_string(),
                        });
                    }
                    None => {}
                }
            }
        }

        // Materialize vertices with ordered dep slots and successor lists.
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); defs.len()];
        let mut dep_lists: Vec<Vec<DepEdge>> = Vec::with_capacity(defs.len());
        for (idx, e) in edges.iter().enumerate() {
            let mut deps: Vec<DepEdge> = e
                .iter()
                .map(|(&vertex, &mask)| DepEdge { vertex, mask })
                .collect();
            deps.sort_by_key(|d| d.vertex);
            for d in &deps {
                successors[d.vertex].push(idx);
            }
            dep_lists.push(deps);
        }

        let mut start = Vec::new();
        let mut vertices = Vec::with_capacity(defs.len());
        for (idx, v) in defs.into_iter().enumerate() {
            if v.is_start && !dep_lists[idx].is_empty() {
                return Err(BuildError::StartWithDeps {
                    graph: graph_name,
                    vertex: v.id,
                });
            }
            if dep_lists[idx].is_empty() {
                start.push(idx);
            }
            let dep_slot = dep_lists[idx]
                .iter()
                .enumerate()
                .map(|(slot, d)| (d.vertex, slot))
                .collect();
            let meta = metas[idx].clone();
            let io_bound = meta.as_ref().is_some_and(|m| m.io_bound);
            // Cluster references carry a file-style suffix in the DSL;
            // everything from the last `.` is dropped, so a bare "." means
            // the vertex's own cluster.
            let sub_cluster = match v.cluster.rfind('.') {
                Some(i) => v.cluster[..i].to_string(),
                None => v.cluster.clone(),
            };
            vertices.push(Arc::new(Vertex {
                idx,
                id: v.id,
                processor: v.processor,
                meta,
                sub_cluster,
                sub_graph: v.graph.clone(),
                is_loop: v.cluster.is_empty() && self.loop_graphs.contains(&v.graph),
                loop_async: v.while_async,
                is_cond_type: cond_type[idx],
                expect_config: v.expect_config,
                args: Arc::new(v.args),
                select_args: v
                    .select_args
                    .into_iter()
                    .map(|s| SelectArgs {
                        when: s.when,
                        args: Arc::new(s.args),
                    })
                    .collect(),
                inputs: v.input,
                outputs: v.output,
                ignore_exec_error: v.ignore_processor_execute_error,
                early_exit: v.early_exit_graph_if_failed,
                io_bound,
                deps: std::mem::take(&mut dep_lists[idx]),
                dep_slot,
                successors: std::mem::take(&mut successors[idx]),
            }));
        }

        if !vertices.is_empty() && start.is_empty() {
            return Err(BuildError::Cycle { graph: graph_name });
        }
        check_acyclic(&vertices).map_err(|()| BuildError::Cycle {
            graph: graph_name.clone(),
        })?;

        let loop_cond = if g.gen_while_subgraph {
            by_id.get(LOOP_COND_ID).copied()
        } else {
            None
        };
        Ok(Graph {
            name: graph_name,
            vertices,
            by_id,
            start,
            vertex_skip_as_error: g.vertex_skip_as_error,
            early_exit: g.early_exit_graph_if_failed,
            loop_cond,
        })
    }
}

/// Default missing ids to the processor (or sub-graph) name.
fn assign_ids(g: &mut GraphDef) -> Result<(), BuildError> {
    for v in &mut g.vertex {
        if v.id.is_empty() {
            v.id = if !v.processor.is_empty() {
                v.processor.clone()
            } else {
                v.graph.clone()
            };
        }
        if v.id.is_empty() {
            return Err(BuildError::EmptyVertex {
                graph: g.name.clone(),
                vertex: "<anonymous>".to_string(),
            });
        }
    }
    Ok(())
}

/// Pull the registry's default I/O declarations into the vertex, keeping
/// anything the definition already declares.
fn merge_descriptor(v: &mut VertexDef, meta: &ProcessorMeta) {
    for input in &meta.inputs {
        if !v.input.iter().any(|d| d.field == input.field) {
            v.input.push(input.clone());
        }
    }
    for output in &meta.outputs {
        if !v.output.iter().any(|d| d.field == output.field) {
            v.output.push(output.clone());
        }
    }
}

/// Expand `expect` gates into hidden condition vertices.
fn synthesize_gates(g: &mut GraphDef) {
    let mut gates = Vec::new();
    for v in &mut g.vertex {
        if v.expect.is_empty() {
            continue;
        }
        gates.push(VertexDef {
            id: format!("__{}_expect", v.id),
            cond: std::mem::take(&mut v.expect),
            consequent: vec![v.id.clone()],
            ..Default::default()
        });
    }
    g.vertex.extend(gates);
}

/// Three-color DFS over successor edges.
fn check_acyclic(vertices: &[Arc<Vertex>]) -> Result<(), ()> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(v: usize, vertices: &[Arc<Vertex>], color: &mut [u8]) -> Result<(), ()> {
        color[v] = GRAY;
        for &s in &vertices[v].successors {
            match color[s] {
                GRAY => return Err(()),
                WHITE => visit(s, vertices, color)?,
                _ => {}
            }
        }
        color[v] = BLACK;
        Ok(())
    }

    let mut color = vec![WHITE; vertices.len()];
    for root in 0..vertices.len() {
        if color[root] == WHITE {
            visit(root, vertices, &mut color)?;
        }
    }
    Ok(())
}
