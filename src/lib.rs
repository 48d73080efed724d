//! # Dagflow: Data-flow DAG Task Scheduling
//!
//! Dagflow executes declarative task graphs: vertices run registered
//! processors, edges come from explicit declarations or implicitly from
//! who-produces-what data flow, and every run shares values through a
//! hierarchical, type-erased data context tree.
//!
//! ## Core Concepts
//!
//! - **Processors**: Async units of work registered once under a name
//! - **Vertices**: Graph nodes binding a processor (or a sub-graph) to
//!   declared inputs, outputs, and parameters
//! - **Graphs & Clusters**: A cluster groups graphs that share config
//!   settings and a pool of reusable execution contexts
//! - **Data Contexts**: Typed, name-keyed value trees linking a run to its
//!   caller and its sub-runs
//! - **Store**: The registry of built clusters and the dispatch surface
//!
//! ## Quick Start
//!
//! ```
//! use dagflow::data::DataContext;
//! use dagflow::graph::{DataDef, GraphBuilder, GraphClusterBuilder, VertexBuilder};
//! use dagflow::store::GraphStore;
//! use futures_util::FutureExt;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = GraphClusterBuilder::new("demo")
//!     .pool_size(2)
//!     .graph(GraphBuilder::new("hello").vertex(VertexBuilder::func(
//!         "hello_make",
//!         Vec::new(),
//!         vec![DataDef::named("greeting")],
//!         |io, args| {
//!             async move {
//!                 let who = args.str_or("who", "world").to_string();
//!                 io.emit("greeting", format!("hello {who}"));
//!                 0
//!             }
//!             .boxed()
//!         },
//!     )))
//!     .build()?;
//!
//! let store = GraphStore::default();
//! store.register(cluster)?;
//!
//! let rt = tokio::runtime::Runtime::new()?;
//! let ctx = DataContext::new();
//! let code = rt.block_on(store.run(&ctx, "demo", "hello", None, 0));
//! assert_eq!(code, 0);
//! assert_eq!(ctx.get::<String>("greeting").unwrap().as_str(), "hello world");
//! # Ok(())
//! # }
//! ```
//!
//! Graphs can equally be loaded from their JSON form with
//! [`GraphStore::load_json`](store::GraphStore::load_json); the builder and
//! the JSON dialect produce identical definitions.
//!
//! ## Execution Model
//!
//! A run borrows a pooled cluster context, evaluates the cluster's config
//! settings, then drives the graph: vertices with no unmet dependencies fan
//! out to the configured executor, each settle (`OK`, `ERR`, or `SKIP`)
//! feeds its successors' countdowns, and the completion callback fires when
//! the last vertex settles. The borrowed context returns to its pool when
//! the caller's data context is reset, dropped, or reused, so outputs stay
//! readable after completion.
//!
//! ## Module Guide
//!
//! - [`processor`] - The processor trait, registry, and I/O surface
//! - [`graph`] - Definition model, build pass, and fluent builders
//! - [`data`] - Hierarchical typed data contexts
//! - [`params`] - Parameter trees and layered execution parameters
//! - [`runtime`] - Per-run scheduling: vertex, graph, and cluster contexts
//! - [`store`] - Cluster registry, context pools, and run dispatch
//! - [`trace`] - Execution timeline events
//! - [`types`] - Vertex results and execution codes

pub mod data;
pub mod graph;
pub mod params;
pub mod processor;
pub mod runtime;
pub mod store;
pub mod telemetry;
pub mod trace;
pub mod types;
pub mod utils;
