#![allow(dead_code)]

use dagflow::data::DataContext;
use dagflow::graph::DataDef;
use dagflow::params::Params;
use dagflow::processor::register_func_processor;
use dagflow::store::GraphStore;
use futures_util::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Once;

static INIT: Once = Once::new();

/// Register the shared fixture processors once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        dagflow::telemetry::init_tracing();

        // Three-phase string pipeline wired purely by data flow.
        register_func_processor("phase0", Vec::new(), vec![DataDef::named("s0")], |io, args| {
            async move {
                io.emit("s0", args.str_or("val", "test0").to_string());
                0
            }
            .boxed()
        });
        register_func_processor(
            "phase1",
            vec![DataDef::named("s0")],
            vec![DataDef::named("s1")],
            |io, _args| {
                async move {
                    let s0 = io
                        .input::<String>("s0")
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    io.emit("s1", format!("{s0}#test1"));
                    0
                }
                .boxed()
            },
        );
        register_func_processor(
            "phase3",
            vec![DataDef::named("s1")],
            vec![DataDef::named("s3")],
            |io, _args| {
                async move {
                    let s1 = io
                        .input::<String>("s1")
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    io.emit("s3", format!("{s1}#test3"));
                    0
                }
                .boxed()
            },
        );

        // Emits the string bound to its `abc` parameter.
        register_func_processor(
            "emit_abc",
            Vec::new(),
            vec![DataDef::named("abc_out")],
            |io, args| {
                async move {
                    io.emit("abc_out", args.str_or("abc", "none").to_string());
                    0
                }
                .boxed()
            },
        );

        // Emits its own id under a parameterized name, for gating tests.
        register_func_processor("mark_a", Vec::new(), vec![DataDef::named("mark_a")], |io, _| {
            async move {
                io.emit("mark_a", String::from("a"));
                0
            }
            .boxed()
        });
        register_func_processor("mark_b", Vec::new(), vec![DataDef::named("mark_b")], |io, _| {
            async move {
                io.emit("mark_b", String::from("b"));
                0
            }
            .boxed()
        });

        // Fails with the code bound to its `code` parameter.
        register_func_processor("fail_with", Vec::new(), Vec::new(), |_io, args| {
            async move { args.i64_or("code", 7) as i32 }.boxed()
        });

        // Integer producers plus an aggregating consumer.
        for (name, value) in [("int_m0", 1i64), ("int_m1", 2i64), ("int_m2", 3i64)] {
            let field = name.split('_').next_back().map(str::to_string);
            let field = field.unwrap_or_default();
            register_func_processor(
                name,
                Vec::new(),
                vec![DataDef::named(field.clone())],
                move |io, _args| {
                    let field = field.clone();
                    async move {
                        io.emit(&field, value);
                        0
                    }
                    .boxed()
                },
            );
        }
        register_func_processor(
            "int_sum",
            vec![{
                let mut d = DataDef::named("vals");
                d.aggregate = vec!["m0".into(), "m1".into(), "m2".into()];
                d
            }],
            vec![DataDef::named("total")],
            |io, _args| {
                async move {
                    let total: i64 = io.aggregate::<i64>("vals").iter().map(|v| **v).sum();
                    io.emit("total", total);
                    0
                }
                .boxed()
            },
        );

        // Sleeps for its `ms` parameter, for deadline tests.
        register_func_processor("sleepy", Vec::new(), Vec::new(), |_io, args| {
            async move {
                let ms = args.i64_or("ms", 50).max(0) as u64;
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                0
            }
            .boxed()
        });

        // While-loop pieces: the condition keeps going until `acc` reaches
        // the `limit` parameter, the body appends one character per pass.
        register_func_processor("loop_tick", Vec::new(), Vec::new(), |io, args| {
            async move {
                let len = io
                    .data_context()
                    .get::<String>("acc")
                    .map_or(0, |s| s.len());
                i32::from(len as i64 >= args.i64_or("limit", 5))
            }
            .boxed()
        });
        register_func_processor(
            "loop_body",
            Vec::new(),
            vec![DataDef::named("acc")],
            |io, _args| {
                async move {
                    let acc = io
                        .data_context()
                        .get::<String>("acc")
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    io.emit("acc", format!("{acc}x"));
                    0
                }
                .boxed()
            },
        );
    });
}

/// Build a store from one JSON cluster definition.
pub fn store_with(json: &str) -> GraphStore {
    setup();
    let store = GraphStore::default();
    store.load_json(json).expect("cluster builds");
    store
}

/// Dispatch a run against `store` and await its code alongside the root
/// data context the outputs stay visible through.
pub async fn run(
    store: &GraphStore,
    cluster: &str,
    graph: &str,
    params: Option<Value>,
) -> (i32, Arc<DataContext>) {
    let ctx = DataContext::new();
    let params = params.map(|v| Arc::new(Params::new(v)));
    let code = store.run(&ctx, cluster, graph, params, 0).await;
    (code, ctx)
}

pub fn str_out(ctx: &Arc<DataContext>, name: &str) -> Option<String> {
    ctx.get::<String>(name).map(|s| s.to_string())
}
