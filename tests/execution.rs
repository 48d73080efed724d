mod common;

use common::{run, store_with, str_out};
use dagflow::data::DataContext;
use dagflow::params::Params;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn pipeline_chains_by_data_flow() {
    // Declaration order is scrambled; implicit producer/consumer edges
    // order the chain.
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"phase3"},
            {"processor":"phase1"},
            {"processor":"phase0"}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", None).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s3").as_deref(), Some("test0#test1#test3"));
}

#[tokio::test]
async fn run_params_reach_every_vertex() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"phase0"},
            {"processor":"phase1"}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", Some(json!({"val": "run"}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s1").as_deref(), Some("run#test1"));
}

#[tokio::test]
async fn vertex_args_shadow_run_params() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"phase0","args":{"val":"pinned"}}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", Some(json!({"val": "run"}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s0").as_deref(), Some("pinned"));
}

#[tokio::test]
async fn aggregate_fans_in_all_present_producers() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"int_sum"},
            {"processor":"int_m0"},
            {"processor":"int_m1"},
            {"processor":"int_m2"}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", None).await;
    assert_eq!(code, 0);
    assert_eq!(ctx.get::<i64>("total").map(|v| *v), Some(6));
}

#[tokio::test]
async fn missing_required_input_skips_the_vertex() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"phase1",
             "input":[{"field":"s0","extern":true,"required":true}]}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", None).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "s1").is_none());
}

#[tokio::test]
async fn extern_input_resolves_through_caller_context() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"phase1",
             "input":[{"field":"s0","extern":true,"required":true}]}
        ]}]}"#,
    );
    let ctx = DataContext::new();
    ctx.set("s0", String::from("given")).unwrap();
    let code = store.run(&ctx, "c", "g", None, 0).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s1").as_deref(), Some("given#test1"));
}

#[tokio::test]
async fn pooled_context_reuse_keeps_runs_isolated() {
    let store = store_with(
        r#"{"name":"c","default_context_pool_size":1,"graph":[{"name":"g","vertex":[
            {"processor":"phase0"},
            {"processor":"phase1"}
        ]}]}"#,
    );
    for round in 0..3 {
        let val = format!("round{round}");
        let (code, ctx) = run(&store, "c", "g", Some(json!({ "val": val }))).await;
        assert_eq!(code, 0);
        assert_eq!(str_out(&ctx, "s1"), Some(format!("{val}#test1")));
        // Dropping the root context returns the pooled context, so the
        // next round reuses it.
        drop(ctx);
    }
}

#[tokio::test]
async fn released_contexts_unlink_from_their_old_root() {
    let store = store_with(
        r#"{"name":"c","default_context_pool_size":1,"graph":[{"name":"g","vertex":[
            {"processor":"phase0"}
        ]}]}"#,
    );
    // Two runs on the same root: borrowing for the second run releases the
    // first borrowed context back to the pool.
    let root1 = DataContext::new();
    assert_eq!(store.run(&root1, "c", "g", None, 0).await, 0);
    let mine = Arc::new(Params::new(json!({"val": "mine"})));
    assert_eq!(store.run(&root1, "c", "g", Some(mine), 0).await, 0);

    // A different root now borrows the released context. Its outputs must
    // not be readable through the first root.
    let root2 = DataContext::new();
    let secret = Arc::new(Params::new(json!({"val": "secret"})));
    assert_eq!(store.run(&root2, "c", "g", Some(secret), 0).await, 0);

    assert_eq!(str_out(&root1, "s0").as_deref(), Some("mine"));
    assert_eq!(str_out(&root2, "s0").as_deref(), Some("secret"));
}
