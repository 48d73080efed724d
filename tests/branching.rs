mod common;

use common::{run, store_with, str_out};
use serde_json::json;

const IF_ELSE: &str = r#"{"name":"c","graph":[{"name":"g","vertex":[
    {"id":"check","cond":"$exp.id==1000","if":["mark_a"],"else":["mark_b"]},
    {"processor":"mark_a"},
    {"processor":"mark_b"}
]}]}"#;

#[tokio::test]
async fn cond_vertex_fires_consequent_on_match() {
    let store = store_with(IF_ELSE);
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1000}}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "mark_a").as_deref(), Some("a"));
    assert!(str_out(&ctx, "mark_b").is_none());
}

#[tokio::test]
async fn cond_vertex_fires_alternative_on_mismatch() {
    let store = store_with(IF_ELSE);
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_a").is_none());
    assert_eq!(str_out(&ctx, "mark_b").as_deref(), Some("b"));
}

#[tokio::test]
async fn expect_gate_skips_on_false() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"mark_a","expect":"$exp.id==1000"}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1000}}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "mark_a").as_deref(), Some("a"));

    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1001}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_a").is_none());
}

#[tokio::test]
async fn select_args_picks_the_matching_branch() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"processor":"emit_abc","args":{"abc":"v0"},
             "select_args":[
                {"match":"$exp.id==1000","args":{"abc":"hello1"}},
                {"match":"$exp.id==1002","args":{"abc":"hello2"}}
             ]}
        ]}]}"#,
    );
    for (id, expected) in [(1001, "v0"), (1000, "hello1"), (1002, "hello2")] {
        let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": id}}))).await;
        assert_eq!(code, 0);
        assert_eq!(str_out(&ctx, "abc_out").as_deref(), Some(expected), "exp.id={id}");
    }
}

#[tokio::test]
async fn config_settings_gate_vertices_per_run() {
    let store = store_with(
        r#"{"name":"c",
            "config_setting":[{"name":"with_exp","cond":"$exp.id==1000"}],
            "graph":[{"name":"g","vertex":[
                {"processor":"mark_a","expect_config":"with_exp"},
                {"processor":"mark_b","expect_config":"!with_exp"}
            ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1000}}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "mark_a").as_deref(), Some("a"));
    assert!(str_out(&ctx, "mark_b").is_none());

    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 9}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_a").is_none());
    assert_eq!(str_out(&ctx, "mark_b").as_deref(), Some("b"));
}

#[tokio::test]
async fn skip_counts_as_error_for_err_edges_by_default() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex":[
            {"id":"gated","processor":"mark_a","expect":"$exp.id==1000"},
            {"processor":"mark_b","deps_on_err":["gated"]}
        ]}]}"#,
    );
    // Gate fails, `gated` is skipped, and the skip feeds the err edge.
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_a").is_none());
    assert_eq!(str_out(&ctx, "mark_b").as_deref(), Some("b"));
}

#[tokio::test]
async fn skip_stays_skip_when_mapping_disabled() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","vertex_skip_as_error":false,"vertex":[
            {"id":"gated","processor":"mark_a","expect":"$exp.id==1000"},
            {"processor":"mark_b","deps_on_err":["gated"]}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 1}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_b").is_none());
}

#[tokio::test]
async fn early_exit_latches_the_failure_code() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","early_exit_graph_if_failed":true,"vertex":[
            {"processor":"fail_with","args":{"code":7},
             "ignore_processor_execute_error":false}
        ]}]}"#,
    );
    let (code, _ctx) = run(&store, "c", "g", None).await;
    assert_eq!(code, 7);
}

#[tokio::test]
async fn gate_skips_do_not_trip_the_early_exit_latch() {
    let store = store_with(
        r#"{"name":"c",
            "config_setting":[{"name":"with_exp","cond":"$exp.id==1000"}],
            "graph":[{"name":"g","early_exit_graph_if_failed":true,"vertex":[
                {"processor":"mark_a","expect_config":"with_exp"},
                {"processor":"mark_b"}
            ]}]}"#,
    );
    // The closed gate skips mark_a; a skip is not a failure, so the run
    // code stays 0 and the rest of the graph proceeds.
    let (code, ctx) = run(&store, "c", "g", Some(json!({"exp": {"id": 9}}))).await;
    assert_eq!(code, 0);
    assert!(str_out(&ctx, "mark_a").is_none());
    assert_eq!(str_out(&ctx, "mark_b").as_deref(), Some("b"));
}

#[tokio::test]
async fn ignored_failures_do_not_touch_the_run_code() {
    let store = store_with(
        r#"{"name":"c","graph":[{"name":"g","early_exit_graph_if_failed":true,"vertex":[
            {"processor":"fail_with","args":{"code":7}},
            {"processor":"mark_a","deps":["fail_with"]}
        ]}]}"#,
    );
    let (code, ctx) = run(&store, "c", "g", None).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "mark_a").as_deref(), Some("a"));
}
