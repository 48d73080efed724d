mod common;

use common::{run, setup, store_with, str_out};
use dagflow::data::DataContext;
use dagflow::store::GraphStore;
use serde_json::json;

#[tokio::test]
async fn sibling_graph_runs_in_the_same_cluster() {
    let store = store_with(
        r#"{"name":"c","graph":[
            {"name":"outer","vertex":[
                {"id":"sub","graph":"inner"},
                {"processor":"phase1","deps":["sub"]}
            ]},
            {"name":"inner","vertex":[{"processor":"phase0"}]}
        ]}"#,
    );
    let (code, ctx) = run(&store, "c", "outer", None).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s1").as_deref(), Some("test0#test1"));
}

#[tokio::test]
async fn dot_cluster_resolves_to_the_own_cluster() {
    let store = store_with(
        r#"{"name":"c","graph":[
            {"name":"outer","vertex":[
                {"processor":"phase0","successor":["sub"]},
                {"id":"sub","cluster":".","graph":"inner"},
                {"processor":"phase3","deps":["sub"]}
            ]},
            {"name":"inner","vertex":[{"processor":"phase1"}]}
        ]}"#,
    );
    let (code, ctx) = run(&store, "c", "outer", None).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s3").as_deref(), Some("test0#test1#test3"));
}

#[tokio::test]
async fn cross_cluster_sub_graph_borrows_a_pooled_context() {
    setup();
    let store = GraphStore::default();
    store
        .load_json(
            r#"{"name":"producer_cluster","default_context_pool_size":1,
                "graph":[{"name":"make","vertex":[{"processor":"phase0"}]}]}"#,
        )
        .unwrap();
    store
        .load_json(
            r#"{"name":"main","graph":[{"name":"outer","vertex":[
                {"id":"sub","cluster":"producer_cluster","graph":"make"},
                {"processor":"phase1","deps":["sub"]}
            ]}]}"#,
        )
        .unwrap();
    let ctx = DataContext::new();
    let code = store.run(&ctx, "main", "outer", None, 0).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s1").as_deref(), Some("test0#test1"));
}

#[tokio::test]
async fn sub_graph_failure_surfaces_when_not_ignored() {
    let store = store_with(
        r#"{"name":"c","graph":[
            {"name":"outer","early_exit_graph_if_failed":true,"vertex":[
                {"id":"sub","graph":"inner",
                 "ignore_processor_execute_error":false}
            ]},
            {"name":"inner","early_exit_graph_if_failed":true,"vertex":[
                {"processor":"fail_with","args":{"code":3},
                 "ignore_processor_execute_error":false}
            ]}
        ]}"#,
    );
    let (code, _ctx) = run(&store, "c", "outer", None).await;
    assert_eq!(code, 3);
}

#[tokio::test]
async fn caller_params_flow_into_cross_cluster_runs() {
    setup();
    let store = GraphStore::default();
    store
        .load_json(
            r#"{"name":"inner_c","graph":[{"name":"make","vertex":[
                {"processor":"phase0"}
            ]}]}"#,
        )
        .unwrap();
    store
        .load_json(
            r#"{"name":"main","graph":[{"name":"outer","vertex":[
                {"id":"sub","cluster":"inner_c","graph":"make"}
            ]}]}"#,
        )
        .unwrap();
    let (code, ctx) = run(&store, "main", "outer", Some(json!({"val": "passed"}))).await;
    assert_eq!(code, 0);
    assert_eq!(str_out(&ctx, "s0").as_deref(), Some("passed"));
}
