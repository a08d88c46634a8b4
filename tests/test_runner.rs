// tests/test_runner.rs


use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use uuid::Uuid;

use relaybase::RelayError;
use relaybase::events::ChannelSubscriber;
use relaybase::topics::Filter;
use relaybase::types::Function;
use test_helpers::*;

#[tokio::test]
async fn test_echo_scenario_end_to_end() {
    let runtime = FakeRuntime::with_output(b"hello\n");
    let state = create_test_app_state(runtime.clone());
    let function = echo_function(&state.meta).await;
    route_to_topic(&state.meta, function.id, "results", "k").await;

    let (subscriber, mut rx) = ChannelSubscriber::channel();
    state.topic_hub.subscribe("results".to_string(), subscriber).await;

    let run_id = Uuid::new_v4();
    let log = state.runner.run(&function, run_id).await.unwrap();
    assert_eq!(log.id, run_id);
    assert_eq!(log.result, "hello");

    // Container built from the parsed reference
    let specs = runtime.specs.lock().unwrap().clone();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].image, "acme/echo:v1");
    assert_eq!(specs[0].args, vec!["echo hello".to_string()]);

    // Exactly one routed document
    let docs = state.topics.find("results", &Filter::new(), None, 0).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["content"], "hello");

    // Pushed to the subscriber registered before the insert
    let pushed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(pushed, docs[0]);

    let stored = state.meta.get_run_log(function.id, run_id).await.unwrap().unwrap();
    assert_eq!(stored.result, "hello");
}

#[tokio::test]
async fn test_routing_miss_logs_but_writes_nothing() {
    let runtime = FakeRuntime::with_output(b"hello\n");
    let state = create_test_app_state(runtime);
    let function = echo_function(&state.meta).await;

    let run_id = Uuid::new_v4();
    state.runner.run(&function, run_id).await.unwrap();

    assert_eq!(state.meta.count_run_logs(function.id).await.unwrap(), 1);
    assert!(state.topics.topics().await.unwrap().is_empty());
}

// ============================================================================
// Exactly one run log on every failure path
// ============================================================================

async fn assert_single_error_log(runtime: Arc<FakeRuntime>, function: Function) -> String {
    let state = create_test_app_state(runtime);
    state.meta.create_function(&function).await.unwrap();
    route_to_topic(&state.meta, function.id, "results", "k").await;

    let run_id = Uuid::new_v4();
    let log = state.runner.run(&function, run_id).await.unwrap();

    assert_eq!(state.meta.count_run_logs(function.id).await.unwrap(), 1);
    assert!(log.result.starts_with("error "), "unexpected result {:?}", log.result);
    assert!(state.topics.topics().await.unwrap().is_empty());
    log.result
}

#[tokio::test]
async fn test_bad_reference_logs_once() {
    let result = assert_single_error_log(
        FakeRuntime::with_output(b"x"),
        Function::new("bad", "alpine", "echo"),
    )
    .await;
    assert!(result.contains("invalid image reference"));
}

#[tokio::test]
async fn test_create_failure_logs_once() {
    let runtime = FakeRuntime::with_output(b"x");
    runtime.fail_create.store(true, Ordering::SeqCst);
    let result = assert_single_error_log(runtime, Function::new("f", ECHO_IMAGE, "echo")).await;
    assert!(result.contains("no such image"));
}

#[tokio::test]
async fn test_start_failure_logs_once() {
    let runtime = FakeRuntime::with_output(b"x");
    runtime.fail_start.store(true, Ordering::SeqCst);
    let result = assert_single_error_log(runtime, Function::new("f", ECHO_IMAGE, "echo")).await;
    assert!(result.contains("cannot start"));
}

#[tokio::test]
async fn test_wait_failure_logs_once() {
    let runtime = FakeRuntime::with_output(b"x");
    runtime.fail_wait.store(true, Ordering::SeqCst);
    let result = assert_single_error_log(runtime.clone(), Function::new("f", ECHO_IMAGE, "echo")).await;
    assert!(result.contains("wait interrupted"));
    assert_eq!(runtime.log_reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_zero_exit_still_reads_output() {
    let runtime = FakeRuntime::with_output(b"partial output\n");
    runtime.exit_code.store(2, Ordering::SeqCst);
    let state = create_test_app_state(runtime);
    let function = echo_function(&state.meta).await;

    let log = state.runner.run(&function, Uuid::new_v4()).await.unwrap();
    assert_eq!(log.result, "partial output");
}

#[tokio::test]
async fn test_routing_failure_keeps_result() {
    let runtime = FakeRuntime::with_output(b"hello");
    let state = create_test_app_state(runtime);
    let function = echo_function(&state.meta).await;
    // Pipeline pointing at a binding that does not exist
    state
        .meta
        .create_pipeline(&relaybase::types::Pipeline::function_to_topic(function.id, Uuid::new_v4()))
        .await
        .unwrap();

    let log = state.runner.run(&function, Uuid::new_v4()).await.unwrap();
    assert_eq!(log.result, "hello");
    assert_eq!(state.meta.count_run_logs(function.id).await.unwrap(), 1);
}

// ============================================================================
// Container binding
// ============================================================================

#[tokio::test]
async fn test_ensure_container_is_idempotent() {
    let runtime = FakeRuntime::with_output(b"");
    let state = create_test_app_state(runtime.clone());
    let function = echo_function(&state.meta).await;

    let first = state.orchestrator.ensure_container(&function).await.unwrap();
    // Same stale record, still no container id on it
    let second = state.orchestrator.ensure_container(&function).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(runtime.create_count(), 1);

    let stored = state.meta.get_function(function.id).await.unwrap().unwrap();
    assert_eq!(stored.container_id.as_deref(), Some(first.as_str()));
}

#[tokio::test]
async fn test_concurrent_first_runs_share_a_container() {
    let runtime = FakeRuntime::with_output(b"ok");
    runtime.create_delay_ms.store(50, Ordering::SeqCst);
    let state = create_test_app_state(runtime.clone());
    let function = echo_function(&state.meta).await;

    let a = state.orchestrator.clone();
    let b = state.orchestrator.clone();
    let (fa, fb) = (function.clone(), function.clone());
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.ensure_container(&fa).await }),
        tokio::spawn(async move { b.ensure_container(&fb).await }),
    );

    assert_eq!(ra.unwrap().unwrap(), rb.unwrap().unwrap());
    assert_eq!(runtime.create_count(), 1);
}

#[tokio::test]
async fn test_repeat_runs_reuse_container() {
    let runtime = FakeRuntime::with_output(b"ok");
    let state = create_test_app_state(runtime.clone());
    let function = echo_function(&state.meta).await;

    for _ in 0..3 {
        let current = state.meta.get_function(function.id).await.unwrap().unwrap();
        state.runner.run(&current, Uuid::new_v4()).await.unwrap();
    }

    assert_eq!(runtime.create_count(), 1);
    assert_eq!(runtime.starts.load(Ordering::SeqCst), 3);
    assert_eq!(state.meta.count_run_logs(function.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_changed_params_get_a_new_container() {
    let runtime = FakeRuntime::with_output(b"ok");
    let state = create_test_app_state(runtime.clone());
    let function = echo_function(&state.meta).await;
    state.runner.run(&function, Uuid::new_v4()).await.unwrap();

    let mut edited = state.meta.get_function(function.id).await.unwrap().unwrap();
    edited.params = "echo bye".to_string();
    assert!(state.meta.update_function(&edited).await.unwrap());

    let current = state.meta.get_function(function.id).await.unwrap().unwrap();
    assert!(current.container_id.is_none());
    state.runner.run(&current, Uuid::new_v4()).await.unwrap();

    assert_eq!(runtime.create_count(), 2);
    assert_eq!(runtime.specs.lock().unwrap()[1].args, vec!["echo bye".to_string()]);
}

// ============================================================================
// Detached triggers
// ============================================================================

#[tokio::test]
async fn test_trigger_returns_before_completion() {
    let runtime = FakeRuntime::with_output(b"hello\n");
    let state = create_test_app_state(runtime);
    let function = echo_function(&state.meta).await;

    let run_id = state.runner.trigger(function.id).await.unwrap();
    let log = wait_for_run_log(&state.meta, function.id, run_id).await;
    assert_eq!(log.result, "hello");
}

#[tokio::test]
async fn test_trigger_unknown_function() {
    let state = create_test_app_state(FakeRuntime::with_output(b""));
    let result = state.runner.trigger(Uuid::new_v4()).await;
    assert!(matches!(result, Err(RelayError::NotFound(_))));
}

#[tokio::test]
async fn test_deleted_function_cannot_be_triggered() {
    let state = create_test_app_state(FakeRuntime::with_output(b""));
    let function = echo_function(&state.meta).await;
    assert!(state.meta.delete_function(function.id).await.unwrap());

    assert!(state.runner.trigger(function.id).await.is_err());
    assert!(state.runner.run_by_id(function.id, Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_routed_payload_is_wrapped_content() {
    let runtime = FakeRuntime::with_output(b"\x01\x00\x00\x00\x00\x00\x00\x05 42 \n");
    let state = create_test_app_state(runtime);
    let function = echo_function(&state.meta).await;
    route_to_topic(&state.meta, function.id, "numbers", "k").await;

    state.runner.run(&function, Uuid::new_v4()).await.unwrap();

    let docs = state.topics.find("numbers", &Filter::new(), None, 0).await.unwrap();
    assert_eq!(docs[0]["content"], json!("42"));
}
