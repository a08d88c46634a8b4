// tests/test_provision.rs


use bytes::Bytes;

use relaybase::RelayError;
use relaybase::types::Function;
use test_helpers::*;

#[tokio::test]
async fn test_build_tags_versioned_and_plain() {
    let runtime = FakeRuntime::with_output(b"");
    let state = create_test_app_state(runtime.clone());
    let function = Function::new("echo", ECHO_IMAGE, "echo hi");

    let handle = state.provisioner.provision(&function, Some(Bytes::from_static(b"tar")));
    handle.await.unwrap().unwrap();

    let builds = runtime.builds.lock().unwrap().clone();
    assert_eq!(builds, vec![vec!["acme/echo:v1".to_string(), "acme/echo".to_string()]]);
    assert_eq!(state.metrics.snapshot("provision").completed, 1);
}

#[tokio::test]
async fn test_build_messages_fail_the_build() {
    let runtime = FakeRuntime::with_output(b"");
    runtime
        .build_messages
        .lock()
        .unwrap()
        .push("COPY failed: no source files".to_string());
    let state = create_test_app_state(runtime);
    let function = Function::new("echo", ECHO_IMAGE, "");

    let result = state
        .provisioner
        .provision(&function, Some(Bytes::from_static(b"tar")))
        .await
        .unwrap();

    assert!(matches!(result, Err(RelayError::Build(msg)) if msg.contains("COPY failed")));
    assert_eq!(state.metrics.snapshot("provision").errors, 1);
}

#[tokio::test]
async fn test_without_context_pulls() {
    let runtime = FakeRuntime::with_output(b"");
    let state = create_test_app_state(runtime.clone());
    let function = Function::new("alpine", "docker.io/library/alpine", "");

    state.provisioner.provision(&function, None).await.unwrap().unwrap();

    assert_eq!(runtime.pulls.lock().unwrap().clone(), vec!["library/alpine".to_string()]);
    assert!(runtime.builds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_reference_is_reported() {
    let state = create_test_app_state(FakeRuntime::with_output(b""));
    let function = Function::new("bad", "alpine", "");

    let result = state.provisioner.provision(&function, None).await.unwrap();
    assert!(matches!(result, Err(RelayError::InvalidReference(_))));
}
