//! Tests for the command bridge: request marshaling, response decoding, and
//! native buffer release discipline.

mod common;
use common::mock_support::{FakeCore, Script};

use corelocal::LocalError;
use corelocal::interop::{CommandRequest, CoreInterop};
use std::sync::Arc;

fn interop_over(core: FakeCore) -> (CoreInterop, Arc<FakeCore>) {
    let core = Arc::new(core);
    (CoreInterop::with_core(core.clone()), core)
}

#[tokio::test]
async fn command_and_input_cross_boundary_verbatim() {
    let (interop, core) = interop_over(FakeCore::new().with_data("load_model", "ok"));

    let request = CommandRequest::new().with_param("Model", "phi-4-mini-cpu:1");
    let response = interop.execute("load_model", Some(&request)).await.unwrap();
    assert_eq!(response.data.as_deref(), Some("ok"));

    let calls = core.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "load_model");
    let sent: serde_json::Value = serde_json::from_str(&calls[0].1).unwrap();
    assert_eq!(sent["Params"]["Model"], "phi-4-mini-cpu:1");
}

#[tokio::test]
async fn command_without_input_sends_empty_payload() {
    let (interop, core) = interop_over(FakeCore::new().with_data("get_catalog_name", "local"));

    interop.execute("get_catalog_name", None).await.unwrap();
    assert_eq!(core.calls(), vec![("get_catalog_name".to_string(), String::new())]);
}

#[tokio::test]
async fn empty_command_is_rejected_before_reaching_the_core() {
    let (interop, core) = interop_over(FakeCore::new());

    let err = interop.execute("", None).await.unwrap_err();
    assert!(matches!(err, LocalError::Marshaling(_)));
    assert!(core.commands().is_empty());
}

#[tokio::test]
async fn native_error_text_is_preserved_verbatim() {
    let (interop, _) = interop_over(FakeCore::new().with_error("load_model", "model not found"));

    let err = interop
        .execute("load_model", None)
        .await
        .unwrap()
        .into_result("load_model", None)
        .unwrap_err();
    match err {
        LocalError::Native { command, message, .. } => {
            assert_eq!(command, "load_model");
            assert_eq!(message, "model not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn data_wins_when_core_populates_both_buffers() {
    let (interop, _) = interop_over(FakeCore::new().with(
        "get_model_path",
        Script::Both {
            data: "/models/phi".to_string(),
            error: "should not surface".to_string(),
        },
    ));

    let response = interop.execute("get_model_path", None).await.unwrap();
    assert_eq!(response.data.as_deref(), Some("/models/phi"));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn neither_buffer_is_an_empty_success() {
    let (interop, _) = interop_over(FakeCore::new().with("initialize", Script::Neither));

    let data = interop
        .execute("initialize", None)
        .await
        .unwrap()
        .into_result("initialize", None)
        .unwrap();
    assert_eq!(data, "");
}

#[tokio::test]
async fn every_response_allocation_is_released() {
    let (interop, core) = interop_over(
        FakeCore::new()
            .with_data("a", "payload")
            .with_error("b", "failure")
            .with(
                "c",
                Script::Both {
                    data: "d".to_string(),
                    error: "e".to_string(),
                },
            )
            .with("d", Script::Neither)
            .with_chunks("e", &["one", "two"], Script::Neither),
    );

    for command in ["a", "b", "c", "d", "a", "b"] {
        let _ = interop.execute(command, None).await.unwrap();
    }
    let _ = interop
        .execute_with_callback("e", None, Box::new(|_| Ok(())))
        .await
        .unwrap();

    assert!(core.allocations() > 0);
    assert_eq!(core.allocations(), core.frees());
}

#[tokio::test]
async fn buffers_are_released_even_when_the_callback_faults() {
    let (interop, core) = interop_over(FakeCore::new().with_chunks(
        "stream",
        &["one", "two"],
        Script::Data("final".to_string()),
    ));

    let err = interop
        .execute_with_callback(
            "stream",
            None,
            Box::new(|_| Err(LocalError::Callback("consumer broke".to_string()))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LocalError::Callback(_)));
    assert_eq!(core.allocations(), core.frees());
}
