use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use signal_fusion::classifier::{ClassificationHarness, ModelBackend, OllamaHttpBackend};
use signal_fusion::Label;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harness_for(server: &MockServer) -> ClassificationHarness {
    let backend: Arc<dyn ModelBackend> = Arc::new(OllamaHttpBackend::new(server.uri()).unwrap());
    ClassificationHarness::with_backend(backend)
}

#[tokio::test]
async fn generate_reply_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "qwen:0.5b", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen:0.5b",
            "response": "YES",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness_for(&server);
    let outcome = h
        .run_once("Site haifunguki", "qwen:0.5b", Duration::from_secs(5))
        .await;
    assert_eq!(outcome.label, Label::Yes);
    assert_eq!(outcome.raw_reply.as_deref(), Some("YES"));
}

#[tokio::test]
async fn server_error_status_is_an_error_label() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let h = harness_for(&server);
    let outcome = h.run_once("x", "qwen:0.5b", Duration::from_secs(5)).await;
    assert_eq!(outcome.label, Label::Error);
    assert_eq!(outcome.error_code, Some("backend_error"));
}

#[tokio::test]
async fn error_field_is_an_error_label() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "model 'qwen:0.5b' not found" })),
        )
        .mount(&server)
        .await;

    let h = harness_for(&server);
    let outcome = h.run_once("x", "qwen:0.5b", Duration::from_secs(5)).await;
    assert_eq!(outcome.label, Label::Error);
    assert!(outcome.error_message.unwrap().contains("not found"));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "NO" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let h = harness_for(&server);
    let outcome = h.run_once("x", "qwen:0.5b", Duration::from_millis(200)).await;
    assert_eq!(outcome.label, Label::Error);
    assert_eq!(outcome.error_code, Some("timeout"));
}

#[tokio::test]
async fn oversized_reply_is_an_error_label() {
    let server = MockServer::start().await;
    let huge = "YES ".repeat(32 * 1024);
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": huge })))
        .mount(&server)
        .await;

    let h = harness_for(&server);
    let outcome = h.run_once("x", "qwen:0.5b", Duration::from_secs(5)).await;
    assert_eq!(outcome.label, Label::Error);
    assert_eq!(outcome.error_code, Some("backend_error"));
    assert!(outcome.raw_reply.is_none());
    assert!(outcome.error_message.unwrap().contains("too large"));
}
