use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::config::CompletionConfig;

fn test_config(server: &MockServer) -> CompletionConfig {
    let address = server.address();
    CompletionConfig {
        protocol: "http".to_string(),
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-llm".to_string(),
        temperature: 0.2,
        max_tokens: 256,
        max_context_tokens: 2048,
        timeout_seconds: 5,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn client_for(server: &MockServer) -> CompletionClient {
    CompletionClient::new(&test_config(server))
        .expect("client should build")
        .with_retry_policy(fast_policy())
}

#[test]
fn client_configuration() {
    let config = CompletionConfig {
        protocol: "http".to_string(),
        host: "llm-host".to_string(),
        port: 8080,
        model: "test-llm".to_string(),
        temperature: 0.7,
        max_tokens: 512,
        max_context_tokens: 4096,
        timeout_seconds: 60,
    };
    let client = CompletionClient::new(&config).expect("client should build");

    assert_eq!(client.model(), "test-llm");
    assert_eq!(client.base_url.host_str(), Some("llm-host"));
    assert_eq!(client.base_url.port(), Some(8080));
    assert_eq!(client.options.temperature, 0.7);
    assert_eq!(client.options.max_tokens, 512);
}

#[test]
fn invalid_options_rejected_before_any_request() {
    // Port 9 is unroutable; any network call would fail the test.
    let config = CompletionConfig {
        protocol: "http".to_string(),
        host: "localhost".to_string(),
        port: 9,
        model: "test-llm".to_string(),
        temperature: 0.2,
        max_tokens: 256,
        max_context_tokens: 2048,
        timeout_seconds: 1,
    };
    let client = CompletionClient::new(&config).expect("client should build");

    let hot = CompletionOptions {
        temperature: 3.5,
        max_tokens: 256,
    };
    let error = client
        .complete_with("prompt", &hot)
        .expect_err("out-of-range temperature should be rejected");
    assert!(matches!(error, PipelineError::Config(_)));

    let empty = CompletionOptions {
        temperature: 0.2,
        max_tokens: 0,
    };
    let error = client
        .complete_with("prompt", &empty)
        .expect_err("zero max_tokens should be rejected");
    assert!(matches!(error, PipelineError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_returns_text_and_token_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "test-llm",
            "stream": false,
            "options": { "num_predict": 256 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-llm",
            "response": "Employees accrue leave at half the full-time rate.",
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 118
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let completion = tokio::task::spawn_blocking(move || client.complete("what is the policy?"))
        .await
        .expect("task completes")
        .expect("completion succeeds");

    assert_eq!(
        completion.text,
        "Employees accrue leave at half the full-time rate."
    );
    assert_eq!(completion.tokens_used, 144);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_counts_default_to_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "ok",
            "done": true
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let completion = tokio::task::spawn_blocking(move || client.complete("prompt"))
        .await
        .expect("task completes")
        .expect("completion succeeds");

    assert_eq!(completion.text, "ok");
    assert_eq!(completion.tokens_used, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_accumulates_text_and_tokens() {
    let body = concat!(
        "{\"response\":\"Employees\",\"done\":false}\n",
        "{\"response\":\" accrue\",\"done\":false}\n",
        "{\"response\":\" leave.\",\"done\":false}\n",
        "{\"response\":\"\",\"done\":true,\"prompt_eval_count\":5,\"eval_count\":3}\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let (completion, pieces) = tokio::task::spawn_blocking(move || {
        let mut pieces = Vec::new();
        let completion = client.complete_streaming("what is the policy?", |token| {
            pieces.push(token.to_string());
        });
        (completion, pieces)
    })
    .await
    .expect("task completes");

    let completion = completion.expect("streaming completion succeeds");
    assert_eq!(completion.text, "Employees accrue leave.");
    assert_eq!(completion.tokens_used, 8);
    assert_eq!(pieces, vec!["Employees", " accrue", " leave."]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limited_retries_then_escalates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = tokio::task::spawn_blocking(move || client.complete("prompt"))
        .await
        .expect("task completes")
        .expect_err("persistent rate limiting should escalate");

    match error {
        PipelineError::RateLimited { service, attempts } => {
            assert_eq!(service, "completion");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn client_error_propagates_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = tokio::task::spawn_blocking(move || client.complete("prompt"))
        .await
        .expect("task completes")
        .expect_err("client error should propagate");

    assert!(matches!(error, PipelineError::Completion(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_verifies_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "some-other-model" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task completes")
        .expect_err("missing model should fail the health check");

    assert!(matches!(error, PipelineError::Completion(_)));
}
