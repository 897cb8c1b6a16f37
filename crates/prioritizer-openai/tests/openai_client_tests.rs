//! End-to-end tests against the public `prioritizer-openai` API, using
//! `wiremock` to stand in for the OpenAI HTTP surface.

use std::time::Duration;

use prioritizer_core::llm::LlmClient;
use prioritizer_core::store::EmbeddingClient;
use prioritizer_openai::{OpenAIConfig, OpenAiEmbeddingClient, OpenAiLlmClient, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20},
    })
}

#[tokio::test]
async fn llm_client_round_trips_a_strict_schema_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(
            r#"{"intent_type": "scope_change", "subtype": null, "keywords": ["beta"], "strength": 0.7, "duration": null, "summary": "narrowing scope"}"#,
        )))
        .mount(&server)
        .await;

    let config = OpenAIConfig::new().with_api_key("test-key").with_api_base(server.uri());
    let client = OpenAiLlmClient::new(config, "gpt-4o-mini").with_retry_policy(RetryPolicy::none());

    let request = prioritizer_core::llm::LlmRequest {
        prompt: "classify this reflection".to_string(),
        schema_name: "ReflectionClassification".to_string(),
        schema: json!({"type": "object"}),
        timeout: Duration::from_secs(5),
    };

    let value = client.complete_strict(request).await.unwrap();
    assert_eq!(value["strength"], 0.7);
}

#[tokio::test]
async fn llm_client_retries_a_transient_server_error_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "internal", "type": "server_error", "param": null, "code": "internal_error"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(r#"{"ok": true}"#)))
        .mount(&server)
        .await;

    let config = OpenAIConfig::new().with_api_key("test-key").with_api_base(server.uri());
    let client = OpenAiLlmClient::new(config, "gpt-4o-mini")
        .with_retry_policy(RetryPolicy::exponential_with_params(2, 1, 5));

    let request = prioritizer_core::llm::LlmRequest {
        prompt: "estimate impact".to_string(),
        schema_name: "ImpactEstimate".to_string(),
        schema: json!({"type": "object"}),
        timeout: Duration::from_secs(5),
    };

    let value = client.complete_strict(request).await.unwrap();
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn embedding_client_returns_a_1536_dim_vector() {
    let server = MockServer::start().await;
    let vector: Vec<f32> = (0..1536).map(|i| (i as f32) / 1536.0).collect();
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": vector}],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 3, "total_tokens": 3},
        })))
        .mount(&server)
        .await;

    let config = OpenAIConfig::new().with_api_key("test-key").with_api_base(server.uri());
    let client = OpenAiEmbeddingClient::new(config, "text-embedding-3-small")
        .with_retry_policy(RetryPolicy::none());

    let embedding = client.embed_text("ship the beta").await.unwrap();
    assert_eq!(embedding.len(), 1536);
}
