//! [`OpenAiLlmClient`]: strict JSON-schema `LlmClient` backed by `async-openai`.

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;

use prioritizer_core::error::{Error, Result};
use prioritizer_core::llm::{LlmClient, LlmRequest};

use crate::retry::{with_retry, RetryPolicy};

const SYSTEM_PROMPT: &str =
    "You respond only with JSON that validates against the provided schema. Never include prose, \
     markdown fences, or commentary outside the JSON object.";

/// `LlmClient` over OpenAI's chat completions API in strict structured-output
/// mode. One instance is shared across every collaborator named in spec.md
/// §6 ("LLM Chat Service") that needs `complete_strict`.
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    retry_policy: RetryPolicy,
}

impl OpenAiLlmClient {
    #[must_use]
    pub fn new(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            retry_policy: RetryPolicy::exponential(3),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Reads `PRIORITIZER_LLM_API_KEY` for the API key; panics if unset, for
    /// the "construct once at startup" call site. Prefer [`Self::try_from_env`]
    /// anywhere a missing key should be a recoverable error.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn from_env(model: impl Into<String>) -> Self {
        Self::try_from_env(model).expect("PRIORITIZER_LLM_API_KEY must be set")
    }

    pub fn try_from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = prioritizer_core::config::env_string(prioritizer_core::config::LLM_API_KEY)
            .ok_or_else(|| Error::validation("PRIORITIZER_LLM_API_KEY is not set"))?;
        let config = OpenAIConfig::new().with_api_key(api_key);
        Ok(Self::new(config, model))
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete_strict(&self, request: LlmRequest) -> Result<serde_json::Value> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build system message: {e}")))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.clone())
            .build()
            .map_err(|e| Error::internal(format!("failed to build user message: {e}")))?;

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                name: request.schema_name.clone(),
                description: None,
                schema: Some(request.schema.clone()),
                strict: Some(true),
            },
        };

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system.into(), user.into()])
            .response_format(response_format)
            .build()
            .map_err(|e| Error::internal(format!("failed to build chat request: {e}")))?;

        let client = self.client.clone();
        let call = || {
            let client = client.clone();
            let chat_request = chat_request.clone();
            async move { client.chat().create(chat_request).await }
        };

        let response = tokio::time::timeout(request.timeout, with_retry(&self.retry_policy, call))
            .await
            .map_err(|_| {
                tracing::warn!(schema = %request.schema_name, timeout = ?request.timeout, "LLM call exceeded budget");
                Error::timeout(format!("LLM call for {} exceeded budget", request.schema_name))
            })?
            .map_err(|e| {
                tracing::warn!(schema = %request.schema_name, error = %e, "LLM call failed");
                classify_openai_error(e)
            })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::upstream_unavailable("LLM response had no content"))?;

        serde_json::from_str(&content).map_err(|e| {
            Error::validation(format!(
                "LLM response for {} did not parse as JSON: {e}",
                request.schema_name
            ))
        })
    }
}

fn classify_openai_error(err: async_openai::error::OpenAIError) -> Error {
    match &err {
        async_openai::error::OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or_default();
            let kind = api_err.r#type.as_deref().unwrap_or_default();
            if code.contains("rate_limit") || kind.contains("rate_limit") || kind.contains("server_error") {
                Error::upstream_unavailable(err.to_string())
            } else {
                Error::fatal_upstream(err.to_string())
            }
        }
        async_openai::error::OpenAIError::Reqwest(_) => Error::upstream_unavailable(err.to_string()),
        _ => Error::fatal_upstream(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_client(server: &MockServer) -> OpenAiLlmClient {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base(server.uri());
        OpenAiLlmClient::new(config, "gpt-4o-mini").with_retry_policy(RetryPolicy::none())
    }

    fn completion_body(content: &str) -> serde_json::Value {
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
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        })
    }

    #[tokio::test]
    async fn parses_strict_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"impact": 0.8, "reasoning": "blocks launch", "keywords": ["launch"], "confidence": 0.9}"#,
            )))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let request = LlmRequest {
            prompt: "estimate impact".to_string(),
            schema_name: "ImpactEstimate".to_string(),
            schema: json!({"type": "object"}),
            timeout: Duration::from_secs(5),
        };

        let value = client.complete_strict(request).await.unwrap();
        assert_eq!(value["impact"], 0.8);
    }

    #[tokio::test]
    async fn times_out_when_upstream_is_slow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)).set_body_json(
                completion_body("{}"),
            ))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let request = LlmRequest {
            prompt: "estimate impact".to_string(),
            schema_name: "ImpactEstimate".to_string(),
            schema: json!({"type": "object"}),
            timeout: Duration::from_millis(20),
        };

        let err = client.complete_strict(request).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn invalid_json_content_is_a_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("not json")))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let request = LlmRequest {
            prompt: "estimate impact".to_string(),
            schema_name: "ImpactEstimate".to_string(),
            schema: json!({"type": "object"}),
            timeout: Duration::from_secs(5),
        };

        let err = client.complete_strict(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
