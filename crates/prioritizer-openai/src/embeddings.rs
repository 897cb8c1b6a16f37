//! [`OpenAiEmbeddingClient`]: `EmbeddingClient` backed by `async-openai`'s
//! embeddings endpoint, modeled on the teacher's `OpenAIEmbeddings` builder.

use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use prioritizer_core::error::{Error, Result};
use prioritizer_core::store::EmbeddingClient;

use crate::retry::{with_retry, RetryPolicy};

/// Generates [text-embedding-3-small](https://platform.openai.com/docs/guides/embeddings)
/// (or whichever model id the caller configures) vectors for the Embedding
/// Service collaborator (§6). `prioritizer-pgvector` wraps one of these in an
/// `Arc<dyn EmbeddingClient>` alongside its own `semantic_search` logic.
pub struct OpenAiEmbeddingClient {
    client: Client<OpenAIConfig>,
    model: String,
    retry_policy: RetryPolicy,
}

impl OpenAiEmbeddingClient {
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

    /// Reads `PRIORITIZER_LLM_API_KEY` for the API key and
    /// `PRIORITIZER_EMBEDDING_MODEL_ID` for the model (defaulting per
    /// [`prioritizer_core::config::EngineConfig::from_env`]); panics if the
    /// key is unset, for the "construct once at startup" call site.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn from_env() -> Self {
        Self::try_from_env().expect("PRIORITIZER_LLM_API_KEY must be set")
    }

    pub fn try_from_env() -> Result<Self> {
        let api_key = prioritizer_core::config::env_string(prioritizer_core::config::LLM_API_KEY)
            .ok_or_else(|| Error::validation("PRIORITIZER_LLM_API_KEY is not set"))?;
        let model = prioritizer_core::config::env_string_or_default(
            prioritizer_core::config::EMBEDDING_MODEL_ID,
            "text-embedding-3-small",
        );
        let config = OpenAIConfig::new().with_api_key(api_key);
        Ok(Self::new(config, model))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| Error::internal(format!("failed to build embedding request: {e}")))?;

        let client = self.client.clone();
        let call = || {
            let client = client.clone();
            let request = request.clone();
            async move { client.embeddings().create(request).await }
        };

        let response = with_retry(&self.retry_policy, call).await.map_err(|e| {
            tracing::warn!(model = %self.model, error = %e, "embedding call failed");
            classify_openai_error(e)
        })?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream_unavailable("embedding response had no data"))?;

        Ok(embedding.embedding)
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

    fn mock_client(server: &MockServer) -> OpenAiEmbeddingClient {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base(server.uri());
        OpenAiEmbeddingClient::new(config, "text-embedding-3-small")
            .with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn returns_embedding_vector() {
        let server = MockServer::start().await;
        let vector: Vec<f32> = (0..1536).map(|i| i as f32 / 1536.0).collect();
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"object": "embedding", "index": 0, "embedding": vector}],
                "model": "text-embedding-3-small",
                "usage": {"prompt_tokens": 4, "total_tokens": 4},
            })))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let embedding = client.embed_text("ship the beta").await.unwrap();
        assert_eq!(embedding.len(), 1536);
    }

    #[tokio::test]
    async fn classifies_rate_limit_as_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "rate limited",
                    "type": "rate_limit_error",
                    "param": null,
                    "code": "rate_limit_exceeded",
                }
            })))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let err = client.embed_text("ship the beta").await.unwrap_err();
        assert!(err.is_retriable());
    }
}
