//! OpenAI-backed implementations of the prioritization engine's two external
//! trait seams: [`prioritizer_core::llm::LlmClient`] (strict JSON-schema chat
//! completions) and [`prioritizer_core::store::EmbeddingClient`] (text
//! embeddings).
//!
//! # Quick start
//!
//! ```rust,ignore
//! use prioritizer_openai::{OpenAiEmbeddingClient, OpenAiLlmClient};
//!
//! let llm = OpenAiLlmClient::try_from_env("gpt-4o-mini")?;
//! let embeddings = OpenAiEmbeddingClient::try_from_env()?;
//! ```

mod client;
mod embeddings;
mod retry;

pub use async_openai::config::OpenAIConfig;
pub use client::OpenAiLlmClient;
pub use embeddings::OpenAiEmbeddingClient;
pub use retry::RetryPolicy;
