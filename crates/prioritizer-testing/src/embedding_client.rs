//! [`MockEmbeddingClient`]: a canned/deterministic [`EmbeddingClient`] double.

use async_trait::async_trait;
use prioritizer_core::error::Result;
use prioritizer_core::store::EmbeddingClient;

use crate::store::InMemoryEmbeddingStore;

/// Generates the same deterministic hash-based vectors as
/// [`InMemoryEmbeddingStore::embed`], but as a standalone [`EmbeddingClient`]
/// so adapter crates (`prioritizer-pgvector`) can unit-test their own
/// `semantic_search` logic against a real Postgres instance while never
/// making a network call to an embedding provider.
#[derive(Default)]
pub struct MockEmbeddingClient;

impl MockEmbeddingClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(InMemoryEmbeddingStore::deterministic_vector(text))
    }
}
