#![allow(clippy::expect_used, clippy::unwrap_used)]

//! `PostgreSQL` pgvector-backed `EmbeddingStore` implementation.

use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use prioritizer_core::error::{Error, Result};
use prioritizer_core::store::{EmbeddingClient, EmbeddingStore, SemanticSearchHit};

/// Embedding dimensionality mandated by §3/§6 (`vec<float32>[1536]`).
const EMBEDDING_DIMENSIONS: usize = 1536;

/// Validates a PostgreSQL identifier (table name) before it is
/// interpolated into SQL.
///
/// PostgreSQL identifiers must:
/// - Start with a letter (a-z, A-Z) or underscore
/// - Contain only letters, digits, and underscores
/// - Be at most 63 characters (PostgreSQL limit for unquoted identifiers)
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("identifier cannot be empty"));
    }
    if name.len() > 63 {
        return Err(Error::validation(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }

    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::validation(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::validation(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// `PostgreSQL` pgvector-backed implementation of `EmbeddingStore` (§6).
///
/// Composes an `Arc<dyn EmbeddingClient>` (the provider that turns text into
/// vectors) with its own pgvector-indexed table (the provider that answers
/// similarity queries over those vectors), so the two halves of the
/// Embedding Service collaborator can be swapped independently.
pub struct PgVectorStore {
    client: Arc<Mutex<Client>>,
    table_name: String,
    embedding_client: Arc<dyn EmbeddingClient>,
}

impl PgVectorStore {
    /// Connects to `PostgreSQL`, ensures the pgvector extension and backing
    /// table exist, and returns a store ready to embed and search.
    ///
    /// # Errors
    ///
    /// Returns an error if `table_name` fails identifier validation, the
    /// connection fails, or the pgvector extension/table cannot be
    /// created.
    pub async fn new(
        connection_string: &str,
        table_name: &str,
        embedding_client: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        validate_identifier(table_name)?;

        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| Error::upstream_unavailable(format!("failed to connect to postgres: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error");
            }
        });

        let store = Self {
            client: Arc::new(Mutex::new(client)),
            table_name: table_name.to_string(),
            embedding_client,
        };

        store.ensure_extension().await?;
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_extension(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .map_err(|e| {
                Error::upstream_unavailable(format!(
                    "failed to create pgvector extension (is it installed?): {e}"
                ))
            })?;
        Ok(())
    }

    async fn ensure_table(&self) -> Result<()> {
        let client = self.client.lock().await;

        let create_table_query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                task_id TEXT PRIMARY KEY,
                task_text TEXT NOT NULL,
                document_id TEXT,
                embedding vector({EMBEDDING_DIMENSIONS})
            )",
            self.table_name
        );
        client
            .execute(&create_table_query, &[])
            .await
            .map_err(|e| Error::upstream_unavailable(format!("failed to create table: {e}")))?;

        let create_index_query = format!(
            "CREATE INDEX IF NOT EXISTS {}_embedding_idx ON {}
             USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
            self.table_name, self.table_name
        );
        // Index creation can fail on an empty table; that is not fatal.
        let _ = client.execute(&create_index_query, &[]).await;

        Ok(())
    }

    /// Indexes (or re-indexes) a task's embedding for semantic search.
    /// Task ingestion calls this after computing or refreshing an
    /// embedding via [`EmbeddingStore::embed`].
    pub async fn index_task(
        &self,
        task_id: &str,
        task_text: &str,
        document_id: Option<&str>,
        embedding: &[f32],
    ) -> Result<()> {
        let vector = Vector::from(embedding.to_vec());
        let client = self.client.lock().await;
        let query = format!(
            "INSERT INTO {} (task_id, task_text, document_id, embedding)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (task_id) DO UPDATE SET
                task_text = EXCLUDED.task_text,
                document_id = EXCLUDED.document_id,
                embedding = EXCLUDED.embedding",
            self.table_name
        );
        client
            .execute(&query, &[&task_id, &task_text, &document_id, &vector])
            .await
            .map_err(|e| Error::upstream_unavailable(format!("failed to index task: {e}")))?;
        Ok(())
    }

    /// Removes a task from the semantic index, e.g. on archival.
    pub async fn remove_task(&self, task_id: &str) -> Result<()> {
        let client = self.client.lock().await;
        let query = format!("DELETE FROM {} WHERE task_id = $1", self.table_name);
        client
            .execute(&query, &[&task_id])
            .await
            .map_err(|e| Error::upstream_unavailable(format!("failed to remove task from index: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for PgVectorStore {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedding_client.embed_text(text).await
    }

    async fn semantic_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SemanticSearchHit>> {
        let vector = Vector::from(query_vec.to_vec());
        let client = self.client.lock().await;

        // `<=>` is pgvector's cosine-distance operator; similarity is
        // `1 - distance`.
        let query = format!(
            "SELECT task_id, task_text, document_id, embedding <=> $1 AS distance
             FROM {}
             ORDER BY distance
             LIMIT $2",
            self.table_name
        );

        let rows = client
            .query(&query, &[&vector, &(limit as i64)])
            .await
            .map_err(|e| Error::upstream_unavailable(format!("semantic search failed: {e}")))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let distance: f64 = row.get("distance");
            let similarity = (1.0 - distance).max(0.0);
            if similarity < threshold {
                continue;
            }
            hits.push(SemanticSearchHit {
                task_id: row.get("task_id"),
                task_text: row.get("task_text"),
                document_id: row.get("document_id"),
                similarity,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_accepts_common_table_names() {
        assert!(validate_identifier("task_embedding_index").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn validate_identifier_rejects_sql_injection_attempts() {
        assert!(validate_identifier("x; DROP TABLE tasks; --").is_err());
        assert!(validate_identifier("table'").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn validate_identifier_rejects_leading_digit() {
        assert!(validate_identifier("1table").is_err());
    }
}
