//! Trait seams for the engine's persistence collaborators (§6).
//!
//! `prioritizer-core` depends only on these traits; concrete
//! implementations live in `prioritizer-pgvector`, `prioritizer-postgres-store`.
//! This mirrors the teacher's `VectorStore`/`Embeddings` trait-seam pattern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    AgentSession, ManualTask, Outcome, Reflection, ReflectionIntent, TaskDependency, TaskEmbedding,
};

/// A semantic-search hit returned by the Embedding Service (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticSearchHit {
    pub task_id: String,
    pub task_text: String,
    pub document_id: Option<String>,
    pub similarity: f64,
}

/// Embedding generation + similarity search (§6 "Embedding Service").
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// `Embed(text) -> vec<float32>[1536]`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// `SemanticSearch(query_vec, limit, threshold) -> [{task_id, task_text, document_id, similarity}]`.
    async fn semantic_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SemanticSearchHit>>;
}

/// Raw text -> vector embedding generation, the `Embed` half of the
/// Embedding Service collaborator (§6). An `EmbeddingStore` adapter composes
/// an `EmbeddingClient` with a vector database to answer `embed()`, keeping
/// the provider that computes vectors swappable independently of the store
/// that indexes them (`prioritizer-pgvector` holds an `Arc<dyn
/// EmbeddingClient>` and does its own `semantic_search` against Postgres).
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Row-oriented, transactional, JSON-valued persistent store (§6).
///
/// Required tables named in §6 are each represented by a slice of this
/// trait's methods rather than by SQL exposed to the core; adapters decide
/// how to lay the tables out physically.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    // -- Outcomes --
    async fn get_outcome(&self, outcome_id: Uuid) -> Result<Outcome>;
    async fn get_active_outcome(&self, user_id: &str) -> Result<Option<Outcome>>;
    /// Activates `outcome_id`, deactivating any previously-active outcome
    /// for the same user atomically (§3 invariant).
    async fn activate_outcome(&self, outcome_id: Uuid) -> Result<()>;

    // -- Task embeddings --
    async fn get_task(&self, task_id: &str) -> Result<TaskEmbedding>;
    async fn get_tasks(&self, task_ids: &[String]) -> Result<Vec<TaskEmbedding>>;
    /// Tasks available for a user: not archived, not discarded within the
    /// 30-day soft-delete window (§4.2 input context).
    async fn list_available_tasks(&self, user_id: &str) -> Result<Vec<TaskEmbedding>>;
    async fn upsert_task(&self, task: &TaskEmbedding) -> Result<()>;
    async fn apply_manual_override(
        &self,
        task_id: &str,
        override_value: &crate::model::ManualOverride,
    ) -> Result<()>;

    // -- Sessions --
    async fn insert_session(&self, session: &AgentSession) -> Result<()>;
    async fn get_session(&self, session_id: Uuid) -> Result<AgentSession>;
    async fn get_latest_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>>;
    async fn get_latest_completed_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>>;
    /// Deletes any existing session for `(user_id, outcome_id)` (§4.1:
    /// `StartSession` "deletes any prior session for the user").
    async fn delete_sessions_for_outcome(&self, user_id: &str, outcome_id: Uuid) -> Result<()>;
    async fn update_session(&self, session: &AgentSession) -> Result<()>;
    /// Opportunistic cleanup of sessions older than the configured expiry
    /// (§4.1). Must never fail the caller's read; adapters log and swallow
    /// errors internally.
    async fn delete_expired_sessions(&self, older_than: DateTime<Utc>) -> Result<u64>;

    // -- Reflections --
    async fn insert_reflection(&self, reflection: &Reflection) -> Result<()>;
    async fn get_reflection(&self, reflection_id: Uuid) -> Result<Reflection>;
    async fn list_active_reflections(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reflection>>;
    async fn set_reflection_active(&self, reflection_id: Uuid, is_active: bool) -> Result<()>;
    async fn delete_reflection(&self, reflection_id: Uuid) -> Result<()>;
    async fn upsert_reflection_intent(&self, intent: &ReflectionIntent) -> Result<()>;
    async fn get_reflection_intent(&self, reflection_id: Uuid) -> Result<Option<ReflectionIntent>>;

    // -- Manual tasks --
    async fn upsert_manual_task(&self, task: &ManualTask) -> Result<()>;
    async fn get_manual_task(&self, task_id: &str) -> Result<ManualTask>;
    async fn list_manual_tasks_for_outcome(&self, outcome_id: Uuid) -> Result<Vec<ManualTask>>;

    // -- Task relationships --
    async fn insert_dependency(&self, dependency: &TaskDependency) -> Result<()>;
    async fn delete_dependency(&self, source_task_id: &str, target_task_id: &str) -> Result<()>;
    async fn list_dependencies_among(&self, task_ids: &[String]) -> Result<Vec<TaskDependency>>;

    // -- Processing log --
    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<()>;
    async fn list_processing_log(
        &self,
        session_id: Uuid,
        operation: Option<&str>,
    ) -> Result<Vec<ProcessingLogEntry>>;
}

/// A structured log entry persisted to `processing_logs` (§6, §4.3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ProcessingLogEntry {
    pub session_id: Uuid,
    pub operation: String,
    pub status: String,
    pub task_id: Option<String>,
    pub attempts: Option<u32>,
    pub last_error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Secret/Key Service (§6): 32-byte symmetric key material for encrypting
/// third-party OAuth tokens at rest.
pub trait KeyProvider: Send + Sync {
    fn symmetric_key(&self) -> Result<[u8; 32]>;
}
