//! Postgres-backed `PersistentStore` (§6) for the prioritization
//! orchestration engine.
//!
//! Lays out the required tables named in §6 (`user_outcomes`,
//! `task_embeddings`, `agent_sessions`, `reflections`, `reflection_intents`,
//! `manual_tasks`, `task_relationships`, `processing_logs`) as plain
//! Postgres tables with JSONB columns for the nested plan/score/metadata
//! shapes, using a connect-then-spawn-the-connection-task pattern and
//! identifier-validation discipline for any caller-supplied SQL names.

mod error;
mod key_provider;

pub use error::PostgresStoreError;
pub use key_provider::{decrypt, encrypt, EnvKeyProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};
use uuid::Uuid;

use prioritizer_core::error::{Error, Result};
use prioritizer_core::model::{
    AgentSession, ManualOverride, ManualTask, ManualTaskStatus, Outcome, Reflection,
    ReflectionIntent, ReflectionIntentType, RelationshipType, SessionStatus, TaskDependency,
    TaskEmbedding, TaskStatus,
};
use prioritizer_core::store::{PersistentStore, ProcessingLogEntry};

/// Validates a Postgres identifier before it is interpolated into SQL
/// (table name customization only; every column/table name below is a
/// compile-time constant, but the teacher's table-name constructor takes a
/// caller-supplied name, so the same guard applies here).
fn validate_identifier(name: &str) -> std::result::Result<(), PostgresStoreError> {
    if name.is_empty() {
        return Err(PostgresStoreError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }
    if name.len() > 63 {
        return Err(PostgresStoreError::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().ok_or_else(|| {
        PostgresStoreError::InvalidIdentifier("identifier cannot be empty".to_string())
    })?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(PostgresStoreError::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(PostgresStoreError::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Archived => "archived",
    }
}

fn task_status_from_str(s: &str) -> std::result::Result<TaskStatus, PostgresStoreError> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "archived" => Ok(TaskStatus::Archived),
        other => Err(PostgresStoreError::Generic(format!(
            "unknown task status '{other}'"
        ))),
    }
}

fn session_status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Running => "running",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
    }
}

fn session_status_from_str(s: &str) -> std::result::Result<SessionStatus, PostgresStoreError> {
    match s {
        "running" => Ok(SessionStatus::Running),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        other => Err(PostgresStoreError::Generic(format!(
            "unknown session status '{other}'"
        ))),
    }
}

fn manual_task_status_to_str(status: ManualTaskStatus) -> &'static str {
    match status {
        ManualTaskStatus::Analyzing => "analyzing",
        ManualTaskStatus::Prioritized => "prioritized",
        ManualTaskStatus::NotRelevant => "not_relevant",
        ManualTaskStatus::Conflict => "conflict",
    }
}

fn manual_task_status_from_str(
    s: &str,
) -> std::result::Result<ManualTaskStatus, PostgresStoreError> {
    match s {
        "analyzing" => Ok(ManualTaskStatus::Analyzing),
        "prioritized" => Ok(ManualTaskStatus::Prioritized),
        "not_relevant" => Ok(ManualTaskStatus::NotRelevant),
        "conflict" => Ok(ManualTaskStatus::Conflict),
        other => Err(PostgresStoreError::Generic(format!(
            "unknown manual task status '{other}'"
        ))),
    }
}

fn relationship_type_to_str(kind: RelationshipType) -> &'static str {
    match kind {
        RelationshipType::Prerequisite => "prerequisite",
        RelationshipType::Blocks => "blocks",
        RelationshipType::Related => "related",
    }
}

fn relationship_type_from_str(
    s: &str,
) -> std::result::Result<RelationshipType, PostgresStoreError> {
    match s {
        "prerequisite" => Ok(RelationshipType::Prerequisite),
        "blocks" => Ok(RelationshipType::Blocks),
        "related" => Ok(RelationshipType::Related),
        other => Err(PostgresStoreError::Generic(format!(
            "unknown relationship type '{other}'"
        ))),
    }
}

fn intent_type_to_str(kind: ReflectionIntentType) -> &'static str {
    match kind {
        ReflectionIntentType::Focus => "focus",
        ReflectionIntentType::Avoid => "avoid",
        ReflectionIntentType::Urgency => "urgency",
        ReflectionIntentType::Constraint => "constraint",
        ReflectionIntentType::Context => "context",
    }
}

fn intent_type_from_str(
    s: &str,
) -> std::result::Result<ReflectionIntentType, PostgresStoreError> {
    match s {
        "focus" => Ok(ReflectionIntentType::Focus),
        "avoid" => Ok(ReflectionIntentType::Avoid),
        "urgency" => Ok(ReflectionIntentType::Urgency),
        "constraint" => Ok(ReflectionIntentType::Constraint),
        "context" => Ok(ReflectionIntentType::Context),
        other => Err(PostgresStoreError::Generic(format!(
            "unknown reflection intent type '{other}'"
        ))),
    }
}

/// Postgres-backed implementation of `PersistentStore` (§6).
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connects to Postgres and ensures the schema exists (§6 required
    /// tables). Mirrors the teacher's connect-then-spawn-connection-task
    /// idiom so a dropped connection surfaces in logs rather than silently
    /// stalling every future query.
    pub async fn new(connection_string: &str) -> std::result::Result<Self, PostgresStoreError> {
        info!("connecting to postgres for the prioritization store");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error");
            }
        });

        let store = Self { client };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> std::result::Result<(), PostgresStoreError> {
        self.client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS user_outcomes (
                    id UUID PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    direction TEXT NOT NULL,
                    object_text TEXT NOT NULL,
                    metric_text TEXT NOT NULL,
                    clarifier TEXT,
                    assembled_text TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL,
                    state_preference TEXT,
                    daily_capacity_hours DOUBLE PRECISION,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_user_outcomes_user_active
                    ON user_outcomes (user_id, is_active);

                CREATE TABLE IF NOT EXISTS task_embeddings (
                    task_id TEXT PRIMARY KEY,
                    task_text TEXT NOT NULL,
                    document_id TEXT,
                    embedding JSONB NOT NULL,
                    status TEXT NOT NULL,
                    is_manual BOOLEAN NOT NULL,
                    created_by TEXT,
                    quality_metadata JSONB NOT NULL,
                    manual_overrides JSONB,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS agent_sessions (
                    id UUID PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    outcome_id UUID NOT NULL,
                    status TEXT NOT NULL,
                    prioritized_plan JSONB,
                    baseline_plan JSONB,
                    adjusted_plan JSONB,
                    strategic_scores JSONB NOT NULL,
                    excluded_tasks JSONB NOT NULL,
                    evaluation_metadata JSONB,
                    execution_metadata JSONB NOT NULL,
                    result JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_agent_sessions_user_outcome
                    ON agent_sessions (user_id, outcome_id);

                CREATE TABLE IF NOT EXISTS reflections (
                    id UUID PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    is_active_for_prioritization BOOLEAN NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_reflections_user_active
                    ON reflections (user_id, is_active_for_prioritization);

                CREATE TABLE IF NOT EXISTS reflection_intents (
                    reflection_id UUID PRIMARY KEY,
                    intent_type TEXT NOT NULL,
                    subtype TEXT,
                    keywords JSONB NOT NULL,
                    strength DOUBLE PRECISION NOT NULL,
                    duration TEXT,
                    summary TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS manual_tasks (
                    task_id TEXT PRIMARY KEY,
                    outcome_id UUID NOT NULL,
                    status TEXT NOT NULL,
                    agent_rank INTEGER,
                    placement_reason TEXT,
                    exclusion_reason TEXT,
                    duplicate_task_id TEXT,
                    similarity_score DOUBLE PRECISION,
                    marked_done_at TIMESTAMPTZ,
                    deleted_at TIMESTAMPTZ
                );
                CREATE INDEX IF NOT EXISTS idx_manual_tasks_outcome
                    ON manual_tasks (outcome_id);

                CREATE TABLE IF NOT EXISTS task_relationships (
                    source_task_id TEXT NOT NULL,
                    target_task_id TEXT NOT NULL,
                    relationship_type TEXT NOT NULL,
                    confidence DOUBLE PRECISION NOT NULL,
                    PRIMARY KEY (source_task_id, target_task_id)
                );

                CREATE TABLE IF NOT EXISTS processing_logs (
                    id BIGSERIAL PRIMARY KEY,
                    session_id UUID NOT NULL,
                    operation TEXT NOT NULL,
                    status TEXT NOT NULL,
                    task_id TEXT,
                    attempts INTEGER,
                    last_error TEXT,
                    metadata JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_processing_logs_session
                    ON processing_logs (session_id);
                ",
            )
            .await?;
        debug!("prioritization store schema initialized");
        Ok(())
    }

    fn outcome_from_row(row: &tokio_postgres::Row) -> Outcome {
        Outcome {
            id: row.get("id"),
            user_id: row.get("user_id"),
            direction: row.get("direction"),
            object_text: row.get("object_text"),
            metric_text: row.get("metric_text"),
            clarifier: row.get("clarifier"),
            assembled_text: row.get("assembled_text"),
            is_active: row.get("is_active"),
            state_preference: row.get("state_preference"),
            daily_capacity_hours: row.get("daily_capacity_hours"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn task_from_row(row: &tokio_postgres::Row) -> std::result::Result<TaskEmbedding, PostgresStoreError> {
        let status_str: String = row.get("status");
        let embedding_json: serde_json::Value = row.get("embedding");
        let quality_json: serde_json::Value = row.get("quality_metadata");
        let overrides_json: Option<serde_json::Value> = row.get("manual_overrides");
        Ok(TaskEmbedding {
            task_id: row.get("task_id"),
            task_text: row.get("task_text"),
            document_id: row.get("document_id"),
            embedding: serde_json::from_value(embedding_json)?,
            status: task_status_from_str(&status_str)?,
            is_manual: row.get("is_manual"),
            created_by: row.get("created_by"),
            quality_metadata: serde_json::from_value(quality_json)?,
            manual_overrides: overrides_json.map(serde_json::from_value).transpose()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn session_from_row(row: &tokio_postgres::Row) -> std::result::Result<AgentSession, PostgresStoreError> {
        let status_str: String = row.get("status");
        let prioritized_plan: Option<serde_json::Value> = row.get("prioritized_plan");
        let baseline_plan: Option<serde_json::Value> = row.get("baseline_plan");
        let adjusted_plan: Option<serde_json::Value> = row.get("adjusted_plan");
        let strategic_scores: serde_json::Value = row.get("strategic_scores");
        let excluded_tasks: serde_json::Value = row.get("excluded_tasks");
        let evaluation_metadata: Option<serde_json::Value> = row.get("evaluation_metadata");
        let execution_metadata: serde_json::Value = row.get("execution_metadata");
        let result: serde_json::Value = row.get("result");

        Ok(AgentSession {
            id: row.get("id"),
            user_id: row.get("user_id"),
            outcome_id: row.get("outcome_id"),
            status: session_status_from_str(&status_str)?,
            prioritized_plan: prioritized_plan.map(serde_json::from_value).transpose()?,
            baseline_plan: baseline_plan.map(serde_json::from_value).transpose()?,
            adjusted_plan: adjusted_plan.map(serde_json::from_value).transpose()?,
            strategic_scores: serde_json::from_value(strategic_scores)?,
            excluded_tasks: serde_json::from_value(excluded_tasks)?,
            evaluation_metadata: evaluation_metadata.map(serde_json::from_value).transpose()?,
            execution_metadata: serde_json::from_value(execution_metadata)?,
            result: serde_json::from_value(result)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn reflection_from_row(row: &tokio_postgres::Row) -> Reflection {
        Reflection {
            id: row.get("id"),
            user_id: row.get("user_id"),
            text: row.get("text"),
            is_active_for_prioritization: row.get("is_active_for_prioritization"),
            created_at: row.get("created_at"),
        }
    }

    fn intent_from_row(
        row: &tokio_postgres::Row,
    ) -> std::result::Result<ReflectionIntent, PostgresStoreError> {
        let intent_type_str: String = row.get("intent_type");
        let keywords_json: serde_json::Value = row.get("keywords");
        Ok(ReflectionIntent {
            reflection_id: row.get("reflection_id"),
            intent_type: intent_type_from_str(&intent_type_str)?,
            subtype: row.get("subtype"),
            keywords: serde_json::from_value(keywords_json)?,
            strength: row.get("strength"),
            duration: row.get("duration"),
            summary: row.get("summary"),
        })
    }

    fn manual_task_from_row(
        row: &tokio_postgres::Row,
    ) -> std::result::Result<ManualTask, PostgresStoreError> {
        let status_str: String = row.get("status");
        let agent_rank: Option<i32> = row.get("agent_rank");
        Ok(ManualTask {
            task_id: row.get("task_id"),
            outcome_id: row.get("outcome_id"),
            status: manual_task_status_from_str(&status_str)?,
            agent_rank: agent_rank.map(|r| r.max(0) as u32),
            placement_reason: row.get("placement_reason"),
            exclusion_reason: row.get("exclusion_reason"),
            duplicate_task_id: row.get("duplicate_task_id"),
            similarity_score: row.get("similarity_score"),
            marked_done_at: row.get("marked_done_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn dependency_from_row(
        row: &tokio_postgres::Row,
    ) -> std::result::Result<TaskDependency, PostgresStoreError> {
        let relationship_str: String = row.get("relationship_type");
        Ok(TaskDependency {
            source_task_id: row.get("source_task_id"),
            target_task_id: row.get("target_task_id"),
            relationship_type: relationship_type_from_str(&relationship_str)?,
            confidence: row.get("confidence"),
        })
    }

    fn processing_log_from_row(
        row: &tokio_postgres::Row,
    ) -> std::result::Result<ProcessingLogEntry, PostgresStoreError> {
        let attempts: Option<i32> = row.get("attempts");
        let metadata: serde_json::Value = row.get("metadata");
        Ok(ProcessingLogEntry {
            session_id: row.get("session_id"),
            operation: row.get("operation"),
            status: row.get("status"),
            task_id: row.get("task_id"),
            attempts: attempts.map(|a| a.max(0) as u32),
            last_error: row.get("last_error"),
            metadata,
            created_at: row.get("created_at"),
        })
    }
}

impl PostgresStore {
    /// Inserts a new outcome row. Outcome creation sits upstream of the
    /// orchestration engine (it is not one of the engine's own operations),
    /// so this is a plain inherent method rather than part of
    /// `PersistentStore`.
    pub async fn insert_outcome(&self, outcome: &Outcome) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO user_outcomes
                    (id, user_id, direction, object_text, metric_text, clarifier,
                     assembled_text, is_active, state_preference, daily_capacity_hours,
                     created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &outcome.id,
                    &outcome.user_id,
                    &outcome.direction,
                    &outcome.object_text,
                    &outcome.metric_text,
                    &outcome.clarifier,
                    &outcome.assembled_text,
                    &outcome.is_active,
                    &outcome.state_preference,
                    &outcome.daily_capacity_hours,
                    &outcome.created_at,
                    &outcome.updated_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for PostgresStore {
    async fn get_outcome(&self, outcome_id: Uuid) -> Result<Outcome> {
        let row = self
            .client
            .query_opt("SELECT * FROM user_outcomes WHERE id = $1", &[&outcome_id])
            .await
            .map_err(PostgresStoreError::from)?
            .ok_or_else(|| PostgresStoreError::NotFound(format!("outcome {outcome_id}")))?;
        Ok(Self::outcome_from_row(&row))
    }

    async fn get_active_outcome(&self, user_id: &str) -> Result<Option<Outcome>> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM user_outcomes WHERE user_id = $1 AND is_active = TRUE",
                &[&user_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(row.map(|r| Self::outcome_from_row(&r)))
    }

    async fn activate_outcome(&self, outcome_id: Uuid) -> Result<()> {
        let outcome = self.get_outcome(outcome_id).await?;
        self.client
            .execute(
                "UPDATE user_outcomes SET is_active = FALSE WHERE user_id = $1 AND id != $2",
                &[&outcome.user_id, &outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        self.client
            .execute(
                "UPDATE user_outcomes SET is_active = TRUE, updated_at = NOW() WHERE id = $1",
                &[&outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskEmbedding> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM task_embeddings WHERE task_id = $1",
                &[&task_id],
            )
            .await
            .map_err(PostgresStoreError::from)?
            .ok_or_else(|| PostgresStoreError::NotFound(format!("task {task_id}")))?;
        Ok(Self::task_from_row(&row)?)
    }

    async fn get_tasks(&self, task_ids: &[String]) -> Result<Vec<TaskEmbedding>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(
                "SELECT * FROM task_embeddings WHERE task_id = ANY($1)",
                &[&task_ids],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter()
            .map(|row| Self::task_from_row(row).map_err(Error::from))
            .collect()
    }

    async fn list_available_tasks(&self, user_id: &str) -> Result<Vec<TaskEmbedding>> {
        let rows = self
            .client
            .query(
                "SELECT t.* FROM task_embeddings t
                 LEFT JOIN manual_tasks m ON m.task_id = t.task_id
                 WHERE t.status != 'archived'
                   AND (t.created_by = $1 OR t.created_by IS NULL)
                   AND (m.deleted_at IS NULL OR m.deleted_at < NOW() - INTERVAL '30 days')",
                &[&user_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter()
            .map(|row| Self::task_from_row(row).map_err(Error::from))
            .collect()
    }

    async fn upsert_task(&self, task: &TaskEmbedding) -> Result<()> {
        let embedding_json = serde_json::to_value(&task.embedding).map_err(PostgresStoreError::from)?;
        let quality_json =
            serde_json::to_value(&task.quality_metadata).map_err(PostgresStoreError::from)?;
        let overrides_json = task
            .manual_overrides
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;

        self.client
            .execute(
                "INSERT INTO task_embeddings
                    (task_id, task_text, document_id, embedding, status, is_manual,
                     created_by, quality_metadata, manual_overrides, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (task_id) DO UPDATE SET
                    task_text = EXCLUDED.task_text,
                    document_id = EXCLUDED.document_id,
                    embedding = EXCLUDED.embedding,
                    status = EXCLUDED.status,
                    is_manual = EXCLUDED.is_manual,
                    created_by = EXCLUDED.created_by,
                    quality_metadata = EXCLUDED.quality_metadata,
                    manual_overrides = EXCLUDED.manual_overrides,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &task.task_id,
                    &task.task_text,
                    &task.document_id,
                    &embedding_json,
                    &task_status_to_str(task.status),
                    &task.is_manual,
                    &task.created_by,
                    &quality_json,
                    &overrides_json,
                    &task.created_at,
                    &task.updated_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn apply_manual_override(
        &self,
        task_id: &str,
        override_value: &ManualOverride,
    ) -> Result<()> {
        let overrides_json = serde_json::to_value(override_value).map_err(PostgresStoreError::from)?;
        let rows = self
            .client
            .execute(
                "UPDATE task_embeddings SET manual_overrides = $1, updated_at = NOW()
                 WHERE task_id = $2",
                &[&overrides_json, &task_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        if rows == 0 {
            return Err(PostgresStoreError::NotFound(format!("task {task_id}")).into());
        }
        Ok(())
    }

    async fn insert_session(&self, session: &AgentSession) -> Result<()> {
        let prioritized_plan = session
            .prioritized_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let baseline_plan = session
            .baseline_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let adjusted_plan = session
            .adjusted_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let strategic_scores =
            serde_json::to_value(&session.strategic_scores).map_err(PostgresStoreError::from)?;
        let excluded_tasks =
            serde_json::to_value(&session.excluded_tasks).map_err(PostgresStoreError::from)?;
        let evaluation_metadata = session
            .evaluation_metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let execution_metadata =
            serde_json::to_value(&session.execution_metadata).map_err(PostgresStoreError::from)?;
        let result = serde_json::to_value(&session.result).map_err(PostgresStoreError::from)?;

        self.client
            .execute(
                "INSERT INTO agent_sessions
                    (id, user_id, outcome_id, status, prioritized_plan, baseline_plan,
                     adjusted_plan, strategic_scores, excluded_tasks, evaluation_metadata,
                     execution_metadata, result, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &session.id,
                    &session.user_id,
                    &session.outcome_id,
                    &session_status_to_str(session.status),
                    &prioritized_plan,
                    &baseline_plan,
                    &adjusted_plan,
                    &strategic_scores,
                    &excluded_tasks,
                    &evaluation_metadata,
                    &execution_metadata,
                    &result,
                    &session.created_at,
                    &session.updated_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<AgentSession> {
        let row = self
            .client
            .query_opt("SELECT * FROM agent_sessions WHERE id = $1", &[&session_id])
            .await
            .map_err(PostgresStoreError::from)?
            .ok_or_else(|| PostgresStoreError::NotFound(format!("session {session_id}")))?;
        Ok(Self::session_from_row(&row)?)
    }

    async fn get_latest_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM agent_sessions WHERE user_id = $1 AND outcome_id = $2
                 ORDER BY created_at DESC LIMIT 1",
                &[&user_id, &outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        row.map(|r| Self::session_from_row(&r).map_err(Error::from))
            .transpose()
    }

    async fn get_latest_completed_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM agent_sessions WHERE user_id = $1 AND outcome_id = $2
                 AND status = 'completed' ORDER BY created_at DESC LIMIT 1",
                &[&user_id, &outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        row.map(|r| Self::session_from_row(&r).map_err(Error::from))
            .transpose()
    }

    async fn delete_sessions_for_outcome(&self, user_id: &str, outcome_id: Uuid) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM agent_sessions WHERE user_id = $1 AND outcome_id = $2",
                &[&user_id, &outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn update_session(&self, session: &AgentSession) -> Result<()> {
        let prioritized_plan = session
            .prioritized_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let baseline_plan = session
            .baseline_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let adjusted_plan = session
            .adjusted_plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let strategic_scores =
            serde_json::to_value(&session.strategic_scores).map_err(PostgresStoreError::from)?;
        let excluded_tasks =
            serde_json::to_value(&session.excluded_tasks).map_err(PostgresStoreError::from)?;
        let evaluation_metadata = session
            .evaluation_metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(PostgresStoreError::from)?;
        let execution_metadata =
            serde_json::to_value(&session.execution_metadata).map_err(PostgresStoreError::from)?;
        let result = serde_json::to_value(&session.result).map_err(PostgresStoreError::from)?;

        let rows = self
            .client
            .execute(
                "UPDATE agent_sessions SET
                    status = $1, prioritized_plan = $2, baseline_plan = $3,
                    adjusted_plan = $4, strategic_scores = $5, excluded_tasks = $6,
                    evaluation_metadata = $7, execution_metadata = $8, result = $9,
                    updated_at = NOW()
                 WHERE id = $10",
                &[
                    &session_status_to_str(session.status),
                    &prioritized_plan,
                    &baseline_plan,
                    &adjusted_plan,
                    &strategic_scores,
                    &excluded_tasks,
                    &evaluation_metadata,
                    &execution_metadata,
                    &result,
                    &session.id,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        if rows == 0 {
            return Err(PostgresStoreError::NotFound(format!("session {}", session.id)).into());
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self, older_than: DateTime<Utc>) -> Result<u64> {
        match self
            .client
            .execute(
                "DELETE FROM agent_sessions WHERE created_at < $1",
                &[&older_than],
            )
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) => {
                // §4.1: opportunistic cleanup must never fail the caller's read.
                error!(error = %e, "failed to delete expired sessions; continuing");
                Ok(0)
            }
        }
    }

    async fn insert_reflection(&self, reflection: &Reflection) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO reflections (id, user_id, text, is_active_for_prioritization, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &reflection.id,
                    &reflection.user_id,
                    &reflection.text,
                    &reflection.is_active_for_prioritization,
                    &reflection.created_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn get_reflection(&self, reflection_id: Uuid) -> Result<Reflection> {
        let row = self
            .client
            .query_opt("SELECT * FROM reflections WHERE id = $1", &[&reflection_id])
            .await
            .map_err(PostgresStoreError::from)?
            .ok_or_else(|| PostgresStoreError::NotFound(format!("reflection {reflection_id}")))?;
        Ok(Self::reflection_from_row(&row))
    }

    async fn list_active_reflections(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reflection>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM reflections
                 WHERE user_id = $1 AND is_active_for_prioritization = TRUE AND created_at >= $2
                 ORDER BY created_at DESC LIMIT $3",
                &[&user_id, &since, &(limit as i64)],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(rows.iter().map(Self::reflection_from_row).collect())
    }

    async fn set_reflection_active(&self, reflection_id: Uuid, is_active: bool) -> Result<()> {
        let rows = self
            .client
            .execute(
                "UPDATE reflections SET is_active_for_prioritization = $1 WHERE id = $2",
                &[&is_active, &reflection_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        if rows == 0 {
            return Err(PostgresStoreError::NotFound(format!("reflection {reflection_id}")).into());
        }
        Ok(())
    }

    async fn delete_reflection(&self, reflection_id: Uuid) -> Result<()> {
        self.client
            .execute("DELETE FROM reflections WHERE id = $1", &[&reflection_id])
            .await
            .map_err(PostgresStoreError::from)?;
        self.client
            .execute(
                "DELETE FROM reflection_intents WHERE reflection_id = $1",
                &[&reflection_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        info!(reflection_id = %reflection_id, "reflection_deleted");
        Ok(())
    }

    async fn upsert_reflection_intent(&self, intent: &ReflectionIntent) -> Result<()> {
        let keywords_json = serde_json::to_value(&intent.keywords).map_err(PostgresStoreError::from)?;
        self.client
            .execute(
                "INSERT INTO reflection_intents
                    (reflection_id, intent_type, subtype, keywords, strength, duration, summary)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (reflection_id) DO UPDATE SET
                    intent_type = EXCLUDED.intent_type,
                    subtype = EXCLUDED.subtype,
                    keywords = EXCLUDED.keywords,
                    strength = EXCLUDED.strength,
                    duration = EXCLUDED.duration,
                    summary = EXCLUDED.summary",
                &[
                    &intent.reflection_id,
                    &intent_type_to_str(intent.intent_type),
                    &intent.subtype,
                    &keywords_json,
                    &intent.strength,
                    &intent.duration,
                    &intent.summary,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn get_reflection_intent(&self, reflection_id: Uuid) -> Result<Option<ReflectionIntent>> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM reflection_intents WHERE reflection_id = $1",
                &[&reflection_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        row.map(|r| Self::intent_from_row(&r).map_err(Error::from))
            .transpose()
    }

    async fn upsert_manual_task(&self, task: &ManualTask) -> Result<()> {
        let agent_rank = task.agent_rank.map(|r| r as i32);
        self.client
            .execute(
                "INSERT INTO manual_tasks
                    (task_id, outcome_id, status, agent_rank, placement_reason,
                     exclusion_reason, duplicate_task_id, similarity_score,
                     marked_done_at, deleted_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (task_id) DO UPDATE SET
                    outcome_id = EXCLUDED.outcome_id,
                    status = EXCLUDED.status,
                    agent_rank = EXCLUDED.agent_rank,
                    placement_reason = EXCLUDED.placement_reason,
                    exclusion_reason = EXCLUDED.exclusion_reason,
                    duplicate_task_id = EXCLUDED.duplicate_task_id,
                    similarity_score = EXCLUDED.similarity_score,
                    marked_done_at = EXCLUDED.marked_done_at,
                    deleted_at = EXCLUDED.deleted_at",
                &[
                    &task.task_id,
                    &task.outcome_id,
                    &manual_task_status_to_str(task.status),
                    &agent_rank,
                    &task.placement_reason,
                    &task.exclusion_reason,
                    &task.duplicate_task_id,
                    &task.similarity_score,
                    &task.marked_done_at,
                    &task.deleted_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn get_manual_task(&self, task_id: &str) -> Result<ManualTask> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM manual_tasks WHERE task_id = $1",
                &[&task_id],
            )
            .await
            .map_err(PostgresStoreError::from)?
            .ok_or_else(|| PostgresStoreError::NotFound(format!("manual task {task_id}")))?;
        Ok(Self::manual_task_from_row(&row)?)
    }

    async fn list_manual_tasks_for_outcome(&self, outcome_id: Uuid) -> Result<Vec<ManualTask>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM manual_tasks WHERE outcome_id = $1",
                &[&outcome_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter()
            .map(|row| Self::manual_task_from_row(row).map_err(Error::from))
            .collect()
    }

    async fn insert_dependency(&self, dependency: &TaskDependency) -> Result<()> {
        dependency.validate()?;
        self.client
            .execute(
                "INSERT INTO task_relationships
                    (source_task_id, target_task_id, relationship_type, confidence)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (source_task_id, target_task_id) DO UPDATE SET
                    relationship_type = EXCLUDED.relationship_type,
                    confidence = EXCLUDED.confidence",
                &[
                    &dependency.source_task_id,
                    &dependency.target_task_id,
                    &relationship_type_to_str(dependency.relationship_type),
                    &dependency.confidence,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn delete_dependency(&self, source_task_id: &str, target_task_id: &str) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM task_relationships WHERE source_task_id = $1 AND target_task_id = $2",
                &[&source_task_id, &target_task_id],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn list_dependencies_among(&self, task_ids: &[String]) -> Result<Vec<TaskDependency>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(
                "SELECT * FROM task_relationships
                 WHERE source_task_id = ANY($1) AND target_task_id = ANY($1)",
                &[&task_ids],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter()
            .map(|row| Self::dependency_from_row(row).map_err(Error::from))
            .collect()
    }

    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<()> {
        let attempts = entry.attempts.map(|a| a as i32);
        self.client
            .execute(
                "INSERT INTO processing_logs
                    (session_id, operation, status, task_id, attempts, last_error, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &entry.session_id,
                    &entry.operation,
                    &entry.status,
                    &entry.task_id,
                    &attempts,
                    &entry.last_error,
                    &entry.metadata,
                    &entry.created_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn list_processing_log(
        &self,
        session_id: Uuid,
        operation: Option<&str>,
    ) -> Result<Vec<ProcessingLogEntry>> {
        let rows = match operation {
            Some(op) => {
                self.client
                    .query(
                        "SELECT * FROM processing_logs WHERE session_id = $1 AND operation = $2
                         ORDER BY created_at ASC",
                        &[&session_id, &op],
                    )
                    .await
            }
            None => {
                self.client
                    .query(
                        "SELECT * FROM processing_logs WHERE session_id = $1 ORDER BY created_at ASC",
                        &[&session_id],
                    )
                    .await
            }
        }
        .map_err(PostgresStoreError::from)?;
        rows.iter()
            .map(|row| Self::processing_log_from_row(row).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_rejects_sql_injection_attempts() {
        assert!(validate_identifier("x; DROP TABLE users; --").is_err());
        assert!(validate_identifier("table'").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn validate_identifier_accepts_common_table_names() {
        assert!(validate_identifier("agent_sessions").is_ok());
        assert!(validate_identifier("task_embeddings").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn task_status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Archived,
        ] {
            let s = task_status_to_str(status);
            assert_eq!(task_status_from_str(s).unwrap(), status);
        }
    }

    #[test]
    fn session_status_round_trips_through_str() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            let s = session_status_to_str(status);
            assert_eq!(session_status_from_str(s).unwrap(), status);
        }
    }

    #[test]
    fn manual_task_status_round_trips_through_str() {
        for status in [
            ManualTaskStatus::Analyzing,
            ManualTaskStatus::Prioritized,
            ManualTaskStatus::NotRelevant,
            ManualTaskStatus::Conflict,
        ] {
            let s = manual_task_status_to_str(status);
            assert_eq!(manual_task_status_from_str(s).unwrap(), status);
        }
    }

    #[test]
    fn relationship_type_round_trips_through_str() {
        for kind in [
            RelationshipType::Prerequisite,
            RelationshipType::Blocks,
            RelationshipType::Related,
        ] {
            let s = relationship_type_to_str(kind);
            assert_eq!(relationship_type_from_str(s).unwrap(), kind);
        }
    }

    #[test]
    fn intent_type_round_trips_through_str() {
        for kind in [
            ReflectionIntentType::Focus,
            ReflectionIntentType::Avoid,
            ReflectionIntentType::Urgency,
            ReflectionIntentType::Constraint,
            ReflectionIntentType::Context,
        ] {
            let s = intent_type_to_str(kind);
            assert_eq!(intent_type_from_str(s).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(task_status_from_str("unknown").is_err());
        assert!(session_status_from_str("unknown").is_err());
        assert!(manual_task_status_from_str("unknown").is_err());
        assert!(relationship_type_from_str("unknown").is_err());
        assert!(intent_type_from_str("unknown").is_err());
    }
}
