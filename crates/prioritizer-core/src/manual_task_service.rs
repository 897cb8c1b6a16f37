//! Manual Task Placement (§4.6): single-task judgment without re-running
//! the full hybrid loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use schemars::schema_for;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmRequest, ManualTaskDecision, ManualTaskJudgment};
use crate::model::{ManualTask, ManualTaskStatus, TaskEmbedding};
use crate::store::{EmbeddingStore, PersistentStore};

const MANUAL_JUDGMENT_TIMEOUT: Duration = Duration::from_secs(30);
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.88;
const OUTCOME_CHANGED_REASON: &str = "outcome changed";

pub struct ManualTaskService {
    store: Arc<dyn PersistentStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
}

impl ManualTaskService {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        llm: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            embeddings,
            llm,
            clock,
        }
    }

    /// `CreateManualTask(outcome_id, task)` flow (§4.6): mark analyzing,
    /// check near-duplicates, otherwise judge via a single-task LLM call,
    /// and persist the result transactionally.
    ///
    /// A timeout during the LLM call leaves the row in `analyzing` so the
    /// user can retry (§4.6).
    pub async fn create(
        &self,
        outcome_id: Uuid,
        task: &TaskEmbedding,
        outcome_text: &str,
    ) -> Result<ManualTask> {
        let mut manual_task = ManualTask::new_analyzing(task.task_id.clone(), outcome_id);
        self.store.upsert_manual_task(&manual_task).await?;

        if let Some((duplicate_id, similarity)) = self.find_near_duplicate(task).await? {
            manual_task.status = ManualTaskStatus::Conflict;
            manual_task.duplicate_task_id = Some(duplicate_id);
            manual_task.similarity_score = Some(similarity);
            self.store.upsert_manual_task(&manual_task).await?;
            info!(task_id = %task.task_id, similarity, "manual task flagged as near-duplicate");
            return Ok(manual_task);
        }

        let started_at = std::time::Instant::now();
        let judgment = match self.judge(task, outcome_text).await {
            Ok(judgment) => judgment,
            Err(Error::Timeout(_)) => {
                // leave the row in `analyzing` for the user to retry (§4.6)
                return Ok(manual_task);
            }
            Err(err) => return Err(err),
        };

        match judgment.decision {
            ManualTaskDecision::Include => {
                manual_task.status = ManualTaskStatus::Prioritized;
                manual_task.agent_rank = judgment.agent_rank;
                manual_task.placement_reason = judgment.placement_reason;
            }
            ManualTaskDecision::Exclude => {
                manual_task.status = ManualTaskStatus::NotRelevant;
                manual_task.exclusion_reason = judgment.exclusion_reason;
            }
        }
        self.store.upsert_manual_task(&manual_task).await?;

        info!(
            task_id = %task.task_id,
            "manual_task.status" = ?manual_task.status,
            "manual_task.rank" = ?manual_task.agent_rank,
            "manual_task.exclusion_reason" = ?manual_task.exclusion_reason,
            "manual_task.analysis_duration_ms" = started_at.elapsed().as_millis() as u64,
            "manual task analysis complete"
        );

        Ok(manual_task)
    }

    async fn find_near_duplicate(&self, task: &TaskEmbedding) -> Result<Option<(String, f64)>> {
        let hits = self
            .embeddings
            .semantic_search(&task.embedding, 1, NEAR_DUPLICATE_THRESHOLD)
            .await?;
        Ok(hits
            .into_iter()
            .find(|hit| hit.task_id != task.task_id)
            .map(|hit| (hit.task_id, hit.similarity)))
    }

    async fn judge(&self, task: &TaskEmbedding, outcome_text: &str) -> Result<ManualTaskJudgment> {
        let schema = schema_for!(ManualTaskJudgment);
        let prompt = format!(
            "Outcome: {outcome_text}\nNewly added task: {}\nDecide whether to include this task in the prioritized plan and, if included, where it should rank.",
            task.task_text
        );
        let request = LlmRequest {
            prompt,
            schema_name: "ManualTaskJudgment".to_string(),
            schema: serde_json::to_value(&schema)?,
            timeout: MANUAL_JUDGMENT_TIMEOUT,
        };
        let value = self.llm.complete_strict(request).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("manual task judgment failed schema: {e}")))
    }

    /// **Override of discard** (§4.6): moves a `not_relevant` task back to
    /// `analyzing` for a fresh analyze cycle.
    pub async fn override_discard(&self, task_id: &str, justification: Option<String>) -> Result<ManualTask> {
        let mut task = self.store.get_manual_task(task_id).await?;
        if task.status != ManualTaskStatus::NotRelevant {
            return Err(Error::validation(format!(
                "task {task_id} is not in the discard pile (status {:?})",
                task.status
            )));
        }
        task.status = ManualTaskStatus::Analyzing;
        task.exclusion_reason = justification;
        task.duplicate_task_id = None;
        task.similarity_score = None;
        task.deleted_at = None;
        self.store.upsert_manual_task(&task).await?;
        Ok(task)
    }

    /// **Invalidation** (§4.6): when the active outcome changes, every
    /// `prioritized` manual task for the superseded outcome is atomically
    /// moved to the discard pile.
    pub async fn invalidate_for_outcome(&self, outcome_id: Uuid) -> Result<u64> {
        let tasks = self.store.list_manual_tasks_for_outcome(outcome_id).await?;
        let now = self.clock.now();
        let mut invalidated_count = 0_u64;

        for mut task in tasks {
            if task.status != ManualTaskStatus::Prioritized {
                continue;
            }
            task.status = ManualTaskStatus::NotRelevant;
            task.exclusion_reason = Some(OUTCOME_CHANGED_REASON.to_string());
            task.deleted_at = Some(now);
            self.store.upsert_manual_task(&task).await?;
            invalidated_count += 1;
        }

        info!(outcome_id = %outcome_id, invalidated_count, "manual tasks invalidated on outcome change");
        Ok(invalidated_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ImpactEstimate;
    use prioritizer_testing::{FixedClock, InMemoryEmbeddingStore, InMemoryStore, MockLlmClient};

    fn sample_task(id: &str, text: &str, embedding: Vec<f32>) -> TaskEmbedding {
        TaskEmbedding {
            task_id: id.to_string(),
            task_text: text.to_string(),
            document_id: None,
            embedding,
            status: crate::model::TaskStatus::Pending,
            is_manual: true,
            created_by: Some("u1".to_string()),
            quality_metadata: crate::model::QualityMetadata::default(),
            manual_overrides: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn orthogonal_embedding(dim_on: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; 1536];
        v[dim_on] = 1.0;
        v
    }

    #[tokio::test]
    async fn near_duplicate_flags_conflict() {
        let store = Arc::new(InMemoryStore::new());
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let existing = sample_task("existing", "Write onboarding docs", orthogonal_embedding(5));
        embeddings.seed_embedding(&existing).await;

        let llm = Arc::new(MockLlmClient::new().with_impact_estimate(ImpactEstimate {
            impact: 5.0,
            reasoning: "unused".into(),
            keywords: vec![],
            confidence: 0.5,
        }));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = ManualTaskService::new(store, embeddings, llm, clock);

        let new_task = sample_task("new", "Write onboarding documentation", orthogonal_embedding(5));
        let result = service.create(Uuid::new_v4(), &new_task, "Launch the app").await.unwrap();
        assert_eq!(result.status, ManualTaskStatus::Conflict);
        assert_eq!(result.duplicate_task_id.as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn invalidation_discards_prioritized_tasks_only() {
        let store = Arc::new(InMemoryStore::new());
        let outcome_id = Uuid::new_v4();

        let mut prioritized = ManualTask::new_analyzing("p1", outcome_id);
        prioritized.status = ManualTaskStatus::Prioritized;
        store.seed_manual_task(prioritized).await;

        let mut analyzing = ManualTask::new_analyzing("a1", outcome_id);
        analyzing.status = ManualTaskStatus::Analyzing;
        store.seed_manual_task(analyzing).await;

        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let llm = Arc::new(MockLlmClient::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = ManualTaskService::new(store.clone(), embeddings, llm, clock);

        let invalidated_count = service.invalidate_for_outcome(outcome_id).await.unwrap();
        assert_eq!(invalidated_count, 1);

        let p1 = store.get_manual_task("p1").await.unwrap();
        assert_eq!(p1.status, ManualTaskStatus::NotRelevant);
        assert_eq!(p1.exclusion_reason.as_deref(), Some("outcome changed"));

        let a1 = store.get_manual_task("a1").await.unwrap();
        assert_eq!(a1.status, ManualTaskStatus::Analyzing);
    }

    #[tokio::test]
    async fn override_discard_requires_not_relevant_status() {
        let store = Arc::new(InMemoryStore::new());
        let mut task = ManualTask::new_analyzing("t1", Uuid::new_v4());
        task.status = ManualTaskStatus::Analyzing;
        store.seed_manual_task(task).await;

        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let llm = Arc::new(MockLlmClient::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = ManualTaskService::new(store, embeddings, llm, clock);

        let result = service.override_discard("t1", None).await;
        assert!(result.is_err());
    }
}
