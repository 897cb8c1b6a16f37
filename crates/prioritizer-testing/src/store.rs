//! [`InMemoryStore`] and [`InMemoryEmbeddingStore`]: `HashMap`-backed test
//! doubles for [`PersistentStore`] and [`EmbeddingStore`].
//!
//! Every method takes `&self` and locks a private `Mutex` for the duration
//! of the read/write — no lock is ever held across an `.await` point, so
//! these are safe to share via `Arc` across concurrent test tasks the same
//! way the real adapters are.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prioritizer_core::error::{Error, Result};
use prioritizer_core::model::{
    AgentSession, ManualOverride, ManualTask, Outcome, Reflection, ReflectionIntent,
    TaskDependency, TaskEmbedding,
};
use prioritizer_core::store::{EmbeddingStore, PersistentStore, ProcessingLogEntry, SemanticSearchHit};
use uuid::Uuid;

/// An in-memory [`PersistentStore`] double, seeded directly from test code
/// via the `seed_*` helpers rather than through the trait's write path.
#[derive(Default)]
pub struct InMemoryStore {
    outcomes: Mutex<HashMap<Uuid, Outcome>>,
    tasks: Mutex<HashMap<String, TaskEmbedding>>,
    sessions: Mutex<HashMap<Uuid, AgentSession>>,
    reflections: Mutex<HashMap<Uuid, Reflection>>,
    reflection_intents: Mutex<HashMap<Uuid, ReflectionIntent>>,
    manual_tasks: Mutex<HashMap<String, ManualTask>>,
    dependencies: Mutex<Vec<TaskDependency>>,
    processing_log: Mutex<Vec<ProcessingLogEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_outcome(&self, outcome: Outcome) {
        self.outcomes.lock().insert(outcome.id, outcome);
    }

    pub async fn seed_task(&self, task: TaskEmbedding) {
        self.tasks.lock().insert(task.task_id.clone(), task);
    }

    pub async fn seed_session(&self, session: AgentSession) {
        self.sessions.lock().insert(session.id, session);
    }

    pub async fn seed_manual_task(&self, task: ManualTask) {
        self.manual_tasks.lock().insert(task.task_id.clone(), task);
    }

    pub async fn seed_reflection(&self, reflection: Reflection) {
        self.reflections.lock().insert(reflection.id, reflection);
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get_outcome(&self, outcome_id: Uuid) -> Result<Outcome> {
        self.outcomes
            .lock()
            .get(&outcome_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("outcome {outcome_id} not found")))
    }

    async fn get_active_outcome(&self, user_id: &str) -> Result<Option<Outcome>> {
        Ok(self
            .outcomes
            .lock()
            .values()
            .find(|o| o.user_id == user_id && o.is_active)
            .cloned())
    }

    async fn activate_outcome(&self, outcome_id: Uuid) -> Result<()> {
        let mut outcomes = self.outcomes.lock();
        let user_id = outcomes
            .get(&outcome_id)
            .map(|o| o.user_id.clone())
            .ok_or_else(|| Error::not_found(format!("outcome {outcome_id} not found")))?;
        for outcome in outcomes.values_mut() {
            if outcome.user_id == user_id {
                outcome.is_active = outcome.id == outcome_id;
            }
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskEmbedding> {
        self.tasks
            .lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("task {task_id} not found")))
    }

    async fn get_tasks(&self, task_ids: &[String]) -> Result<Vec<TaskEmbedding>> {
        let tasks = self.tasks.lock();
        Ok(task_ids
            .iter()
            .filter_map(|id| tasks.get(id).cloned())
            .collect())
    }

    async fn list_available_tasks(&self, _user_id: &str) -> Result<Vec<TaskEmbedding>> {
        // This double has no user scoping on `TaskEmbedding` (a real store
        // scopes through the outcome/session the task belongs to); it
        // returns every non-archived task regardless of owner.
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.is_available())
            .cloned()
            .collect())
    }

    async fn upsert_task(&self, task: &TaskEmbedding) -> Result<()> {
        self.tasks.lock().insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn apply_manual_override(
        &self,
        task_id: &str,
        override_value: &ManualOverride,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found(format!("task {task_id} not found")))?;
        task.manual_overrides = Some(override_value.clone());
        Ok(())
    }

    async fn insert_session(&self, session: &AgentSession) -> Result<()> {
        self.sessions.lock().insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<AgentSession> {
        self.sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("session {session_id} not found")))
    }

    async fn get_latest_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>> {
        Ok(self
            .sessions
            .lock()
            .values()
            .filter(|s| s.user_id == user_id && s.outcome_id == outcome_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_latest_completed_session(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>> {
        Ok(self
            .sessions
            .lock()
            .values()
            .filter(|s| {
                s.user_id == user_id
                    && s.outcome_id == outcome_id
                    && s.status == prioritizer_core::model::SessionStatus::Completed
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn delete_sessions_for_outcome(&self, user_id: &str, outcome_id: Uuid) -> Result<()> {
        self.sessions
            .lock()
            .retain(|_, s| !(s.user_id == user_id && s.outcome_id == outcome_id));
        Ok(())
    }

    async fn update_session(&self, session: &AgentSession) -> Result<()> {
        self.sessions.lock().insert(session.id, session.clone());
        Ok(())
    }

    async fn delete_expired_sessions(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at >= older_than);
        Ok((before - sessions.len()) as u64)
    }

    async fn insert_reflection(&self, reflection: &Reflection) -> Result<()> {
        self.reflections.lock().insert(reflection.id, reflection.clone());
        Ok(())
    }

    async fn get_reflection(&self, reflection_id: Uuid) -> Result<Reflection> {
        self.reflections
            .lock()
            .get(&reflection_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("reflection {reflection_id} not found")))
    }

    async fn list_active_reflections(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reflection>> {
        let mut reflections: Vec<Reflection> = self
            .reflections
            .lock()
            .values()
            .filter(|r| r.user_id == user_id && r.is_active_for_prioritization && r.created_at >= since)
            .cloned()
            .collect();
        reflections.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        reflections.truncate(limit);
        Ok(reflections)
    }

    async fn set_reflection_active(&self, reflection_id: Uuid, is_active: bool) -> Result<()> {
        let mut reflections = self.reflections.lock();
        let reflection = reflections
            .get_mut(&reflection_id)
            .ok_or_else(|| Error::not_found(format!("reflection {reflection_id} not found")))?;
        reflection.is_active_for_prioritization = is_active;
        Ok(())
    }

    async fn delete_reflection(&self, reflection_id: Uuid) -> Result<()> {
        self.reflections.lock().remove(&reflection_id);
        self.reflection_intents.lock().remove(&reflection_id);
        Ok(())
    }

    async fn upsert_reflection_intent(&self, intent: &ReflectionIntent) -> Result<()> {
        self.reflection_intents
            .lock()
            .insert(intent.reflection_id, intent.clone());
        Ok(())
    }

    async fn get_reflection_intent(&self, reflection_id: Uuid) -> Result<Option<ReflectionIntent>> {
        Ok(self.reflection_intents.lock().get(&reflection_id).cloned())
    }

    async fn upsert_manual_task(&self, task: &ManualTask) -> Result<()> {
        self.manual_tasks.lock().insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_manual_task(&self, task_id: &str) -> Result<ManualTask> {
        self.manual_tasks
            .lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("manual task {task_id} not found")))
    }

    async fn list_manual_tasks_for_outcome(&self, outcome_id: Uuid) -> Result<Vec<ManualTask>> {
        Ok(self
            .manual_tasks
            .lock()
            .values()
            .filter(|t| t.outcome_id == outcome_id)
            .cloned()
            .collect())
    }

    async fn insert_dependency(&self, dependency: &TaskDependency) -> Result<()> {
        dependency.validate()?;
        self.dependencies.lock().push(dependency.clone());
        Ok(())
    }

    async fn delete_dependency(&self, source_task_id: &str, target_task_id: &str) -> Result<()> {
        self.dependencies
            .lock()
            .retain(|d| !(d.source_task_id == source_task_id && d.target_task_id == target_task_id));
        Ok(())
    }

    async fn list_dependencies_among(&self, task_ids: &[String]) -> Result<Vec<TaskDependency>> {
        let known: std::collections::HashSet<&str> = task_ids.iter().map(String::as_str).collect();
        Ok(self
            .dependencies
            .lock()
            .iter()
            .filter(|d| known.contains(d.source_task_id.as_str()) && known.contains(d.target_task_id.as_str()))
            .cloned()
            .collect())
    }

    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<()> {
        self.processing_log.lock().push(entry.clone());
        Ok(())
    }

    async fn list_processing_log(
        &self,
        session_id: Uuid,
        operation: Option<&str>,
    ) -> Result<Vec<ProcessingLogEntry>> {
        Ok(self
            .processing_log
            .lock()
            .iter()
            .filter(|e| e.session_id == session_id && operation.map_or(true, |op| e.operation == op))
            .cloned()
            .collect())
    }
}

/// An in-memory [`EmbeddingStore`] double.
///
/// `embed` is a deterministic hash of the input text rather than a real
/// embedding, so two calls with the same text always produce the same
/// vector and distinct text produces distinct (if not semantically
/// meaningful) vectors. `semantic_search` ranks whatever rows were seeded
/// via [`InMemoryEmbeddingStore::seed_embedding`] by cosine similarity.
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    embeddings: Mutex<HashMap<String, TaskEmbedding>>,
}

/// Matches `TaskEmbedding::embedding`'s mandated dimensionality (§3/§6).
const DIMENSIONS: usize = 1536;

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_embedding(&self, task: &TaskEmbedding) {
        self.embeddings.lock().insert(task.task_id.clone(), task.clone());
    }

    pub(crate) fn deterministic_vector(text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut vector = Vec::with_capacity(DIMENSIONS);
        for i in 0..DIMENSIONS {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let bits = hasher.finish();
            // Map into [-1.0, 1.0] so cosine similarity is well-defined.
            vector.push((bits % 2_000_001) as f32 / 1_000_000.0 - 1.0);
        }
        vector
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::deterministic_vector(text))
    }

    async fn semantic_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SemanticSearchHit>> {
        let embeddings = self.embeddings.lock();
        let mut hits: Vec<SemanticSearchHit> = embeddings
            .values()
            .map(|task| SemanticSearchHit {
                task_id: task.task_id.clone(),
                task_text: task.task_text.clone(),
                document_id: task.document_id.clone(),
                similarity: cosine_similarity(query_vec, &task.embedding),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioritizer_core::model::{QualityMetadata, TaskStatus};

    fn sample_outcome(user_id: &str) -> Outcome {
        Outcome {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            direction: "launch".into(),
            object_text: "mobile app".into(),
            metric_text: "shipped".into(),
            clarifier: None,
            assembled_text: "Launch the mobile app".into(),
            is_active: true,
            state_preference: None,
            daily_capacity_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_task(id: &str, text: &str) -> TaskEmbedding {
        TaskEmbedding {
            task_id: id.into(),
            task_text: text.into(),
            document_id: None,
            embedding: InMemoryEmbeddingStore::deterministic_vector(text),
            status: TaskStatus::Pending,
            is_manual: false,
            created_by: None,
            quality_metadata: QualityMetadata::default(),
            manual_overrides: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_outcome_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_outcome(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn activate_outcome_deactivates_sibling() {
        let store = InMemoryStore::new();
        let first = sample_outcome("u1");
        let mut second = sample_outcome("u1");
        second.is_active = false;
        store.seed_outcome(first.clone()).await;
        store.seed_outcome(second.clone()).await;

        store.activate_outcome(second.id).await.unwrap();

        assert!(!store.get_outcome(first.id).await.unwrap().is_active);
        assert!(store.get_outcome(second.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn list_available_tasks_excludes_archived() {
        let store = InMemoryStore::new();
        let mut archived = sample_task("t2", "Archived task that is long enough");
        archived.status = TaskStatus::Archived;
        store.seed_task(sample_task("t1", "Ship iOS beta build to TestFlight")).await;
        store.seed_task(archived).await;

        let available = store.list_available_tasks("u1").await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].task_id, "t1");
    }

    #[tokio::test]
    async fn embed_is_deterministic_and_distinguishes_text() {
        let store = InMemoryEmbeddingStore::new();
        let a1 = store.embed("same text").await.unwrap();
        let a2 = store.embed("same text").await.unwrap();
        let b = store.embed("different text").await.unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), DIMENSIONS);
    }

    #[tokio::test]
    async fn semantic_search_ranks_by_similarity_above_threshold() {
        let store = InMemoryEmbeddingStore::new();
        let task = sample_task("t1", "Integrate Stripe payments sandbox");
        store.seed_embedding(&task).await;

        let query = InMemoryEmbeddingStore::deterministic_vector("Integrate Stripe payments sandbox");
        let hits = store.semantic_search(&query, 5, 0.99).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id, "t1");

        let unrelated_query = InMemoryEmbeddingStore::deterministic_vector("totally unrelated query text");
        let hits = store.semantic_search(&unrelated_query, 5, 0.999_999).await.unwrap();
        assert!(hits.is_empty());
    }
}
