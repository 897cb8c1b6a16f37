//! Bridging Task Generation + Acceptance (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use schemars::schema_for;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{BridgingGenerationResult, LlmClient, LlmRequest};
use crate::model::{
    AgentSession, BridgingTask, Gap, PlanDependency, PlanDependencyKind, RelationshipType,
    TaskDependency, TaskEmbedding,
};
use crate::store::{EmbeddingStore, PersistentStore, SemanticSearchHit};

const GAP_BRIDGING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const SEMANTIC_SEARCH_THRESHOLD: f64 = 0.7;
const MIN_EXAMPLES_REQUIRED: usize = 2;
const MIN_BRIDGING_HOURS: f64 = 8.0;
const MAX_BRIDGING_HOURS: f64 = 160.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgingFailure {
    AiServiceError,
    GenerationFailed,
    Timeout,
    RequiresManualExamples,
}

pub struct BridgingSuggestion {
    pub gap: Gap,
    pub bridging_tasks: Vec<BridgingTask>,
}

pub struct BridgingGenerator {
    llm: Arc<dyn LlmClient>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl BridgingGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, embeddings: Arc<dyn EmbeddingStore>) -> Self {
        Self { llm, embeddings }
    }

    /// For each gap with `confidence >= 0.75`, semantic-search for similar
    /// prior completions and call the Gap-Filling LLM (§4.4).
    pub async fn suggest(
        &self,
        gaps: &[Gap],
        tasks_by_id: &HashMap<String, &TaskEmbedding>,
        outcome_text: &str,
    ) -> Vec<std::result::Result<BridgingSuggestion, (Uuid, BridgingFailure)>> {
        let mut results = Vec::new();
        for gap in gaps {
            if gap.confidence < crate::gap_detection::BRIDGING_CONFIDENCE_THRESHOLD {
                continue;
            }
            results.push(self.suggest_one(gap, tasks_by_id, outcome_text).await);
        }
        results
    }

    async fn suggest_one(
        &self,
        gap: &Gap,
        tasks_by_id: &HashMap<String, &TaskEmbedding>,
        outcome_text: &str,
    ) -> std::result::Result<BridgingSuggestion, (Uuid, BridgingFailure)> {
        let Some(predecessor) = tasks_by_id.get(&gap.predecessor_task_id) else {
            return Err((gap.id, BridgingFailure::GenerationFailed));
        };
        let Some(successor) = tasks_by_id.get(&gap.successor_task_id) else {
            return Err((gap.id, BridgingFailure::GenerationFailed));
        };

        let query_embedding = match self.embeddings.embed(&predecessor.task_text).await {
            Ok(v) => v,
            Err(Error::Timeout(_)) => return Err((gap.id, BridgingFailure::Timeout)),
            Err(_) => return Err((gap.id, BridgingFailure::AiServiceError)),
        };

        let examples = match self
            .embeddings
            .semantic_search(&query_embedding, 5, SEMANTIC_SEARCH_THRESHOLD)
            .await
        {
            Ok(hits) => hits,
            Err(Error::Timeout(_)) => return Err((gap.id, BridgingFailure::Timeout)),
            Err(_) => return Err((gap.id, BridgingFailure::AiServiceError)),
        };

        if examples.len() < MIN_EXAMPLES_REQUIRED {
            return Err((gap.id, BridgingFailure::RequiresManualExamples));
        }

        match self
            .call_gap_filling_llm(predecessor.task_text.as_str(), successor.task_text.as_str(), outcome_text, &examples)
            .await
        {
            Ok(bridging_tasks) => Ok(BridgingSuggestion {
                gap: gap.clone(),
                bridging_tasks,
            }),
            Err(Error::Timeout(_)) => Err((gap.id, BridgingFailure::Timeout)),
            Err(_) => Err((gap.id, BridgingFailure::AiServiceError)),
        }
    }

    async fn call_gap_filling_llm(
        &self,
        predecessor_text: &str,
        successor_text: &str,
        outcome_text: &str,
        examples: &[SemanticSearchHit],
    ) -> Result<Vec<BridgingTask>> {
        let examples_text = examples
            .iter()
            .map(|hit| format!("- {} (similarity {:.2})", hit.task_text, hit.similarity))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Outcome: {outcome_text}\nPredecessor task: {predecessor_text}\nSuccessor task: {successor_text}\nSimilar prior completions:\n{examples_text}\nPropose 1-3 bridging tasks that fill the gap between the predecessor and successor."
        );

        let schema = schema_for!(BridgingGenerationResult);
        let request = LlmRequest {
            prompt,
            schema_name: "BridgingGenerationResult".to_string(),
            schema: serde_json::to_value(&schema)?,
            timeout: GAP_BRIDGING_TIMEOUT,
        };

        let value = self.llm.complete_strict(request).await?;
        let result: BridgingGenerationResult = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("bridging generation response failed schema: {e}")))?;

        for task in &result.bridging_tasks {
            if !(MIN_BRIDGING_HOURS..=MAX_BRIDGING_HOURS).contains(&task.estimated_hours) {
                return Err(Error::validation(format!(
                    "bridging task '{}' estimated_hours {} outside [{MIN_BRIDGING_HOURS}, {MAX_BRIDGING_HOURS}]",
                    task.task_text, task.estimated_hours
                )));
            }
        }

        Ok(result.bridging_tasks)
    }
}

pub struct AcceptedBridgingTask {
    pub task: BridgingTask,
    pub predecessor_id: String,
    pub successor_id: String,
}

pub struct AcceptanceOutcome {
    pub inserted_task_ids: Vec<String>,
    pub updated_plan: crate::model::PrioritizedPlan,
}

pub struct BridgingAcceptor {
    store: Arc<dyn PersistentStore>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl BridgingAcceptor {
    pub fn new(store: Arc<dyn PersistentStore>, embeddings: Arc<dyn EmbeddingStore>) -> Self {
        Self { store, embeddings }
    }

    /// `AcceptBridging(analysis_session_id, agent_session_id, accepted[]) -> {inserted_task_ids, updated_plan}` (§4.4).
    ///
    /// Validates each task, persists embeddings, inserts dependency edges,
    /// rejects insertions that would introduce a cycle (`CYCLE_DETECTED`),
    /// and updates the plan atomically. On any failure after partial
    /// inserts, rolls back by deleting inserted embeddings/relationships.
    ///
    /// Resolves the Open Question in spec.md §9 (session replaced
    /// mid-acceptance) by rejecting with `ConflictError` when the session
    /// snapshot taken at the start no longer matches the stored session.
    pub async fn accept(
        &self,
        session_snapshot: &AgentSession,
        accepted: Vec<AcceptedBridgingTask>,
    ) -> Result<AcceptanceOutcome> {
        let current = self.store.get_session(session_snapshot.id).await?;
        if current.updated_at != session_snapshot.updated_at {
            return Err(Error::conflict(format!(
                "session {} changed since the bridging analysis started",
                session_snapshot.id
            )));
        }

        let Some(mut plan) = current.prioritized_plan.clone() else {
            return Err(Error::validation(format!(
                "session {} has no prioritized plan to insert bridging tasks into",
                current.id
            )));
        };

        let mut inserted_task_ids = Vec::new();
        let mut inserted_dependencies: Vec<(String, String)> = Vec::new();

        for accepted_task in accepted {
            match self
                .accept_one(&mut plan, &accepted_task, &mut inserted_dependencies)
                .await
            {
                Ok(task_id) => inserted_task_ids.push(task_id),
                Err(err) => {
                    self.rollback(&inserted_task_ids, &inserted_dependencies).await;
                    return Err(err);
                }
            }
        }

        plan.validate()?;

        let mut updated_session = current;
        updated_session.prioritized_plan = Some(plan.clone());
        updated_session.updated_at = Utc::now();
        self.store.update_session(&updated_session).await?;

        Ok(AcceptanceOutcome {
            inserted_task_ids,
            updated_plan: plan,
        })
    }

    async fn accept_one(
        &self,
        plan: &mut crate::model::PrioritizedPlan,
        accepted: &AcceptedBridgingTask,
        inserted_dependencies: &mut Vec<(String, String)>,
    ) -> Result<String> {
        let new_task_id = Uuid::new_v4().to_string();
        let embedding = self.embeddings.embed(&accepted.task.task_text).await?;

        self.check_cycle(plan, &accepted.predecessor_id, &accepted.successor_id, &new_task_id)?;

        let now = Utc::now();
        let task = TaskEmbedding {
            task_id: new_task_id.clone(),
            task_text: accepted.task.task_text.clone(),
            document_id: None,
            embedding,
            status: crate::model::TaskStatus::Pending,
            is_manual: false,
            created_by: None,
            quality_metadata: crate::model::QualityMetadata::default(),
            manual_overrides: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_task(&task).await?;

        let predecessor_edge = TaskDependency {
            source_task_id: accepted.predecessor_id.clone(),
            target_task_id: new_task_id.clone(),
            relationship_type: RelationshipType::Prerequisite,
            confidence: accepted.task.confidence,
        };
        let successor_edge = TaskDependency {
            source_task_id: new_task_id.clone(),
            target_task_id: accepted.successor_id.clone(),
            relationship_type: RelationshipType::Prerequisite,
            confidence: accepted.task.confidence,
        };
        self.store.insert_dependency(&predecessor_edge).await?;
        inserted_dependencies.push((predecessor_edge.source_task_id.clone(), predecessor_edge.target_task_id.clone()));
        self.store.insert_dependency(&successor_edge).await?;
        inserted_dependencies.push((successor_edge.source_task_id.clone(), successor_edge.target_task_id.clone()));

        insert_task_between(plan, &accepted.predecessor_id, &accepted.successor_id, &new_task_id);
        plan.dependencies.push(PlanDependency {
            source: predecessor_edge.source_task_id,
            target: predecessor_edge.target_task_id,
            relationship: PlanDependencyKind::Prerequisite,
            confidence: accepted.task.confidence,
            detection_method: "bridging".to_string(),
        });
        plan.dependencies.push(PlanDependency {
            source: successor_edge.source_task_id,
            target: successor_edge.target_task_id,
            relationship: PlanDependencyKind::Prerequisite,
            confidence: accepted.task.confidence,
            detection_method: "bridging".to_string(),
        });
        plan.confidence_scores.insert(new_task_id.clone(), accepted.task.confidence);

        Ok(new_task_id)
    }

    /// Pre-insert DFS cycle check over the induced subgraph of
    /// `ordered_task_ids + {new}` (§9).
    fn check_cycle(
        &self,
        plan: &crate::model::PrioritizedPlan,
        predecessor_id: &str,
        successor_id: &str,
        new_task_id: &str,
    ) -> Result<()> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut nodes = HashMap::new();

        for task_id in plan.ordered_task_ids.iter().map(String::as_str).chain([new_task_id]) {
            nodes.entry(task_id).or_insert_with(|| graph.add_node(task_id));
        }

        for dep in &plan.dependencies {
            if let (Some(&source), Some(&target)) =
                (nodes.get(dep.source.as_str()), nodes.get(dep.target.as_str()))
            {
                graph.add_edge(source, target, ());
            }
        }

        if let (Some(&predecessor), Some(&new_node)) =
            (nodes.get(predecessor_id), nodes.get(new_task_id))
        {
            graph.add_edge(predecessor, new_node, ());
        }
        if let (Some(&new_node), Some(&successor)) =
            (nodes.get(new_task_id), nodes.get(successor_id))
        {
            graph.add_edge(new_node, successor, ());
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::conflict(format!(
                "inserting task {new_task_id} between {predecessor_id} and {successor_id} would introduce a dependency cycle"
            )));
        }

        Ok(())
    }

    async fn rollback(&self, inserted_task_ids: &[String], inserted_dependencies: &[(String, String)]) {
        for (source, target) in inserted_dependencies {
            if let Err(err) = self.store.delete_dependency(source, target).await {
                warn!(error = %err, source, target, "rollback failed to delete dependency edge");
            }
        }
        for task_id in inserted_task_ids {
            match self.store.get_task(task_id).await {
                Ok(mut task) => {
                    task.status = crate::model::TaskStatus::Archived;
                    if let Err(err) = self.store.upsert_task(&task).await {
                        warn!(error = %err, task_id, "rollback failed to archive inserted bridging task");
                    }
                }
                Err(err) => warn!(error = %err, task_id, "rollback could not find inserted bridging task to archive"),
            }
        }
    }
}

/// Inserts `new_task_id` strictly between `predecessor_id` and
/// `successor_id` in `ordered_task_ids` (§4.4).
fn insert_task_between(
    plan: &mut crate::model::PrioritizedPlan,
    predecessor_id: &str,
    successor_id: &str,
    new_task_id: &str,
) {
    if let Some(position) = plan
        .ordered_task_ids
        .iter()
        .position(|id| id == predecessor_id)
    {
        plan.ordered_task_ids.insert(position + 1, new_task_id.to_string());
    } else if let Some(position) = plan
        .ordered_task_ids
        .iter()
        .position(|id| id == successor_id)
    {
        plan.ordered_task_ids.insert(position, new_task_id.to_string());
    } else {
        plan.ordered_task_ids.push(new_task_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionWave, GapIndicators, SessionStatus};
    use prioritizer_testing::{InMemoryEmbeddingStore, InMemoryStore};

    fn sample_plan(ids: &[&str]) -> crate::model::PrioritizedPlan {
        crate::model::PrioritizedPlan {
            ordered_task_ids: ids.iter().map(|s| s.to_string()).collect(),
            execution_waves: vec![ExecutionWave {
                wave_number: 0,
                task_ids: ids.iter().map(|s| s.to_string()).collect(),
                parallel: true,
                est_hours: 8.0,
            }],
            dependencies: vec![],
            confidence_scores: ids.iter().map(|s| (s.to_string(), 0.8)).collect(),
            task_annotations: vec![],
            removed_tasks: vec![],
            synthesis_summary: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_between_places_new_task_after_predecessor() {
        let mut plan = sample_plan(&["a", "b"]);
        insert_task_between(&mut plan, "a", "b", "new");
        assert_eq!(plan.ordered_task_ids, vec!["a", "new", "b"]);
    }

    #[tokio::test]
    async fn reject_insertion_on_session_changed() {
        let store = Arc::new(InMemoryStore::new());
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let acceptor = BridgingAcceptor::new(store.clone(), embeddings);

        let mut session = crate::model::AgentSession::new_running("u1", Uuid::new_v4(), Utc::now());
        session.status = SessionStatus::Completed;
        session.prioritized_plan = Some(sample_plan(&["a", "b"]));
        store.seed_session(session.clone()).await;

        // Simulate a session change between snapshot and acceptance call.
        let mut stale_snapshot = session.clone();
        stale_snapshot.updated_at = session.updated_at - chrono::Duration::seconds(5);

        let result = acceptor
            .accept(
                &stale_snapshot,
                vec![AcceptedBridgingTask {
                    task: BridgingTask {
                        task_text: "Integrate Stripe sandbox".into(),
                        estimated_hours: 16.0,
                        cognition_level: "implementation".into(),
                        confidence: 0.8,
                        reasoning: "bridges payments gap".into(),
                    },
                    predecessor_id: "a".into(),
                    successor_id: "b".into(),
                }],
            )
            .await;

        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn accept_inserts_task_between_predecessor_and_successor() {
        let store = Arc::new(InMemoryStore::new());
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let acceptor = BridgingAcceptor::new(store.clone(), embeddings);

        let mut session = crate::model::AgentSession::new_running("u1", Uuid::new_v4(), Utc::now());
        session.status = SessionStatus::Completed;
        session.prioritized_plan = Some(sample_plan(&["a", "b"]));
        store.seed_session(session.clone()).await;

        let outcome = acceptor
            .accept(
                &session,
                vec![AcceptedBridgingTask {
                    task: BridgingTask {
                        task_text: "Integrate Stripe sandbox".into(),
                        estimated_hours: 16.0,
                        cognition_level: "implementation".into(),
                        confidence: 0.8,
                        reasoning: "bridges payments gap".into(),
                    },
                    predecessor_id: "a".into(),
                    successor_id: "b".into(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(outcome.inserted_task_ids.len(), 1);
        let new_id = &outcome.inserted_task_ids[0];
        let position = outcome
            .updated_plan
            .ordered_task_ids
            .iter()
            .position(|id| id == new_id)
            .unwrap();
        assert_eq!(outcome.updated_plan.ordered_task_ids[position - 1], "a");
        assert_eq!(outcome.updated_plan.ordered_task_ids[position + 1], "b");

        let deps: Vec<_> = outcome
            .updated_plan
            .dependencies
            .iter()
            .map(|d| (d.source.as_str(), d.target.as_str()))
            .collect();
        assert!(deps.contains(&("a", new_id.as_str())));
        assert!(deps.contains(&(new_id.as_str(), "b")));
    }

    #[test]
    fn gap_indicators_default_is_zero() {
        let indicators = GapIndicators::default();
        assert_eq!(indicators.cosine_distance, 0.0);
        assert!(!indicators.action_type_jump);
    }
}
