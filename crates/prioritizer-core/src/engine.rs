//! Public service surface (§6): wires every component into the operations
//! the transport layer (out of scope for this crate) calls.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::bridging::{AcceptanceOutcome, AcceptedBridgingTask, BridgingAcceptor, BridgingGenerator, BridgingSuggestion};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gap_detection::GapDetector;
use crate::hybrid_loop::{HybridLoop, HybridLoopInput};
use crate::llm::LlmClient;
use crate::manual_task_service::ManualTaskService;
use crate::model::{
    AgentSession, ManualOverride, ManualTask, Outcome, PerformanceMetrics, Reflection,
    ReflectionIntent, StrategicScore, TaskEmbedding,
};
use crate::progress_stream::{ProgressEvent, ProgressStreamer};
use crate::quality::{QualitySummary, TaskEvaluation, TaskQualityEvaluator};
use crate::reflection_engine::{AdjustmentDiff, AdjustmentMetadata, AdjustableTask, ReflectionAdjuster, ReflectionDebounce, ReflectionInterpreter};
use crate::retry_queue::{JobState, RetryQueue};
use crate::scoring::StrategicScoringService;
use crate::session_controller::SessionController;
use crate::store::{EmbeddingStore, PersistentStore};

pub struct ScoresView {
    pub scores: HashMap<String, StrategicScore>,
    pub retry_status: HashMap<String, JobState>,
    pub queue_state: (usize, usize),
}

pub struct ManualOverrideView {
    pub override_value: ManualOverride,
    pub updated_priority: f64,
}

pub struct GapsView {
    pub gaps: Vec<crate::model::Gap>,
    pub metadata: PerformanceMetrics,
}

pub struct BridgingSuggestionsView {
    pub analysis_session_id: Uuid,
    pub suggestions: Vec<BridgingSuggestion>,
    pub metadata: PerformanceMetrics,
}

pub struct ReflectionCreationView {
    pub reflection: Reflection,
    pub intent: ReflectionIntent,
    pub effects: Option<AdjustmentDiff>,
    pub tasks_affected: usize,
}

pub struct AdjustPrioritiesView {
    pub ordered_task_ids: Vec<String>,
    pub diff: AdjustmentDiff,
    pub metadata: AdjustmentMetadata,
}

pub struct ManualTaskCreationView {
    pub task: ManualTask,
    pub prioritization_triggered: bool,
}

/// The Prioritization Orchestration Engine: every operation in §6,
/// composed from the component structs each module owns.
pub struct PrioritizationEngine {
    store: Arc<dyn PersistentStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,

    session_controller: SessionController,
    hybrid_loop: HybridLoop,
    scoring_service: StrategicScoringService,
    retry_queue: Arc<RetryQueue>,
    gap_detector: GapDetector,
    bridging_generator: BridgingGenerator,
    bridging_acceptor: BridgingAcceptor,
    reflection_interpreter: ReflectionInterpreter,
    reflection_adjuster: ReflectionAdjuster,
    reflection_debounce: ReflectionDebounce,
    manual_task_service: ManualTaskService,
    quality_evaluator: TaskQualityEvaluator,
    progress_streamer: ProgressStreamer,
}

impl PrioritizationEngine {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        llm: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let retry_queue = Arc::new(RetryQueue::new(clock.clone(), store.clone(), config.test_mode));

        Self {
            session_controller: SessionController::new(store.clone(), clock.clone(), config.clone()),
            hybrid_loop: HybridLoop::new(llm.clone(), clock.clone()),
            scoring_service: StrategicScoringService::new(llm.clone(), retry_queue.clone()),
            gap_detector: GapDetector::new(),
            bridging_generator: BridgingGenerator::new(llm.clone(), embeddings.clone()),
            bridging_acceptor: BridgingAcceptor::new(store.clone(), embeddings.clone()),
            reflection_interpreter: ReflectionInterpreter::new(llm.clone()),
            reflection_adjuster: ReflectionAdjuster::new(clock.clone()),
            reflection_debounce: ReflectionDebounce::new(clock.clone()),
            manual_task_service: ManualTaskService::new(store.clone(), embeddings.clone(), llm.clone(), clock.clone()),
            quality_evaluator: TaskQualityEvaluator::new(llm),
            progress_streamer: ProgressStreamer::new(store.clone(), retry_queue.clone()),
            retry_queue,
            store,
            embeddings,
            clock,
            config,
        }
    }

    /// `StartPrioritization(user_id, outcome_id) -> session_id` (§6).
    ///
    /// Creates the session and returns immediately; the caller drives
    /// [`Self::run_hybrid_loop`] as the enqueued orchestration work (§4.1).
    pub async fn start_prioritization(&self, user_id: &str, outcome_id: Uuid) -> Result<Uuid> {
        self.session_controller.start_session(user_id, outcome_id).await
    }

    /// Runs the hybrid loop for a just-started session, scores every
    /// included task, and persists the completed session. This is the
    /// orchestration work `StartPrioritization` enqueues (§4.1, §4.2, §4.3).
    pub async fn run_hybrid_loop(
        &self,
        session_id: Uuid,
        outcome: &Outcome,
        tasks: &[TaskEmbedding],
        reflections: &[Reflection],
    ) -> Result<AgentSession> {
        let session = self.session_controller.get_session(session_id).await?;

        let outcome_text = outcome.assembled_text.clone();
        let input = HybridLoopInput {
            outcome_text: &outcome_text,
            reflections,
            tasks,
            previous_plan_summary: None,
        };

        let run = match self.hybrid_loop.run(input).await {
            Ok(run) => run,
            Err(err) => {
                self.session_controller.fail_session(session, &err.to_string()).await?;
                return Err(err);
            }
        };

        let tasks_by_id: HashMap<&str, &TaskEmbedding> =
            tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();

        let mut strategic_scores = HashMap::new();
        for task_id in &run.final_result.ordered_task_ids {
            if let Some(task) = tasks_by_id.get(task_id.as_str()) {
                let score = self
                    .scoring_service
                    .score_task(session_id, task, &outcome_text)
                    .await?;
                strategic_scores.insert(task_id.clone(), score);
            }
        }

        let dependencies = crate::model::dependencies_from_scores(
            &run.final_result.ordered_task_ids,
            &run.final_result.per_task_scores,
        );
        let execution_waves = crate::model::build_execution_waves(
            &run.final_result.ordered_task_ids,
            &dependencies,
            &|task_id| {
                tasks_by_id
                    .get(task_id)
                    .map_or(16.0, |task| StrategicScoringService::estimate_effort_heuristic(&task.task_text))
            },
        );

        let plan = crate::model::PrioritizedPlan {
            ordered_task_ids: run.final_result.ordered_task_ids.clone(),
            execution_waves,
            dependencies,
            confidence_scores: strategic_scores
                .iter()
                .map(|(id, score)| (id.clone(), score.confidence))
                .collect(),
            task_annotations: vec![],
            removed_tasks: run
                .final_result
                .excluded_tasks
                .iter()
                .map(|id| crate::model::RemovedTask {
                    task_id: id.clone(),
                    reason: "excluded by generator".to_string(),
                })
                .collect(),
            synthesis_summary: Some(run.final_result.critical_path_reasoning.clone()),
            created_at: self.clock.now(),
        };

        let mut session = self
            .session_controller
            .complete_session(session, plan, run.metadata)
            .await?;
        session.strategic_scores = strategic_scores;
        self.store.update_session(&session).await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<AgentSession> {
        self.session_controller.get_session(session_id).await
    }

    pub async fn get_latest_completed(&self, user_id: &str, outcome_id: Uuid) -> Result<Option<AgentSession>> {
        self.session_controller.get_latest_completed(user_id, outcome_id).await
    }

    /// `StreamSessionProgress(session_id) -> event stream` (§6, §4.7).
    pub fn stream_session_progress(&self, session_id: Uuid) -> impl Stream<Item = ProgressEvent> + '_ {
        self.progress_streamer.stream(session_id)
    }

    /// `GetScores(session_id, status_filter) -> {scores, retry_status, queue_state}` (§6).
    pub async fn get_scores(&self, session_id: Uuid, status_filter: Option<crate::retry_queue::JobStatus>) -> Result<ScoresView> {
        let session = self.session_controller.get_session(session_id).await?;
        let mut retry_status = self.retry_queue.status_snapshot(session_id).await;
        if let Some(filter) = status_filter {
            retry_status.retain(|_, job| job.status == filter);
        }
        let queue_state = self.retry_queue.diagnostics().await;
        Ok(ScoresView {
            scores: session.strategic_scores,
            retry_status,
            queue_state,
        })
    }

    /// `ApplyManualOverride(session_id, task_id, {impact?, effort?, reason?}) -> {override, updated_priority}` (§6).
    ///
    /// Rejects with `ConflictError` if `session_id` no longer names the
    /// latest session for the task's `(user_id, outcome_id)` (§5 optimistic
    /// concurrency).
    pub async fn apply_manual_override(
        &self,
        session_id: Uuid,
        task_id: &str,
        impact: Option<f64>,
        effort: Option<f64>,
        reason: Option<String>,
        outcome_text: &str,
    ) -> Result<ManualOverrideView> {
        // `StartSession` deletes any prior session for the same
        // `(user_id, outcome_id)` (§4.1), so a `session_id` naming a
        // replaced session is already gone rather than merely stale;
        // surface that as a conflict rather than a bare not-found.
        let session = self.store.get_session(session_id).await.map_err(|err| match err {
            Error::NotFound(msg) => Error::conflict(format!(
                "session {session_id} is no longer the active session for this outcome: {msg}"
            )),
            other => other,
        })?;
        if session.status != crate::model::SessionStatus::Completed {
            return Err(Error::conflict(format!(
                "session {session_id} is not in a state that accepts manual overrides"
            )));
        }

        let mut task = self.store.get_task(task_id).await?;
        let override_value = ManualOverride {
            impact: impact.unwrap_or_else(|| task.manual_overrides.as_ref().map_or(5.0, |o| o.impact)),
            effort: effort.unwrap_or_else(|| task.manual_overrides.as_ref().map_or(16.0, |o| o.effort)),
            reason,
            timestamp: self.clock.now(),
            session_id,
        };
        override_value.validate()?;

        self.store.apply_manual_override(task_id, &override_value).await?;
        task.manual_overrides = Some(override_value.clone());

        let score = self.scoring_service.score_task(session_id, &task, outcome_text).await?;

        Ok(ManualOverrideView {
            override_value,
            updated_priority: score.priority,
        })
    }

    /// `DetectGaps(task_ids[]) -> {gaps, metadata}` (§6, §4.4).
    pub async fn detect_gaps(&self, task_ids: &[String]) -> Result<GapsView> {
        let tasks = self.store.get_tasks(task_ids).await?;
        let (gaps, metadata) = self
            .gap_detector
            .detect(&tasks, &|text| StrategicScoringService::estimate_effort_heuristic(text))?;
        Ok(GapsView { gaps, metadata })
    }

    /// `SuggestBridging(session_id) -> {gaps, suggestions, analysis_session_id, performance_metrics}` (§6, §4.4).
    pub async fn suggest_bridging(&self, session_id: Uuid, outcome_text: &str) -> Result<BridgingSuggestionsView> {
        let session = self.session_controller.get_session(session_id).await?;
        let Some(plan) = session.prioritized_plan.clone() else {
            return Err(Error::validation(format!(
                "session {session_id} has no prioritized plan to analyze for gaps"
            )));
        };

        let tasks = self.store.get_tasks(&plan.ordered_task_ids).await?;
        let tasks_by_id: HashMap<String, &TaskEmbedding> =
            tasks.iter().map(|t| (t.task_id.clone(), t)).collect();

        let (gaps, metadata) = self
            .gap_detector
            .detect(&tasks, &|text| StrategicScoringService::estimate_effort_heuristic(text))?;

        let suggestions = self
            .bridging_generator
            .suggest(&gaps, &tasks_by_id, outcome_text)
            .await
            .into_iter()
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(BridgingSuggestionsView {
            analysis_session_id: Uuid::new_v4(),
            suggestions,
            metadata,
        })
    }

    /// `AcceptBridging(analysis_session_id, agent_session_id, accepted[]) -> {inserted_task_ids, updated_plan}` (§6, §4.4).
    pub async fn accept_bridging(
        &self,
        session_snapshot: &AgentSession,
        accepted: Vec<AcceptedBridgingTask>,
    ) -> Result<AcceptanceOutcome> {
        self.bridging_acceptor.accept(session_snapshot, accepted).await
    }

    /// `CreateReflection(user_id, text) -> {reflection, intent, effects, tasks_affected}` (§6).
    pub async fn create_reflection(&self, user_id: &str, text: &str) -> Result<ReflectionCreationView> {
        Reflection::validate_text(text)?;
        let reflection = Reflection {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            is_active_for_prioritization: true,
            created_at: self.clock.now(),
        };
        self.store.insert_reflection(&reflection).await?;

        let intent = self.reflection_interpreter.interpret(&reflection).await;
        self.store.upsert_reflection_intent(&intent).await?;

        info!(reflection_id = %reflection.id, user_id, "reflection_created");

        Ok(ReflectionCreationView {
            reflection,
            intent,
            effects: None,
            tasks_affected: 0,
        })
    }

    pub async fn toggle_reflection(&self, reflection_id: Uuid, is_active: bool, user_id: &str) -> Result<()> {
        self.store.set_reflection_active(reflection_id, is_active).await?;
        self.reflection_debounce.record_toggle(user_id).await;
        Ok(())
    }

    /// Deletes a reflection (§6 `reflection_deleted` log event).
    pub async fn delete_reflection(&self, reflection_id: Uuid, user_id: &str) -> Result<()> {
        self.store.delete_reflection(reflection_id).await?;
        info!(reflection_id = %reflection_id, user_id, "reflection_deleted");
        Ok(())
    }

    /// Called on a poll/timer after a reflection toggle to run the debounced
    /// re-adjustment §4.5 describes ("triggers a debounced re-adjustment (2s
    /// wait after last toggle, min 10s between runs per user)"). Returns
    /// `Ok(None)` when the debounce window has not yet elapsed. A failed
    /// recompute is logged as `recompute_trigger_failed` (§6) rather than
    /// left to the caller to notice, since the triggering toggle already
    /// returned successfully.
    pub async fn try_recompute_after_toggle(
        &self,
        user_id: &str,
        session_id: Uuid,
        active_reflection_ids: &[Uuid],
        task_keywords: &HashMap<String, Vec<String>>,
    ) -> Result<Option<AdjustPrioritiesView>> {
        if !self.reflection_debounce.should_run(user_id).await {
            return Ok(None);
        }

        match self
            .adjust_priorities(session_id, active_reflection_ids, task_keywords)
            .await
        {
            Ok(view) => Ok(Some(view)),
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    user_id,
                    error = %err,
                    "recompute_trigger_failed"
                );
                Err(err)
            }
        }
    }

    /// `AdjustPriorities(session_id, active_reflection_ids[])` (§6, §4.1, §4.5).
    pub async fn adjust_priorities(
        &self,
        session_id: Uuid,
        active_reflection_ids: &[Uuid],
        task_keywords: &HashMap<String, Vec<String>>,
    ) -> Result<AdjustPrioritiesView> {
        let (_, baseline) = self.session_controller.baseline_for_adjustment(session_id).await?;

        let mut reflections = Vec::new();
        for reflection_id in active_reflection_ids {
            let reflection = self.store.get_reflection(*reflection_id).await?;
            let Some(intent) = self.store.get_reflection_intent(*reflection_id).await? else {
                continue;
            };
            reflections.push((reflection, intent));
        }

        let tasks: HashMap<String, AdjustableTask<'_>> = baseline
            .ordered_task_ids
            .iter()
            .map(|task_id| {
                (
                    task_id.clone(),
                    AdjustableTask {
                        task_id,
                        keywords: task_keywords.get(task_id).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect();

        let result = self.reflection_adjuster.adjust(&baseline.ordered_task_ids, &tasks, &reflections);

        info!(
            session_id = %session_id,
            tasks_moved = result.metadata.tasks_moved,
            tasks_filtered = result.metadata.tasks_filtered,
            "context_adjustment_completed"
        );

        Ok(AdjustPrioritiesView {
            ordered_task_ids: result.ordered_task_ids,
            diff: result.diff,
            metadata: result.metadata,
        })
    }

    /// `CreateManualTask(input) -> {task_id, prioritization_triggered}` (§6, §4.6).
    pub async fn create_manual_task(
        &self,
        outcome_id: Uuid,
        task: &TaskEmbedding,
        outcome_text: &str,
    ) -> Result<ManualTaskCreationView> {
        let task_record = self.manual_task_service.create(outcome_id, task, outcome_text).await?;
        let prioritization_triggered = task_record.status == crate::model::ManualTaskStatus::Prioritized;
        Ok(ManualTaskCreationView {
            task: task_record,
            prioritization_triggered,
        })
    }

    pub async fn override_discard(&self, task_id: &str, justification: Option<String>) -> Result<ManualTask> {
        self.manual_task_service.override_discard(task_id, justification).await
    }

    pub async fn invalidate_manual_tasks(&self, outcome_id: Uuid) -> Result<u64> {
        self.manual_task_service.invalidate_for_outcome(outcome_id).await
    }

    /// `EvaluateQuality(tasks[], force_heuristic?) -> {evaluations, summary}` (§6).
    pub async fn evaluate_quality(
        &self,
        tasks: &[TaskEmbedding],
        outcome_text: &str,
        force_heuristic: bool,
    ) -> (Vec<TaskEvaluation>, QualitySummary) {
        self.quality_evaluator.evaluate(tasks, outcome_text, force_heuristic).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
