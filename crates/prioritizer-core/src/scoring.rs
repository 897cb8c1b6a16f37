//! Strategic Scoring Service (§4.3): ensures every included task has a
//! persisted [`StrategicScore`], delegating transient failures to the
//! [`RetryQueue`].

use std::sync::Arc;

use schemars::schema_for;
use uuid::Uuid;

use crate::error::Error;
use crate::llm::{ImpactEstimate, LlmClient, LlmRequest};
use crate::model::{ManualOverride, StrategicScore, TaskEmbedding};
use crate::retry_queue::RetryQueue;

const IMPACT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Keyword -> base hours table for the effort heuristic (§4.3: "effort via
/// a heuristic (keyword table + size estimator)"). Matched case-insensitively
/// against the task text; the first matching keyword wins.
const EFFORT_KEYWORD_TABLE: &[(&str, f64)] = &[
    ("research", 8.0),
    ("design", 16.0),
    ("prototype", 24.0),
    ("build", 40.0),
    ("implement", 40.0),
    ("launch", 16.0),
    ("ship", 16.0),
    ("migrate", 32.0),
    ("refactor", 24.0),
    ("test", 12.0),
    ("review", 4.0),
    ("document", 6.0),
    ("plan", 8.0),
];

const DEFAULT_EFFORT_HOURS: f64 = 16.0;

pub struct StrategicScoringService {
    llm: Arc<dyn LlmClient>,
    retry_queue: Arc<RetryQueue>,
}

impl StrategicScoringService {
    pub fn new(llm: Arc<dyn LlmClient>, retry_queue: Arc<RetryQueue>) -> Self {
        Self { llm, retry_queue }
    }

    /// `EstimateImpact(task_text, outcome_text) -> {impact, reasoning, keywords, confidence}` (§4.3).
    pub async fn estimate_impact(
        &self,
        task_text: &str,
        outcome_text: &str,
    ) -> Result<ImpactEstimate, Error> {
        let prompt = format!(
            "Outcome: {outcome_text}\nTask: {task_text}\nEstimate the impact (0-10) this task has on the outcome."
        );
        let schema = schema_for!(ImpactEstimate);
        let request = LlmRequest {
            prompt,
            schema_name: "ImpactEstimate".to_string(),
            schema: serde_json::to_value(&schema)?,
            timeout: IMPACT_TIMEOUT,
        };
        let value = self.llm.complete_strict(request).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("impact estimate failed schema: {e}")))
    }

    /// Heuristic effort estimator: first matching keyword family, falling
    /// back to a default estimate (§4.3).
    #[must_use]
    pub fn estimate_effort_heuristic(task_text: &str) -> f64 {
        let lowered = task_text.to_ascii_lowercase();
        EFFORT_KEYWORD_TABLE
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map_or(DEFAULT_EFFORT_HOURS, |(_, hours)| *hours)
    }

    /// Computes and persists (via the retry queue on failure) a
    /// [`StrategicScore`] for one task lacking a manual override (§4.3).
    pub async fn score_task(
        &self,
        session_id: Uuid,
        task: &TaskEmbedding,
        outcome_text: &str,
    ) -> Result<StrategicScore, Error> {
        if let Some(override_value) = &task.manual_overrides {
            return Ok(self.score_from_override(task, override_value));
        }

        let task_text = task.task_text.clone();
        let outcome_text = outcome_text.to_string();
        let task_id = task.task_id.clone();

        let estimate = self
            .retry_queue
            .enqueue(session_id, &task.task_id, || {
                let task_text = task_text.clone();
                let outcome_text = outcome_text.clone();
                async move { self.estimate_impact(&task_text, &outcome_text).await }
            })
            .await?;

        let effort = Self::estimate_effort_heuristic(&task.task_text);
        Ok(StrategicScore::new(
            task_id,
            estimate.impact,
            effort,
            estimate.confidence,
            estimate.reasoning,
            false,
        ))
    }

    /// §8: "`updated_priority` equals the formula applied to
    /// (override.impact, override.effort, AI confidence)".
    fn score_from_override(&self, task: &TaskEmbedding, override_value: &ManualOverride) -> StrategicScore {
        // The override always wins on impact/effort; confidence is carried
        // from the AI estimate if present in quality_metadata, otherwise a
        // neutral 1.0 (the override itself is the user's assertion of
        // confidence).
        let confidence = task
            .quality_metadata
            .clarity_score
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        StrategicScore::new(
            task.task_id.clone(),
            override_value.impact,
            override_value.effort,
            confidence,
            override_value
                .reason
                .clone()
                .unwrap_or_else(|| "manual override".to_string()),
            true,
        )
    }
}
