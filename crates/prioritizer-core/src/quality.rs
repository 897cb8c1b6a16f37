//! Quality Evaluation + Coverage Analysis (§6 `EvaluateQuality`; §3 "Draft
//! Task Pipeline (Phase 10/5)").

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use schemars::schema_for;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::{LlmClient, LlmRequest, QualityEvaluation};
use crate::model::{QualityMetadata, TaskEmbedding};

const QUALITY_EVAL_TIMEOUT: Duration = Duration::from_secs(20);

/// §9 Open Question #2: both thresholds are configuration, not constants
/// (see [`crate::config::EngineConfig::coverage_threshold`] and
/// [`crate::config::EngineConfig::phase5_fallback_threshold`]).
pub struct TaskQualityEvaluator {
    llm: Arc<dyn LlmClient>,
}

#[derive(Debug, Clone)]
pub struct TaskEvaluation {
    pub task_id: String,
    pub metadata: QualityMetadata,
    pub covered_aspects: Vec<String>,
    pub used_heuristic: bool,
}

#[derive(Debug, Clone)]
pub struct QualitySummary {
    pub evaluated_count: usize,
    pub average_clarity: f64,
    pub heuristic_fallback_count: usize,
}

impl TaskQualityEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// `EvaluateQuality(tasks[], force_heuristic?) -> {evaluations, summary}` (§6).
    pub async fn evaluate(
        &self,
        tasks: &[TaskEmbedding],
        outcome_text: &str,
        force_heuristic: bool,
    ) -> (Vec<TaskEvaluation>, QualitySummary) {
        let mut evaluations = Vec::with_capacity(tasks.len());
        let mut heuristic_fallback_count = 0;

        for task in tasks {
            let evaluation = if force_heuristic {
                heuristic_fallback_count += 1;
                self.evaluate_heuristic(task)
            } else {
                match self.evaluate_via_llm(task, outcome_text).await {
                    Ok(evaluation) => evaluation,
                    Err(err) => {
                        warn!(task_id = %task.task_id, error = %err, "quality evaluation falling back to heuristic");
                        heuristic_fallback_count += 1;
                        self.evaluate_heuristic(task)
                    }
                }
            };
            evaluations.push(evaluation);
        }

        let average_clarity = if evaluations.is_empty() {
            0.0
        } else {
            evaluations
                .iter()
                .filter_map(|e| e.metadata.clarity_score)
                .sum::<f64>()
                / evaluations.len() as f64
        };

        let summary = QualitySummary {
            evaluated_count: evaluations.len(),
            average_clarity,
            heuristic_fallback_count,
        };

        info!(evaluated_count = summary.evaluated_count, average_clarity, "coverage_analysis_completed");
        (evaluations, summary)
    }

    async fn evaluate_via_llm(&self, task: &TaskEmbedding, outcome_text: &str) -> Result<TaskEvaluation> {
        let schema = schema_for!(QualityEvaluation);
        let request = LlmRequest {
            prompt: format!(
                "Outcome: {outcome_text}\nTask: {}\nAssess clarity (0-1) and which aspects of the outcome this task covers.",
                task.task_text
            ),
            schema_name: "QualityEvaluation".to_string(),
            schema: serde_json::to_value(&schema)?,
            timeout: QUALITY_EVAL_TIMEOUT,
        };
        let value = self.llm.complete_strict(request).await?;
        let result: QualityEvaluation = serde_json::from_value(value)
            .map_err(|e| crate::error::Error::validation(format!("quality evaluation failed schema: {e}")))?;

        Ok(TaskEvaluation {
            task_id: task.task_id.clone(),
            metadata: QualityMetadata {
                clarity_score: Some(result.clarity_score.clamp(0.0, 1.0)),
                improvement_suggestions: result.improvement_suggestions,
            },
            covered_aspects: result.covered_aspects,
            used_heuristic: false,
        })
    }

    /// Degrades to word-count-based clarity with no coverage claims
    /// (§7: "missing embeddings for some tasks in coverage analysis
    /// degrade to heuristic coverage with a warning").
    fn evaluate_heuristic(&self, task: &TaskEmbedding) -> TaskEvaluation {
        let word_count = task.task_text.split_whitespace().count();
        let clarity_score = (word_count as f64 / 12.0).clamp(0.2, 1.0);
        let mut suggestions = Vec::new();
        if word_count < 4 {
            suggestions.push("task text is very short; consider adding more detail".to_string());
        }

        TaskEvaluation {
            task_id: task.task_id.clone(),
            metadata: QualityMetadata {
                clarity_score: Some(clarity_score),
                improvement_suggestions: suggestions,
            },
            covered_aspects: Vec::new(),
            used_heuristic: true,
        }
    }
}

/// Coverage fraction of `outcome_keywords` touched by `evaluations`
/// (§3 "Draft Task Pipeline"): drives the two-pass draft generation
/// (<70% triggers drafts, hypothetical <80% post-insertion triggers a
/// bridging pass).
#[must_use]
pub fn coverage_fraction(outcome_keywords: &[String], evaluations: &[TaskEvaluation]) -> f64 {
    if outcome_keywords.is_empty() {
        return 1.0;
    }
    let covered: HashSet<&str> = evaluations
        .iter()
        .flat_map(|e| e.covered_aspects.iter().map(String::as_str))
        .collect();
    let hit_count = outcome_keywords
        .iter()
        .filter(|keyword| covered.contains(keyword.as_str()))
        .count();
    hit_count as f64 / outcome_keywords.len() as f64
}

/// Deduplicates newly generated draft task texts against already-proposed
/// ones by SHA-256 of the normalized text (§3: "Deduplicate across passes
/// by SHA-256 hash of normalized task_text").
#[must_use]
pub fn dedupe_draft_texts(candidates: Vec<String>, already_seen: &mut HashSet<[u8; 32]>) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|text| {
            let normalized = text.trim().to_ascii_lowercase();
            let mut hasher = Sha256::new();
            hasher.update(normalized.as_bytes());
            let digest: [u8; 32] = hasher.finalize().into();
            already_seen.insert(digest)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prioritizer_testing::MockLlmClient;

    fn sample_task(id: &str, text: &str) -> TaskEmbedding {
        TaskEmbedding {
            task_id: id.to_string(),
            task_text: text.to_string(),
            document_id: None,
            embedding: vec![0.0; 1536],
            status: crate::model::TaskStatus::Pending,
            is_manual: false,
            created_by: None,
            quality_metadata: QualityMetadata::default(),
            manual_overrides: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn force_heuristic_skips_llm_and_marks_fallback() {
        let llm = Arc::new(MockLlmClient::new());
        let evaluator = TaskQualityEvaluator::new(llm);
        let tasks = vec![sample_task("t1", "Ship iOS beta release to TestFlight")];

        let (evaluations, summary) = evaluator.evaluate(&tasks, "Launch the mobile app", true).await;
        assert_eq!(summary.heuristic_fallback_count, 1);
        assert!(evaluations[0].used_heuristic);
    }

    #[test]
    fn coverage_fraction_counts_distinct_keyword_hits() {
        let keywords = vec!["payments".to_string(), "onboarding".to_string(), "legal".to_string()];
        let evaluations = vec![TaskEvaluation {
            task_id: "t1".into(),
            metadata: QualityMetadata::default(),
            covered_aspects: vec!["payments".into(), "onboarding".into()],
            used_heuristic: false,
        }];
        assert!((coverage_fraction(&keywords, &evaluations) - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn dedupe_filters_repeated_normalized_text() {
        let mut seen = HashSet::new();
        let first_pass = dedupe_draft_texts(vec!["Write onboarding docs".to_string()], &mut seen);
        assert_eq!(first_pass.len(), 1);

        let second_pass = dedupe_draft_texts(vec!["  write ONBOARDING docs  ".to_string()], &mut seen);
        assert!(second_pass.is_empty());
    }
}
