//! Hybrid Loop (§4.2): bounded generate -> evaluate -> decide iteration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use schemars::schema_for;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::llm::{
    validate_against_schema, validate_brief_reasoning, EvaluationResult, EvaluationStatus,
    LlmClient, LlmRequest, PrioritizationResult,
};
use crate::model::{ChainOfThoughtEntry, EvaluationMetadata, Reflection, TaskEmbedding};

const MAX_ITERATIONS: u32 = 3;
const GENERATOR_TIMEOUT: Duration = Duration::from_secs(60);
const EVALUATOR_TIMEOUT: Duration = Duration::from_secs(60);
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.9;

/// Context the hybrid loop needs to render a generation prompt (§4.2).
pub struct HybridLoopInput<'a> {
    pub outcome_text: &'a str,
    pub reflections: &'a [Reflection],
    pub tasks: &'a [TaskEmbedding],
    pub previous_plan_summary: Option<&'a str>,
}

pub struct HybridLoopOutcome {
    pub final_result: PrioritizationResult,
    pub metadata: EvaluationMetadata,
}

pub struct HybridLoop {
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
}

impl HybridLoop {
    pub fn new(llm: Arc<dyn LlmClient>, clock: Arc<dyn Clock>) -> Self {
        Self { llm, clock }
    }

    /// Runs the bounded generate -> evaluate -> decide loop (§4.2).
    pub async fn run(&self, input: HybridLoopInput<'_>) -> Result<HybridLoopOutcome> {
        let start = Instant::now();
        let mut feedback: Option<String> = None;
        let mut chain_of_thought = Vec::new();
        let mut last_result: Option<PrioritizationResult> = None;
        let mut converged = false;

        for iteration in 1..=MAX_ITERATIONS {
            let result = self.generate(&input, feedback.as_deref()).await?;

            let evaluation_triggered = !(iteration == 1 && result.confidence >= HIGH_CONFIDENCE_THRESHOLD);

            let evaluator_feedback = if evaluation_triggered {
                let evaluation = self.evaluate(&input, &result).await?;
                let entry_feedback = evaluation.feedback.clone();

                match evaluation.status {
                    EvaluationStatus::Pass => {
                        converged = true;
                        chain_of_thought.push(ChainOfThoughtEntry {
                            iteration,
                            confidence: result.confidence,
                            corrections: result.corrections_made.clone(),
                            evaluator_feedback: Some(entry_feedback.clone()),
                            timestamp: self.clock.now(),
                        });
                        last_result = Some(result);
                        break;
                    }
                    EvaluationStatus::NeedsImprovement | EvaluationStatus::Fail => {
                        Some(entry_feedback)
                    }
                }
            } else {
                converged = true;
                None
            };

            chain_of_thought.push(ChainOfThoughtEntry {
                iteration,
                confidence: result.confidence,
                corrections: result.corrections_made.clone(),
                evaluator_feedback: evaluator_feedback.clone(),
                timestamp: self.clock.now(),
            });

            let should_stop = !evaluation_triggered || iteration == MAX_ITERATIONS;
            last_result = Some(result);

            if should_stop {
                if evaluation_triggered && iteration == MAX_ITERATIONS {
                    // Budget exhausted mid-NEEDS_IMPROVEMENT/FAIL loop.
                    converged = false;
                }
                break;
            }

            feedback = evaluator_feedback;
        }

        let final_result = last_result.ok_or_else(|| {
            Error::internal("hybrid loop completed with no generator result".to_string())
        })?;

        let metadata = EvaluationMetadata {
            iterations: chain_of_thought.len() as u32,
            duration_ms: start.elapsed().as_millis() as u64,
            evaluation_triggered: chain_of_thought
                .iter()
                .any(|entry| entry.evaluator_feedback.is_some())
                || chain_of_thought.len() > 1,
            chain_of_thought,
            converged,
            final_confidence: final_result.confidence,
        };

        info!(
            iterations = metadata.iterations,
            converged = metadata.converged,
            "hybrid loop completed"
        );

        Ok(HybridLoopOutcome {
            final_result,
            metadata,
        })
    }

    async fn generate(
        &self,
        input: &HybridLoopInput<'_>,
        feedback: Option<&str>,
    ) -> Result<PrioritizationResult> {
        let prompt = render_generator_prompt(input, feedback);
        let schema = schema_for!(PrioritizationResult);
        let schema_value = serde_json::to_value(&schema)?;
        let request = LlmRequest {
            prompt,
            schema_name: "PrioritizationResult".to_string(),
            schema: schema_value.clone(),
            timeout: GENERATOR_TIMEOUT,
        };

        let value = self.llm.complete_strict(request).await?;
        let schema_violation = validate_against_schema(&schema_value, &value).err();

        let mut result: PrioritizationResult = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("generator response failed schema: {e}")))?;

        if schema_violation.is_some() || !self.all_brief_reasoning_valid(&result) {
            // One repair attempt (§4.2): append the validator's messages and
            // retry once.
            let hint = match &schema_violation {
                Some(e) => format!("\n\n{e}"),
                None => "\n\nThe brief_reasoning field for at least one task was too generic or too long. Each brief_reasoning must be specific, <= 20 words, and avoid phrases like 'important' or 'critical'.".to_string(),
            };
            let repair_prompt = format!("{}{hint}", render_generator_prompt(input, feedback));
            let repair_request = LlmRequest {
                prompt: repair_prompt,
                schema_name: "PrioritizationResult".to_string(),
                schema: schema_value.clone(),
                timeout: GENERATOR_TIMEOUT,
            };
            let repaired_value = self.llm.complete_strict(repair_request).await?;
            let repaired_still_invalid = validate_against_schema(&schema_value, &repaired_value).is_err();
            result = serde_json::from_value(repaired_value).map_err(|e| {
                Error::validation(format!("repaired generator response failed schema: {e}"))
            })?;

            if repaired_still_invalid || !self.all_brief_reasoning_valid(&result) {
                warn!("generator repair attempt still produced an invalid response; proceeding with best effort");
            }
        }

        Ok(result)
    }

    fn all_brief_reasoning_valid(&self, result: &PrioritizationResult) -> bool {
        result
            .per_task_scores
            .iter()
            .all(|score| validate_brief_reasoning(&score.brief_reasoning))
    }

    async fn evaluate(
        &self,
        input: &HybridLoopInput<'_>,
        result: &PrioritizationResult,
    ) -> Result<EvaluationResult> {
        let prompt = render_evaluator_prompt(input, result);
        let schema = schema_for!(EvaluationResult);
        let schema_value = serde_json::to_value(&schema)?;
        let request = LlmRequest {
            prompt,
            schema_name: "EvaluationResult".to_string(),
            schema: schema_value.clone(),
            timeout: EVALUATOR_TIMEOUT,
        };
        let value = self.llm.complete_strict(request).await?;
        if let Err(e) = validate_against_schema(&schema_value, &value) {
            warn!(error = %e, "evaluator response failed schema validation");
        }
        serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("evaluator response failed schema: {e}")))
    }
}

fn render_generator_prompt(input: &HybridLoopInput<'_>, feedback: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Outcome: ");
    prompt.push_str(input.outcome_text);
    prompt.push('\n');

    if !input.reflections.is_empty() {
        prompt.push_str("Active reflections:\n");
        for reflection in input.reflections {
            prompt.push_str("- ");
            prompt.push_str(&reflection.text);
            prompt.push('\n');
        }
    }

    prompt.push_str("Tasks:\n");
    for task in input.tasks {
        prompt.push_str(&format!(
            "- {} :: {}\n",
            task.task_id,
            truncate(&task.task_text, 160)
        ));
    }

    if let Some(summary) = input.previous_plan_summary {
        prompt.push_str("Previous plan summary: ");
        prompt.push_str(summary);
        prompt.push('\n');
    }

    if let Some(feedback) = feedback {
        prompt.push_str("Evaluator feedback from the previous iteration: ");
        prompt.push_str(feedback);
        prompt.push('\n');
    }

    prompt
}

fn render_evaluator_prompt(input: &HybridLoopInput<'_>, result: &PrioritizationResult) -> String {
    format!(
        "Outcome: {}\nGenerated plan ordered_task_ids: {:?}\nPer-task scores: {:?}\nEvaluate alignment, coherence, reflection integration, and continuity.",
        input.outcome_text, result.ordered_task_ids, result.per_task_scores
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max_chars).collect();
        truncated.push('…');
        truncated
    }
}
