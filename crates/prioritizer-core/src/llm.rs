//! Trait seam + wire types for the LLM Chat Service collaborator (§6).
//!
//! `prioritizer-core` depends only on [`LlmClient`]; `prioritizer-openai`
//! implements it against `async-openai`'s strict JSON-object response mode,
//! the same provider-agnostic seam the teacher uses for its chat models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::ReflectionIntentType;

/// A single call to the LLM Chat Service.
///
/// `schema_name`/`schema` drive strict JSON-object mode: the implementation
/// must either return a value that validates against `schema`, or fail —
/// never silently return free text. `timeout` is enforced by the
/// implementation (§5: Generator/Evaluator 60s, Reflection interpreter 5s,
/// Gap bridging 30s).
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub timeout: Duration,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `CompleteStrict(prompt, json_schema) -> JSON` validated against the
    /// request's schema.
    async fn complete_strict(&self, request: LlmRequest) -> Result<serde_json::Value>;
}

/// Per-task score emitted by the Generator (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct GeneratedTaskScore {
    pub task_id: String,
    pub impact: f64,
    pub effort: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// <= 20 words; rejected by the brief-reasoning validator if it matches
    /// a generic phrase (§4.2).
    pub brief_reasoning: String,
    pub dependencies: Vec<String>,
    pub reflection_influence: Option<String>,
}

/// The Generator's output for one hybrid-loop iteration (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct PrioritizationResult {
    pub included_tasks: Vec<String>,
    pub excluded_tasks: Vec<String>,
    pub ordered_task_ids: Vec<String>,
    pub per_task_scores: Vec<GeneratedTaskScore>,
    pub confidence: f64,
    pub thoughts: serde_json::Value,
    pub critical_path_reasoning: String,
    pub corrections_made: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationStatus {
    Pass,
    NeedsImprovement,
    Fail,
}

/// The Evaluator's output for one hybrid-loop iteration (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct EvaluationResult {
    pub status: EvaluationStatus,
    pub outcome_alignment: f64,
    pub strategic_coherence: f64,
    pub reflection_integration: f64,
    pub continuity: f64,
    pub feedback: String,
}

/// §4.3: `EstimateImpact(task_text, outcome_text) -> {impact, reasoning, keywords, confidence}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ImpactEstimate {
    pub impact: f64,
    pub reasoning: String,
    pub keywords: Vec<String>,
    pub confidence: f64,
}

/// `EvaluateQuality(tasks[]) -> {evaluations}` (§6): per-task clarity
/// assessment feeding `quality_metadata` and coverage analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct QualityEvaluation {
    pub clarity_score: f64,
    pub improvement_suggestions: Vec<String>,
    pub covered_aspects: Vec<String>,
}

/// §4.5: small-LLM reflection classification output, same shape the
/// heuristic fallback must emit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ReflectionClassification {
    pub intent_type: ReflectionIntentType,
    pub subtype: Option<String>,
    pub keywords: Vec<String>,
    pub strength: f64,
    pub duration: Option<String>,
    pub summary: String,
}

/// §4.4: Gap-Filling LLM output, 1-3 bridging task proposals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct BridgingGenerationResult {
    pub bridging_tasks: Vec<crate::model::BridgingTask>,
}

/// §4.6: single-task judgment from the Prioritization Generator restricted
/// to one task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ManualTaskDecision {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ManualTaskJudgment {
    pub decision: ManualTaskDecision,
    pub agent_rank: Option<u32>,
    pub placement_reason: Option<String>,
    pub exclusion_reason: Option<String>,
}

/// Generic phrases the brief-reasoning validator rejects (§4.2). Matching
/// is case-insensitive and checks for the phrase anywhere in the string,
/// since a generic phrase padded with filler words is still generic.
pub const GENERIC_REASONING_PHRASES: &[&str] = &[
    "important",
    "critical",
    "high priority",
    "makes sense",
    "good idea",
    "should be done",
];

/// Validates a raw generator/evaluator response `value` against its
/// `schemars`-generated JSON Schema before the caller attempts to deserialize
/// it into a concrete type (§4.2: "Validate against the schema; on
/// validation failure request one repair attempt"). Returns a single string
/// joining every violation's instance path and message, suitable for
/// appending to a repair prompt — far more actionable than the generic
/// `serde_json::Error` a failed `from_value` call alone would produce.
pub fn validate_against_schema(schema: &serde_json::Value, value: &serde_json::Value) -> Result<()> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|e| Error::internal(format!("invalid JSON schema: {e}")))?;
    let errors: Vec<String> = compiled
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "response failed schema validation: {}",
            errors.join("; ")
        )))
    }
}

/// Rejects reasoning text that is either over the word budget or matches a
/// known-generic phrase, forcing a repair attempt (§4.2).
#[must_use]
pub fn validate_brief_reasoning(text: &str) -> bool {
    let word_count = text.split_whitespace().count();
    if word_count > 20 {
        return false;
    }
    let lowered = text.to_ascii_lowercase();
    !GENERIC_REASONING_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_specific_reasoning() {
        assert!(validate_brief_reasoning(
            "Ships the iOS beta gate blocking the launch date"
        ));
    }

    #[test]
    fn rejects_generic_phrases() {
        assert!(!validate_brief_reasoning("This is important"));
        assert!(!validate_brief_reasoning("Critical for success"));
        assert!(!validate_brief_reasoning("High priority item"));
    }

    #[test]
    fn rejects_overlong_reasoning() {
        let text = "word ".repeat(21);
        assert!(!validate_brief_reasoning(&text));
    }

    #[test]
    fn accepts_exactly_twenty_words() {
        let text = "word ".repeat(20);
        assert!(validate_brief_reasoning(text.trim()));
    }

    #[test]
    fn validate_against_schema_accepts_conforming_value() {
        let schema = serde_json::to_value(schemars::schema_for!(EvaluationResult)).unwrap();
        let value = serde_json::json!({
            "status": "PASS",
            "outcome_alignment": 8.0,
            "strategic_coherence": 7.0,
            "reflection_integration": 6.0,
            "continuity": 9.0,
            "feedback": "well aligned"
        });
        assert!(validate_against_schema(&schema, &value).is_ok());
    }

    #[test]
    fn validate_against_schema_rejects_missing_field() {
        let schema = serde_json::to_value(schemars::schema_for!(EvaluationResult)).unwrap();
        let value = serde_json::json!({
            "status": "PASS",
            "outcome_alignment": 8.0,
        });
        let err = validate_against_schema(&schema, &value).unwrap_err();
        assert!(err.to_string().contains("schema validation"));
    }

    #[test]
    fn validate_against_schema_rejects_wrong_type() {
        let schema = serde_json::to_value(schemars::schema_for!(EvaluationResult)).unwrap();
        let value = serde_json::json!({
            "status": "PASS",
            "outcome_alignment": "not a number",
            "strategic_coherence": 7.0,
            "reflection_integration": 6.0,
            "continuity": 9.0,
            "feedback": "well aligned"
        });
        assert!(validate_against_schema(&schema, &value).is_err());
    }
}
