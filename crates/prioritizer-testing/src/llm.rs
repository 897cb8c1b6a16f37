//! [`MockLlmClient`]: a canned-response [`LlmClient`] for unit tests.
//!
//! Each `with_*` builder stashes a fixed value keyed by the wire schema it
//! answers; [`MockLlmClient::complete_strict`] dispatches on
//! `LlmRequest::schema_name` the same way a real client's strict-JSON-mode
//! response is routed back to its Rust type. Tests that never configure a
//! given schema and then call a path that needs it get a validation error,
//! the same shape a real client returns for an empty/invalid strict-JSON
//! response.

use async_trait::async_trait;
use parking_lot::Mutex;
use prioritizer_core::error::{Error, Result};
use prioritizer_core::llm::{
    BridgingGenerationResult, EvaluationResult, ImpactEstimate, LlmClient, LlmRequest,
    ManualTaskJudgment, PrioritizationResult, QualityEvaluation, ReflectionClassification,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Responses {
    generator_result: Option<PrioritizationResult>,
    evaluation_result: Option<EvaluationResult>,
    impact_estimate: Option<ImpactEstimate>,
    quality_evaluation: Option<QualityEvaluation>,
    reflection_classification: Option<ReflectionClassification>,
    bridging_generation_result: Option<BridgingGenerationResult>,
    manual_task_judgment: Option<ManualTaskJudgment>,
}

/// A fixed-response [`LlmClient`] double.
///
/// Every `with_*` call returns `self` for chaining, so a test builds one
/// client with exactly the canned answers its call path needs:
///
/// ```ignore
/// let llm = MockLlmClient::new()
///     .with_generator_result(my_result)
///     .with_evaluation_result(my_evaluation);
/// ```
///
/// The same canned value is replayed for every call against that schema,
/// regardless of how many times it's invoked across hybrid-loop iterations.
pub struct MockLlmClient {
    responses: Responses,
    call_count: AtomicUsize,
    schema_calls: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Responses::default(),
            call_count: AtomicUsize::new(0),
            schema_calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_generator_result(mut self, result: PrioritizationResult) -> Self {
        self.responses.generator_result = Some(result);
        self
    }

    #[must_use]
    pub fn with_evaluation_result(mut self, result: EvaluationResult) -> Self {
        self.responses.evaluation_result = Some(result);
        self
    }

    #[must_use]
    pub fn with_impact_estimate(mut self, estimate: ImpactEstimate) -> Self {
        self.responses.impact_estimate = Some(estimate);
        self
    }

    #[must_use]
    pub fn with_quality_evaluation(mut self, evaluation: QualityEvaluation) -> Self {
        self.responses.quality_evaluation = Some(evaluation);
        self
    }

    #[must_use]
    pub fn with_reflection_classification(mut self, classification: ReflectionClassification) -> Self {
        self.responses.reflection_classification = Some(classification);
        self
    }

    #[must_use]
    pub fn with_bridging_generation_result(mut self, result: BridgingGenerationResult) -> Self {
        self.responses.bridging_generation_result = Some(result);
        self
    }

    #[must_use]
    pub fn with_manual_task_judgment(mut self, judgment: ManualTaskJudgment) -> Self {
        self.responses.manual_task_judgment = Some(judgment);
        self
    }

    /// Total number of `complete_strict` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// `schema_name` of every call observed so far, in order.
    pub fn schema_calls(&self) -> Vec<String> {
        self.schema_calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_strict(&self, request: LlmRequest) -> Result<serde_json::Value> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.schema_calls.lock().push(request.schema_name.clone());

        match request.schema_name.as_str() {
            "PrioritizationResult" => self
                .responses
                .generator_result
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("PrioritizationResult"))),
            "EvaluationResult" => self
                .responses
                .evaluation_result
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("EvaluationResult"))),
            "ImpactEstimate" => self
                .responses
                .impact_estimate
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("ImpactEstimate"))),
            "QualityEvaluation" => self
                .responses
                .quality_evaluation
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("QualityEvaluation"))),
            "ReflectionClassification" => self
                .responses
                .reflection_classification
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("ReflectionClassification"))),
            "BridgingGenerationResult" => self
                .responses
                .bridging_generation_result
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("BridgingGenerationResult"))),
            "ManualTaskJudgment" => self
                .responses
                .manual_task_judgment
                .as_ref()
                .map(|r| serde_json::to_value(r).map_err(Error::from))
                .unwrap_or_else(|| Err(unconfigured("ManualTaskJudgment"))),
            other => Err(Error::validation(format!(
                "MockLlmClient has no canned response registered for schema {other}"
            ))),
        }
    }
}

fn unconfigured(schema_name: &str) -> Error {
    Error::validation(format!(
        "MockLlmClient has no canned {schema_name} response configured"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatches_by_schema_name() {
        let llm = MockLlmClient::new().with_impact_estimate(ImpactEstimate {
            impact: 5.0,
            reasoning: "r".into(),
            keywords: vec![],
            confidence: 0.6,
        });
        let value = llm
            .complete_strict(LlmRequest {
                prompt: "p".into(),
                schema_name: "ImpactEstimate".into(),
                schema: serde_json::json!({}),
                timeout: std::time::Duration::from_secs(1),
            })
            .await
            .unwrap();
        let estimate: ImpactEstimate = serde_json::from_value(value).unwrap();
        assert_eq!(estimate.impact, 5.0);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn unconfigured_schema_errors() {
        let llm = MockLlmClient::new();
        let result = llm
            .complete_strict(LlmRequest {
                prompt: "p".into(),
                schema_name: "ImpactEstimate".into(),
                schema: serde_json::json!({}),
                timeout: std::time::Duration::from_secs(1),
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn replays_same_response_across_calls() {
        let llm = MockLlmClient::new().with_impact_estimate(ImpactEstimate {
            impact: 3.0,
            reasoning: "r".into(),
            keywords: vec![],
            confidence: 0.4,
        });
        for _ in 0..3 {
            let value = llm
                .complete_strict(LlmRequest {
                    prompt: "p".into(),
                    schema_name: "ImpactEstimate".into(),
                    schema: serde_json::json!({}),
                    timeout: std::time::Duration::from_secs(1),
                })
                .await
                .unwrap();
            let estimate: ImpactEstimate = serde_json::from_value(value).unwrap();
            assert_eq!(estimate.impact, 3.0);
        }
        assert_eq!(llm.call_count(), 3);
    }
}
