use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::gap::GapAnalysisSession;
use super::plan::PrioritizedPlan;
use super::score::StrategicScore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

/// Per-iteration trace entry of the hybrid loop (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainOfThoughtEntry {
    pub iteration: u32,
    pub confidence: f64,
    pub corrections: Vec<String>,
    pub evaluator_feedback: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Hybrid-loop trace persisted on the session (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetadata {
    pub iterations: u32,
    pub duration_ms: u64,
    pub evaluation_triggered: bool,
    pub chain_of_thought: Vec<ChainOfThoughtEntry>,
    pub converged: bool,
    pub final_confidence: f64,
}

/// Counts/timings/errors of a completed or failed session (§4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetadata {
    pub steps_taken: u32,
    pub tool_call_count: u32,
    pub thinking_ms: u64,
    pub tool_ms: u64,
    pub total_ms: u64,
    pub error_count: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionResult {
    pub gap_analysis: Option<GapAnalysisSession>,
}

/// One prioritization run (§3, §4.1).
///
/// Invariant: at most one session per `(user_id, outcome_id)` simultaneously
/// active; creating a new one replaces the previous. Enforced by
/// `crate::session_controller`, not this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSession {
    pub id: Uuid,
    pub user_id: String,
    pub outcome_id: Uuid,
    pub status: SessionStatus,
    pub prioritized_plan: Option<PrioritizedPlan>,
    /// Snapshot used for reflection-based adjustments (§4.1).
    pub baseline_plan: Option<PrioritizedPlan>,
    pub adjusted_plan: Option<PrioritizedPlan>,
    pub strategic_scores: HashMap<String, StrategicScore>,
    pub excluded_tasks: Vec<String>,
    pub evaluation_metadata: Option<EvaluationMetadata>,
    pub execution_metadata: ExecutionMetadata,
    pub result: SessionResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    #[must_use]
    pub fn new_running(user_id: impl Into<String>, outcome_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            outcome_id,
            status: SessionStatus::Running,
            prioritized_plan: None,
            baseline_plan: None,
            adjusted_plan: None,
            strategic_scores: HashMap::new(),
            excluded_tasks: Vec::new(),
            evaluation_metadata: None,
            execution_metadata: ExecutionMetadata::default(),
            result: SessionResult::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, expiry: chrono::Duration) -> bool {
        now - self.created_at > expiry
    }

    #[must_use]
    pub fn has_exceeded_runtime(&self, now: DateTime<Utc>, max_runtime: chrono::Duration) -> bool {
        self.status == SessionStatus::Running && now - self.created_at > max_runtime
    }

    /// §3: `baseline_plan` less than 7 days old, required by
    /// `AdjustPriorities`; warn if older than 24h.
    #[must_use]
    pub fn baseline_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.baseline_plan
            .as_ref()
            .map(|plan| now - plan.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_session_is_running_with_zeroed_metadata() {
        let session = AgentSession::new_running("u1", Uuid::new_v4(), Utc::now());
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.execution_metadata.error_count, 0);
        assert!(session.prioritized_plan.is_none());
    }

    #[test]
    fn expiry_after_30_days() {
        let now = Utc::now();
        let mut session = AgentSession::new_running("u1", Uuid::new_v4(), now - Duration::days(31));
        session.created_at = now - Duration::days(31);
        assert!(session.is_expired(now, Duration::days(30)));

        session.created_at = now - Duration::days(29);
        assert!(!session.is_expired(now, Duration::days(30)));
    }

    #[test]
    fn runtime_exceeded_only_while_running() {
        let now = Utc::now();
        let mut session =
            AgentSession::new_running("u1", Uuid::new_v4(), now - Duration::minutes(25));
        assert!(session.has_exceeded_runtime(now, Duration::minutes(20)));

        session.status = SessionStatus::Completed;
        assert!(!session.has_exceeded_runtime(now, Duration::minutes(20)));
    }
}
