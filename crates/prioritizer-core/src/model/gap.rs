use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Indicators contributing to a gap's confidence (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GapIndicators {
    pub cosine_distance: f64,
    pub action_type_jump: bool,
    pub skill_jump: bool,
    pub time_gap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gap {
    pub id: Uuid,
    pub predecessor_task_id: String,
    pub successor_task_id: String,
    pub indicators: GapIndicators,
    pub confidence: f64,
}

/// A generated task proposed to bridge a gap (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct BridgingTask {
    pub task_text: String,
    pub estimated_hours: f64,
    pub cognition_level: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserAcceptance {
    pub task_text: String,
    pub predecessor_task_id: String,
    pub successor_task_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InsertionResult {
    pub inserted_task_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub total_pairs_analyzed: usize,
    pub gaps_detected: usize,
    pub analysis_duration_ms: u64,
}

/// Appended onto `agent_session.result.gap_analysis` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapAnalysisSession {
    pub session_id: Uuid,
    pub plan_snapshot: Vec<PlanSnapshotEntry>,
    pub detected_gaps: Vec<Gap>,
    pub generated_tasks: Vec<BridgingTask>,
    pub user_acceptances: Vec<UserAcceptance>,
    pub insertion_result: InsertionResult,
    pub performance_metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanSnapshotEntry {
    pub task_id: String,
    pub task_text: String,
    pub depends_on: Vec<String>,
}
