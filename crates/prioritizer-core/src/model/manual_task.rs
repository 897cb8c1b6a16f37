use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManualTaskStatus {
    Analyzing,
    Prioritized,
    NotRelevant,
    Conflict,
}

/// Tracks the placement of a user-added task (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualTask {
    pub task_id: String,
    pub outcome_id: Uuid,
    pub status: ManualTaskStatus,
    pub agent_rank: Option<u32>,
    pub placement_reason: Option<String>,
    pub exclusion_reason: Option<String>,
    pub duplicate_task_id: Option<String>,
    pub similarity_score: Option<f64>,
    pub marked_done_at: Option<DateTime<Utc>>,
    /// 30-day recoverable soft delete (§3, §4.6 discard pile).
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ManualTask {
    #[must_use]
    pub fn new_analyzing(task_id: impl Into<String>, outcome_id: Uuid) -> Self {
        Self {
            task_id: task_id.into(),
            outcome_id,
            status: ManualTaskStatus::Analyzing,
            agent_rank: None,
            placement_reason: None,
            exclusion_reason: None,
            duplicate_task_id: None,
            similarity_score: None,
            marked_done_at: None,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn is_recoverable(&self, now: DateTime<Utc>) -> bool {
        match self.deleted_at {
            None => false,
            Some(deleted_at) => (now - deleted_at).num_days() < 30,
        }
    }
}
