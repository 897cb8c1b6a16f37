use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Embedding dimensionality mandated by §3/§6 (`vec<float32>[1536]`).
pub const EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
    Archived,
}

/// User-supplied correction to a task's AI-derived score (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualOverride {
    pub impact: f64,
    pub effort: f64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The session current when the override was applied (§3 invariant).
    pub session_id: Uuid,
}

impl ManualOverride {
    pub const MIN_EFFORT: f64 = 0.5;
    pub const MAX_IMPACT: f64 = 10.0;

    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=Self::MAX_IMPACT).contains(&self.impact) {
            return Err(crate::error::Error::validation(format!(
                "impact must be within [0, {}], got {}",
                Self::MAX_IMPACT,
                self.impact
            )));
        }
        if self.effort < Self::MIN_EFFORT {
            return Err(crate::error::Error::validation(format!(
                "effort must be >= {}, got {}",
                Self::MIN_EFFORT,
                self.effort
            )));
        }
        Ok(())
    }
}

/// Clarity/quality feedback attached to a task embedding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityMetadata {
    pub clarity_score: Option<f64>,
    pub improvement_suggestions: Vec<String>,
}

/// Atomic unit the engine ranks (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEmbedding {
    pub task_id: String,
    pub task_text: String,
    pub document_id: Option<String>,
    pub embedding: Vec<f32>,
    pub status: TaskStatus,
    pub is_manual: bool,
    pub created_by: Option<String>,
    pub quality_metadata: QualityMetadata,
    pub manual_overrides: Option<ManualOverride>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bounds on `task_text` length (§3: "10-500 chars trimmed").
pub const MIN_TASK_TEXT_LEN: usize = 10;
pub const MAX_TASK_TEXT_LEN: usize = 500;

impl TaskEmbedding {
    pub fn validate_task_text(text: &str) -> crate::error::Result<String> {
        let trimmed = text.trim();
        let len = trimmed.chars().count();
        if len < MIN_TASK_TEXT_LEN || len > MAX_TASK_TEXT_LEN {
            return Err(crate::error::Error::validation(format!(
                "task_text must be {MIN_TASK_TEXT_LEN}-{MAX_TASK_TEXT_LEN} characters after trimming, got {len}"
            )));
        }
        Ok(trimmed.to_string())
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status != TaskStatus::Archived
    }
}
