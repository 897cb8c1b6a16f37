use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reflection {
    pub id: Uuid,
    pub user_id: String,
    pub text: String,
    pub is_active_for_prioritization: bool,
    pub created_at: DateTime<Utc>,
}

pub const MIN_REFLECTION_TEXT_LEN: usize = 3;
pub const MAX_REFLECTION_TEXT_LEN: usize = 500;

impl Reflection {
    pub fn validate_text(text: &str) -> crate::error::Result<()> {
        let len = text.trim().chars().count();
        if len < MIN_REFLECTION_TEXT_LEN || len > MAX_REFLECTION_TEXT_LEN {
            return Err(crate::error::Error::validation(format!(
                "reflection text must be {MIN_REFLECTION_TEXT_LEN}-{MAX_REFLECTION_TEXT_LEN} characters, got {len}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionIntentType {
    Focus,
    Avoid,
    Urgency,
    Constraint,
    Context,
}

/// Derived classification of a reflection's meaning (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReflectionIntent {
    pub reflection_id: Uuid,
    pub intent_type: ReflectionIntentType,
    pub subtype: Option<String>,
    pub keywords: Vec<String>,
    pub strength: f64,
    pub duration: Option<String>,
    pub summary: String,
}

impl ReflectionIntent {
    pub fn clamp_strength(&mut self) {
        self.strength = self.strength.clamp(0.0, 1.0);
    }
}
