use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declarative user target the prioritizer optimizes toward (§3).
///
/// Invariant: exactly zero-or-one active outcome per user; activating a new
/// one deactivates the prior atomically. Enforced by the store, not this
/// type — this is a plain record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub id: Uuid,
    pub user_id: String,
    pub direction: String,
    pub object_text: String,
    pub metric_text: String,
    pub clarifier: Option<String>,
    /// Rendered sentence, e.g. "Increase weekly active users by 20% by
    /// launching the referral program".
    pub assembled_text: String,
    pub is_active: bool,
    pub state_preference: Option<String>,
    pub daily_capacity_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum length (inclusive) for each free-text outcome field (§8
/// boundary behavior: 500 accepted, 501 rejected).
pub const MAX_OUTCOME_FIELD_LEN: usize = 500;

impl Outcome {
    /// Validates the free-text fields against the boundary in §8.
    pub fn validate_field_lengths(
        object_text: &str,
        metric_text: &str,
        clarifier: Option<&str>,
    ) -> crate::error::Result<()> {
        for (name, value) in [
            ("object_text", object_text),
            ("metric_text", metric_text),
            ("clarifier", clarifier.unwrap_or("")),
        ] {
            if value.chars().count() > MAX_OUTCOME_FIELD_LEN {
                return Err(crate::error::Error::validation(format!(
                    "{name} exceeds {MAX_OUTCOME_FIELD_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_length_boundary() {
        let ok = "a".repeat(MAX_OUTCOME_FIELD_LEN);
        assert!(Outcome::validate_field_lengths(&ok, &ok, Some(&ok)).is_ok());

        let too_long = "a".repeat(MAX_OUTCOME_FIELD_LEN + 1);
        assert!(Outcome::validate_field_lengths(&too_long, "x", None).is_err());
    }

    #[test]
    fn empty_fields_are_accepted() {
        assert!(Outcome::validate_field_lengths("", "", None).is_ok());
    }
}
