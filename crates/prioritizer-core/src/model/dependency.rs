use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Prerequisite,
    Blocks,
    Related,
}

/// Persistent edge in the global task dependency graph (§3).
///
/// Invariant: no self-edges; the induced subgraph on any one plan's
/// `ordered_task_ids` must remain acyclic (enforced at insert time by
/// `crate::gap_detection` and `crate::bridging`, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDependency {
    pub source_task_id: String,
    pub target_task_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
}

impl TaskDependency {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.source_task_id == self.target_task_id {
            return Err(crate::error::Error::validation(format!(
                "self-referential dependency on task {}",
                self.source_task_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_self_edge() {
        let dep = TaskDependency {
            source_task_id: "t1".into(),
            target_task_id: "t1".into(),
            relationship_type: RelationshipType::Blocks,
            confidence: 0.9,
        };
        assert!(dep.validate().is_err());
    }

    #[test]
    fn accepts_distinct_edge() {
        let dep = TaskDependency {
            source_task_id: "t1".into(),
            target_task_id: "t2".into(),
            relationship_type: RelationshipType::Prerequisite,
            confidence: 0.9,
        };
        assert!(dep.validate().is_ok());
    }
}
