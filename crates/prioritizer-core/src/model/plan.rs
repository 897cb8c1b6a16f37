use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Relationship between two tasks inside a plan's dependency list (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanDependencyKind {
    Prerequisite,
    Blocks,
    Related,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDependency {
    pub source: String,
    pub target: String,
    pub relationship: PlanDependencyKind,
    pub confidence: f64,
    pub detection_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionWave {
    pub wave_number: u32,
    pub task_ids: Vec<String>,
    pub parallel: bool,
    pub est_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAnnotation {
    pub task_id: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemovedTask {
    pub task_id: String,
    pub reason: String,
}

/// The wire-stable persisted plan shape (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrioritizedPlan {
    pub ordered_task_ids: Vec<String>,
    pub execution_waves: Vec<ExecutionWave>,
    pub dependencies: Vec<PlanDependency>,
    pub confidence_scores: HashMap<String, f64>,
    pub task_annotations: Vec<TaskAnnotation>,
    pub removed_tasks: Vec<RemovedTask>,
    pub synthesis_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PrioritizedPlan {
    /// §3 invariant: every id in a wave appears in `ordered_task_ids`.
    pub fn validate_wave_membership(&self) -> crate::error::Result<()> {
        let ordered: std::collections::HashSet<&str> =
            self.ordered_task_ids.iter().map(String::as_str).collect();
        for wave in &self.execution_waves {
            for task_id in &wave.task_ids {
                if !ordered.contains(task_id.as_str()) {
                    return Err(crate::error::Error::validation(format!(
                        "wave {} references task {task_id} not present in ordered_task_ids",
                        wave.wave_number
                    )));
                }
            }
        }
        Ok(())
    }

    /// §3 invariant: no id in a later wave has a dependency edge from a
    /// task in an even-later wave (waves respect dependency topology).
    pub fn validate_wave_topology(&self) -> crate::error::Result<()> {
        let mut wave_of: HashMap<&str, u32> = HashMap::new();
        for wave in &self.execution_waves {
            for task_id in &wave.task_ids {
                wave_of.insert(task_id.as_str(), wave.wave_number);
            }
        }
        for dep in &self.dependencies {
            if matches!(
                dep.relationship,
                PlanDependencyKind::Prerequisite | PlanDependencyKind::Blocks
            ) {
                if let (Some(&source_wave), Some(&target_wave)) =
                    (wave_of.get(dep.source.as_str()), wave_of.get(dep.target.as_str()))
                {
                    if source_wave > target_wave {
                        return Err(crate::error::Error::validation(format!(
                            "dependency {} -> {} violates wave topology: source is in a later wave ({source_wave}) than target ({target_wave})",
                            dep.source, dep.target
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.validate_wave_membership()?;
        self.validate_wave_topology()
    }
}

/// Builds `PlanDependency` edges from the Generator's per-task `dependencies`
/// lists (§4.2: each `GeneratedTaskScore.dependencies` names the ids a task
/// depends on). Entries naming a task outside `ordered_task_ids` (e.g. an
/// excluded or archived task) are dropped rather than surfaced as an error —
/// the generator's prompt only ever sees the included corpus, but a repaired
/// response can still reference a stale id.
pub fn dependencies_from_scores(
    ordered_task_ids: &[String],
    per_task_scores: &[crate::llm::GeneratedTaskScore],
) -> Vec<PlanDependency> {
    let known: std::collections::HashSet<&str> =
        ordered_task_ids.iter().map(String::as_str).collect();
    let mut dependencies = Vec::new();
    for score in per_task_scores {
        if !known.contains(score.task_id.as_str()) {
            continue;
        }
        for dependency_id in &score.dependencies {
            if !known.contains(dependency_id.as_str()) || dependency_id == &score.task_id {
                continue;
            }
            dependencies.push(PlanDependency {
                source: dependency_id.clone(),
                target: score.task_id.clone(),
                relationship: PlanDependencyKind::Prerequisite,
                confidence: score.confidence,
                detection_method: "llm".to_string(),
            });
        }
    }
    dependencies
}

/// Layers `ordered_task_ids` into execution waves by Kahn's-algorithm
/// topological generations over the `Prerequisite`/`Blocks` edges in
/// `dependencies` (§3: "wave order respects dependency topology"). Tasks
/// with no unresolved prerequisite at a given generation land in the same
/// wave and are marked `parallel` when the wave holds more than one task;
/// ties within a generation preserve `ordered_task_ids` order. A dependency
/// cycle (which should never reach this point — §4.4/§4.9 reject cycles at
/// insert time) is broken by placing the first remaining task in
/// `ordered_task_ids` order, so wave-building always terminates.
#[must_use]
pub fn build_execution_waves(
    ordered_task_ids: &[String],
    dependencies: &[PlanDependency],
    estimated_hours: &dyn Fn(&str) -> f64,
) -> Vec<ExecutionWave> {
    let position: HashMap<&str, usize> = ordered_task_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut predecessors: HashMap<&str, std::collections::HashSet<&str>> = HashMap::new();
    for id in ordered_task_ids {
        predecessors.insert(id.as_str(), std::collections::HashSet::new());
    }
    for dep in dependencies {
        if matches!(
            dep.relationship,
            PlanDependencyKind::Prerequisite | PlanDependencyKind::Blocks
        ) && position.contains_key(dep.source.as_str())
            && position.contains_key(dep.target.as_str())
        {
            predecessors
                .entry(dep.target.as_str())
                .or_default()
                .insert(dep.source.as_str());
        }
    }

    let mut remaining: Vec<&str> = ordered_task_ids.iter().map(String::as_str).collect();
    let mut placed: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut waves = Vec::new();
    let mut wave_number = 0u32;

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| match predecessors.get(id) {
                Some(preds) => preds.iter().all(|p| placed.contains(p)),
                None => true,
            })
            .collect();

        if ready.is_empty() {
            // Cycle guard: force progress using the earliest task in the
            // original order rather than deadlocking.
            ready.push(remaining[0]);
        }

        ready.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

        let est_hours: f64 = ready.iter().map(|id| estimated_hours(id)).sum();
        waves.push(ExecutionWave {
            wave_number,
            task_ids: ready.iter().map(|id| (*id).to_string()).collect(),
            parallel: ready.len() > 1,
            est_hours,
        });

        for id in &ready {
            placed.insert(id);
        }
        remaining.retain(|id| !placed.contains(id));
        wave_number += 1;
    }

    waves
}

/// Replaces runtime "duck-typed" plan fields (§9): a `prioritized_plan`
/// sometimes arrives from the store as a stringified JSON blob produced by
/// an LLM call rather than a native JSON value. This sum type is the
/// normalization boundary — callers either already hold a `Parsed` plan, or
/// hold a `Raw` string that must be reparsed exactly once, at the store
/// adapter boundary, never downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PlanPayload {
    Parsed(PrioritizedPlan),
    Raw(String),
}

impl PlanPayload {
    /// Normalizes a `Raw` payload into `Parsed`, extracting the first
    /// `{...}` substring if the store returned an LLM-persisted string with
    /// surrounding prose (§4.1: "extract first `{…}` substring and
    /// re-parse on mismatch").
    pub fn into_parsed(self) -> crate::error::Result<PrioritizedPlan> {
        match self {
            PlanPayload::Parsed(plan) => Ok(plan),
            PlanPayload::Raw(raw) => {
                let json_slice = extract_first_json_object(&raw).ok_or_else(|| {
                    crate::error::Error::validation(
                        "raw plan payload contains no JSON object".to_string(),
                    )
                })?;
                serde_json::from_str(json_slice).map_err(|e| {
                    crate::error::Error::validation(format!(
                        "raw plan payload failed to parse as a plan: {e}"
                    ))
                })
            }
        }
    }
}

/// Finds the first balanced `{...}` substring in `text`, tolerating nested
/// braces and string-escaped braces.
fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}
