//! Reflection Interpreter & Adjustment (§4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::schema_for;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmRequest, ReflectionClassification};
use crate::model::{Reflection, ReflectionIntent, ReflectionIntentType};

const INTERPRETER_TIMEOUT: Duration = Duration::from_secs(1);
const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;
const DEBOUNCE_WAIT: Duration = Duration::from_secs(2);
const MIN_RUN_INTERVAL: Duration = Duration::from_secs(10);

/// Interprets raw reflection text into a [`ReflectionIntent`], falling back
/// to a keyword heuristic when the LLM call times out or errors (§4.5).
pub struct ReflectionInterpreter {
    llm: Arc<dyn LlmClient>,
}

impl ReflectionInterpreter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn interpret(&self, reflection: &Reflection) -> ReflectionIntent {
        match self.interpret_via_llm(reflection).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!(error = %err, reflection_id = %reflection.id, "reflection interpreter falling back to heuristic");
                Self::interpret_heuristic(reflection)
            }
        }
    }

    async fn interpret_via_llm(&self, reflection: &Reflection) -> Result<ReflectionIntent> {
        let schema = schema_for!(ReflectionClassification);
        let request = LlmRequest {
            prompt: format!("Classify this reflection: {}", reflection.text),
            schema_name: "ReflectionClassification".to_string(),
            schema: serde_json::to_value(&schema)?,
            timeout: INTERPRETER_TIMEOUT,
        };
        let value = self.llm.complete_strict(request).await?;
        let classification: ReflectionClassification = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("reflection classification failed schema: {e}")))?;

        let mut intent = ReflectionIntent {
            reflection_id: reflection.id,
            intent_type: classification.intent_type,
            subtype: classification.subtype,
            keywords: classification.keywords,
            strength: classification.strength,
            duration: classification.duration,
            summary: classification.summary,
        };
        intent.clamp_strength();
        Ok(intent)
    }

    /// Heuristic fallback (§4.5: "heuristic fallback kicks in on timeout").
    fn interpret_heuristic(reflection: &Reflection) -> ReflectionIntent {
        let lowered = reflection.text.to_ascii_lowercase();
        let (intent_type, strength) = if lowered.contains("avoid") || lowered.contains("ignore") || lowered.contains("deprioritize") {
            (ReflectionIntentType::Avoid, 0.6)
        } else if lowered.contains("urgent") || lowered.contains("asap") || lowered.contains("immediately") {
            (ReflectionIntentType::Urgency, 0.7)
        } else if lowered.contains("waiting on") || lowered.contains("blocked") || lowered.contains("can't start") {
            (ReflectionIntentType::Constraint, 0.5)
        } else if lowered.contains("focus") || lowered.contains("prioritize") {
            (ReflectionIntentType::Focus, 0.6)
        } else {
            (ReflectionIntentType::Context, 0.3)
        };

        let keywords: Vec<String> = lowered
            .split_whitespace()
            .filter(|w| w.len() > 4)
            .map(str::to_string)
            .collect();

        ReflectionIntent {
            reflection_id: reflection.id,
            intent_type,
            subtype: None,
            keywords,
            strength,
            duration: None,
            summary: reflection.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovedTask {
    pub task_id: String,
    pub from: usize,
    pub to: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredTask {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjustmentDiff {
    pub moved: Vec<MovedTask>,
    pub filtered: Vec<FilteredTask>,
}

#[derive(Debug, Clone)]
pub struct AdjustmentMetadata {
    pub reflections: usize,
    pub tasks_moved: usize,
    pub tasks_filtered: usize,
    pub duration_ms: u64,
}

pub struct AdjustmentResult {
    pub ordered_task_ids: Vec<String>,
    pub diff: AdjustmentDiff,
    pub metadata: AdjustmentMetadata,
}

/// Input to the adjuster: a task's keywords, used to match against intent
/// keywords (§4.5).
pub struct AdjustableTask<'a> {
    pub task_id: &'a str,
    pub keywords: Vec<String>,
}

/// Reconciles a baseline ordering with active reflections (§4.5).
pub struct ReflectionAdjuster {
    clock: Arc<dyn Clock>,
}

impl ReflectionAdjuster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn adjust(
        &self,
        baseline_order: &[String],
        tasks: &HashMap<String, AdjustableTask<'_>>,
        reflections: &[(Reflection, ReflectionIntent)],
    ) -> AdjustmentResult {
        let start = std::time::Instant::now();
        let now = self.clock.now();

        let mut deltas: HashMap<&str, f64> = HashMap::new();
        let mut filter_reasons: HashMap<&str, String> = HashMap::new();

        for (reflection, intent) in reflections {
            if !reflection.is_active_for_prioritization {
                continue;
            }
            let age_days = (now - reflection.created_at).num_seconds() as f64 / 86_400.0;
            let recency_weight = (-age_days / RECENCY_HALF_LIFE_DAYS).exp().clamp(0.0, 1.0);

            for (task_id, task) in tasks {
                if !Self::keywords_match(&intent.keywords, &task.keywords) {
                    continue;
                }
                let delta = recency_weight * intent.strength;
                match intent.intent_type {
                    ReflectionIntentType::Focus => {
                        *deltas.entry(task_id.as_str()).or_insert(0.0) -= delta * 10.0;
                    }
                    ReflectionIntentType::Avoid => {
                        *deltas.entry(task_id.as_str()).or_insert(0.0) += delta * 10.0;
                        if delta >= 0.5 {
                            filter_reasons
                                .entry(task_id.as_str())
                                .or_insert_with(|| format!("matches avoid intent: {}", intent.summary));
                        }
                    }
                    ReflectionIntentType::Urgency => {
                        *deltas.entry(task_id.as_str()).or_insert(0.0) -= delta * 15.0;
                    }
                    ReflectionIntentType::Constraint => {
                        filter_reasons
                            .entry(task_id.as_str())
                            .or_insert_with(|| format!("matches constraint intent: {}", intent.summary));
                    }
                    ReflectionIntentType::Context => {
                        *deltas.entry(task_id.as_str()).or_insert(0.0) -= delta * 3.0;
                    }
                }
            }
        }

        let mut ranked: Vec<(usize, &String)> = baseline_order.iter().enumerate().collect();
        let mut filtered = Vec::new();
        ranked.retain(|(_, task_id)| {
            if let Some(reason) = filter_reasons.get(task_id.as_str()) {
                filtered.push(FilteredTask {
                    task_id: (*task_id).clone(),
                    reason: reason.clone(),
                });
                false
            } else {
                true
            }
        });

        let mut with_rank: Vec<(usize, f64, &String)> = ranked
            .into_iter()
            .map(|(original_rank, task_id)| {
                let delta = deltas.get(task_id.as_str()).copied().unwrap_or(0.0);
                (original_rank, original_rank as f64 + delta, task_id)
            })
            .collect();

        with_rank.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let mut moved = Vec::new();
        let ordered_task_ids: Vec<String> = with_rank
            .iter()
            .enumerate()
            .map(|(new_rank, (original_rank, _, task_id))| {
                if *original_rank != new_rank {
                    moved.push(MovedTask {
                        task_id: (*task_id).clone(),
                        from: *original_rank,
                        to: new_rank,
                        reason: "reflection adjustment".to_string(),
                    });
                }
                (*task_id).clone()
            })
            .collect();

        let metadata = AdjustmentMetadata {
            reflections: reflections.len(),
            tasks_moved: moved.len(),
            tasks_filtered: filtered.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        AdjustmentResult {
            ordered_task_ids,
            diff: AdjustmentDiff { moved, filtered },
            metadata,
        }
    }

    fn keywords_match(intent_keywords: &[String], task_keywords: &[String]) -> bool {
        intent_keywords
            .iter()
            .any(|k| task_keywords.iter().any(|t| t.eq_ignore_ascii_case(k)))
    }
}

struct DebounceState {
    last_toggle_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
}

/// Per-user debounce gate for `AdjustPriorities` re-runs triggered by
/// reflection toggles (§4.5: "2s wait after last toggle, min 10s between
/// runs per user").
pub struct ReflectionDebounce {
    clock: Arc<dyn Clock>,
    state: Mutex<HashMap<String, DebounceState>>,
}

impl ReflectionDebounce {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record_toggle(&self, user_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state.entry(user_id.to_string()).or_insert(DebounceState {
            last_toggle_at: None,
            last_run_at: None,
        });
        entry.last_toggle_at = Some(now);
    }

    /// Returns `true` once the debounce window has elapsed and the
    /// minimum inter-run interval has been respected.
    pub async fn should_run(&self, user_id: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(entry) = state.get_mut(user_id) else {
            return false;
        };

        let Some(last_toggle) = entry.last_toggle_at else {
            return false;
        };
        if now - last_toggle < chrono::Duration::from_std(DEBOUNCE_WAIT).unwrap_or_default() {
            return false;
        }
        if let Some(last_run) = entry.last_run_at {
            if now - last_run < chrono::Duration::from_std(MIN_RUN_INTERVAL).unwrap_or_default() {
                return false;
            }
        }

        entry.last_run_at = Some(now);
        entry.last_toggle_at = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioritizer_testing::FixedClock;

    fn reflection(text: &str, created_at: DateTime<Utc>, active: bool) -> Reflection {
        Reflection {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            text: text.to_string(),
            is_active_for_prioritization: active,
            created_at,
        }
    }

    fn intent(reflection_id: Uuid, intent_type: ReflectionIntentType, keywords: &[&str], strength: f64) -> ReflectionIntent {
        ReflectionIntent {
            reflection_id,
            intent_type,
            subtype: None,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            strength,
            duration: None,
            summary: "test".to_string(),
        }
    }

    #[test]
    fn heuristic_classifies_avoid_keywords() {
        let reflection = reflection("ignore marketing for now", Utc::now(), true);
        let intent = ReflectionInterpreter::interpret_heuristic(&reflection);
        assert_eq!(intent.intent_type, ReflectionIntentType::Avoid);
    }

    #[test]
    fn toggling_off_then_on_reproduces_baseline_order() {
        let now = Utc::now();
        let adjuster = ReflectionAdjuster::new(Arc::new(FixedClock::new(now)));
        let baseline = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let tasks: HashMap<String, AdjustableTask> = [
            ("a".to_string(), AdjustableTask { task_id: "a", keywords: vec!["marketing".to_string()] }),
            ("b".to_string(), AdjustableTask { task_id: "b", keywords: vec!["engineering".to_string()] }),
            ("c".to_string(), AdjustableTask { task_id: "c", keywords: vec!["research".to_string()] }),
        ]
        .into_iter()
        .collect();

        let r = reflection("ignore marketing for now", now, true);
        let i = intent(r.id, ReflectionIntentType::Avoid, &["marketing"], 0.8);

        let with_reflection = adjuster.adjust(&baseline, &tasks, &[(r.clone(), i)]);
        assert!(with_reflection.diff.filtered.iter().any(|f| f.task_id == "a"));

        let without_reflection = adjuster.adjust(&baseline, &tasks, &[]);
        assert_eq!(without_reflection.ordered_task_ids, baseline);
        assert!(without_reflection.diff.moved.is_empty());
        assert!(without_reflection.diff.filtered.is_empty());
    }

    #[test]
    fn urgency_intent_promotes_matching_task() {
        let now = Utc::now();
        let adjuster = ReflectionAdjuster::new(Arc::new(FixedClock::new(now)));
        let baseline = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let tasks: HashMap<String, AdjustableTask> = [
            ("a".to_string(), AdjustableTask { task_id: "a", keywords: vec!["design".to_string()] }),
            ("b".to_string(), AdjustableTask { task_id: "b", keywords: vec!["engineering".to_string()] }),
            ("c".to_string(), AdjustableTask { task_id: "c", keywords: vec!["launch".to_string()] }),
        ]
        .into_iter()
        .collect();

        let r = reflection("launch is urgent", now, true);
        let i = intent(r.id, ReflectionIntentType::Urgency, &["launch"], 0.9);

        let result = adjuster.adjust(&baseline, &tasks, &[(r, i)]);
        assert_eq!(result.ordered_task_ids[0], "c");
        assert!(result.diff.moved.iter().any(|m| m.task_id == "c"));
    }

    #[tokio::test]
    async fn debounce_waits_for_window_then_enforces_min_interval() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let debounce = ReflectionDebounce::new(clock.clone());

        debounce.record_toggle("u1").await;
        assert!(!debounce.should_run("u1").await, "should not run before debounce window elapses");

        clock.advance(chrono::Duration::seconds(3));
        assert!(debounce.should_run("u1").await);

        debounce.record_toggle("u1").await;
        clock.advance(chrono::Duration::seconds(3));
        assert!(!debounce.should_run("u1").await, "should respect min 10s between runs");
    }
}
