//! Gap Detection (§4.4): indicators between adjacent tasks in an ordered
//! plan.

use std::time::Instant;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Gap, GapIndicators, PerformanceMetrics, TaskEmbedding};

const COSINE_DISTANCE_THRESHOLD: f64 = 0.45;
pub const BRIDGING_CONFIDENCE_THRESHOLD: f64 = 0.75;
const MAX_GAP_DETECTION_INPUT: usize = 100;

/// Verb families used for the `action_type_jump` indicator (§4.4).
const EARLY_STAGE_VERBS: &[&str] = &["research", "plan", "design"];
const LATE_STAGE_VERBS: &[&str] = &["build", "launch", "ship"];

/// Keyword families used for the `skill_jump` indicator (§4.4: "differing
/// dominant keyword family").
const SKILL_FAMILIES: &[(&str, &[&str])] = &[
    ("engineering", &["build", "implement", "code", "refactor", "migrate", "deploy"]),
    ("design", &["design", "prototype", "wireframe", "mockup"]),
    ("research", &["research", "analyze", "investigate", "survey"]),
    ("marketing", &["market", "campaign", "copy", "announce", "promote"]),
    ("legal", &["legal", "contract", "compliance", "policy"]),
];

const TIME_GAP_RATIO_THRESHOLD: f64 = 3.0;

pub struct GapDetector {
    word_boundary: Regex,
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl GapDetector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            word_boundary: Regex::new(r"[a-z]+").expect("static regex is valid"),
        }
    }

    /// Detects gaps across the adjacent pairs of an ordered task list
    /// (§4.4, §8 boundary behaviors: 2-task input yields 1 pair, 100-task
    /// input yields 99, 101 is rejected).
    pub fn detect(
        &self,
        ordered_tasks: &[TaskEmbedding],
        estimated_hours: &dyn Fn(&str) -> f64,
    ) -> Result<(Vec<Gap>, PerformanceMetrics)> {
        if ordered_tasks.len() < 2 {
            return Err(Error::validation(
                "gap detection requires at least 2 tasks".to_string(),
            ));
        }
        if ordered_tasks.len() > MAX_GAP_DETECTION_INPUT {
            return Err(Error::validation(format!(
                "gap detection accepts at most {MAX_GAP_DETECTION_INPUT} tasks"
            )));
        }

        let start = Instant::now();
        let mut gaps = Vec::new();

        for window in ordered_tasks.windows(2) {
            let predecessor = &window[0];
            let successor = &window[1];

            let missing = [predecessor, successor]
                .iter()
                .find(|task| task.embedding.iter().all(|v| *v == 0.0));
            if let Some(missing_task) = missing {
                return Err(Error::not_found(format!(
                    "task {} has no embedding",
                    missing_task.task_id
                )));
            }

            let indicators = self.compute_indicators(predecessor, successor, estimated_hours);
            let confidence = Self::confidence_from_indicators(&indicators);

            gaps.push(Gap {
                id: Uuid::new_v4(),
                predecessor_task_id: predecessor.task_id.clone(),
                successor_task_id: successor.task_id.clone(),
                indicators,
                confidence,
            });
        }

        let total_pairs_analyzed = ordered_tasks.len() - 1;
        let metrics = PerformanceMetrics {
            total_pairs_analyzed,
            gaps_detected: gaps
                .iter()
                .filter(|gap| gap.confidence >= BRIDGING_CONFIDENCE_THRESHOLD)
                .count(),
            analysis_duration_ms: start.elapsed().as_millis() as u64,
        };

        Ok((gaps, metrics))
    }

    fn compute_indicators(
        &self,
        predecessor: &TaskEmbedding,
        successor: &TaskEmbedding,
        estimated_hours: &dyn Fn(&str) -> f64,
    ) -> GapIndicators {
        let cosine_distance = 1.0 - cosine_similarity(&predecessor.embedding, &successor.embedding);

        let action_type_jump = self.action_type_jump(&predecessor.task_text, &successor.task_text);
        let skill_jump = self.skill_jump(&predecessor.task_text, &successor.task_text);

        let predecessor_hours = estimated_hours(&predecessor.task_text);
        let successor_hours = estimated_hours(&successor.task_text);
        let time_gap = predecessor_hours > 0.0
            && successor_hours / predecessor_hours >= TIME_GAP_RATIO_THRESHOLD;

        GapIndicators {
            cosine_distance,
            action_type_jump,
            skill_jump,
            time_gap,
        }
    }

    fn action_type_jump(&self, predecessor_text: &str, successor_text: &str) -> bool {
        let predecessor_words = self.words(predecessor_text);
        let successor_words = self.words(successor_text);

        let predecessor_early = predecessor_words
            .iter()
            .any(|w| EARLY_STAGE_VERBS.contains(&w.as_str()));
        let predecessor_late = predecessor_words
            .iter()
            .any(|w| LATE_STAGE_VERBS.contains(&w.as_str()));
        let successor_early = successor_words
            .iter()
            .any(|w| EARLY_STAGE_VERBS.contains(&w.as_str()));
        let successor_late = successor_words
            .iter()
            .any(|w| LATE_STAGE_VERBS.contains(&w.as_str()));

        (predecessor_early && successor_late) || (predecessor_late && successor_early)
    }

    fn skill_jump(&self, predecessor_text: &str, successor_text: &str) -> bool {
        let predecessor_family = self.dominant_family(predecessor_text);
        let successor_family = self.dominant_family(successor_text);
        match (predecessor_family, successor_family) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }

    fn dominant_family(&self, text: &str) -> Option<&'static str> {
        let words = self.words(text);
        SKILL_FAMILIES
            .iter()
            .find(|(_, keywords)| words.iter().any(|w| keywords.contains(&w.as_str())))
            .map(|(family, _)| *family)
    }

    fn words(&self, text: &str) -> Vec<String> {
        let lowered = text.to_ascii_lowercase();
        self.word_boundary
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Weighted sum of indicators, clamped [0,1] (§4.4).
    fn confidence_from_indicators(indicators: &GapIndicators) -> f64 {
        let mut score = 0.0;
        if indicators.cosine_distance > COSINE_DISTANCE_THRESHOLD {
            score += 0.4;
        }
        if indicators.action_type_jump {
            score += 0.25;
        }
        if indicators.skill_jump {
            score += 0.2;
        }
        if indicators.time_gap {
            score += 0.15;
        }
        score.clamp(0.0, 1.0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: &str, text: &str, embedding: Vec<f32>) -> TaskEmbedding {
        TaskEmbedding {
            task_id: id.to_string(),
            task_text: text.to_string(),
            document_id: None,
            embedding,
            status: crate::model::TaskStatus::Pending,
            is_manual: false,
            created_by: None,
            quality_metadata: crate::model::QualityMetadata::default(),
            manual_overrides: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn orthogonal_embedding(dim_on: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; 1536];
        v[dim_on] = 1.0;
        v
    }

    #[test]
    fn rejects_single_task_input() {
        let detector = GapDetector::new();
        let tasks = vec![task("t1", "Research payment providers", orthogonal_embedding(0))];
        let result = detector.detect(&tasks, &|_| 8.0);
        assert!(result.is_err());
    }

    #[test]
    fn two_task_input_yields_one_pair() {
        let detector = GapDetector::new();
        let tasks = vec![
            task("t1", "Research payment providers", orthogonal_embedding(0)),
            task("t2", "Launch paid plans", orthogonal_embedding(1)),
        ];
        let (gaps, metrics) = detector.detect(&tasks, &|_| 8.0).unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(metrics.total_pairs_analyzed, 1);
    }

    #[test]
    fn hundred_task_input_yields_ninety_nine_pairs() {
        let detector = GapDetector::new();
        let tasks: Vec<TaskEmbedding> = (0..100)
            .map(|i| task(&format!("t{i}"), "Generic task text here", orthogonal_embedding(i % 1536)))
            .collect();
        let (_, metrics) = detector.detect(&tasks, &|_| 8.0).unwrap();
        assert_eq!(metrics.total_pairs_analyzed, 99);
    }

    #[test]
    fn exactly_101_tasks_rejected() {
        let detector = GapDetector::new();
        let tasks: Vec<TaskEmbedding> = (0..101)
            .map(|i| task(&format!("t{i}"), "Generic task text here", orthogonal_embedding(i % 1536)))
            .collect();
        let result = detector.detect(&tasks, &|_| 8.0);
        assert!(result.is_err());
    }

    #[test]
    fn over_101_tasks_rejected() {
        let detector = GapDetector::new();
        let tasks: Vec<TaskEmbedding> = (0..102)
            .map(|i| task(&format!("t{i}"), "Generic task text here", orthogonal_embedding(i % 1536)))
            .collect();
        let result = detector.detect(&tasks, &|_| 8.0);
        assert!(result.is_err());
    }

    #[test]
    fn action_type_jump_detected_between_research_and_launch() {
        let detector = GapDetector::new();
        let tasks = vec![
            task("t1", "Research payment providers", orthogonal_embedding(0)),
            task("t2", "Launch paid plans to customers", orthogonal_embedding(1)),
        ];
        let (gaps, _) = detector.detect(&tasks, &|_| 8.0).unwrap();
        assert!(gaps[0].indicators.action_type_jump);
        assert!(gaps[0].confidence >= BRIDGING_CONFIDENCE_THRESHOLD - 0.1);
    }

    #[test]
    fn missing_embedding_raises_not_found() {
        let detector = GapDetector::new();
        let tasks = vec![
            task("t1", "Research payment providers", vec![0.0; 1536]),
            task("t2", "Launch paid plans", orthogonal_embedding(1)),
        ];
        let result = detector.detect(&tasks, &|_| 8.0);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
