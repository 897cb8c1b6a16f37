use serde::{Deserialize, Serialize};

/// Per-task score within a session (§3, §8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategicScore {
    pub task_id: String,
    pub impact: f64,
    pub effort: f64,
    pub confidence: f64,
    pub priority: f64,
    pub reasoning: String,
    pub has_manual_override: bool,
}

impl StrategicScore {
    /// `priority = clamp((impact*10)/(max(effort,0.5)/8) * confidence, 0, 100)`
    /// (§3, §8 — always derivable from inputs, never stored independently
    /// of the inputs that produced it).
    #[must_use]
    pub fn compute_priority(impact: f64, effort: f64, confidence: f64) -> f64 {
        let effective_effort = effort.max(0.5);
        let raw = (impact * 10.0) / (effective_effort / 8.0) * confidence;
        raw.clamp(0.0, 100.0)
    }

    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        impact: f64,
        effort: f64,
        confidence: f64,
        reasoning: impl Into<String>,
        has_manual_override: bool,
    ) -> Self {
        let priority = Self::compute_priority(impact, effort, confidence);
        Self {
            task_id: task_id.into(),
            impact,
            effort,
            confidence,
            priority,
            reasoning: reasoning.into(),
            has_manual_override,
        }
    }

    /// Quadrant classification from the glossary: Quick Win / Strategic Bet
    /// / Neutral / Overhead, derived from `(impact >= 7) x (effort <= 16h)`.
    #[must_use]
    pub fn quadrant(&self) -> Quadrant {
        match (self.impact >= 7.0, self.effort <= 16.0) {
            (true, true) => Quadrant::QuickWin,
            (true, false) => Quadrant::StrategicBet,
            (false, true) => Quadrant::Neutral,
            (false, false) => Quadrant::Overhead,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Quadrant {
    QuickWin,
    StrategicBet,
    Neutral,
    Overhead,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_formula_matches_spec_example() {
        // Scenario 5: impact 5, effort 16, confidence 0.8 -> priority 20.0
        let priority = StrategicScore::compute_priority(5.0, 16.0, 0.8);
        assert!((priority - 20.0).abs() < 0.01, "got {priority}");
    }

    #[test]
    fn priority_clamps_to_100() {
        // Scenario 5 continued: override impact 9, effort 4 -> ~144 clamped to 100
        let priority = StrategicScore::compute_priority(9.0, 4.0, 0.8);
        assert!((priority - 100.0).abs() < 0.01, "got {priority}");
    }

    #[test]
    fn priority_never_negative() {
        let priority = StrategicScore::compute_priority(0.0, 100.0, 0.0);
        assert!((0.0..=100.0).contains(&priority));
    }

    #[test]
    fn effort_floor_prevents_division_blowup() {
        let with_floor = StrategicScore::compute_priority(5.0, 0.1, 1.0);
        let at_floor = StrategicScore::compute_priority(5.0, 0.5, 1.0);
        assert!((with_floor - at_floor).abs() < 1e-9);
    }

    #[test]
    fn quadrant_classification() {
        let score = StrategicScore::new("t1", 8.0, 10.0, 0.9, "x", false);
        assert_eq!(score.quadrant(), Quadrant::QuickWin);

        let score = StrategicScore::new("t2", 8.0, 40.0, 0.9, "x", false);
        assert_eq!(score.quadrant(), Quadrant::StrategicBet);

        let score = StrategicScore::new("t3", 3.0, 10.0, 0.9, "x", false);
        assert_eq!(score.quadrant(), Quadrant::Neutral);

        let score = StrategicScore::new("t4", 3.0, 40.0, 0.9, "x", false);
        assert_eq!(score.quadrant(), Quadrant::Overhead);
    }

    proptest::proptest! {
        /// §8: `confidence_scores[id] in [0,1]` for every included id, and
        /// `priority` stays within `[0, 100]` for any inputs the loop or a
        /// manual override could feed it.
        #[test]
        fn priority_always_within_bounds(
            impact in -5.0f64..15.0,
            effort in -1.0f64..200.0,
            confidence in -1.0f64..2.0,
        ) {
            let priority = StrategicScore::compute_priority(impact, effort, confidence);
            prop_assert!((0.0..=100.0).contains(&priority));
        }

        /// The 0.5h effort floor caps the denominator, so priority is
        /// monotonically non-increasing as effort grows past the floor
        /// (holding impact/confidence fixed).
        #[test]
        fn priority_non_increasing_in_effort(
            impact in 0.0f64..10.0,
            confidence in 0.0f64..1.0,
            effort_a in 0.5f64..100.0,
            effort_b in 0.5f64..100.0,
        ) {
            let (lo, hi) = if effort_a <= effort_b { (effort_a, effort_b) } else { (effort_b, effort_a) };
            let p_lo = StrategicScore::compute_priority(impact, lo, confidence);
            let p_hi = StrategicScore::compute_priority(impact, hi, confidence);
            prop_assert!(p_hi <= p_lo + 1e-9);
        }
    }
}
