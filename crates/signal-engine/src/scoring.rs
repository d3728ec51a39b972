//! Confidence scoring, kept apart from qualification so the weights can be
//! tuned and tested on their own.

use serde::{Deserialize, Serialize};

/// Tunable weights for the confidence blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of the EPS agreement score
    pub eps_weight: f64,
    /// Weight of the revenue agreement score
    pub revenue_weight: f64,
    /// Bonus points per analyst above the required coverage
    pub coverage_bonus_per_analyst: f64,
    /// Cap on the total coverage bonus
    pub max_coverage_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            eps_weight: 0.6,
            revenue_weight: 0.4,
            coverage_bonus_per_analyst: 2.0,
            max_coverage_bonus: 10.0,
        }
    }
}

impl ScoringWeights {
    pub fn is_valid(&self) -> bool {
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
        finite_non_negative(self.eps_weight)
            && finite_non_negative(self.revenue_weight)
            && finite_non_negative(self.coverage_bonus_per_analyst)
            && finite_non_negative(self.max_coverage_bonus)
            && self.eps_weight + self.revenue_weight > 0.0
    }
}

/// Inputs to the confidence blend for one qualifying stock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub eps_ratio: f64,
    pub eps_threshold: f64,
    pub revenue_ratio: f64,
    pub revenue_threshold: f64,
    /// Lower of the EPS and revenue analyst counts
    pub analyst_count: usize,
    pub required_coverage: usize,
}

fn agreement(ratio: f64, threshold: f64) -> f64 {
    if !ratio.is_finite() || threshold <= 0.0 {
        return 0.0;
    }
    (100.0 * (1.0 - ratio / threshold)).clamp(0.0, 100.0)
}

/// Confidence score in [0, 100].
///
/// Decreases as either dispersion ratio grows toward its threshold and
/// increases with analyst coverage beyond the required minimum.
pub fn score_confidence(inputs: &ScoreInputs, weights: &ScoringWeights) -> f64 {
    let eps_score = agreement(inputs.eps_ratio, inputs.eps_threshold);
    let revenue_score = agreement(inputs.revenue_ratio, inputs.revenue_threshold);

    let (eps_w, revenue_w) = if weights.eps_weight + weights.revenue_weight > 0.0 {
        (weights.eps_weight, weights.revenue_weight)
    } else {
        (0.5, 0.5)
    };
    let blended = (eps_score * eps_w + revenue_score * revenue_w) / (eps_w + revenue_w);

    let extra_analysts = inputs.analyst_count.saturating_sub(inputs.required_coverage) as f64;
    let bonus = (extra_analysts * weights.coverage_bonus_per_analyst).min(weights.max_coverage_bonus);

    let score = blended + bonus.max(0.0);
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
