use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

pub const DEFAULT_MAX_SCORE: f64 = 100.0;

/// One assessed criterion: its weight and the score value of the level the
/// teacher selected for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub weight: f64,
    pub level_value: f64,
}

impl CriterionScore {
    pub fn weighted(&self) -> f64 {
        self.weight * self.level_value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total_score: f64,
    pub max_possible_score: f64,
    pub percentage: f64,
}

/// Weighted rubric score.
///
/// The ceiling is the highest level value among `scores` themselves, not the
/// rubric's top level. An assessment where every criterion sits on the same
/// level therefore scores 100%.
pub fn calculate(scores: &[CriterionScore], max_score: Option<f64>) -> Result<ScoreResult, DomainError> {
    let max_score = max_score.unwrap_or(DEFAULT_MAX_SCORE);
    if !max_score.is_finite() || max_score <= 0.0 {
        return Err(DomainError::validation("max score must be a positive number"));
    }
    if scores.is_empty() {
        return Err(DomainError::Computation("no criteria assessed".to_string()));
    }
    if scores
        .iter()
        .any(|s| !s.weight.is_finite() || !s.level_value.is_finite() || s.weight < 0.0 || s.level_value < 0.0)
    {
        return Err(DomainError::validation(
            "criterion weights and level values must be finite and non-negative",
        ));
    }

    let max_level_value = scores
        .iter()
        .map(|s| s.level_value)
        .fold(f64::NEG_INFINITY, f64::max);

    let weighted_sum: f64 = scores.iter().map(CriterionScore::weighted).sum();
    let max_weighted_sum: f64 = scores.iter().map(|s| s.weight * max_level_value).sum();

    let percentage = if max_weighted_sum == 0.0 {
        0.0
    } else {
        100.0 * weighted_sum / max_weighted_sum
    };

    Ok(ScoreResult {
        total_score: round2(percentage / 100.0 * max_score),
        max_possible_score: max_score,
        percentage: round2(percentage),
    })
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
