//! Rating projection over an evidence log.
//!
//! # Invariants
//! - The score is a pure function of the ordered evidence weights.
//! - Replaying the same evidence always yields the same score, so retraction
//!   recomputes from scratch instead of reversing updates.

use crate::config::RatingConfig;
use crate::model::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Stored rating row for one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub relation_hash: ContentHash,
    pub score: f64,
    pub evidence_count: u64,
    /// Epoch milliseconds of the last recompute.
    pub last_updated: i64,
}

/// Score and count produced by replaying evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingProjection {
    pub score: f64,
    pub evidence_count: u64,
}

/// Maps a raw weight onto `[0, 1]`. Non-finite weights count as neutral.
pub fn normalize_weight(weight: f64, config: &RatingConfig) -> f64 {
    if !weight.is_finite() {
        return config.midpoint;
    }
    (weight / config.weight_ceiling).clamp(0.0, 1.0)
}

/// Step size after `applied` evidence items.
pub fn step_size(applied: u64, config: &RatingConfig) -> f64 {
    config.k0 / ((applied as f64) + 1.0).sqrt()
}

/// Replays weights in insertion order from the baseline.
///
/// `score += K(n) * (normalize(weight) - midpoint)` with `K(n) = k0 / sqrt(n + 1)`.
pub fn project(weights: impl IntoIterator<Item = f64>, config: &RatingConfig) -> RatingProjection {
    let mut score = config.baseline;
    let mut applied = 0u64;
    for weight in weights {
        score += step_size(applied, config) * (normalize_weight(weight, config) - config.midpoint);
        applied += 1;
    }
    RatingProjection {
        score,
        evidence_count: applied,
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_weight, project};
    use crate::config::RatingConfig;

    #[test]
    fn empty_log_projects_to_baseline() {
        let config = RatingConfig::default();
        let projection = project(std::iter::empty(), &config);
        assert_eq!(projection.score, config.baseline);
        assert_eq!(projection.evidence_count, 0);
    }

    #[test]
    fn early_evidence_moves_score_more_than_late_evidence() {
        let config = RatingConfig::default();
        let one = project([1.0], &config).score;
        let two = project([1.0, 1.0], &config).score;
        let hundred = project(std::iter::repeat(1.0).take(100), &config).score;
        let hundred_one = project(std::iter::repeat(1.0).take(101), &config).score;

        assert!((one - 1516.0).abs() < 1e-9);
        assert!(two - one > hundred_one - hundred);
        assert!(hundred_one > hundred);
    }

    #[test]
    fn neutral_and_negative_evidence() {
        let config = RatingConfig::default();
        assert_eq!(project([0.5], &config).score, config.baseline);
        assert!(project([0.0], &config).score < config.baseline);
        assert_eq!(normalize_weight(7.0, &config), 1.0);
        assert_eq!(normalize_weight(f64::NAN, &config), config.midpoint);
    }
}
