//! Substrate tuning configuration.
//!
//! # Responsibility
//! - Hold rating and spatial-query parameters in one serde-friendly shape.
//! - Validate values before any component uses them.
//!
//! # Invariants
//! - Every field has a default; hosts may supply partial documents.
//! - `validate()` must pass before a config reaches a repository.

use crate::geometry::hilbert::AXIS_BITS;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Parameters of the decaying-K rating projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Neutral score of a relation with no evidence.
    pub baseline: f64,
    /// Step size for the first evidence item; later items use `k0 / sqrt(n + 1)`.
    pub k0: f64,
    /// Normalized weight that leaves the score unchanged.
    pub midpoint: f64,
    /// Raw weight that normalizes to full confidence.
    pub weight_ceiling: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            baseline: 1500.0,
            k0: 32.0,
            midpoint: 0.5,
            weight_ceiling: 1.0,
        }
    }
}

/// Parameters of the spatial query engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Missing keys tolerated between neighbours before a gap is reported.
    pub gap_tolerance: u64,
    /// First radius tried by `nearest`.
    pub initial_radius: f64,
    /// Upper bound on key ranges scanned per range query.
    pub max_ranges: usize,
    /// Deepest Hilbert level subdivided when decomposing a query ball.
    pub max_descent_depth: u32,
    /// Radius doublings allowed per `nearest` call before giving up.
    pub nearest_max_rounds: u32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            gap_tolerance: 0,
            initial_radius: 0.05,
            max_ranges: 64,
            max_descent_depth: 12,
            nearest_max_rounds: 16,
        }
    }
}

/// Top-level substrate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    pub rating: RatingConfig,
    pub spatial: SpatialConfig,
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid config `{}`: {}", self.field, self.message)
    }
}

impl Error for ConfigError {}

impl SubstrateConfig {
    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rating = &self.rating;
        require_finite("rating.baseline", rating.baseline)?;
        require_positive("rating.k0", rating.k0)?;
        require_positive("rating.weight_ceiling", rating.weight_ceiling)?;
        if !(0.0..=1.0).contains(&rating.midpoint) {
            return Err(invalid(
                "rating.midpoint",
                format!("must be within [0, 1], got {}", rating.midpoint),
            ));
        }

        let spatial = &self.spatial;
        require_positive("spatial.initial_radius", spatial.initial_radius)?;
        if spatial.max_ranges == 0 {
            return Err(invalid("spatial.max_ranges", "must be at least 1".to_string()));
        }
        if !(1..=AXIS_BITS).contains(&spatial.max_descent_depth) {
            return Err(invalid(
                "spatial.max_descent_depth",
                format!(
                    "must be within [1, {AXIS_BITS}], got {}",
                    spatial.max_descent_depth
                ),
            ));
        }
        if spatial.nearest_max_rounds == 0 {
            return Err(invalid(
                "spatial.nearest_max_rounds",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite, got {value}")))
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    require_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be positive, got {value}")))
    }
}

fn invalid(field: &'static str, message: String) -> ConfigError {
    ConfigError { field, message }
}

#[cfg(test)]
mod tests {
    use super::SubstrateConfig;

    #[test]
    fn default_config_is_valid() {
        SubstrateConfig::default()
            .validate()
            .expect("defaults should validate");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = SubstrateConfig::default();
        config.rating.midpoint = 1.5;
        assert_eq!(config.validate().unwrap_err().field, "rating.midpoint");

        let mut config = SubstrateConfig::default();
        config.rating.k0 = f64::NAN;
        assert_eq!(config.validate().unwrap_err().field, "rating.k0");

        let mut config = SubstrateConfig::default();
        config.spatial.max_descent_depth = 40;
        assert_eq!(
            config.validate().unwrap_err().field,
            "spatial.max_descent_depth"
        );
    }
}
