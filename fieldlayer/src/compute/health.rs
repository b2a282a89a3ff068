//! Vegetation health scoring.

use serde::{Deserialize, Serialize};

use super::stats::IndexStats;

/// Standard deviation at which uniformity reaches zero.
pub const UNIFORMITY_STD_SCALE: f64 = 0.5;

/// Weights of the health score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub mean: f64,
    pub uniformity: f64,
    pub coverage: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            mean: 0.5,
            uniformity: 0.2,
            coverage: 0.3,
        }
    }
}

impl HealthWeights {
    fn total(&self) -> f64 {
        self.mean + self.uniformity + self.coverage
    }
}

/// 1 for a perfectly even field, falling to 0 at [`UNIFORMITY_STD_SCALE`].
pub fn uniformity(std_dev: f64) -> f64 {
    1.0 - (std_dev / UNIFORMITY_STD_SCALE).min(1.0)
}

/// Share of finite values at or above `threshold`.
pub fn vegetation_coverage(values: &[f32], threshold: f64) -> f64 {
    let (mut finite, mut vegetated) = (0usize, 0usize);
    for &v in values {
        if v.is_finite() {
            finite += 1;
            if v as f64 >= threshold {
                vegetated += 1;
            }
        }
    }
    if finite == 0 {
        0.0
    } else {
        vegetated as f64 / finite as f64
    }
}

/// Health score in [0, 1].
///
/// Negative mean index counts as zero vegetation. Weights are normalized,
/// so they only need to be non-negative.
pub fn health_score(stats: &IndexStats, coverage: f64, weights: &HealthWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let score = weights.mean * stats.mean.clamp(0.0, 1.0)
        + weights.uniformity * uniformity(stats.std_dev)
        + weights.coverage * coverage.clamp(0.0, 1.0);
    (score / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean: f64, std_dev: f64) -> IndexStats {
        IndexStats {
            mean,
            min: mean,
            max: mean,
            std_dev,
            valid_pixels: 10,
            total_pixels: 10,
        }
    }

    #[test]
    fn test_uniformity() {
        assert_eq!(uniformity(0.0), 1.0);
        assert!((uniformity(0.25) - 0.5).abs() < 1e-12);
        assert_eq!(uniformity(0.9), 0.0);
    }

    #[test]
    fn test_coverage() {
        let values = [0.1f32, 0.2, 0.5, f32::NAN];
        assert!((vegetation_coverage(&values, 0.2) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(vegetation_coverage(&[f32::NAN], 0.2), 0.0);
    }

    #[test]
    fn test_health_weighting() {
        let w = HealthWeights::default();
        // 0.5 * 0.6 + 0.2 * 1.0 + 0.3 * 1.0
        assert!((health_score(&stats(0.6, 0.0), 1.0, &w) - 0.8).abs() < 1e-12);
        assert_eq!(health_score(&stats(-0.4, 0.9), 0.0, &w), 0.0);
        assert!((health_score(&stats(1.0, 0.0), 1.0, &w) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights() {
        let w = HealthWeights {
            mean: 0.0,
            uniformity: 0.0,
            coverage: 0.0,
        };
        assert_eq!(health_score(&stats(0.6, 0.0), 1.0, &w), 0.0);
    }
}
