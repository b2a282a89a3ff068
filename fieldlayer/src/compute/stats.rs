//! Index rasters and summary statistics.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::index::VegetationIndex;
use super::mask::ValidityMask;
use crate::provider::Imagery;

/// Summary of an index over a set of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub valid_pixels: usize,
    pub total_pixels: usize,
}

impl IndexStats {
    /// Statistics over the finite values in `values`.
    ///
    /// Returns `None` when no value is finite.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f32>, total_pixels: usize) -> Option<Self> {
        let mut n = 0usize;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &v in values {
            if !v.is_finite() {
                continue;
            }
            let v = v as f64;
            n += 1;
            sum += v;
            sum_sq += v * v;
            min = min.min(v);
            max = max.max(v);
        }

        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
        Some(Self {
            mean,
            min,
            max,
            std_dev: variance.sqrt(),
            valid_pixels: n,
            total_pixels,
        })
    }
}

/// Computes `index` for every pixel; masked or undefined pixels are NaN.
pub fn index_raster(imagery: &Imagery, mask: &ValidityMask, index: &dyn VegetationIndex) -> Vec<f32> {
    imagery
        .red
        .par_iter()
        .zip(imagery.nir.par_iter())
        .enumerate()
        .map(|(i, (&red, &nir))| {
            if mask.is_valid(i) {
                index.compute(red, nir).unwrap_or(f32::NAN)
            } else {
                f32::NAN
            }
        })
        .collect()
}
