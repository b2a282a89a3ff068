//! Vegetation index formulas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Denominators smaller than this yield no value.
const MIN_DENOMINATOR: f32 = 1e-6;

/// A per-pixel vegetation index over red and near-infrared reflectance.
pub trait VegetationIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index value for one pixel, or `None` when undefined.
    fn compute(&self, red: f32, nir: f32) -> Option<f32>;
}

/// Normalized difference vegetation index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ndvi;

impl VegetationIndex for Ndvi {
    fn name(&self) -> &'static str {
        "ndvi"
    }

    fn compute(&self, red: f32, nir: f32) -> Option<f32> {
        let denom = nir + red;
        (denom.abs() > MIN_DENOMINATOR).then(|| ((nir - red) / denom).clamp(-1.0, 1.0))
    }
}

/// Soil-adjusted vegetation index.
#[derive(Debug, Clone, Copy)]
pub struct Savi {
    /// Soil brightness correction, 0.5 for intermediate cover.
    pub soil_factor: f32,
}

impl Default for Savi {
    fn default() -> Self {
        Self { soil_factor: 0.5 }
    }
}

impl VegetationIndex for Savi {
    fn name(&self) -> &'static str {
        "savi"
    }

    fn compute(&self, red: f32, nir: f32) -> Option<f32> {
        let l = self.soil_factor;
        let denom = nir + red + l;
        (denom.abs() > MIN_DENOMINATOR).then(|| (1.0 + l) * (nir - red) / denom)
    }
}

/// Two-band enhanced vegetation index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evi2;

impl VegetationIndex for Evi2 {
    fn name(&self) -> &'static str {
        "evi2"
    }

    fn compute(&self, red: f32, nir: f32) -> Option<f32> {
        let denom = nir + 2.4 * red + 1.0;
        (denom.abs() > MIN_DENOMINATOR).then(|| 2.5 * (nir - red) / denom)
    }
}

/// Configurable choice of primary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Ndvi,
    Savi,
    Evi2,
}

impl IndexKind {
    pub fn index(&self) -> Arc<dyn VegetationIndex> {
        match self {
            Self::Ndvi => Arc::new(Ndvi),
            Self::Savi => Arc::new(Savi::default()),
            Self::Evi2 => Arc::new(Evi2),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ndvi => "ndvi",
            Self::Savi => "savi",
            Self::Evi2 => "evi2",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndvi" => Ok(Self::Ndvi),
            "savi" => Ok(Self::Savi),
            "evi2" => Ok(Self::Evi2),
            other => Err(format!("unknown index '{}' (expected ndvi, savi or evi2)", other)),
        }
    }
}
