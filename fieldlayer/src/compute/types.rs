//! Computation records, settings and errors.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::health::HealthWeights;
use super::index::IndexKind;
use super::stats::IndexStats;
use crate::coord::BoundingBox;
use crate::ids::{LandId, TenantId};
use crate::provider::Band;
use crate::queue::AcquisitionTarget;

/// Default cloud probability at which a pixel is masked.
pub const DEFAULT_CLOUD_THRESHOLD: f32 = 0.4;

/// Default minimum share of valid pixels for a usable acquisition.
pub const DEFAULT_MIN_VALID_FRACTION: f64 = 0.05;

/// Default index value at which a pixel counts as vegetated.
pub const DEFAULT_VEGETATION_THRESHOLD: f64 = 0.2;

/// Default land cloud cover, in percent, above which a record is cloudy.
pub const DEFAULT_CLOUDY_SCENE_PCT: f64 = 20.0;

/// Pipeline tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub index: IndexKind,
    pub cloud_threshold: f32,
    pub min_valid_fraction: f64,
    pub vegetation_threshold: f64,
    pub weights: HealthWeights,
    pub cloudy_scene_pct: f64,
    /// Render a PNG per land into this directory when set.
    pub thumbnail_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            index: IndexKind::Ndvi,
            cloud_threshold: DEFAULT_CLOUD_THRESHOLD,
            min_valid_fraction: DEFAULT_MIN_VALID_FRACTION,
            vegetation_threshold: DEFAULT_VEGETATION_THRESHOLD,
            weights: HealthWeights::default(),
            cloudy_scene_pct: DEFAULT_CLOUDY_SCENE_PCT,
            thumbnail_dir: None,
        }
    }
}

/// Computation steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Mask,
    Index,
    Health,
    Aggregate,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::Index => "index",
            Self::Health => "health",
            Self::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a satellite tile is in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProcessingStage {
    Acquired,
    Masked,
    Indexed,
    Scored,
    Completed,
    Failed { step: PipelineStep },
    Canceled,
}

impl ProcessingStage {
    /// Whether the tile will not change again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Canceled)
    }
}

/// One imagery acquisition and what was computed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteTile {
    pub id: u64,
    pub target: AcquisitionTarget,
    pub tenant_id: TenantId,
    pub bbox: BoundingBox,
    pub acquired_on: NaiveDate,
    pub source: String,
    pub bands: Vec<Band>,
    pub cloud_cover_pct: f64,
    pub stats: Option<IndexStats>,
    pub health_score: Option<f64>,
    /// Valid pixel share after masking, in percent.
    pub completeness_pct: Option<f64>,
    pub stage: ProcessingStage,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Quality flags attached to a land's record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    /// Scene cloud cover above the cloudy threshold.
    pub cloudy: bool,
    /// Fewer valid pixels than the minimum valid fraction.
    pub low_coverage: bool,
}

/// A land's index values for one acquisition date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviRecord {
    pub land_id: LandId,
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    /// Name of the primary index.
    pub index: String,
    pub stats: IndexStats,
    pub savi: Option<f64>,
    pub evi2: Option<f64>,
    pub health_score: f64,
    pub vegetation_coverage: f64,
    pub cloud_cover_pct: f64,
    pub quality: QualityFlags,
    pub source: String,
    pub satellite_tile: u64,
    pub thumbnail: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub tile_id: u64,
    pub tile_stats: IndexStats,
    pub tile_health: f64,
    pub records: Vec<NdviRecord>,
    /// Lands with no usable pixels and why.
    pub failed_lands: Vec<(LandId, String)>,
}

impl PipelineOutcome {
    pub fn processed_count(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_lands.len() as u32
    }
}

/// Errors from the computation pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("pipeline step '{step}' failed: {reason}")]
    StepFailed { step: PipelineStep, reason: String },

    #[error("processing canceled before step '{step}'")]
    Canceled { step: PipelineStep },

    #[error("satellite tile {0} is final and cannot change")]
    TileFinal(u64),

    #[error("satellite tile {0} not found")]
    TileNotFound(u64),
}

impl PipelineError {
    pub(crate) fn step(step: PipelineStep, reason: impl Into<String>) -> Self {
        Self::StepFailed {
            step,
            reason: reason.into(),
        }
    }
}
