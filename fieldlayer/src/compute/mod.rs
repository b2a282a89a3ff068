//! Index computation pipeline.
//!
//! Raw multi-band imagery goes through four steps:
//!
//! 1. **mask**: drop pixels without data, out of range, or cloudy
//! 2. **index**: per-pixel vegetation index and tile statistics
//! 3. **health**: a [0, 1] score from mean index, uniformity and coverage
//! 4. **aggregate**: per-land statistics written as [`NdviRecord`]s
//!
//! The vegetation index is pluggable through [`VegetationIndex`]; NDVI,
//! SAVI and EVI2 are provided.

mod health;
mod index;
mod mask;
mod pipeline;
mod stats;
mod store;
mod thumbnail;
mod types;

pub use health::{health_score, uniformity, vegetation_coverage, HealthWeights, UNIFORMITY_STD_SCALE};
pub use index::{Evi2, IndexKind, Ndvi, Savi, VegetationIndex};
pub use mask::ValidityMask;
pub use pipeline::{IndexPipeline, PipelineInput};
pub use stats::{index_raster, IndexStats};
pub use store::{NdviRecordStore, SatelliteTileStore};
pub use thumbnail::{render_thumbnail, PixelWindow, ThumbnailWriter};
pub use types::{
    NdviRecord, PipelineError, PipelineOutcome, PipelineSettings, PipelineStep, ProcessingStage,
    QualityFlags, SatelliteTile, DEFAULT_CLOUDY_SCENE_PCT, DEFAULT_CLOUD_THRESHOLD,
    DEFAULT_MIN_VALID_FRACTION, DEFAULT_VEGETATION_THRESHOLD,
};
