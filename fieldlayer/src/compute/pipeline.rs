//! The index computation pipeline.

use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::health::{health_score, vegetation_coverage};
use super::index::{Evi2, Savi, VegetationIndex};
use super::mask::ValidityMask;
use super::stats::{index_raster, IndexStats};
use super::store::{NdviRecordStore, SatelliteTileStore};
use super::thumbnail::{render_thumbnail, PixelWindow, ThumbnailWriter};
use super::types::{
    NdviRecord, PipelineError, PipelineOutcome, PipelineSettings, PipelineStep, ProcessingStage,
    QualityFlags,
};
use crate::coord::{BoundingBox, GeoPoint};
use crate::grid::TileGrid;
use crate::ids::{LandId, TenantId};
use crate::ledger::ProcessingLedger;
use crate::mapper::LandTileMapping;
use crate::provider::{Band, Imagery};
use crate::queue::AcquisitionTarget;
use crate::time::Clock;

/// One acquisition to process.
pub struct PipelineInput<'a> {
    /// Ledger subject of the run, usually the queue entry.
    pub subject: &'a str,
    pub target: &'a AcquisitionTarget,
    pub tenant_id: &'a TenantId,
    pub imagery: &'a Imagery,
    pub bands: &'a [Band],
    pub lands: &'a [LandTileMapping],
}

/// Pixels of one land within the acquisition raster.
struct LandPixels {
    window: PixelWindow,
    /// Raster indices whose pixel centre lies inside the boundary.
    inside: Vec<usize>,
}

/// Turns imagery into tile statistics and per-land records.
///
/// Steps run in order (mask, index, health, aggregate), each bracketed by
/// ledger rows. The first failing step marks the satellite tile failed and
/// stops the run. Per-land records are written together at the end of the
/// aggregate step, so a failed or canceled run writes none.
///
/// CPU bound; call from a blocking context.
pub struct IndexPipeline {
    settings: PipelineSettings,
    index: Arc<dyn VegetationIndex>,
    tiles: Arc<SatelliteTileStore>,
    records: Arc<NdviRecordStore>,
    grid: Arc<TileGrid>,
    ledger: Arc<ProcessingLedger>,
    thumbnails: Option<ThumbnailWriter>,
    clock: Arc<dyn Clock>,
}

impl IndexPipeline {
    pub fn new(
        settings: PipelineSettings,
        tiles: Arc<SatelliteTileStore>,
        records: Arc<NdviRecordStore>,
        grid: Arc<TileGrid>,
        ledger: Arc<ProcessingLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let index = settings.index.index();
        let thumbnails = settings.thumbnail_dir.clone().map(ThumbnailWriter::new);
        Self {
            settings,
            index,
            tiles,
            records,
            grid,
            ledger,
            thumbnails,
            clock,
        }
    }

    /// Replaces the primary index.
    pub fn with_index(mut self, index: Arc<dyn VegetationIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn tiles(&self) -> &Arc<SatelliteTileStore> {
        &self.tiles
    }

    pub fn records(&self) -> &Arc<NdviRecordStore> {
        &self.records
    }

    /// Processes one acquisition.
    ///
    /// `canceled` is polled before every step.
    pub fn run(
        &self,
        input: PipelineInput<'_>,
        canceled: &dyn Fn() -> bool,
    ) -> Result<PipelineOutcome, PipelineError> {
        let tile_id = self.tiles.create(
            input.target,
            input.tenant_id,
            input.imagery.bbox,
            input.imagery,
            input.bands.to_vec(),
            self.clock.now(),
        );
        let subject = format!("{}/tile-{}", input.subject, tile_id);

        match self.run_steps(tile_id, &subject, &input, canceled) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let stage = match &err {
                    PipelineError::StepFailed { step, .. } => Some(ProcessingStage::Failed { step: *step }),
                    PipelineError::Canceled { .. } => Some(ProcessingStage::Canceled),
                    PipelineError::TileFinal(_) | PipelineError::TileNotFound(_) => None,
                };
                let Some(stage) = stage else {
                    return Err(err);
                };
                let message = err.to_string();
                if let Err(e) = self.tiles.update(tile_id, self.clock.now(), |t| {
                    t.stage = stage;
                    t.error = Some(message);
                }) {
                    warn!(tile = tile_id, error = %e, "Could not mark satellite tile failed");
                }
                Err(err)
            }
        }
    }

    fn checkpoint(&self, step: PipelineStep, canceled: &dyn Fn() -> bool) -> Result<(), PipelineError> {
        if canceled() {
            debug!(step = %step, "Pipeline canceled");
            return Err(PipelineError::Canceled { step });
        }
        Ok(())
    }

    fn run_steps(
        &self,
        tile_id: u64,
        subject: &str,
        input: &PipelineInput<'_>,
        canceled: &dyn Fn() -> bool,
    ) -> Result<PipelineOutcome, PipelineError> {
        let imagery = input.imagery;

        // (a) validity and cloud mask
        self.checkpoint(PipelineStep::Mask, canceled)?;
        let step = self.ledger.start(subject, PipelineStep::Mask.as_str());
        if !imagery.is_consistent() {
            let err = PipelineError::step(PipelineStep::Mask, "band lengths do not match raster size");
            step.fail(&err);
            return Err(err);
        }
        let mask = ValidityMask::build(imagery, self.settings.cloud_threshold);
        let valid_fraction = mask.valid_fraction();
        if valid_fraction < self.settings.min_valid_fraction {
            let err = PipelineError::step(
                PipelineStep::Mask,
                format!(
                    "only {:.1}% valid pixels, need {:.1}%",
                    valid_fraction * 100.0,
                    self.settings.min_valid_fraction * 100.0
                ),
            );
            step.fail(&err);
            return Err(err);
        }
        step.complete();
        self.tiles.update(tile_id, self.clock.now(), |t| {
            t.stage = ProcessingStage::Masked;
            t.completeness_pct = Some(valid_fraction * 100.0);
        })?;

        // (b) index statistics
        self.checkpoint(PipelineStep::Index, canceled)?;
        let step = self.ledger.start(subject, PipelineStep::Index.as_str());
        let raster = index_raster(imagery, &mask, self.index.as_ref());
        let Some(stats) = IndexStats::from_values(&raster, mask.len()) else {
            let err = PipelineError::step(PipelineStep::Index, "index undefined for every valid pixel");
            step.fail(&err);
            return Err(err);
        };
        step.complete();
        self.tiles.update(tile_id, self.clock.now(), |t| {
            t.stage = ProcessingStage::Indexed;
            t.stats = Some(stats);
        })?;

        // (c) health score
        self.checkpoint(PipelineStep::Health, canceled)?;
        let step = self.ledger.start(subject, PipelineStep::Health.as_str());
        let coverage = vegetation_coverage(&raster, self.settings.vegetation_threshold);
        let tile_health = health_score(&stats, coverage, &self.settings.weights);
        step.complete();
        self.tiles.update(tile_id, self.clock.now(), |t| {
            t.stage = ProcessingStage::Scored;
            t.health_score = Some(tile_health);
        })?;

        // (d) per-land aggregation
        self.checkpoint(PipelineStep::Aggregate, canceled)?;
        let step = self.ledger.start(subject, PipelineStep::Aggregate.as_str());
        let results: Vec<Result<NdviRecord, (LandId, String)>> = input
            .lands
            .par_iter()
            .map(|land| {
                self.aggregate_land(land, input, &mask, &raster, tile_id)
                    .map_err(|reason| (land.land_id.clone(), reason))
            })
            .collect();

        let mut records = Vec::with_capacity(results.len());
        let mut failed_lands = Vec::new();
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err((land, reason)) => {
                    warn!(land = %land, reason = %reason, "Land skipped in aggregation");
                    failed_lands.push((land, reason));
                }
            }
        }

        let now = self.clock.now();
        for record in &records {
            self.records.upsert(record.clone());
        }
        for land in input.lands {
            if records.iter().any(|r| r.land_id == land.land_id) {
                self.grid.mark_index_ready(&land.primary_tile, now);
            }
        }
        step.complete();
        self.tiles.update(tile_id, now, |t| t.stage = ProcessingStage::Completed)?;

        info!(
            subject = subject,
            mean = stats.mean,
            health = tile_health,
            processed = records.len(),
            failed = failed_lands.len(),
            "Satellite tile processed"
        );

        Ok(PipelineOutcome {
            tile_id,
            tile_stats: stats,
            tile_health,
            records,
            failed_lands,
        })
    }

    fn aggregate_land(
        &self,
        land: &LandTileMapping,
        input: &PipelineInput<'_>,
        mask: &ValidityMask,
        raster: &[f32],
        tile_id: u64,
    ) -> Result<NdviRecord, String> {
        let imagery = input.imagery;
        let pixels = land_pixels(imagery, land).ok_or_else(|| "land outside imagery".to_string())?;

        let mut values = Vec::with_capacity(pixels.inside.len());
        let mut savi = Vec::with_capacity(pixels.inside.len());
        let mut evi2 = Vec::with_capacity(pixels.inside.len());
        let mut clouded = 0usize;
        for &i in &pixels.inside {
            if imagery.cloud[i].is_finite() && imagery.cloud[i] >= self.settings.cloud_threshold {
                clouded += 1;
            }
            if !mask.is_valid(i) || !raster[i].is_finite() {
                continue;
            }
            values.push(raster[i]);
            let (red, nir) = (imagery.red[i], imagery.nir[i]);
            savi.push(Savi::default().compute(red, nir).unwrap_or(f32::NAN));
            evi2.push(Evi2.compute(red, nir).unwrap_or(f32::NAN));
        }

        let total = pixels.inside.len();
        let stats = IndexStats::from_values(&values, total).ok_or_else(|| "no valid pixels".to_string())?;
        let coverage = vegetation_coverage(&values, self.settings.vegetation_threshold);
        let health = health_score(&stats, coverage, &self.settings.weights);
        let cloud_cover_pct = clouded as f64 / total as f64 * 100.0;

        let thumbnail = self.thumbnails.as_ref().and_then(|writer| {
            let inside = |x: u32, y: u32| {
                let (lat, lon) = imagery.pixel_center(x, y);
                land.boundary.contains(&GeoPoint::new(lat, lon))
            };
            let written = render_thumbnail(raster, imagery.width, pixels.window, inside)
                .map_err(|e| e.to_string())
                .and_then(|png| {
                    writer
                        .write(input.tenant_id, &land.land_id, imagery.acquired_on, &png)
                        .map_err(|e| e.to_string())
                });
            match written {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(land = %land.land_id, error = %e, "Thumbnail not written");
                    None
                }
            }
        });

        Ok(NdviRecord {
            land_id: land.land_id.clone(),
            tenant_id: land.tenant_id.clone(),
            date: imagery.acquired_on,
            index: self.index.name().to_string(),
            stats,
            savi: IndexStats::from_values(&savi, total).map(|s| s.mean),
            evi2: IndexStats::from_values(&evi2, total).map(|s| s.mean),
            health_score: health,
            vegetation_coverage: coverage,
            cloud_cover_pct,
            quality: QualityFlags {
                cloudy: cloud_cover_pct > self.settings.cloudy_scene_pct,
                low_coverage: (values.len() as f64 / total as f64) < self.settings.min_valid_fraction,
            },
            source: imagery.source.clone(),
            satellite_tile: tile_id,
            thumbnail,
            computed_at: self.clock.now(),
        })
    }
}

/// Pixel window covering `bbox`, or `None` when it misses the raster.
fn pixel_window(imagery: &Imagery, bbox: &BoundingBox) -> Option<PixelWindow> {
    let b = &imagery.bbox;
    let dx = (b.east - b.west) / imagery.width as f64;
    let dy = (b.north - b.south) / imagery.height as f64;
    if dx <= 0.0 || dy <= 0.0 {
        return None;
    }
    let clamp_x = |v: f64| v.clamp(0.0, imagery.width as f64) as u32;
    let clamp_y = |v: f64| v.clamp(0.0, imagery.height as f64) as u32;
    let window = PixelWindow {
        x0: clamp_x(((bbox.west - b.west) / dx).floor()),
        x1: clamp_x(((bbox.east - b.west) / dx).ceil()),
        y0: clamp_y(((b.north - bbox.north) / dy).floor()),
        y1: clamp_y(((b.north - bbox.south) / dy).ceil()),
    };
    (window.width() > 0 && window.height() > 0).then_some(window)
}

/// Finds the raster pixels belonging to a land.
///
/// A land smaller than a pixel gets the single pixel under its centroid.
fn land_pixels(imagery: &Imagery, land: &LandTileMapping) -> Option<LandPixels> {
    let window = pixel_window(imagery, &land.bbox)?;
    let mut inside = Vec::new();
    for y in window.y0..window.y1 {
        for x in window.x0..window.x1 {
            let (lat, lon) = imagery.pixel_center(x, y);
            if land.boundary.contains(&GeoPoint::new(lat, lon)) {
                inside.push((y * imagery.width + x) as usize);
            }
        }
    }

    if inside.is_empty() {
        let b = &imagery.bbox;
        let c = &land.centroid;
        if !b.contains(c) {
            return None;
        }
        let x = (((c.lon - b.west) / (b.east - b.west)) * imagery.width as f64) as u32;
        let y = (((b.north - c.lat) / (b.north - b.south)) * imagery.height as f64) as u32;
        let (x, y) = (x.min(imagery.width - 1), y.min(imagery.height - 1));
        inside.push((y * imagery.width + x) as usize);
        return Some(LandPixels {
            window: PixelWindow { x0: x, y0: y, x1: x + 1, y1: y + 1 },
            inside,
        });
    }

    Some(LandPixels { window, inside })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::types::PipelineStep;
    use crate::coord::BoundingBox;
    use crate::grid::GridGenerator;
    use crate::ledger::StepStatus;
    use crate::mapper::{LandParcel, LandTileMapper, MappingStore};
    use crate::coord::Polygon;
    use crate::provider::{DateRange, ImageryRequest, SyntheticProvider, ImageryProvider};
    use crate::time::ManualClock;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Fixture {
        pipeline: IndexPipeline,
        ledger: Arc<ProcessingLedger>,
        grid: Arc<TileGrid>,
        lands: Vec<LandTileMapping>,
    }

    fn fixture(settings: PipelineSettings) -> Fixture {
        let clock: Arc<dyn Clock> =
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        let grid = Arc::new(TileGrid::new(12));
        grid.populate(
            GridGenerator::new(12)
                .generate(&[BoundingBox::new(0.5, 43.5, 1.5, 44.5)])
                .unwrap(),
        );
        let mapper = LandTileMapper::new(Arc::clone(&grid), Arc::new(MappingStore::new()), Arc::clone(&clock));
        let lands = [("a", 44.0, 1.0), ("b", 44.01, 1.01)]
            .iter()
            .map(|(id, lat, lon)| {
                mapper
                    .map_land(&LandParcel {
                        land_id: LandId::from(*id),
                        tenant_id: TenantId::from("acme"),
                        boundary: Polygon::from_lon_lat(&[
                            [*lon, *lat],
                            [lon + 0.004, *lat],
                            [lon + 0.004, lat + 0.004],
                            [*lon, lat + 0.004],
                        ]),
                        priority: None,
                    })
                    .unwrap()
                    .mapping
            })
            .collect();
        let ledger = Arc::new(ProcessingLedger::new(Arc::clone(&clock)));
        let pipeline = IndexPipeline::new(
            settings,
            Arc::new(SatelliteTileStore::new()),
            Arc::new(NdviRecordStore::new()),
            Arc::clone(&grid),
            Arc::clone(&ledger),
            clock,
        );
        Fixture {
            pipeline,
            ledger,
            grid,
            lands,
        }
    }

    fn imagery(provider: SyntheticProvider) -> Imagery {
        let request = ImageryRequest {
            bbox: BoundingBox::new(0.99, 43.99, 1.02, 44.02),
            dates: DateRange::single(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            bands: vec![Band::Red, Band::Nir, Band::CloudProbability],
            width: 60,
            height: 60,
        };
        futures::executor::block_on(provider.fetch_imagery(&request))
            .unwrap()
            .imagery
    }

    fn target() -> AcquisitionTarget {
        AcquisitionTarget::Cluster { key: "k".into() }
    }

    fn run(f: &Fixture, img: &Imagery, canceled: &dyn Fn() -> bool) -> Result<PipelineOutcome, PipelineError> {
        f.pipeline.run(
            PipelineInput {
                subject: "acq-1",
                target: &target(),
                tenant_id: &TenantId::from("acme"),
                imagery: img,
                bands: &[Band::Red, Band::Nir, Band::CloudProbability],
                lands: &f.lands,
            },
            canceled,
        )
    }

    #[test]
    fn test_full_run_writes_records_and_completes_tile() {
        let f = fixture(PipelineSettings::default());
        let img = imagery(SyntheticProvider::new("s").with_ndvi(0.6));

        let outcome = run(&f, &img, &|| false).unwrap();

        assert_eq!(outcome.processed_count(), 2);
        assert_eq!(outcome.failed_count(), 0);
        assert!((outcome.tile_stats.mean - 0.6).abs() < 0.02);
        assert!(outcome.tile_health > 0.5 && outcome.tile_health <= 1.0);

        let tile = f.pipeline.tiles().get(outcome.tile_id).unwrap();
        assert_eq!(tile.stage, ProcessingStage::Completed);
        assert_eq!(tile.completeness_pct, Some(100.0));

        let record = f.pipeline.records().get(&LandId::from("a"), img.acquired_on).unwrap();
        assert!((record.stats.mean - 0.6).abs() < 0.05);
        assert!(record.savi.is_some() && record.evi2.is_some());
        assert_eq!(record.index, "ndvi");
        assert!(!record.quality.cloudy);

        assert!(f.grid.get(&f.lands[0].primary_tile).unwrap().is_index_ready);

        let steps: Vec<_> = f
            .ledger
            .entries()
            .into_iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step)
            .collect();
        assert_eq!(steps, vec!["mask", "index", "health", "aggregate"]);
    }

    #[test]
    fn test_mask_failure_stops_pipeline_without_writes() {
        let f = fixture(PipelineSettings::default());
        let img = imagery(SyntheticProvider::new("s").with_cloud_cover(100.0));

        let err = run(&f, &img, &|| false).unwrap_err();

        assert!(matches!(err, PipelineError::StepFailed { step: PipelineStep::Mask, .. }));
        assert!(f.pipeline.records().is_empty());
        let tile = f.pipeline.tiles().latest(&target(), img.acquired_on).unwrap();
        assert_eq!(tile.stage, ProcessingStage::Failed { step: PipelineStep::Mask });
        assert!(f.ledger.entries().iter().all(|r| r.step == "mask"));
        assert_eq!(f.ledger.failures().len(), 1);
    }

    #[test]
    fn test_cancellation_between_steps() {
        let f = fixture(PipelineSettings::default());
        let img = imagery(SyntheticProvider::new("s"));
        let polls = Cell::new(0);
        let canceled = || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        };

        let err = run(&f, &img, &canceled).unwrap_err();

        assert_eq!(err, PipelineError::Canceled { step: PipelineStep::Health });
        assert!(f.pipeline.records().is_empty());
        let tile = f.pipeline.tiles().latest(&target(), img.acquired_on).unwrap();
        assert_eq!(tile.stage, ProcessingStage::Canceled);
    }

    #[test]
    fn test_land_without_pixels_fails_alone() {
        let mut f = fixture(PipelineSettings::default());
        let img = imagery(SyntheticProvider::new("s"));
        let mut far = f.lands[0].clone();
        far.land_id = LandId::from("far");
        far.bbox = BoundingBox::new(1.3, 44.3, 1.31, 44.31);
        far.centroid = GeoPoint::new(44.305, 1.305);
        far.boundary = Polygon::rectangle(&far.bbox);
        f.lands.push(far);

        let outcome = run(&f, &img, &|| false).unwrap();

        assert_eq!(outcome.processed_count(), 2);
        assert_eq!(outcome.failed_lands.len(), 1);
        assert_eq!(outcome.failed_lands[0].0, LandId::from("far"));
    }

    #[test]
    fn test_reprocessing_same_date_replaces_record() {
        let f = fixture(PipelineSettings::default());
        run(&f, &imagery(SyntheticProvider::new("s").with_ndvi(0.4)), &|| false).unwrap();
        let img = imagery(SyntheticProvider::new("s").with_ndvi(0.7));
        run(&f, &img, &|| false).unwrap();

        let series = f.pipeline.records().series(&LandId::from("a"));
        assert_eq!(series.len(), 1);
        assert!((series[0].stats.mean - 0.7).abs() < 0.05);
        assert_eq!(f.pipeline.tiles().len(), 2);
    }

    #[test]
    fn test_thumbnails_written_when_enabled() {
        let temp = TempDir::new().unwrap();
        let f = fixture(PipelineSettings {
            thumbnail_dir: Some(temp.path().to_path_buf()),
            ..PipelineSettings::default()
        });
        let img = imagery(SyntheticProvider::new("s"));

        let outcome = run(&f, &img, &|| false).unwrap();

        for record in &outcome.records {
            let url = record.thumbnail.as_deref().unwrap();
            assert!(url.starts_with("file://"));
        }
        assert!(temp.path().join("acme").join("a").join("2024-06-01.png").exists());
    }

    #[test]
    fn test_tiny_land_uses_centroid_pixel() {
        let img = imagery(SyntheticProvider::new("s"));
        let mut land = fixture(PipelineSettings::default()).lands[0].clone();
        land.bbox = BoundingBox::new(1.00001, 44.00001, 1.00002, 44.00002);
        land.boundary = Polygon::rectangle(&land.bbox);
        land.centroid = land.bbox.center();

        let pixels = land_pixels(&img, &land).unwrap();
        assert_eq!(pixels.inside.len(), 1);
    }
}
