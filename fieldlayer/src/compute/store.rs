//! Satellite tile and per-land record stores.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{NdviRecord, PipelineError, ProcessingStage, SatelliteTile};
use crate::coord::BoundingBox;
use crate::ids::{LandId, TenantId};
use crate::provider::{Band, Imagery};
use crate::queue::AcquisitionTarget;

/// Every satellite tile processed so far.
///
/// A tile only moves forward through its stages and is frozen once its
/// stage is final.
#[derive(Debug)]
pub struct SatelliteTileStore {
    tiles: DashMap<u64, SatelliteTile>,
    latest: DashMap<(AcquisitionTarget, NaiveDate), u64>,
    next_id: AtomicU64,
}

impl Default for SatelliteTileStore {
    fn default() -> Self {
        Self {
            tiles: DashMap::new(),
            latest: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl SatelliteTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly acquired tile and returns its ID.
    pub fn create(
        &self,
        target: &AcquisitionTarget,
        tenant_id: &TenantId,
        bbox: BoundingBox,
        imagery: &Imagery,
        bands: Vec<Band>,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tiles.insert(
            id,
            SatelliteTile {
                id,
                target: target.clone(),
                tenant_id: tenant_id.clone(),
                bbox,
                acquired_on: imagery.acquired_on,
                source: imagery.source.clone(),
                bands,
                cloud_cover_pct: imagery.cloud_cover_pct,
                stats: None,
                health_score: None,
                completeness_pct: None,
                stage: ProcessingStage::Acquired,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.latest.insert((target.clone(), imagery.acquired_on), id);
        id
    }

    /// Applies `update` to a tile that is not yet final.
    pub fn update(
        &self,
        id: u64,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut SatelliteTile),
    ) -> Result<(), PipelineError> {
        let mut tile = self.tiles.get_mut(&id).ok_or(PipelineError::TileNotFound(id))?;
        if tile.stage.is_final() {
            return Err(PipelineError::TileFinal(id));
        }
        update(&mut tile);
        tile.updated_at = now;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<SatelliteTile> {
        self.tiles.get(&id).map(|t| t.clone())
    }

    /// Most recent tile for a target and acquisition date.
    pub fn latest(&self, target: &AcquisitionTarget, date: NaiveDate) -> Option<SatelliteTile> {
        let id = *self.latest.get(&(target.clone(), date))?;
        self.get(id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Per-land index time series.
///
/// Keyed by (land, date): writing the same key again replaces the record,
/// a new date appends.
#[derive(Debug, Default)]
pub struct NdviRecordStore {
    series: DashMap<LandId, BTreeMap<NaiveDate, NdviRecord>>,
}

impl NdviRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: NdviRecord) {
        self.series
            .entry(record.land_id.clone())
            .or_default()
            .insert(record.date, record);
    }

    pub fn get(&self, land: &LandId, date: NaiveDate) -> Option<NdviRecord> {
        self.series.get(land)?.get(&date).cloned()
    }

    pub fn latest(&self, land: &LandId) -> Option<NdviRecord> {
        self.series
            .get(land)?
            .last_key_value()
            .map(|(_, r)| r.clone())
    }

    /// Records for a land, oldest first.
    pub fn series(&self, land: &LandId) -> Vec<NdviRecord> {
        self.series
            .get(land)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of (land, date) records.
    pub fn len(&self) -> usize {
        self.series.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::stats::IndexStats;
    use crate::compute::types::{PipelineStep, QualityFlags};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn imagery() -> Imagery {
        Imagery {
            width: 1,
            height: 1,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            acquired_on: day(1),
            red: vec![0.1],
            nir: vec![0.5],
            cloud: vec![0.0],
            cloud_cover_pct: 0.0,
            source: "synthetic".into(),
        }
    }

    fn record(land: &str, date: NaiveDate, mean: f64) -> NdviRecord {
        NdviRecord {
            land_id: LandId::from(land),
            tenant_id: TenantId::from("acme"),
            date,
            index: "ndvi".into(),
            stats: IndexStats {
                mean,
                min: mean,
                max: mean,
                std_dev: 0.0,
                valid_pixels: 1,
                total_pixels: 1,
            },
            savi: None,
            evi2: None,
            health_score: 0.5,
            vegetation_coverage: 1.0,
            cloud_cover_pct: 0.0,
            quality: QualityFlags::default(),
            source: "synthetic".into(),
            satellite_tile: 1,
            thumbnail: None,
            computed_at: now(),
        }
    }

    #[test]
    fn test_tile_frozen_once_completed() {
        let store = SatelliteTileStore::new();
        let target = AcquisitionTarget::Cluster { key: "k".into() };
        let id = store.create(&target, &TenantId::from("acme"), imagery().bbox, &imagery(), vec![], now());

        store.update(id, now(), |t| t.stage = ProcessingStage::Masked).unwrap();
        store.update(id, now(), |t| t.stage = ProcessingStage::Completed).unwrap();

        assert_eq!(
            store.update(id, now(), |t| t.stage = ProcessingStage::Masked),
            Err(PipelineError::TileFinal(id))
        );
        assert_eq!(store.get(id).unwrap().stage, ProcessingStage::Completed);
    }

    #[test]
    fn test_failed_tile_is_final() {
        let store = SatelliteTileStore::new();
        let target = AcquisitionTarget::Cluster { key: "k".into() };
        let id = store.create(&target, &TenantId::from("acme"), imagery().bbox, &imagery(), vec![], now());
        store
            .update(id, now(), |t| t.stage = ProcessingStage::Failed { step: PipelineStep::Mask })
            .unwrap();
        assert!(store.update(id, now(), |_| {}).is_err());
    }

    #[test]
    fn test_latest_tile_per_target_and_date() {
        let store = SatelliteTileStore::new();
        let target = AcquisitionTarget::Cluster { key: "k".into() };
        let tenant = TenantId::from("acme");
        let first = store.create(&target, &tenant, imagery().bbox, &imagery(), vec![], now());
        let second = store.create(&target, &tenant, imagery().bbox, &imagery(), vec![], now());
        assert_ne!(first, second);
        assert_eq!(store.latest(&target, day(1)).unwrap().id, second);
        assert!(store.latest(&target, day(2)).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_same_key_replaces_new_date_appends() {
        let store = NdviRecordStore::new();
        store.upsert(record("a", day(1), 0.5));
        store.upsert(record("a", day(1), 0.6));
        store.upsert(record("a", day(3), 0.7));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&LandId::from("a"), day(1)).unwrap().stats.mean, 0.6);
        assert_eq!(store.latest(&LandId::from("a")).unwrap().date, day(3));
        let series = store.series(&LandId::from("a"));
        assert_eq!(series.iter().map(|r| r.date).collect::<Vec<_>>(), vec![day(1), day(3)]);
        assert!(store.series(&LandId::from("b")).is_empty());
    }
}
