//! FieldLayer service facade implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::builder::FieldLayerServiceBuilder;
use super::error::ServiceError;
use super::trigger::LandRefreshTrigger;
use crate::cache::{CacheEvictionDaemon, CacheLookup, CacheStats, NdviCache};
use crate::cluster::{ClusterBuildReport, ClusterBuilder, ClusterScheduler};
use crate::compute::{NdviRecord, NdviRecordStore, SatelliteTileStore};
use crate::config::ConfigFile;
use crate::coord::BoundingBox;
use crate::grid::{GridGenerator, TileGrid};
use crate::ids::{LandId, TenantId};
use crate::ledger::{Alert, ProcessingLedger};
use crate::mapper::{LandParcel, LandTileMapper, LandTileMapping, MapChange, MapOutcome};
use crate::queue::{AcquisitionQueue, CancelOutcome, EntryId, Priority, QueueReaper, QueueStats};
use crate::time::Clock;
use crate::usage::{ApiUsageRecord, UsageSystem};
use crate::worker::{AcquisitionWorker, WorkerPool};

/// How often `wait_idle` re-checks the queue.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the builder wires together.
pub(super) struct ServiceParts {
    pub config: ConfigFile,
    pub clock: Arc<dyn Clock>,
    pub grid: Arc<TileGrid>,
    pub mapper: LandTileMapper,
    pub queue: Arc<AcquisitionQueue>,
    pub clusters: Arc<ClusterBuilder>,
    pub cluster_wake: Arc<Notify>,
    pub trigger: Arc<LandRefreshTrigger>,
    pub cache: Arc<NdviCache>,
    pub tiles: Arc<SatelliteTileStore>,
    pub records: Arc<NdviRecordStore>,
    pub ledger: Arc<ProcessingLedger>,
    pub usage: UsageSystem,
    pub worker: AcquisitionWorker,
    pub runtime_handle: Handle,
}

/// Background tasks spawned by [`FieldLayerService::start`].
struct Running {
    shutdown: CancellationToken,
    daemons: Vec<JoinHandle<()>>,
    pool: WorkerPool,
}

/// High-level facade for FieldLayer operations.
///
/// Owns every component, from the tile grid to the usage daemon, and
/// exposes the operations the rest of the platform needs: registering
/// lands, reading cached index values, requesting refreshes and reading
/// provider usage. Reads only ever touch the cache; acquisition happens in
/// the background once [`start`](Self::start) has spawned the daemons and
/// workers.
///
/// # Example
///
/// ```ignore
/// use fieldlayer::config::ConfigFile;
/// use fieldlayer::service::FieldLayerService;
///
/// let mut service = FieldLayerService::builder(ConfigFile::default()).build()?;
/// service.generate_grid(&[region])?;
/// service.register_land(&parcel)?;
/// service.start();
///
/// match service.get(&parcel.land_id, None) {
///     CacheLookup::Hit(entry) => println!("mean {:.3}", entry.mean),
///     _ => println!("refresh scheduled"),
/// }
/// ```
pub struct FieldLayerService {
    config: ConfigFile,
    clock: Arc<dyn Clock>,
    grid: Arc<TileGrid>,
    mapper: LandTileMapper,
    queue: Arc<AcquisitionQueue>,
    clusters: Arc<ClusterBuilder>,
    cluster_wake: Arc<Notify>,
    trigger: Arc<LandRefreshTrigger>,
    cache: Arc<NdviCache>,
    tiles: Arc<SatelliteTileStore>,
    records: Arc<NdviRecordStore>,
    ledger: Arc<ProcessingLedger>,
    usage: UsageSystem,
    worker: AcquisitionWorker,
    runtime_handle: Handle,
    running: Option<Running>,
}

impl FieldLayerService {
    /// Start building a service from configuration.
    pub fn builder(config: ConfigFile) -> FieldLayerServiceBuilder {
        FieldLayerServiceBuilder::new(config)
    }

    pub(super) fn from_parts(parts: ServiceParts) -> Self {
        Self {
            config: parts.config,
            clock: parts.clock,
            grid: parts.grid,
            mapper: parts.mapper,
            queue: parts.queue,
            clusters: parts.clusters,
            cluster_wake: parts.cluster_wake,
            trigger: parts.trigger,
            cache: parts.cache,
            tiles: parts.tiles,
            records: parts.records,
            ledger: parts.ledger,
            usage: parts.usage,
            worker: parts.worker,
            runtime_handle: parts.runtime_handle,
            running: None,
        }
    }

    /// Get the service configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    pub fn queue(&self) -> &Arc<AcquisitionQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<NdviCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<ProcessingLedger> {
        &self.ledger
    }

    pub fn satellite_tiles(&self) -> &Arc<SatelliteTileStore> {
        &self.tiles
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Adds the tiles covering `regions` to the grid.
    ///
    /// Returns the number of tiles generated. Existing tiles keep their
    /// flags and land counts.
    pub fn generate_grid(&self, regions: &[BoundingBox]) -> Result<usize, ServiceError> {
        let tiles = GridGenerator::new(self.grid.zoom())
            .with_max_tiles(self.config.grid.max_tiles)
            .generate(regions)?;
        let generated = tiles.len();
        let fresh: Vec<_> = tiles
            .into_iter()
            .filter(|t| !self.grid.contains(&t.coord))
            .collect();
        let added = fresh.len();
        self.grid.populate(fresh);
        info!(
            regions = regions.len(),
            generated,
            added,
            total = self.grid.len(),
            "Grid generated"
        );
        Ok(generated)
    }

    /// Maps a land onto the grid and stores its mapping.
    ///
    /// A changed boundary drops the land's cached values, since they were
    /// computed over the old geometry.
    pub fn register_land(&self, parcel: &LandParcel) -> Result<MapOutcome, ServiceError> {
        let outcome = self.mapper.map_land(parcel)?;
        match outcome.change {
            MapChange::Created => self.cluster_wake.notify_one(),
            MapChange::Updated => {
                let dropped = self.cache.invalidate(&parcel.land_id);
                self.cache.clear_pending(&parcel.land_id);
                debug!(land = %parcel.land_id, dropped, "Boundary changed, cache invalidated");
                self.cluster_wake.notify_one();
            }
            MapChange::Unchanged => {}
        }
        Ok(outcome)
    }

    /// Removes a land's mapping and cached values.
    pub fn remove_land(&self, land: &LandId) -> Option<LandTileMapping> {
        let removed = self.mapper.remove_land(land)?;
        self.cache.invalidate(land);
        self.cache.clear_pending(land);
        Some(removed)
    }

    pub fn mapping(&self, land: &LandId) -> Option<LandTileMapping> {
        self.mapper.store().get(land)
    }

    /// Runs one cluster pass now, without waiting for the scheduler.
    pub fn build_clusters(&self) -> ClusterBuildReport {
        self.clusters.build()
    }

    /// Reads the cached value for `land`.
    ///
    /// Never blocks on acquisition: a miss or stale value schedules a
    /// refresh through the cluster builder.
    pub fn get(&self, land: &LandId, date: Option<NaiveDate>) -> CacheLookup {
        self.cache.get(land, date)
    }

    /// Full index record for a land and date, auxiliary indices included.
    pub fn record(&self, land: &LandId, date: NaiveDate) -> Option<NdviRecord> {
        self.records.get(land, date)
    }

    /// Flags `land` for refresh at `priority`, or raises the priority of the
    /// queued entry already covering it.
    pub fn request_refresh(&self, land: &LandId, priority: Priority) -> Result<(), ServiceError> {
        if !self.trigger.request(land, Some(priority)) {
            return Err(ServiceError::UnknownLand(land.clone()));
        }
        info!(land = %land, priority = %priority, "Refresh requested");
        Ok(())
    }

    /// Usage counters for one tenant's day.
    pub async fn get_usage(
        &self,
        tenant: &TenantId,
        date: NaiveDate,
    ) -> Result<ApiUsageRecord, ServiceError> {
        Ok(self.usage.client().usage(tenant, date).await?)
    }

    /// Every tenant's usage counters.
    pub async fn all_usage(&self) -> Result<Vec<ApiUsageRecord>, ServiceError> {
        Ok(self.usage.client().all().await?)
    }

    /// Cancels a queue entry: immediately while queued, at the next step
    /// boundary while processing.
    pub fn cancel(&self, id: EntryId) -> Result<CancelOutcome, ServiceError> {
        let outcome = self.queue.cancel(id)?;
        if let CancelOutcome::Canceled(entry) = &outcome {
            self.worker.release(entry);
        }
        Ok(outcome)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.ledger.alerts()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Spawns the queue reaper, cache eviction daemon, cluster scheduler and
    /// worker pool. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.running.is_some() {
            warn!("Service already started");
            return;
        }
        let shutdown = CancellationToken::new();
        let mut daemons = Vec::with_capacity(3);

        let reaper = QueueReaper::new(Arc::clone(&self.queue))
            .with_release(Arc::new(self.worker.clone()))
            .with_interval(self.config.queue.reaper_interval())
            .with_finished_retention(self.config.queue.finished_retention());
        daemons.push(self.runtime_handle.spawn(reaper.run(shutdown.child_token())));

        let eviction = CacheEvictionDaemon::new(Arc::clone(&self.cache))
            .with_interval(self.config.cache.sweep_interval());
        daemons.push(self.runtime_handle.spawn(eviction.run(shutdown.child_token())));

        let scheduler = ClusterScheduler::new(Arc::clone(&self.clusters), Arc::clone(&self.cluster_wake))
            .with_interval(self.config.cluster.schedule_interval());
        daemons.push(self.runtime_handle.spawn(scheduler.run(shutdown.child_token())));

        let pool = WorkerPool::start(
            self.worker.clone(),
            &self.runtime_handle,
            shutdown.child_token(),
        );

        info!(
            workers = pool.len(),
            daemons = daemons.len(),
            "FieldLayer service started"
        );
        self.running = Some(Running {
            shutdown,
            daemons,
            pool,
        });
    }

    /// Waits until the queue has no queued or processing entries.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            while self.queue.stats().active() > 0 {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Stops workers and daemons, writes the queue snapshot if one is
    /// configured, and stops the usage daemon.
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            running.pool.shutdown().await;
            for handle in running.daemons {
                let _ = handle.await;
            }
        }

        if let Some(path) = &self.config.queue.snapshot {
            self.queue.save_to(path)?;
            info!(path = %path.display(), "Queue snapshot written");
        }

        self.usage.shutdown().await;
        info!("FieldLayer service stopped");
        Ok(())
    }
}

impl Drop for FieldLayerService {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Polygon;
    use crate::provider::SyntheticProvider;
    use crate::queue::EntryStatus;
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};

    fn parcel(id: &str, lat: f64, lon: f64) -> LandParcel {
        let size = 0.003;
        LandParcel {
            land_id: LandId::from(id),
            tenant_id: TenantId::from("farm-co"),
            boundary: Polygon::from_lon_lat(&[
                [lon, lat],
                [lon + size, lat],
                [lon + size, lat + size],
                [lon, lat + size],
            ]),
            priority: None,
        }
    }

    fn service(clock: Arc<ManualClock>) -> FieldLayerService {
        let service = FieldLayerService::builder(ConfigFile::default())
            .with_clock(clock)
            .with_provider(Arc::new(SyntheticProvider::new("synthetic")))
            .build()
            .unwrap();
        service
            .generate_grid(&[BoundingBox::new(0.9, 43.9, 1.2, 44.2)])
            .unwrap();
        service
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_register_and_build_clusters() {
        let service = service(clock());
        service.register_land(&parcel("a", 44.0, 1.0)).unwrap();
        service.register_land(&parcel("b", 44.004, 1.004)).unwrap();

        let report = service.build_clusters();
        assert_eq!(report.enqueued.len(), 1);
        let (cluster, outcome) = &report.enqueued[0];
        assert_eq!(cluster.land_ids.len(), 2);
        assert_eq!(outcome.priority, Priority::MAX);

        // Nothing new on a second pass.
        assert!(service.build_clusters().enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_register_unchanged_boundary_is_noop() {
        let service = service(clock());
        let p = parcel("a", 44.0, 1.0);
        assert_eq!(service.register_land(&p).unwrap().change, MapChange::Created);
        assert_eq!(service.register_land(&p).unwrap().change, MapChange::Unchanged);
    }

    #[tokio::test]
    async fn test_register_outside_grid_fails() {
        let service = service(clock());
        let err = service.register_land(&parcel("far", 10.0, 10.0)).unwrap_err();
        assert!(matches!(err, ServiceError::MappingError(_)));
    }

    #[tokio::test]
    async fn test_request_refresh_unknown_land() {
        let service = service(clock());
        let err = service
            .request_refresh(&LandId::from("ghost"), Priority::REFRESH)
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownLand(_)));
    }

    #[tokio::test]
    async fn test_cancel_queued_entry_releases_cluster() {
        let service = service(clock());
        service.register_land(&parcel("a", 44.0, 1.0)).unwrap();
        let report = service.build_clusters();
        let id = report.enqueued[0].1.id;

        let outcome = service.cancel(id).unwrap();
        assert!(matches!(outcome, CancelOutcome::Canceled(_)));
        assert_eq!(service.queue().get(id).unwrap().status, EntryStatus::Canceled);

        // The land is eligible again.
        assert_eq!(service.build_clusters().enqueued.len(), 1);
    }

    #[tokio::test]
    async fn test_miss_flags_land_for_refresh() {
        let service = service(clock());
        let land = LandId::from("a");
        service.register_land(&parcel("a", 44.0, 1.0)).unwrap();

        assert!(service.get(&land, None).is_miss());
        assert!(service.mapping(&land).unwrap().needs_refresh);
        assert_eq!(service.cache_stats().misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_processes_and_shutdown_stops() {
        let clock = clock();
        let mut service = service(Arc::clone(&clock));
        let land = LandId::from("a");
        service.register_land(&parcel("a", 44.0, 1.0)).unwrap();

        service.start();
        assert!(service.is_running());
        service.build_clusters();
        assert!(service.wait_idle(Duration::from_secs(10)).await);

        assert!(service.get(&land, None).is_hit());
        let usage = service
            .get_usage(&TenantId::from("farm-co"), service.today())
            .await
            .unwrap();
        assert_eq!(usage.calls_succeeded, 1);

        service.shutdown().await.unwrap();
        assert!(!service.is_running());
    }
}
