//! Service builder for constructing FieldLayerService with smaller, focused units.
//!
//! This module extracts the wiring from the facade into discrete builder
//! functions, one per component family.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::error::ServiceError;
use super::facade::{FieldLayerService, ServiceParts};
use super::trigger::LandRefreshTrigger;
use crate::cache::{NdviCache, RefreshTrigger};
use crate::cluster::{ActiveClusters, ClusterBuilder};
use crate::compute::{IndexPipeline, NdviRecordStore, SatelliteTileStore};
use crate::config::ConfigFile;
use crate::grid::{GridGenerator, TileGrid};
use crate::ledger::ProcessingLedger;
use crate::mapper::{LandTileMapper, MappingStore};
use crate::provider::{
    AcquisitionOrchestrator, AsyncReqwestClient, ImageryProvider, ProviderFactory,
    ProviderRegistry, TenantPolicies,
};
use crate::queue::AcquisitionQueue;
use crate::time::{Clock, SystemClock};
use crate::usage::UsageSystem;
use crate::worker::AcquisitionWorker;

/// Builder for [`FieldLayerService`].
///
/// # Example
///
/// ```ignore
/// use fieldlayer::config::ConfigFile;
/// use fieldlayer::service::FieldLayerService;
///
/// let service = FieldLayerService::builder(ConfigFile::load()?)
///     .with_runtime(runtime.handle().clone())
///     .build()?;
/// ```
pub struct FieldLayerServiceBuilder {
    config: ConfigFile,
    clock: Arc<dyn Clock>,
    providers: Vec<Arc<dyn ImageryProvider>>,
    runtime_handle: Option<Handle>,
}

impl FieldLayerServiceBuilder {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            providers: Vec::new(),
            runtime_handle: None,
        }
    }

    /// Replaces the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a ready-made provider. It replaces any configured provider
    /// with the same name.
    pub fn with_provider(mut self, provider: Arc<dyn ImageryProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Runtime the daemons and workers are spawned on. Defaults to the
    /// runtime the builder is called from.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<FieldLayerService, ServiceError> {
        let runtime_handle = match self.runtime_handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| ServiceError::RuntimeError(e.to_string()))?,
        };
        let config = self.config;
        let clock = self.clock;

        let grid = create_grid(&config)?;
        let mappings = Arc::new(MappingStore::new());
        let mapper = LandTileMapper::new(Arc::clone(&grid), Arc::clone(&mappings), Arc::clone(&clock));

        let queue = create_queue(&config, &clock)?;
        let clusters = Arc::new(ClusterBuilder::new(
            Arc::clone(&mappings),
            Arc::new(ActiveClusters::new()),
            Arc::clone(&queue),
            config.cluster.settings(),
            Arc::clone(&clock),
        ));
        clusters.adopt_queued();

        let cluster_wake = Arc::new(Notify::new());
        let trigger = Arc::new(LandRefreshTrigger::new(
            Arc::clone(&mappings),
            Arc::clone(&queue),
            Arc::clone(&cluster_wake),
        ));
        let cache = Arc::new(
            NdviCache::new(Arc::clone(&clock))
                .with_trigger(Arc::clone(&trigger) as Arc<dyn RefreshTrigger>)
                .with_ttl(config.cache.ttl_policy())
                .with_grace(config.cache.eviction_grace())
                .with_pending_timeout(config.cache.pending_timeout()),
        );

        let ledger = Arc::new(create_ledger(&config, &clock)?);
        let usage = UsageSystem::new(&runtime_handle);

        let policies = config.tenant_policies();
        let registry = create_registry(&config, &policies, self.providers)?;
        let orchestrator = Arc::new(AcquisitionOrchestrator::new(
            registry,
            policies,
            usage.client(),
            Arc::clone(&clock),
        ));

        let tiles = Arc::new(SatelliteTileStore::new());
        let records = Arc::new(NdviRecordStore::new());
        let pipeline = Arc::new(IndexPipeline::new(
            config.pipeline_settings(),
            Arc::clone(&tiles),
            Arc::clone(&records),
            Arc::clone(&grid),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));

        let worker = AcquisitionWorker::new(
            Arc::clone(&queue),
            Arc::clone(&mappings),
            Arc::clone(&clusters),
            orchestrator,
            pipeline,
            Arc::clone(&cache),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        )
        .with_settings(config.workers.settings());

        info!(
            zoom = config.grid.zoom,
            tiles = grid.len(),
            workers = config.workers.count,
            queued = queue.stats().active(),
            "FieldLayer service built"
        );

        Ok(FieldLayerService::from_parts(ServiceParts {
            config,
            clock,
            grid,
            mapper,
            queue,
            clusters,
            cluster_wake,
            trigger,
            cache,
            tiles,
            records,
            ledger,
            usage,
            worker,
            runtime_handle,
        }))
    }
}

/// Create the tile grid, generating the configured regions up front.
fn create_grid(config: &ConfigFile) -> Result<Arc<TileGrid>, ServiceError> {
    let grid = Arc::new(TileGrid::new(config.grid.zoom));
    if !config.grid.regions.is_empty() {
        let tiles = GridGenerator::new(config.grid.zoom)
            .with_max_tiles(config.grid.max_tiles)
            .generate(&config.grid.regions)?;
        grid.populate(tiles);
    }
    Ok(grid)
}

/// Create the queue with its policies, restoring the snapshot if configured.
fn create_queue(
    config: &ConfigFile,
    clock: &Arc<dyn Clock>,
) -> Result<Arc<AcquisitionQueue>, ServiceError> {
    let queue = AcquisitionQueue::new(Arc::clone(clock))
        .with_retry_policy(config.queue.retry_policy())
        .with_claim_timeout(config.queue.claim_timeout());

    if let Some(path) = &config.queue.snapshot {
        if queue.restore_from(path)? {
            info!(path = %path.display(), "Queue snapshot restored");
        }
    }
    Ok(Arc::new(queue))
}

fn create_ledger(config: &ConfigFile, clock: &Arc<dyn Clock>) -> Result<ProcessingLedger, ServiceError> {
    match &config.ledger.file {
        Some(path) => Ok(ProcessingLedger::with_file(path, Arc::clone(clock))?),
        None => Ok(ProcessingLedger::new(Arc::clone(clock))),
    }
}

/// Create every configured provider plus the injected ones.
///
/// Providers no tenant chain references are skipped when they fail to build,
/// so an unused entry with blank credentials does not block startup.
fn create_registry(
    config: &ConfigFile,
    policies: &TenantPolicies,
    injected: Vec<Arc<dyn ImageryProvider>>,
) -> Result<ProviderRegistry, ServiceError> {
    let referenced: HashSet<&str> = policies.referenced_providers().into_iter().collect();
    let injected_names: HashSet<String> = injected.iter().map(|p| p.name().to_string()).collect();

    let http_client = AsyncReqwestClient::with_timeout(config.provider.timeout_secs)
        .map_err(|e| ServiceError::HttpClientError(e.to_string()))?;
    let factory = ProviderFactory::new(http_client);

    let mut registry = ProviderRegistry::new();
    for (name, provider_config) in &config.provider.providers {
        if injected_names.contains(name) {
            continue;
        }
        match factory.create(name, provider_config) {
            Ok(provider) => registry.register(provider),
            Err(e) if !referenced.contains(name.as_str()) => {
                warn!(provider = %name, error = %e, "Unused provider skipped");
            }
            Err(e) => return Err(e.into()),
        }
    }
    for provider in injected {
        registry.register(provider);
    }

    if let Some(missing) = referenced.iter().find(|name| !registry.contains(name)) {
        return Err(ServiceError::UnknownProvider(missing.to_string()));
    }

    info!(providers = ?registry.names(), "Provider registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderConfig, SyntheticProvider};

    #[test]
    fn test_registry_requires_referenced_providers() {
        let mut config = ConfigFile::default();
        config.provider.preferred = "sentinel".to_string();
        let policies = config.tenant_policies();

        let err = create_registry(&config, &policies, Vec::new()).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownProvider(name) if name == "sentinel"));
    }

    #[test]
    fn test_injected_provider_replaces_configured() {
        let mut config = ConfigFile::default();
        config
            .provider
            .providers
            .insert("sentinel".to_string(), ProviderConfig::sentinel_hub(""));
        config.provider.preferred = "sentinel".to_string();
        let policies = config.tenant_policies();

        let injected: Arc<dyn ImageryProvider> = Arc::new(SyntheticProvider::new("sentinel"));
        let registry = create_registry(&config, &policies, vec![injected]).unwrap();
        assert!(registry.contains("sentinel"));
        assert!(registry.contains("synthetic"));
    }

    #[test]
    fn test_unreferenced_broken_provider_is_skipped() {
        let mut config = ConfigFile::default();
        config
            .provider
            .providers
            .insert("spare".to_string(), ProviderConfig::raster_endpoint("http://x", ""));
        let policies = config.tenant_policies();

        let registry = create_registry(&config, &policies, Vec::new()).unwrap();
        assert!(!registry.contains("spare"));
    }

    #[test]
    fn test_grid_generated_from_regions() {
        let mut config = ConfigFile::default();
        config.grid.regions = vec![crate::coord::BoundingBox::new(1.0, 44.0, 1.1, 44.1)];
        let grid = create_grid(&config).unwrap();
        assert!(!grid.is_empty());
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let err = FieldLayerServiceBuilder::new(ConfigFile::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::RuntimeError(_)));
    }
}
