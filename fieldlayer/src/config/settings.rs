//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file and knows
//! how to turn itself into the runtime type the matching component takes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::cache::TtlPolicy;
use crate::cluster::ClusterSettings;
use crate::compute::{HealthWeights, IndexKind, PipelineSettings};
use crate::coord::BoundingBox;
use crate::ids::TenantId;
use crate::provider::{ProviderConfig, TenantPolicies, TenantPolicy};
use crate::queue::RetryPolicy;
use crate::worker::WorkerSettings;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub grid: GridSection,
    pub cluster: ClusterSection,
    pub queue: QueueSection,
    pub workers: WorkersSection,
    pub provider: ProviderSection,
    pub quota: QuotaSection,
    pub pipeline: PipelineSection,
    pub cache: CacheSection,
    pub ledger: LedgerSection,
    pub logging: LoggingSection,
    /// `[tenant.<id>]` overrides, keyed by tenant ID.
    pub tenants: BTreeMap<String, TenantSection>,
}

/// Tile grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSection {
    pub zoom: u8,
    /// Agricultural regions to generate tiles for. Empty means the regions
    /// are derived from the registered lands.
    pub regions: Vec<BoundingBox>,
    pub max_tiles: usize,
}

/// Cluster builder and scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSection {
    pub cell_size_deg: f64,
    pub max_area_km2: f64,
    pub max_lands: usize,
    /// Seconds between scheduled cluster passes.
    pub schedule_interval_secs: u64,
}

/// Acquisition queue, retry policy and reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSection {
    pub max_retries: u32,
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
    /// Seconds without a heartbeat before a claim is reaped.
    pub claim_timeout_secs: i64,
    pub reaper_interval_secs: u64,
    /// Seconds finished entries are kept before pruning.
    pub finished_retention_secs: i64,
    /// JSON snapshot restored on start and written on shutdown.
    pub snapshot: Option<PathBuf>,
}

/// Worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkersSection {
    pub count: usize,
    pub heartbeat_secs: u64,
    pub resolution_m: f64,
    pub max_pixels: u32,
    pub search_window_days: i64,
}

/// Default provider chain and named provider definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSection {
    pub preferred: String,
    pub secondary: Option<String>,
    pub fallback: bool,
    /// HTTP timeout for provider calls, in seconds.
    pub timeout_secs: u64,
    /// `[provider.<name>]` definitions.
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Default per-tenant daily budget.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuotaSection {
    /// Processing units per tenant per day; `None` is unlimited.
    pub daily_processing_units: Option<f64>,
}

/// Index computation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSection {
    pub index: IndexKind,
    pub cloud_threshold: f32,
    pub min_valid_fraction: f64,
    pub vegetation_threshold: f64,
    /// Render per-land thumbnails into this directory when set.
    pub thumbnail_dir: Option<PathBuf>,
}

/// Cache expiry and eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSection {
    pub clear_ttl_days: i64,
    pub cloudy_ttl_days: i64,
    /// Scene cloud cover, in percent, above which a value counts as cloudy.
    pub cloudy_threshold_pct: f64,
    pub eviction_grace_hours: i64,
    pub pending_timeout_hours: i64,
    pub sweep_interval_secs: u64,
}

/// Processing ledger.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerSection {
    /// JSONL file the ledger appends to; in memory only when unset.
    pub file: Option<PathBuf>,
}

/// Logging.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSection {
    pub directory: PathBuf,
    pub file: String,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

/// Per-tenant overrides of the provider chain and budget.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TenantSection {
    pub preferred: Option<String>,
    pub secondary: Option<String>,
    pub fallback: Option<bool>,
    pub daily_processing_units: Option<f64>,
}

impl ClusterSection {
    pub fn settings(&self) -> ClusterSettings {
        ClusterSettings {
            cell_size_deg: self.cell_size_deg,
            max_area_km2: self.max_area_km2,
            max_lands: self.max_lands,
        }
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }
}

impl QueueSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            ChronoDuration::seconds(self.base_delay_secs),
            ChronoDuration::seconds(self.max_delay_secs),
        )
    }

    pub fn claim_timeout(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.claim_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn finished_retention(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.finished_retention_secs)
    }
}

impl WorkersSection {
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            count: self.count,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            resolution_m: self.resolution_m,
            max_pixels: self.max_pixels,
            search_window_days: self.search_window_days,
        }
    }
}

impl CacheSection {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            ChronoDuration::days(self.clear_ttl_days),
            ChronoDuration::days(self.cloudy_ttl_days),
        )
        .with_cloudy_threshold(self.cloudy_threshold_pct)
    }

    pub fn eviction_grace(&self) -> ChronoDuration {
        ChronoDuration::hours(self.eviction_grace_hours)
    }

    pub fn pending_timeout(&self) -> ChronoDuration {
        ChronoDuration::hours(self.pending_timeout_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ConfigFile {
    /// Pipeline settings, sharing the cache's cloudy threshold.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            index: self.pipeline.index,
            cloud_threshold: self.pipeline.cloud_threshold,
            min_valid_fraction: self.pipeline.min_valid_fraction,
            vegetation_threshold: self.pipeline.vegetation_threshold,
            weights: HealthWeights::default(),
            cloudy_scene_pct: self.cache.cloudy_threshold_pct,
            thumbnail_dir: self.pipeline.thumbnail_dir.clone(),
        }
    }

    /// Provider chains and budgets for every tenant.
    pub fn tenant_policies(&self) -> TenantPolicies {
        let default = TenantPolicy {
            preferred: self.provider.preferred.clone(),
            secondary: self.provider.secondary.clone(),
            fallback_enabled: self.provider.fallback && self.provider.secondary.is_some(),
            daily_budget: self.quota.daily_processing_units,
        };

        self.tenants
            .iter()
            .fold(TenantPolicies::new(default.clone()), |policies, (id, t)| {
                let secondary = t.secondary.clone().or_else(|| default.secondary.clone());
                let fallback = t.fallback.unwrap_or(self.provider.fallback) && secondary.is_some();
                let policy = TenantPolicy {
                    preferred: t.preferred.clone().unwrap_or_else(|| default.preferred.clone()),
                    secondary,
                    fallback_enabled: fallback,
                    daily_budget: t.daily_processing_units.or(default.daily_budget),
                };
                policies.with_tenant(TenantId::new(id.as_str()), policy)
            })
    }
}
