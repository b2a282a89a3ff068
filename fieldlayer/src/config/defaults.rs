//! Default values and constants for all configuration settings.
//!
//! Component defaults live with their components; this module gathers the
//! ones that only exist at the configuration level and implements
//! `ConfigFile::default()`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::settings::*;
use crate::cache::{
    DEFAULT_CLEAR_TTL_DAYS, DEFAULT_CLOUDY_TTL_DAYS, DEFAULT_EVICTION_GRACE_HOURS,
    DEFAULT_PENDING_TIMEOUT_HOURS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::cluster::{ClusterSettings, DEFAULT_SCHEDULE_INTERVAL_SECS};
use crate::compute::{
    IndexKind, DEFAULT_CLOUDY_SCENE_PCT, DEFAULT_CLOUD_THRESHOLD, DEFAULT_MIN_VALID_FRACTION,
    DEFAULT_VEGETATION_THRESHOLD,
};
use crate::grid::DEFAULT_MAX_TILES;
use crate::logging::{default_log_dir, default_log_file};
use crate::provider::ProviderConfig;
use crate::queue::{
    DEFAULT_BASE_DELAY_SECS, DEFAULT_CLAIM_TIMEOUT_SECS, DEFAULT_FINISHED_RETENTION_SECS,
    DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES, DEFAULT_REAPER_INTERVAL_SECS,
};
use crate::worker::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_MAX_PIXELS, DEFAULT_RESOLUTION_M,
    DEFAULT_SEARCH_WINDOW_DAYS, DEFAULT_WORKER_COUNT,
};

/// Grid zoom level. Zoom 12 tiles are roughly 10 km across at the equator.
pub const DEFAULT_GRID_ZOOM: u8 = 12;

/// Name of the provider defined out of the box.
pub const DEFAULT_PROVIDER_NAME: &str = "synthetic";

/// HTTP timeout for provider calls, in seconds.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

impl Default for ConfigFile {
    fn default() -> Self {
        let cluster = ClusterSettings::default();
        let mut providers = BTreeMap::new();
        providers.insert(DEFAULT_PROVIDER_NAME.to_string(), ProviderConfig::synthetic());

        Self {
            grid: GridSection {
                zoom: DEFAULT_GRID_ZOOM,
                regions: Vec::new(),
                max_tiles: DEFAULT_MAX_TILES,
            },
            cluster: ClusterSection {
                cell_size_deg: cluster.cell_size_deg,
                max_area_km2: cluster.max_area_km2,
                max_lands: cluster.max_lands,
                schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            },
            queue: QueueSection {
                max_retries: DEFAULT_MAX_RETRIES,
                base_delay_secs: DEFAULT_BASE_DELAY_SECS,
                max_delay_secs: DEFAULT_MAX_DELAY_SECS,
                claim_timeout_secs: DEFAULT_CLAIM_TIMEOUT_SECS,
                reaper_interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
                finished_retention_secs: DEFAULT_FINISHED_RETENTION_SECS,
                snapshot: None,
            },
            workers: WorkersSection {
                count: DEFAULT_WORKER_COUNT,
                heartbeat_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
                resolution_m: DEFAULT_RESOLUTION_M,
                max_pixels: DEFAULT_MAX_PIXELS,
                search_window_days: DEFAULT_SEARCH_WINDOW_DAYS,
            },
            provider: ProviderSection {
                preferred: DEFAULT_PROVIDER_NAME.to_string(),
                secondary: None,
                fallback: false,
                timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
                providers,
            },
            quota: QuotaSection::default(),
            pipeline: PipelineSection {
                index: IndexKind::Ndvi,
                cloud_threshold: DEFAULT_CLOUD_THRESHOLD,
                min_valid_fraction: DEFAULT_MIN_VALID_FRACTION,
                vegetation_threshold: DEFAULT_VEGETATION_THRESHOLD,
                thumbnail_dir: None,
            },
            cache: CacheSection {
                clear_ttl_days: DEFAULT_CLEAR_TTL_DAYS,
                cloudy_ttl_days: DEFAULT_CLOUDY_TTL_DAYS,
                cloudy_threshold_pct: DEFAULT_CLOUDY_SCENE_PCT,
                eviction_grace_hours: DEFAULT_EVICTION_GRACE_HOURS,
                pending_timeout_hours: DEFAULT_PENDING_TIMEOUT_HOURS,
                sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            },
            ledger: LedgerSection::default(),
            logging: LoggingSection {
                directory: default_log_dir(),
                file: default_log_file().to_string(),
                level: DEFAULT_LOG_LEVEL.to_string(),
            },
            tenants: BTreeMap::new(),
        }
    }
}

/// Default snapshot path for the queue: `~/.fieldlayer/queue.json`.
pub fn default_queue_snapshot_path() -> PathBuf {
    super::file::config_directory().join("queue.json")
}

/// Default ledger path: `~/.fieldlayer/ledger.jsonl`.
pub fn default_ledger_path() -> PathBuf {
    super::file::config_directory().join("ledger.jsonl")
}
