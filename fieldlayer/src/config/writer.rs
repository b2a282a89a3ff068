//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::fmt::Write as _;
use std::path::Path;

use super::settings::{ConfigFile, TenantSection};
use crate::coord::BoundingBox;
use crate::provider::ProviderConfig;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let regions = config
        .grid
        .regions
        .iter()
        .map(bbox_to_string)
        .collect::<Vec<_>>()
        .join(" | ");
    let snapshot = optional_path(config.queue.snapshot.as_deref());
    let secondary = config.provider.secondary.as_deref().unwrap_or("");
    let daily_units = optional_number(config.quota.daily_processing_units);
    let thumbnail_dir = optional_path(config.pipeline.thumbnail_dir.as_deref());
    let ledger_file = optional_path(config.ledger.file.as_deref());

    let mut out = format!(
        r#"[grid]
; Tile grid zoom level (0-18). Zoom 12 tiles are roughly 10 km across.
zoom = {}
; Agricultural regions as west,south,east,north, separated by '|'.
; Leave empty to derive the regions from registered lands.
regions = {}
; Upper bound on generated tiles per run
max_tiles = {}

[cluster]
; Grid cell size, in degrees, used to group nearby lands
cell_size_deg = {}
; Maximum cluster bounding box area, in square kilometres
max_area_km2 = {}
; Maximum lands per cluster
max_lands = {}
; Seconds between scheduled cluster passes
schedule_interval = {}

[queue]
; Attempts before an entry fails permanently
max_retries = {}
; Retry backoff: base and cap, in seconds
base_delay = {}
max_delay = {}
; Seconds without a heartbeat before a claimed entry is requeued
claim_timeout = {}
; Seconds between reaper passes
reaper_interval = {}
; Seconds finished entries are kept for inspection
finished_retention = {}
; JSON snapshot restored on start and written on shutdown (empty = none)
snapshot = {}

[workers]
; Concurrent acquisition workers
count = {}
; Seconds between worker heartbeats
heartbeat_interval = {}
; Requested ground resolution, in metres per pixel
resolution_m = {}
; Raster edge length cap, in pixels
max_pixels = {}
; Days before the target date to search for imagery
search_window_days = {}

[provider]
; Default provider chain. Names refer to [provider.<name>] sections below.
preferred = {}
secondary = {}
; Try the secondary provider when the preferred one is rate limited,
; rejects credentials, or has no coverage
fallback = {}
; HTTP timeout for provider calls, in seconds
timeout = {}

[quota]
; Processing units each tenant may spend per day (empty = unlimited)
daily_processing_units = {}

[pipeline]
; Primary vegetation index: ndvi, savi or evi2
index = {}
; Per-pixel cloud probability above which a pixel is masked (0-1)
cloud_threshold = {}
; Minimum fraction of valid pixels for a land to be scored (0-1)
min_valid_fraction = {}
; Index value above which a pixel counts as vegetated
vegetation_threshold = {}
; Directory for per-land PNG thumbnails (empty = no thumbnails)
thumbnail_dir = {}

[cache]
; Days a cached value stays fresh for clear and cloudy scenes
clear_ttl_days = {}
cloudy_ttl_days = {}
; Scene cloud cover, in percent, above which a value counts as cloudy
cloudy_threshold_pct = {}
; Hours an expired entry is kept before eviction
eviction_grace_hours = {}
; Hours after which an unanswered refresh request may be re-sent
pending_timeout_hours = {}
; Seconds between eviction sweeps
sweep_interval = {}

[ledger]
; JSONL file the processing ledger appends to (empty = in memory only)
file = {}

[logging]
directory = {}
file = {}
; Default filter when RUST_LOG is unset (e.g. info, fieldlayer=debug)
level = {}
"#,
        config.grid.zoom,
        regions,
        config.grid.max_tiles,
        config.cluster.cell_size_deg,
        config.cluster.max_area_km2,
        config.cluster.max_lands,
        config.cluster.schedule_interval_secs,
        config.queue.max_retries,
        config.queue.base_delay_secs,
        config.queue.max_delay_secs,
        config.queue.claim_timeout_secs,
        config.queue.reaper_interval_secs,
        config.queue.finished_retention_secs,
        snapshot,
        config.workers.count,
        config.workers.heartbeat_secs,
        config.workers.resolution_m,
        config.workers.max_pixels,
        config.workers.search_window_days,
        config.provider.preferred,
        secondary,
        config.provider.fallback,
        config.provider.timeout_secs,
        daily_units,
        config.pipeline.index,
        config.pipeline.cloud_threshold,
        config.pipeline.min_valid_fraction,
        config.pipeline.vegetation_threshold,
        thumbnail_dir,
        config.cache.clear_ttl_days,
        config.cache.cloudy_ttl_days,
        config.cache.cloudy_threshold_pct,
        config.cache.eviction_grace_hours,
        config.cache.pending_timeout_hours,
        config.cache.sweep_interval_secs,
        ledger_file,
        path_to_string(&config.logging.directory),
        config.logging.file,
        config.logging.level,
    );

    for (name, provider) in &config.provider.providers {
        write_provider(&mut out, name, provider);
    }
    for (id, tenant) in &config.tenants {
        write_tenant(&mut out, id, tenant);
    }

    out
}

fn write_provider(out: &mut String, name: &str, provider: &ProviderConfig) {
    let _ = writeln!(out, "\n[provider.{}]", name);
    let _ = writeln!(out, "type = {}", provider.kind());
    match provider {
        ProviderConfig::SentinelHub {
            endpoint,
            token,
            cost_per_unit,
        } => {
            let _ = writeln!(out, "endpoint = {}", endpoint);
            let _ = writeln!(out, "; OAuth bearer token");
            let _ = writeln!(out, "token = {}", token);
            let _ = writeln!(out, "cost_per_unit = {}", cost_per_unit);
        }
        ProviderConfig::RasterEndpoint {
            base_url,
            api_key,
            cost_per_request,
        } => {
            let _ = writeln!(out, "base_url = {}", base_url);
            let _ = writeln!(out, "api_key = {}", api_key);
            let _ = writeln!(out, "cost_per_request = {}", cost_per_request);
        }
        ProviderConfig::Synthetic {
            ndvi,
            cloud_cover_pct,
            units_per_call,
        } => {
            let _ = writeln!(out, "; Offline imagery with a constant index value");
            let _ = writeln!(out, "ndvi = {}", ndvi);
            let _ = writeln!(out, "cloud_cover_pct = {}", cloud_cover_pct);
            let _ = writeln!(out, "units_per_call = {}", units_per_call);
        }
    }
}

fn write_tenant(out: &mut String, id: &str, tenant: &TenantSection) {
    let _ = writeln!(out, "\n[tenant.{}]", id);
    if let Some(p) = &tenant.preferred {
        let _ = writeln!(out, "preferred = {}", p);
    }
    if let Some(s) = &tenant.secondary {
        let _ = writeln!(out, "secondary = {}", s);
    }
    if let Some(f) = tenant.fallback {
        let _ = writeln!(out, "fallback = {}", f);
    }
    if let Some(units) = tenant.daily_processing_units {
        let _ = writeln!(out, "daily_processing_units = {}", units);
    }
}

fn bbox_to_string(bbox: &BoundingBox) -> String {
    format!("{},{},{},{}", bbox.west, bbox.south, bbox.east, bbox.north)
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn optional_path(path: Option<&Path>) -> String {
    path.map(path_to_string).unwrap_or_default()
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
