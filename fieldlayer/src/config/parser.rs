//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::{ConfigFile, TenantSection};
use crate::coord::{BoundingBox, MAX_ZOOM};
use crate::provider::{ProviderConfig, SENTINEL_HUB_DEFAULT_URL};

const PROVIDER_PREFIX: &str = "provider.";
const TENANT_PREFIX: &str = "tenant.";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [grid] section
    if let Some(section) = ini.section(Some("grid")) {
        if let Some(v) = section.get("zoom") {
            let zoom: u8 = parse_value("grid", "zoom", v, "must be an integer zoom level")?;
            if zoom > MAX_ZOOM {
                return Err(invalid("grid", "zoom", v, &format!("must be at most {}", MAX_ZOOM)));
            }
            config.grid.zoom = zoom;
        }
        if let Some(v) = section.get("regions") {
            config.grid.regions = v
                .split('|')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(|r| parse_bbox("grid", "regions", r))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = section.get("max_tiles") {
            config.grid.max_tiles = parse_positive("grid", "max_tiles", v)?;
        }
    }

    // [cluster] section
    if let Some(section) = ini.section(Some("cluster")) {
        if let Some(v) = section.get("cell_size_deg") {
            config.cluster.cell_size_deg = parse_positive_f64("cluster", "cell_size_deg", v)?;
        }
        if let Some(v) = section.get("max_area_km2") {
            config.cluster.max_area_km2 = parse_positive_f64("cluster", "max_area_km2", v)?;
        }
        if let Some(v) = section.get("max_lands") {
            config.cluster.max_lands = parse_positive("cluster", "max_lands", v)?;
        }
        if let Some(v) = section.get("schedule_interval") {
            config.cluster.schedule_interval_secs =
                parse_positive("cluster", "schedule_interval", v)?;
        }
    }

    // [queue] section
    if let Some(section) = ini.section(Some("queue")) {
        if let Some(v) = section.get("max_retries") {
            config.queue.max_retries =
                parse_value("queue", "max_retries", v, "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("base_delay") {
            config.queue.base_delay_secs = parse_positive("queue", "base_delay", v)?;
        }
        if let Some(v) = section.get("max_delay") {
            config.queue.max_delay_secs = parse_positive("queue", "max_delay", v)?;
        }
        if let Some(v) = section.get("claim_timeout") {
            config.queue.claim_timeout_secs = parse_positive("queue", "claim_timeout", v)?;
        }
        if let Some(v) = section.get("reaper_interval") {
            config.queue.reaper_interval_secs = parse_positive("queue", "reaper_interval", v)?;
        }
        if let Some(v) = section.get("finished_retention") {
            config.queue.finished_retention_secs =
                parse_positive("queue", "finished_retention", v)?;
        }
        if let Some(v) = section.get("snapshot") {
            config.queue.snapshot = optional_path(v);
        }
        if config.queue.base_delay_secs > config.queue.max_delay_secs {
            return Err(invalid(
                "queue",
                "base_delay",
                &config.queue.base_delay_secs.to_string(),
                "must not exceed max_delay",
            ));
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        if let Some(v) = section.get("count") {
            config.workers.count = parse_positive("workers", "count", v)?;
        }
        if let Some(v) = section.get("heartbeat_interval") {
            config.workers.heartbeat_secs = parse_positive("workers", "heartbeat_interval", v)?;
        }
        if let Some(v) = section.get("resolution_m") {
            config.workers.resolution_m = parse_positive_f64("workers", "resolution_m", v)?;
        }
        if let Some(v) = section.get("max_pixels") {
            config.workers.max_pixels = parse_positive("workers", "max_pixels", v)?;
        }
        if let Some(v) = section.get("search_window_days") {
            config.workers.search_window_days = parse_value(
                "workers",
                "search_window_days",
                v,
                "must be a non-negative integer (days)",
            )?;
            if config.workers.search_window_days < 0 {
                return Err(invalid(
                    "workers",
                    "search_window_days",
                    v,
                    "must be a non-negative integer (days)",
                ));
            }
        }
    }

    // [provider] section
    if let Some(section) = ini.section(Some("provider")) {
        if let Some(v) = optional_string(section.get("preferred")) {
            config.provider.preferred = v;
        }
        if let Some(v) = section.get("secondary") {
            config.provider.secondary = optional_string(Some(v));
        }
        if let Some(v) = section.get("fallback") {
            config.provider.fallback = parse_bool("provider", "fallback", v)?;
        }
        if let Some(v) = section.get("timeout") {
            config.provider.timeout_secs = parse_positive("provider", "timeout", v)?;
        }
    }

    // [quota] section
    if let Some(section) = ini.section(Some("quota")) {
        if let Some(v) = section.get("daily_processing_units") {
            config.quota.daily_processing_units =
                parse_optional_budget("quota", "daily_processing_units", v)?;
        }
    }

    // [pipeline] section
    if let Some(section) = ini.section(Some("pipeline")) {
        if let Some(v) = section.get("index") {
            config.pipeline.index = v
                .parse()
                .map_err(|reason: String| invalid("pipeline", "index", v, &reason))?;
        }
        if let Some(v) = section.get("cloud_threshold") {
            config.pipeline.cloud_threshold =
                parse_fraction("pipeline", "cloud_threshold", v)? as f32;
        }
        if let Some(v) = section.get("min_valid_fraction") {
            config.pipeline.min_valid_fraction = parse_fraction("pipeline", "min_valid_fraction", v)?;
        }
        if let Some(v) = section.get("vegetation_threshold") {
            let t: f64 = parse_value("pipeline", "vegetation_threshold", v, "must be a number")?;
            if !(-1.0..=1.0).contains(&t) {
                return Err(invalid(
                    "pipeline",
                    "vegetation_threshold",
                    v,
                    "must be between -1 and 1",
                ));
            }
            config.pipeline.vegetation_threshold = t;
        }
        if let Some(v) = section.get("thumbnail_dir") {
            config.pipeline.thumbnail_dir = optional_path(v);
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("clear_ttl_days") {
            config.cache.clear_ttl_days = parse_positive("cache", "clear_ttl_days", v)?;
        }
        if let Some(v) = section.get("cloudy_ttl_days") {
            config.cache.cloudy_ttl_days = parse_positive("cache", "cloudy_ttl_days", v)?;
        }
        if let Some(v) = section.get("cloudy_threshold_pct") {
            let pct: f64 = parse_value("cache", "cloudy_threshold_pct", v, "must be a percentage")?;
            if !(0.0..=100.0).contains(&pct) {
                return Err(invalid(
                    "cache",
                    "cloudy_threshold_pct",
                    v,
                    "must be between 0 and 100",
                ));
            }
            config.cache.cloudy_threshold_pct = pct;
        }
        if let Some(v) = section.get("eviction_grace_hours") {
            config.cache.eviction_grace_hours = parse_value(
                "cache",
                "eviction_grace_hours",
                v,
                "must be a non-negative integer (hours)",
            )?;
        }
        if let Some(v) = section.get("pending_timeout_hours") {
            config.cache.pending_timeout_hours =
                parse_positive("cache", "pending_timeout_hours", v)?;
        }
        if let Some(v) = section.get("sweep_interval") {
            config.cache.sweep_interval_secs = parse_positive("cache", "sweep_interval", v)?;
        }
    }

    // [ledger] section
    if let Some(section) = ini.section(Some("ledger")) {
        if let Some(v) = section.get("file") {
            config.ledger.file = optional_path(v);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            if let Some(dir) = optional_path(v) {
                config.logging.directory = dir;
            }
        }
        if let Some(v) = optional_string(section.get("file")) {
            config.logging.file = v;
        }
        if let Some(v) = optional_string(section.get("level")) {
            config.logging.level = v;
        }
    }

    // [provider.<name>] and [tenant.<id>] sections
    for (name, props) in ini.iter() {
        let Some(name) = name else { continue };
        if let Some(provider) = name.strip_prefix(PROVIDER_PREFIX) {
            let parsed = parse_provider(name, props)?;
            config.provider.providers.insert(provider.to_string(), parsed);
        } else if let Some(tenant) = name.strip_prefix(TENANT_PREFIX) {
            config
                .tenants
                .insert(tenant.to_string(), parse_tenant(name, props)?);
        }
    }

    validate_provider_references(&config)?;
    Ok(config)
}

fn parse_provider(section: &str, props: &Properties) -> Result<ProviderConfig, ConfigFileError> {
    let kind = props
        .get("type")
        .map(|v| v.trim().to_lowercase())
        .ok_or_else(|| invalid(section, "type", "", "is required"))?;

    match kind.as_str() {
        "sentinel_hub" => Ok(ProviderConfig::SentinelHub {
            endpoint: optional_string(props.get("endpoint"))
                .unwrap_or_else(|| SENTINEL_HUB_DEFAULT_URL.to_string()),
            token: props.get("token").unwrap_or("").trim().to_string(),
            cost_per_unit: parse_or(section, "cost_per_unit", props.get("cost_per_unit"), 0.0)?,
        }),
        "raster" => Ok(ProviderConfig::RasterEndpoint {
            base_url: optional_string(props.get("base_url"))
                .ok_or_else(|| invalid(section, "base_url", "", "is required for raster providers"))?,
            api_key: props.get("api_key").unwrap_or("").trim().to_string(),
            cost_per_request: parse_or(
                section,
                "cost_per_request",
                props.get("cost_per_request"),
                0.0,
            )?,
        }),
        "synthetic" => Ok(ProviderConfig::Synthetic {
            ndvi: parse_or(section, "ndvi", props.get("ndvi"), 0.6)?,
            cloud_cover_pct: parse_or(section, "cloud_cover_pct", props.get("cloud_cover_pct"), 0.0)?,
            units_per_call: parse_or(section, "units_per_call", props.get("units_per_call"), 1.0)?,
        }),
        _ => Err(invalid(
            section,
            "type",
            &kind,
            "must be one of: sentinel_hub, raster, synthetic",
        )),
    }
}

fn parse_tenant(section: &str, props: &Properties) -> Result<TenantSection, ConfigFileError> {
    Ok(TenantSection {
        preferred: optional_string(props.get("preferred")),
        secondary: optional_string(props.get("secondary")),
        fallback: props
            .get("fallback")
            .map(|v| parse_bool(section, "fallback", v))
            .transpose()?,
        daily_processing_units: match props.get("daily_processing_units") {
            Some(v) => parse_optional_budget(section, "daily_processing_units", v)?,
            None => None,
        },
    })
}

/// Every provider a chain names must be defined.
fn validate_provider_references(config: &ConfigFile) -> Result<(), ConfigFileError> {
    let defined = &config.provider.providers;
    let check = |section: &str, key: &str, name: &str| {
        if defined.contains_key(name) {
            Ok(())
        } else {
            Err(invalid(
                section,
                key,
                name,
                &format!("no [provider.{}] section defines it", name),
            ))
        }
    };

    check("provider", "preferred", &config.provider.preferred)?;
    if let Some(secondary) = &config.provider.secondary {
        check("provider", "secondary", secondary)?;
    }
    for (id, tenant) in &config.tenants {
        let section = format!("{}{}", TENANT_PREFIX, id);
        if let Some(p) = &tenant.preferred {
            check(&section, "preferred", p)?;
        }
        if let Some(s) = &tenant.secondary {
            check(&section, "secondary", s)?;
        }
    }
    Ok(())
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_or<T: FromStr>(
    section: &str,
    key: &str,
    value: Option<&str>,
    default: T,
) -> Result<T, ConfigFileError> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_value(section, key, v, "must be a number"),
        _ => Ok(default),
    }
}

/// Parses an integer that must be greater than zero.
fn parse_positive<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    let parsed: T = parse_value(section, key, value, "must be a positive integer")?;
    if parsed <= T::default() {
        return Err(invalid(section, key, value, "must be a positive integer"));
    }
    Ok(parsed)
}

fn parse_positive_f64(section: &str, key: &str, value: &str) -> Result<f64, ConfigFileError> {
    let parsed: f64 = parse_value(section, key, value, "must be a positive number")?;
    if !(parsed.is_finite() && parsed > 0.0) {
        return Err(invalid(section, key, value, "must be a positive number"));
    }
    Ok(parsed)
}

fn parse_fraction(section: &str, key: &str, value: &str) -> Result<f64, ConfigFileError> {
    let parsed: f64 = parse_value(section, key, value, "must be a number between 0 and 1")?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(invalid(section, key, value, "must be a number between 0 and 1"));
    }
    Ok(parsed)
}

/// Empty means unlimited.
fn parse_optional_budget(
    section: &str,
    key: &str,
    value: &str,
) -> Result<Option<f64>, ConfigFileError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    let budget: f64 = parse_value(section, key, value, "must be a non-negative number")?;
    if !(budget.is_finite() && budget >= 0.0) {
        return Err(invalid(section, key, value, "must be a non-negative number"));
    }
    Ok(Some(budget))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

/// `west,south,east,north` in degrees.
fn parse_bbox(section: &str, key: &str, value: &str) -> Result<BoundingBox, ConfigFileError> {
    let reason = "expected 'west,south,east,north' in degrees";
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid(section, key, value, reason))?;
    match parts.as_slice() {
        &[west, south, east, north] if west < east && south < north => {
            Ok(BoundingBox::new(west, south, east, north))
        }
        _ => Err(invalid(section, key, value, reason)),
    }
}

fn optional_string(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let v = value.trim();
    (!v.is_empty()).then(|| expand_tilde(v))
}

/// Expand `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
