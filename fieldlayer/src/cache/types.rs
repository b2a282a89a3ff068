//! Core cache types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::NdviRecord;
use crate::ids::{LandId, TenantId};

/// Cached index summary for one land on one acquisition date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub land_id: LandId,
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub health_score: f64,
    pub thumbnail_url: Option<String>,
    pub cloud_cover_pct: f64,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// True when no thumbnail was rendered for this value.
    pub statistics_only: bool,
    /// Access count observed by the previous sweep.
    #[serde(skip)]
    pub(crate) swept_access_count: u64,
}

impl CacheEntry {
    /// Builds an entry from a pipeline record, expiring at `expires_at`.
    pub fn from_record(record: &NdviRecord, expires_at: DateTime<Utc>) -> Self {
        Self {
            land_id: record.land_id.clone(),
            tenant_id: record.tenant_id.clone(),
            date: record.date,
            mean: record.stats.mean,
            min: record.stats.min,
            max: record.stats.max,
            health_score: record.health_score,
            thumbnail_url: record.thumbnail.clone(),
            cloud_cover_pct: record.cloud_cover_pct,
            computed_at: record.computed_at,
            expires_at,
            access_count: 0,
            last_accessed_at: None,
            statistics_only: record.thumbnail.is_none(),
            swept_access_count: 0,
        }
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A fresh value.
    Hit(CacheEntry),
    /// A value still inside its TTL whose land has a refresh outstanding.
    /// A background refresh has been scheduled.
    Stale(CacheEntry),
    /// Nothing usable. A background refresh has been scheduled.
    Miss,
}

impl CacheLookup {
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            CacheLookup::Hit(e) | CacheLookup::Stale(e) => Some(e),
            CacheLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }
}

/// Hook the cache calls to get a land refreshed in the background.
pub trait RefreshTrigger: Send + Sync {
    /// Requests a refresh for `land`.
    ///
    /// Returns `false` when the land is unknown and nothing was scheduled.
    fn schedule_refresh(&self, land: &LandId) -> bool;

    /// Whether `land` already has a refresh requested outside the cache.
    fn needs_refresh(&self, _land: &LandId) -> bool {
        false
    }
}

/// Trigger that schedules nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

impl RefreshTrigger for NoRefresh {
    fn schedule_refresh(&self, _land: &LandId) -> bool {
        false
    }
}
