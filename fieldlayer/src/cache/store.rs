//! In-memory NDVI cache.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::stats::{CacheCounters, CacheStats};
use super::ttl::TtlPolicy;
use super::types::{CacheEntry, CacheLookup, NoRefresh, RefreshTrigger};
use crate::compute::NdviRecord;
use crate::ids::LandId;
use crate::time::{start_of_day, Clock};

/// Default time an expired, unread entry is kept before eviction (24 hours).
pub const DEFAULT_EVICTION_GRACE_HOURS: i64 = 24;

/// Default time after which an unanswered refresh may be scheduled again (6 hours).
pub const DEFAULT_PENDING_TIMEOUT_HOURS: i64 = 6;

/// Entries evicted by one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evicted: Vec<(LandId, NaiveDate)>,
    /// Expired entries kept because they were read since the last sweep.
    pub retained_expired: usize,
}

/// Per-land, per-date cache of index summaries.
///
/// Reads never compute. A miss, or a hit on a land flagged for refresh,
/// hands the land to the [`RefreshTrigger`] exactly once until the refresh
/// lands through [`NdviCache::put`] or is abandoned through
/// [`NdviCache::clear_pending`].
pub struct NdviCache {
    entries: DashMap<LandId, BTreeMap<NaiveDate, CacheEntry>>,
    /// Lands with a refresh in flight, and when it was scheduled.
    pending: DashMap<LandId, DateTime<Utc>>,
    trigger: Arc<dyn RefreshTrigger>,
    ttl: TtlPolicy,
    grace: Duration,
    pending_timeout: Duration,
    counters: CacheCounters,
    clock: Arc<dyn Clock>,
}

impl NdviCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            pending: DashMap::new(),
            trigger: Arc::new(NoRefresh),
            ttl: TtlPolicy::default(),
            grace: Duration::hours(DEFAULT_EVICTION_GRACE_HOURS),
            pending_timeout: Duration::hours(DEFAULT_PENDING_TIMEOUT_HOURS),
            counters: CacheCounters::default(),
            clock,
        }
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn RefreshTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Reads the most recent unexpired value for `land`.
    ///
    /// With a `date`, only values acquired on or before it are considered
    /// and expiry is judged at the later of now and the start of that day.
    pub fn get(&self, land: &LandId, date: Option<NaiveDate>) -> CacheLookup {
        let now = self.clock.now();
        let at = date.map_or(now, |d| now.max(start_of_day(d)));
        let upper = date.map_or(Bound::Unbounded, Bound::Included);

        let found = self.entries.get_mut(land).and_then(|mut dates| {
            let entry = dates
                .range_mut((Bound::Unbounded, upper))
                .rev()
                .map(|(_, e)| e)
                .find(|e| !e.is_expired_at(at))?;
            entry.access_count += 1;
            entry.last_accessed_at = Some(now);
            Some(entry.clone())
        });

        match found {
            Some(entry) if self.trigger.needs_refresh(land) => {
                self.counters.stale();
                trace!(land = %land, date = %entry.date, "Cache stale hit");
                self.request_refresh(land);
                CacheLookup::Stale(entry)
            }
            Some(entry) => {
                self.counters.hit();
                trace!(land = %land, date = %entry.date, "Cache hit");
                CacheLookup::Hit(entry)
            }
            None => {
                self.counters.miss();
                trace!(land = %land, at = %at, "Cache miss");
                self.request_refresh(land);
                CacheLookup::Miss
            }
        }
    }

    /// Reads an exact entry without counting an access.
    pub fn peek(&self, land: &LandId, date: NaiveDate) -> Option<CacheEntry> {
        self.entries
            .get(land)
            .and_then(|dates| dates.get(&date).cloned())
    }

    /// Every entry held for `land`, oldest date first.
    pub fn entries_for(&self, land: &LandId) -> Vec<CacheEntry> {
        self.entries
            .get(land)
            .map(|dates| dates.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Schedules a background refresh for `land` unless one is already in
    /// flight.
    ///
    /// Returns `true` when this call scheduled it. Concurrent callers for the
    /// same land see exactly one `true`.
    pub fn request_refresh(&self, land: &LandId) -> bool {
        let now = self.clock.now();
        match self.pending.entry(land.clone()) {
            Entry::Occupied(mut since) => {
                if now - *since.get() < self.pending_timeout {
                    trace!(land = %land, "Refresh already pending");
                    return false;
                }
                debug!(land = %land, since = %since.get(), "Pending refresh timed out, rescheduling");
                since.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        if self.trigger.schedule_refresh(land) {
            self.counters.refresh_scheduled();
            debug!(land = %land, "Refresh scheduled");
            true
        } else {
            self.pending.remove(land);
            false
        }
    }

    pub fn is_pending(&self, land: &LandId) -> bool {
        self.pending.contains_key(land)
    }

    /// Forgets an in-flight refresh so the next read can schedule another.
    pub fn clear_pending(&self, land: &LandId) {
        self.pending.remove(land);
    }

    /// Stores a freshly computed record, replacing any value for the same
    /// land and date, and completes the land's pending refresh.
    pub fn put(&self, record: &NdviRecord) -> CacheEntry {
        let ttl = self.ttl.ttl_for(record.cloud_cover_pct);
        let entry = CacheEntry::from_record(record, record.computed_at + ttl);
        self.insert(entry.clone());
        entry
    }

    /// Stores a prepared entry.
    pub fn insert(&self, entry: CacheEntry) {
        let land = entry.land_id.clone();
        debug!(
            land = %land,
            date = %entry.date,
            mean = entry.mean,
            expires_at = %entry.expires_at,
            "Cache put"
        );
        self.entries
            .entry(land.clone())
            .or_default()
            .insert(entry.date, entry);
        self.pending.remove(&land);
        self.counters.put();
    }

    /// Drops every value held for `land`.
    pub fn invalidate(&self, land: &LandId) -> usize {
        self.entries
            .remove(land)
            .map(|(_, dates)| dates.len())
            .unwrap_or(0)
    }

    /// Evicts entries past expiry plus the grace window that were not read
    /// since the previous sweep.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for mut item in self.entries.iter_mut() {
            let (land, dates) = item.pair_mut();
            dates.retain(|date, entry| {
                let read_since_last_sweep = entry.access_count > entry.swept_access_count;
                entry.swept_access_count = entry.access_count;

                if entry.expires_at + self.grace > now {
                    return true;
                }
                if read_since_last_sweep {
                    report.retained_expired += 1;
                    return true;
                }
                report.evicted.push((land.clone(), *date));
                false
            });
        }
        self.entries.retain(|_, dates| !dates.is_empty());

        self.counters.evicted(report.evicted.len() as u64);
        report
    }

    /// Number of cached (land, date) values.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|dates| dates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len() as u64)
    }
}

impl std::fmt::Debug for NdviCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdviCache")
            .field("entries", &self.len())
            .field("pending", &self.pending.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
