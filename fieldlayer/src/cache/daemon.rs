//! Background daemon for cache eviction.
//!
//! Periodically sweeps the [`NdviCache`], dropping values that expired more
//! than the grace window ago and were not read since the previous sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::store::NdviCache;

/// Default interval between sweeps (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Runs [`NdviCache::sweep`] on an interval until cancelled.
pub struct CacheEvictionDaemon {
    cache: Arc<NdviCache>,
    interval: Duration,
}

impl CacheEvictionDaemon {
    pub fn new(cache: Arc<NdviCache>) -> Self {
        Self {
            cache,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn sweep(&self) {
        let report = self.cache.sweep();
        if report.evicted.is_empty() {
            debug!(
                entries = self.cache.len(),
                retained_expired = report.retained_expired,
                "Cache sweep: nothing evicted"
            );
        } else {
            info!(
                evicted = report.evicted.len(),
                retained_expired = report.retained_expired,
                entries = self.cache.len(),
                "Cache sweep complete"
            );
        }
    }

    /// Runs until cancelled. The first tick fires immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Cache eviction daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cache eviction daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::ids::{LandId, TenantId};
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};

    fn entry(land: &str, expires_in_days: i64) -> CacheEntry {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        CacheEntry {
            land_id: LandId::from(land),
            tenant_id: TenantId::from("acme"),
            date: at.date_naive(),
            mean: 0.5,
            min: 0.4,
            max: 0.6,
            health_score: 0.6,
            thumbnail_url: None,
            cloud_cover_pct: 0.0,
            computed_at: at,
            expires_at: at + chrono::Duration::days(expires_in_days),
            access_count: 0,
            last_accessed_at: None,
            statistics_only: true,
            swept_access_count: 0,
        }
    }

    #[tokio::test]
    async fn test_daemon_evicts_and_stops() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap());
        let cache = Arc::new(NdviCache::new(Arc::new(clock)));
        cache.insert(entry("old", 1));
        cache.insert(entry("fresh", 30));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            CacheEvictionDaemon::new(Arc::clone(&cache))
                .with_interval(Duration::from_millis(10))
                .run(shutdown.clone()),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(cache.entries_for(&LandId::from("fresh")).len() == 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
