//! Stale-claim reaper daemon.
//!
//! Periodically returns `processing` entries whose worker stopped
//! heartbeating to `queued`, and prunes long-finished entries. Stale entries
//! that were already asked to cancel are finished here, and whatever they held
//! is handed back through an [`EntryRelease`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::core::{AcquisitionQueue, ReapReport};
use super::entry::AcquisitionQueueEntry;

/// Default interval between sweeps (15 seconds).
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 15;

/// Default retention for finished entries (24 hours).
pub const DEFAULT_FINISHED_RETENTION_SECS: i64 = 86_400;

/// Frees what a queue entry held once it ends without a live worker.
pub trait EntryRelease: Send + Sync {
    fn release(&self, entry: &AcquisitionQueueEntry);
}

/// Background sweep of stale claims.
pub struct QueueReaper {
    queue: Arc<AcquisitionQueue>,
    release: Option<Arc<dyn EntryRelease>>,
    interval: Duration,
    finished_retention: chrono::Duration,
}

impl QueueReaper {
    pub fn new(queue: Arc<AcquisitionQueue>) -> Self {
        Self {
            queue,
            release: None,
            interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            finished_retention: chrono::Duration::seconds(DEFAULT_FINISHED_RETENTION_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Called for every entry the sweep cancels.
    pub fn with_release(mut self, release: Arc<dyn EntryRelease>) -> Self {
        self.release = Some(release);
        self
    }

    pub fn with_finished_retention(mut self, retention: chrono::Duration) -> Self {
        self.finished_retention = retention;
        self
    }

    /// Runs one sweep.
    pub fn sweep(&self) -> ReapReport {
        let report = self.queue.reap_stale();
        if let Some(release) = &self.release {
            for entry in &report.canceled {
                release.release(entry);
            }
        }
        let cutoff = self.queue.clock.now() - self.finished_retention;
        let pruned = self.queue.prune_finished(cutoff);
        if !report.is_empty() || pruned > 0 {
            info!(
                requeued = report.requeued.len(),
                canceled = report.canceled.len(),
                pruned,
                "Queue reaper sweep"
            );
        } else {
            debug!("Queue reaper sweep: nothing stale");
        }
        report
    }

    /// Runs until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Queue reaper shutting down");
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
    use crate::coord::BoundingBox;
    use crate::ids::{LandId, TenantId};
    use crate::queue::{AcquisitionTarget, CancelOutcome, EntryStatus, NewEntry, Priority};
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Released(Mutex<Vec<LandId>>);

    impl EntryRelease for Released {
        fn release(&self, entry: &AcquisitionQueueEntry) {
            self.0.lock().extend(entry.land_ids.iter().cloned());
        }
    }

    fn stale_queue(clock: &ManualClock) -> Arc<AcquisitionQueue> {
        let queue = Arc::new(
            AcquisitionQueue::new(Arc::new(clock.clone()))
                .with_claim_timeout(chrono::Duration::seconds(60)),
        );
        queue.enqueue(NewEntry {
            target: AcquisitionTarget::Cluster { key: "k".into() },
            tenant_id: TenantId::from("acme"),
            bbox: BoundingBox::new(1.0, 44.0, 1.01, 44.01),
            land_ids: vec![LandId::from("a")],
            land_revisions: Default::default(),
            priority: Priority(10),
        });
        queue
    }

    #[test]
    fn test_sweep_requeues_stale_claims() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let queue = stale_queue(&clock);
        queue.claim_next("w").unwrap();

        let reaper = QueueReaper::new(Arc::clone(&queue));
        assert!(reaper.sweep().is_empty());
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(reaper.sweep().requeued.len(), 1);
        assert!(queue.claim_next("w2").is_some());
    }

    #[test]
    fn test_sweep_releases_canceled_entries() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let queue = stale_queue(&clock);
        let claimed = queue.claim_next("w").unwrap();
        assert!(matches!(
            queue.cancel(claimed.entry.id).unwrap(),
            CancelOutcome::Requested
        ));

        let released = Arc::new(Released::default());
        let reaper = QueueReaper::new(Arc::clone(&queue)).with_release(released.clone());
        clock.advance(chrono::Duration::seconds(61));
        let report = reaper.sweep();

        assert_eq!(report.canceled.len(), 1);
        assert_eq!(queue.get(claimed.entry.id).unwrap().status, EntryStatus::Canceled);
        assert_eq!(*released.0.lock(), vec![LandId::from("a")]);
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancellation() {
        let queue = Arc::new(AcquisitionQueue::new(Arc::new(crate::time::SystemClock)));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            QueueReaper::new(queue).run(shutdown),
        )
        .await;
        assert!(result.is_ok());
    }
}
