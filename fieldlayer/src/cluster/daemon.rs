//! Cluster scheduler daemon.
//!
//! Runs a cluster build pass periodically and whenever a refresh request
//! pokes the trigger, so flagged lands reach the queue without bypassing the
//! cluster builder.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::builder::ClusterBuilder;

/// Default interval between scheduled build passes (60 seconds).
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 60;

/// Background daemon driving [`ClusterBuilder::build`].
pub struct ClusterScheduler {
    builder: Arc<ClusterBuilder>,
    trigger: Arc<Notify>,
    interval: Duration,
}

impl ClusterScheduler {
    pub fn new(builder: Arc<ClusterBuilder>, trigger: Arc<Notify>) -> Self {
        Self {
            builder,
            trigger,
            interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn pass(&self, reason: &'static str) {
        let report = self.builder.build();
        if report.enqueued.is_empty() && report.rejected.is_empty() {
            debug!(reason, "Cluster pass: nothing pending");
        } else {
            info!(
                reason,
                enqueued = report.enqueued.len(),
                rejected = report.rejected.len(),
                "Cluster pass complete"
            );
        }
    }

    /// Runs until cancelled. The first pass happens immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Cluster scheduler starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cluster scheduler shutting down");
                    break;
                }

                _ = self.trigger.notified() => {
                    self.pass("refresh-trigger");
                }

                _ = interval.tick() => {
                    self.pass("scheduled");
                }
            }
        }
    }
}
