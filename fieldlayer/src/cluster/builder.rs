//! Planning and persisting clusters against live stores.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::active::ActiveClusters;
use super::planner::plan_clusters;
use super::types::{ClusterError, ClusterPlan, ClusterSettings, LandCluster};
use crate::mapper::MappingStore;
use crate::queue::{AcquisitionQueue, AcquisitionQueueEntry, AcquisitionTarget, EnqueueOutcome, NewEntry};
use crate::time::Clock;

/// What a `build` pass persisted.
#[derive(Debug, Clone, Default)]
pub struct ClusterBuildReport {
    pub enqueued: Vec<(LandCluster, EnqueueOutcome)>,
    pub rejected: Vec<ClusterError>,
}

/// Turns pending mappings into active clusters and queue entries.
pub struct ClusterBuilder {
    mappings: Arc<MappingStore>,
    active: Arc<ActiveClusters>,
    queue: Arc<AcquisitionQueue>,
    settings: ClusterSettings,
    clock: Arc<dyn Clock>,
    build_lock: Mutex<()>,
}

impl ClusterBuilder {
    pub fn new(
        mappings: Arc<MappingStore>,
        active: Arc<ActiveClusters>,
        queue: Arc<AcquisitionQueue>,
        settings: ClusterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mappings,
            active,
            queue,
            settings,
            clock,
            build_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn active(&self) -> &Arc<ActiveClusters> {
        &self.active
    }

    /// Computes clusters for the current pending set without side effects.
    pub fn plan(&self) -> ClusterPlan {
        let now = self.clock.now();
        let pending: Vec<_> = self
            .mappings
            .pending(now)
            .into_iter()
            .filter(|m| !self.active.contains_land(&m.land_id))
            .collect();
        plan_clusters(&pending, &self.settings, now)
    }

    /// Plans, registers the clusters as active and enqueues one acquisition
    /// per cluster.
    pub fn build(&self) -> ClusterBuildReport {
        let _guard = self.build_lock.lock();
        let plan = self.plan();

        for err in &plan.rejected {
            warn!(error = %err, "Land skipped by cluster builder");
        }

        let mut report = ClusterBuildReport {
            enqueued: Vec::with_capacity(plan.clusters.len()),
            rejected: plan.rejected,
        };

        for cluster in plan.clusters {
            if !self.active.insert(cluster.clone()) {
                debug!(key = %cluster.key, "Cluster already active, skipped");
                continue;
            }
            let outcome = self.queue.enqueue(NewEntry {
                target: AcquisitionTarget::Cluster {
                    key: cluster.key.clone(),
                },
                tenant_id: cluster.tenant_id.clone(),
                bbox: cluster.bbox,
                land_ids: cluster.land_ids.clone(),
                land_revisions: cluster.revisions.clone(),
                priority: cluster.priority,
            });
            info!(
                key = %&cluster.key[..12],
                tenant = %cluster.tenant_id,
                lands = cluster.land_ids.len(),
                area_km2 = cluster.area_km2,
                priority = %cluster.priority,
                entry = %outcome.id,
                "Cluster built"
            );
            report.enqueued.push((cluster, outcome));
        }

        report
    }

    /// Registers every unfinished cluster entry already in the queue as
    /// active, so lands restored from a snapshot are not planned twice.
    ///
    /// Returns the number of clusters adopted.
    pub fn adopt_queued(&self) -> usize {
        let _guard = self.build_lock.lock();
        let mut adopted = 0;
        for entry in self.queue.entries() {
            if entry.status.is_terminal() {
                continue;
            }
            let AcquisitionTarget::Cluster { key } = &entry.target else {
                continue;
            };
            let mut land_ids = entry.land_ids.clone();
            land_ids.sort();
            let cluster = LandCluster {
                key: key.clone(),
                tenant_id: entry.tenant_id.clone(),
                land_ids,
                revisions: entry.land_revisions.clone(),
                bbox: entry.bbox,
                area_km2: entry.bbox.area_km2(),
                priority: entry.priority,
                oldest_expiry: None,
                created_at: entry.created_at,
            };
            if self.active.insert(cluster) {
                adopted += 1;
            } else {
                warn!(key = %key, entry = %entry.id, "Restored cluster overlaps an active one");
            }
        }
        if adopted > 0 {
            info!(clusters = adopted, "Restored clusters marked active");
        }
        adopted
    }

    /// Releases the active cluster behind a finished queue entry.
    pub fn release_for_entry(&self, entry: &AcquisitionQueueEntry) -> Option<LandCluster> {
        match &entry.target {
            AcquisitionTarget::Cluster { key } => {
                let released = self.active.release(key);
                if released.is_some() {
                    debug!(key = %key, entry = %entry.id, "Cluster released");
                }
                released
            }
            AcquisitionTarget::Tile { .. } => None,
        }
    }
}
