//! Cache refresh hook backed by the mapping store.
//!
//! A cache miss never enqueues work directly. It flags the land's mapping,
//! raises any queued entry already covering the land, and wakes the cluster
//! scheduler, which batches the land with its neighbours.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use crate::cache::RefreshTrigger;
use crate::ids::LandId;
use crate::mapper::MappingStore;
use crate::queue::{AcquisitionQueue, Priority};

/// Routes refresh requests through the cluster builder.
pub struct LandRefreshTrigger {
    mappings: Arc<MappingStore>,
    queue: Arc<AcquisitionQueue>,
    wake: Arc<Notify>,
}

impl LandRefreshTrigger {
    pub fn new(mappings: Arc<MappingStore>, queue: Arc<AcquisitionQueue>, wake: Arc<Notify>) -> Self {
        Self {
            mappings,
            queue,
            wake,
        }
    }

    /// Flags `land` for refresh at `priority`.
    ///
    /// Returns `false` when the land has no mapping.
    pub fn request(&self, land: &LandId, priority: Option<Priority>) -> bool {
        if !self.mappings.mark_needs_refresh(land, priority.map(|p| p.0)) {
            return false;
        }
        if let Some(priority) = priority {
            if let Some(entry) = self.queue.bump_priority_for_land(land, priority) {
                debug!(land = %land, entry = %entry, priority = %priority, "Queued entry bumped");
            }
        }
        self.wake.notify_one();
        true
    }
}

impl RefreshTrigger for LandRefreshTrigger {
    fn schedule_refresh(&self, land: &LandId) -> bool {
        self.request(land, None)
    }

    fn needs_refresh(&self, land: &LandId) -> bool {
        self.mappings
            .get(land)
            .is_some_and(|mapping| mapping.needs_refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BoundingBox;
    use crate::ids::TenantId;
    use crate::mapper::LandTileMapping;
    use crate::queue::{AcquisitionTarget, NewEntry};
    use crate::time::{Clock, ManualClock};
    use chrono::{TimeZone, Utc};

    fn fixture() -> (LandRefreshTrigger, Arc<MappingStore>, Arc<AcquisitionQueue>, Arc<Notify>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let mappings = Arc::new(MappingStore::new());
        mappings.insert_for_test(LandTileMapping::for_test("a", "t1", 44.0, 1.0, 0.003));
        let queue = Arc::new(AcquisitionQueue::new(clock));
        let wake = Arc::new(Notify::new());
        let trigger = LandRefreshTrigger::new(
            Arc::clone(&mappings),
            Arc::clone(&queue),
            Arc::clone(&wake),
        );
        (trigger, mappings, queue, wake)
    }

    #[tokio::test]
    async fn test_schedule_refresh_flags_mapping_and_wakes() {
        let (trigger, mappings, _queue, wake) = fixture();
        let land = LandId::from("a");

        assert!(!trigger.needs_refresh(&land));
        assert!(trigger.schedule_refresh(&land));
        assert!(mappings.get(&land).unwrap().needs_refresh);
        assert!(trigger.needs_refresh(&land));

        // notify_one stores a permit when nobody is waiting.
        tokio::time::timeout(std::time::Duration::from_millis(100), wake.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_unknown_land_is_not_scheduled() {
        let (trigger, _mappings, _queue, _wake) = fixture();
        assert!(!trigger.schedule_refresh(&LandId::from("missing")));
        assert!(!trigger.needs_refresh(&LandId::from("missing")));
    }

    #[test]
    fn test_request_with_priority_bumps_queued_entry() {
        let (trigger, mappings, queue, _wake) = fixture();
        let land = LandId::from("a");
        let outcome = queue.enqueue(NewEntry {
            target: AcquisitionTarget::Cluster {
                key: "k".to_string(),
            },
            tenant_id: TenantId::from("t1"),
            bbox: BoundingBox::new(1.0, 44.0, 1.003, 44.003),
            land_ids: vec![land.clone()],
            land_revisions: Default::default(),
            priority: Priority::NORMAL,
        });

        assert!(trigger.request(&land, Some(Priority::MAX)));
        assert_eq!(queue.get(outcome.id).unwrap().priority, Priority::MAX);
        assert_eq!(mappings.get(&land).unwrap().requested_priority, Some(100));
    }
}
