//! JSON persistence for the queue.
//!
//! A snapshot is a full copy of every entry. Restoring returns `processing`
//! entries to `queued`: whoever held them is gone, so the work is redone
//! (at-least-once).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::core::{AcquisitionQueue, Inner};
use super::entry::{AcquisitionQueueEntry, EntryStatus};
use super::error::QueueError;
use crate::time::Clock;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable queue state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub next_id: u64,
    pub next_seq: u64,
    pub entries: Vec<AcquisitionQueueEntry>,
}

impl AcquisitionQueue {
    /// Captures the current state.
    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        QueueSnapshot {
            version: SNAPSHOT_VERSION,
            next_id: inner.next_id,
            next_seq: inner.next_seq,
            entries,
        }
    }

    /// Replaces the queue's state with `snapshot`.
    pub fn restore(&self, snapshot: QueueSnapshot) -> Result<(), QueueError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(QueueError::UnsupportedSnapshot(snapshot.version));
        }
        let now = self.clock.now();
        let mut requeued = 0usize;
        let mut fresh = Inner::default();
        fresh.next_id = snapshot.next_id;
        fresh.next_seq = snapshot.next_seq;
        for mut entry in snapshot.entries {
            if entry.status.is_processing() {
                entry.status = EntryStatus::Queued;
                entry.updated_at = now;
                requeued += 1;
            }
            fresh.next_id = fresh.next_id.max(entry.id.0);
            fresh.next_seq = fresh.next_seq.max(entry.seq);
            fresh.entries.insert(entry.id, entry);
        }
        fresh.rebuild_indices(now);
        let total = fresh.entries.len();
        *self.inner.lock() = fresh;

        info!(entries = total, requeued, "Queue restored from snapshot");
        Ok(())
    }

    /// Writes a snapshot to `path` atomically (temp file + rename).
    pub fn save_to(&self, path: &Path) -> Result<(), QueueError> {
        let snapshot = self.snapshot();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Builds a queue from a snapshot file, or an empty queue when the file
    /// does not exist.
    pub fn load_from(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let queue = AcquisitionQueue::new(clock);
        queue.restore_from(path)?;
        Ok(queue)
    }

    /// Restores this queue from a snapshot file, keeping its configured
    /// policies. Returns `false` when the file does not exist.
    pub fn restore_from(&self, path: &Path) -> Result<bool, QueueError> {
        if !path.exists() {
            return Ok(false);
        }
        let snapshot: QueueSnapshot = serde_json::from_slice(&fs::read(path)?)?;
        self.restore(snapshot)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BoundingBox;
    use crate::ids::{LandId, TenantId};
    use crate::queue::{AcquisitionTarget, EntryMetrics, NewEntry, Priority};
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn entry(key: &str) -> NewEntry {
        NewEntry {
            target: AcquisitionTarget::Cluster {
                key: key.to_string(),
            },
            tenant_id: TenantId::from("acme"),
            bbox: BoundingBox::new(1.0, 44.0, 1.01, 44.01),
            land_ids: vec![LandId::from(key)],
            land_revisions: Default::default(),
            priority: Priority(10),
        }
    }

    #[test]
    fn test_save_and_load_requeues_processing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let queue = AcquisitionQueue::new(clock());
        queue.enqueue(entry("a"));
        queue.enqueue(entry("b"));
        queue.enqueue(entry("c"));
        let done = queue.claim_next("w").unwrap();
        queue.complete(&done.claim, EntryMetrics::default()).unwrap();
        let in_flight = queue.claim_next("w").unwrap();
        queue.save_to(&path).unwrap();

        let restored = AcquisitionQueue::load_from(&path, clock()).unwrap();
        let stats = restored.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.ready, 2);
        assert_eq!(stats.processing, 0);

        // The old claim is dead in the restored queue.
        assert!(restored.heartbeat(&in_flight.claim).is_err());
        // Active target dedupe survives the round trip.
        assert!(!restored.enqueue(entry("b")).created);
        // New IDs continue after the restored ones.
        assert!(restored.enqueue(entry("d")).id.0 > 3);
    }

    #[test]
    fn test_missing_file_gives_empty_queue() {
        let dir = TempDir::new().unwrap();
        let queue = AcquisitionQueue::load_from(&dir.path().join("none.json"), clock()).unwrap();
        assert!(queue.entries().is_empty());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let queue = AcquisitionQueue::new(clock());
        let snapshot = QueueSnapshot {
            version: 99,
            next_id: 0,
            next_seq: 0,
            entries: Vec::new(),
        };
        assert!(matches!(
            queue.restore(snapshot),
            Err(QueueError::UnsupportedSnapshot(99))
        ));
    }
}
