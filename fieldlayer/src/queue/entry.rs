//! Queue entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::policy::Priority;
use crate::coord::{BoundingBox, TileCoord};
use crate::ids::{LandId, TenantId};

/// Identifier of a queue entry.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acq-{}", self.0)
    }
}

/// What an entry acquires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionTarget {
    /// A land cluster, identified by its stable cluster key.
    Cluster { key: String },
    /// A single grid tile.
    Tile { coord: TileCoord },
}

impl fmt::Display for AcquisitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionTarget::Cluster { key } => write!(f, "cluster:{}", key),
            AcquisitionTarget::Tile { coord } => write!(f, "tile:{}", coord),
        }
    }
}

/// Entry lifecycle state.
///
/// Transitions only move forward, except `Processing → Queued` on retry or
/// reaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Processing {
        worker: String,
        lease: u64,
        claimed_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    },
    Completed,
    Failed,
    Canceled,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing { .. } => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Processing metrics recorded on an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetrics {
    pub duration_ms: u64,
    pub processing_units: f64,
    pub bytes: u64,
    pub processed_count: u32,
    pub failed_count: u32,
}

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Terminal,
}

/// One acquisition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionQueueEntry {
    pub id: EntryId,
    pub target: AcquisitionTarget,
    pub tenant_id: TenantId,
    pub bbox: BoundingBox,
    pub land_ids: Vec<LandId>,
    /// Mapping revision each land had when the entry was planned. A land
    /// whose boundary changed since then is not cached from this entry.
    #[serde(default)]
    pub land_revisions: BTreeMap<LandId, u64>,
    pub priority: Priority,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics: EntryMetrics,
    pub last_error: Option<String>,
    /// Advisory cancellation flag, honoured by the worker between steps.
    pub cancel_requested: bool,
    /// Monotonic lease counter; the current lease is the last one handed out.
    pub lease: u64,
    /// Insertion sequence used for FIFO tie-breaking.
    pub seq: u64,
}

/// Parameters for a new entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub target: AcquisitionTarget,
    pub tenant_id: TenantId,
    pub bbox: BoundingBox,
    pub land_ids: Vec<LandId>,
    /// Empty when the lands are resolved at processing time.
    pub land_revisions: BTreeMap<LandId, u64>,
    pub priority: Priority,
}

/// Proof that a worker owns a processing entry.
///
/// Only valid while the entry is still `processing` under the same lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub(super) id: EntryId,
    pub(super) lease: u64,
    pub(super) worker: String,
}

impl Claim {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn lease(&self) -> u64 {
        self.lease
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }
}

/// A claimed entry together with its claim token.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub claim: Claim,
    pub entry: AcquisitionQueueEntry,
}
