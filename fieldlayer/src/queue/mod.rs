//! Acquisition queue.
//!
//! Durable, priority-ordered work queue of tile and cluster acquisition
//! requests. Each entry moves through a closed state machine:
//!
//! ```text
//! queued ──claim──► processing ──complete──► completed
//!   ▲                  │  │
//!   │   retryable fail │  └──fail (terminal / retries exhausted)──► failed
//!   └──── (backoff) ───┘
//!   │
//!   └──cancel──► canceled      (advisory while processing)
//! ```
//!
//! # Claims
//!
//! [`AcquisitionQueue::claim_next`] hands out a [`Claim`] carrying a lease
//! number. Every transition out of `processing` requires the live claim; a
//! claim whose entry was swept back to `queued` by the [`QueueReaper`] is
//! rejected with [`QueueError::LeaseLost`].
//!
//! # Ordering
//!
//! Higher [`Priority`] first; within a priority, earlier `scheduled_for`
//! first; then FIFO by insertion.

mod core;
mod entry;
mod error;
mod policy;
mod reaper;
mod snapshot;

pub use self::core::{
    AcquisitionQueue, CancelOutcome, EnqueueOutcome, FailOutcome, QueueStats, ReapReport,
    DEFAULT_CLAIM_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS,
};
pub use entry::{
    AcquisitionQueueEntry, AcquisitionTarget, Claim, Claimed, EntryId, EntryMetrics, EntryStatus,
    FailureKind, NewEntry,
};
pub use error::QueueError;
pub use policy::{
    Priority, RetryPolicy, DEFAULT_BASE_DELAY_SECS, DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES,
};
pub use reaper::{EntryRelease, QueueReaper, DEFAULT_FINISHED_RETENTION_SECS, DEFAULT_REAPER_INTERVAL_SECS};
pub use snapshot::{QueueSnapshot, SNAPSHOT_VERSION};
