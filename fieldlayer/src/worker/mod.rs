//! Acquisition workers.
//!
//! A worker claims a queue entry, fetches imagery for the entry's bounding
//! box through the tenant's provider chain, runs the index pipeline on a
//! blocking thread, writes the resulting records to the cache, and finishes
//! the entry:
//!
//! ```text
//! claim ─► lands ─► acquire ─► mask ─► index ─► health ─► aggregate ─► cache ─► complete
//!            │         │         └────────── cancel check before each ─────┘
//!            │         └─ retryable error ─► fail(retryable) ─► backoff
//!            └─ terminal error anywhere ─► fail(terminal) ─► alert, release cluster
//! ```
//!
//! Each step is bracketed by ledger rows under the entry's ID. The claim is
//! heartbeated while the entry is processed so the reaper leaves it alone.

mod pool;
mod processor;
mod types;

pub use pool::WorkerPool;
pub use processor::AcquisitionWorker;
pub use types::{
    WorkOutcome, WorkerSettings, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_MAX_PIXELS,
    DEFAULT_RESOLUTION_M, DEFAULT_SEARCH_WINDOW_DAYS, DEFAULT_WORKER_COUNT,
};
