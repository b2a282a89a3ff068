//! Worker settings and results.

use std::time::Duration;

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default interval between claim heartbeats (15 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Default requested ground resolution in metres per pixel.
pub const DEFAULT_RESOLUTION_M: f64 = 10.0;

/// Default cap on raster width and height.
pub const DEFAULT_MAX_PIXELS: u32 = 512;

/// Default number of days before today searched for a scene.
pub const DEFAULT_SEARCH_WINDOW_DAYS: i64 = 0;

/// How workers shape and pace their work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub count: usize,
    pub heartbeat_interval: Duration,
    pub resolution_m: f64,
    pub max_pixels: u32,
    pub search_window_days: i64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            resolution_m: DEFAULT_RESOLUTION_M,
            max_pixels: DEFAULT_MAX_PIXELS,
            search_window_days: DEFAULT_SEARCH_WINDOW_DAYS,
        }
    }
}

/// What became of one claimed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed { processed: u32, failed: u32 },
    /// Retryable failure, back in the queue with backoff.
    Requeued { retry: u32 },
    /// Terminal failure.
    Failed { step: String },
    Canceled,
    /// The reaper took the entry back before the worker finished.
    LeaseLost,
}

impl WorkOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            WorkOutcome::Completed { .. } => "completed",
            WorkOutcome::Requeued { .. } => "requeued",
            WorkOutcome::Failed { .. } => "failed",
            WorkOutcome::Canceled => "canceled",
            WorkOutcome::LeaseLost => "lease_lost",
        }
    }
}
