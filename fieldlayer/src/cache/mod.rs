//! NDVI cache and eviction.
//!
//! Computed index summaries are cached per land and acquisition date with a
//! TTL that depends on scene cloud cover. Reads are served from memory only:
//! a miss or a stale hit schedules one background refresh per land through a
//! [`RefreshTrigger`], and concurrent readers of the same land share it.
//!
//! Expired values linger for a grace window and are evicted by the
//! [`CacheEvictionDaemon`] once nobody has read them since the previous
//! sweep.

mod daemon;
mod stats;
mod store;
mod ttl;
mod types;

pub use daemon::{CacheEvictionDaemon, DEFAULT_SWEEP_INTERVAL_SECS};
pub use stats::CacheStats;
pub use store::{NdviCache, SweepReport, DEFAULT_EVICTION_GRACE_HOURS, DEFAULT_PENDING_TIMEOUT_HOURS};
pub use ttl::{TtlPolicy, DEFAULT_CLEAR_TTL_DAYS, DEFAULT_CLOUDY_TTL_DAYS};
pub use types::{CacheEntry, CacheLookup, NoRefresh, RefreshTrigger};
