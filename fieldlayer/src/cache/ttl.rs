//! Expiry policy for cached index values.

use chrono::Duration;

use crate::compute::DEFAULT_CLOUDY_SCENE_PCT;

/// Default lifetime of a value computed from a clear scene (5 days).
pub const DEFAULT_CLEAR_TTL_DAYS: i64 = 5;

/// Default lifetime of a value computed from a cloudy scene (2 days).
pub const DEFAULT_CLOUDY_TTL_DAYS: i64 = 2;

/// Chooses how long a value stays fresh.
///
/// Cloud-obscured values are refreshed sooner because the next pass is
/// likely to be clearer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlPolicy {
    pub clear: Duration,
    pub cloudy: Duration,
    /// Scene cloud cover, in percent, above which the cloudy TTL applies.
    pub cloudy_threshold_pct: f64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            clear: Duration::days(DEFAULT_CLEAR_TTL_DAYS),
            cloudy: Duration::days(DEFAULT_CLOUDY_TTL_DAYS),
            cloudy_threshold_pct: DEFAULT_CLOUDY_SCENE_PCT,
        }
    }
}

impl TtlPolicy {
    pub fn new(clear: Duration, cloudy: Duration) -> Self {
        Self {
            clear,
            cloudy,
            ..Self::default()
        }
    }

    pub fn with_cloudy_threshold(mut self, pct: f64) -> Self {
        self.cloudy_threshold_pct = pct;
        self
    }

    pub fn ttl_for(&self, cloud_cover_pct: f64) -> Duration {
        if cloud_cover_pct > self.cloudy_threshold_pct {
            self.cloudy
        } else {
            self.clear
        }
    }
}
