//! Priority and retry policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of retries before an entry fails terminally.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY_SECS: i64 = 30;

/// Default backoff ceiling.
pub const DEFAULT_MAX_DELAY_SECS: i64 = 3600;

/// Scheduling priority. Higher values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Maximally stale data (never cached).
    pub const MAX: Priority = Priority(100);
    /// Expired data starts at this tier.
    pub const EXPIRED_BASE: Priority = Priority(50);
    /// Data flagged for refresh that has not yet expired.
    pub const REFRESH: Priority = Priority(40);
    /// Default for ad-hoc requests.
    pub const NORMAL: Priority = Priority(0);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exponential backoff for retryable failures.
///
/// `delay(n) = min(base * 2^n, max_delay)` where `n` is the retry count
/// before the failure is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retry number `retry_count + 1`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        // 2^31 seconds already exceeds any sane cap.
        let factor = 1i64 << retry_count.min(30);
        let base_ms = self.base_delay.num_milliseconds();
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::milliseconds(delay_ms).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `retry_count` retries.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::seconds(DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::seconds(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::MAX > Priority::EXPIRED_BASE);
        assert!(Priority::EXPIRED_BASE > Priority::REFRESH);
        assert!(Priority::REFRESH > Priority::NORMAL);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::seconds(10), Duration::seconds(60));
        assert_eq!(policy.delay(0), Duration::seconds(10));
        assert_eq!(policy.delay(1), Duration::seconds(20));
        assert_eq!(policy.delay(2), Duration::seconds(40));
        assert_eq!(policy.delay(3), Duration::seconds(60));
        assert_eq!(policy.delay(40), Duration::seconds(60));
    }

    #[test]
    fn test_can_retry_boundary() {
        let policy = RetryPolicy::new(2, Duration::seconds(1), Duration::seconds(1));
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(1));
        assert!(!policy.can_retry(2));
    }
}
