//! Messages accepted by the usage daemon.

use chrono::NaiveDate;
use tokio::sync::oneshot;

use super::state::{ApiUsageRecord, Reservation, UsageDelta, UsageError};
use crate::ids::TenantId;

/// A request to the usage daemon.
///
/// Queries and reservations carry a reply channel; settlements are
/// fire-and-forget.
#[derive(Debug)]
pub enum UsageEvent {
    Reserve {
        tenant: TenantId,
        date: NaiveDate,
        units: f64,
        budget: Option<f64>,
        reply: oneshot::Sender<Result<Reservation, UsageError>>,
    },
    Settle {
        reservation: Reservation,
        delta: UsageDelta,
    },
    Release {
        reservation: Reservation,
    },
    Record {
        tenant: TenantId,
        date: NaiveDate,
        delta: UsageDelta,
    },
    Get {
        tenant: TenantId,
        date: NaiveDate,
        reply: oneshot::Sender<ApiUsageRecord>,
    },
    All {
        reply: oneshot::Sender<Vec<ApiUsageRecord>>,
    },
}
