//! Handle for talking to the usage daemon.

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};

use super::event::UsageEvent;
use super::state::{ApiUsageRecord, Reservation, UsageDelta, UsageError};
use crate::ids::TenantId;

/// Client for the usage daemon.
///
/// Cheap to clone. Settlements and releases are fire-and-forget; they are
/// silently dropped once the daemon has shut down.
#[derive(Clone, Debug)]
pub struct UsageClient {
    tx: mpsc::UnboundedSender<UsageEvent>,
}

impl UsageClient {
    pub fn new(tx: mpsc::UnboundedSender<UsageEvent>) -> Self {
        Self { tx }
    }

    #[inline]
    fn send(&self, event: UsageEvent) {
        let _ = self.tx.send(event);
    }

    /// Holds `units` against the tenant's daily budget.
    pub async fn reserve(
        &self,
        tenant: &TenantId,
        date: NaiveDate,
        units: f64,
        budget: Option<f64>,
    ) -> Result<Reservation, UsageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(UsageEvent::Reserve {
                tenant: tenant.clone(),
                date,
                units,
                budget,
                reply,
            })
            .map_err(|_| UsageError::Unavailable)?;
        rx.await.map_err(|_| UsageError::Unavailable)?
    }

    /// Records the outcome of a reserved call.
    pub fn settle(&self, reservation: Reservation, delta: UsageDelta) {
        self.send(UsageEvent::Settle { reservation, delta });
    }

    /// Drops a reservation whose call never happened.
    pub fn release(&self, reservation: Reservation) {
        self.send(UsageEvent::Release { reservation });
    }

    /// Records a call made without a reservation.
    pub fn record(&self, tenant: &TenantId, date: NaiveDate, delta: UsageDelta) {
        self.send(UsageEvent::Record {
            tenant: tenant.clone(),
            date,
            delta,
        });
    }

    /// Usage for one tenant's day.
    pub async fn usage(
        &self,
        tenant: &TenantId,
        date: NaiveDate,
    ) -> Result<ApiUsageRecord, UsageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(UsageEvent::Get {
                tenant: tenant.clone(),
                date,
                reply,
            })
            .map_err(|_| UsageError::Unavailable)?;
        rx.await.map_err(|_| UsageError::Unavailable)
    }

    /// Every usage record.
    pub async fn all(&self) -> Result<Vec<ApiUsageRecord>, UsageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(UsageEvent::All { reply })
            .map_err(|_| UsageError::Unavailable)?;
        rx.await.map_err(|_| UsageError::Unavailable)
    }
}
