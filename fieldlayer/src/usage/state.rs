//! Usage counters owned by the usage daemon.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::ids::TenantId;
use crate::provider::CostEstimate;

/// Slack allowed when comparing fractional processing units to a budget.
const BUDGET_EPSILON: f64 = 1e-9;

/// Per-tenant-per-day provider usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsageRecord {
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub bytes: u64,
    pub processing_units: f64,
    pub cost_estimate: f64,
}

impl ApiUsageRecord {
    pub fn empty(tenant_id: TenantId, date: NaiveDate) -> Self {
        Self {
            tenant_id,
            date,
            calls_succeeded: 0,
            calls_failed: 0,
            bytes: 0,
            processing_units: 0.0,
            cost_estimate: 0.0,
        }
    }

    /// Total calls, successful or not.
    pub fn calls(&self) -> u64 {
        self.calls_succeeded + self.calls_failed
    }

    fn apply(&mut self, delta: &UsageDelta) {
        if delta.succeeded {
            self.calls_succeeded += 1;
        } else {
            self.calls_failed += 1;
        }
        self.bytes += delta.bytes;
        self.processing_units += delta.processing_units;
        self.cost_estimate += delta.cost;
    }
}

/// Outcome of one provider call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageDelta {
    pub succeeded: bool,
    pub bytes: u64,
    pub processing_units: f64,
    pub cost: f64,
}

impl UsageDelta {
    /// A successful call billed at `cost`.
    pub fn success(cost: &CostEstimate) -> Self {
        Self {
            succeeded: true,
            bytes: cost.bytes,
            processing_units: cost.processing_units,
            cost: cost.cost,
        }
    }

    /// A failed call. Failed calls are counted but not billed.
    pub fn failure() -> Self {
        Self {
            succeeded: false,
            bytes: 0,
            processing_units: 0.0,
            cost: 0.0,
        }
    }
}

/// Units held against a tenant's budget while a call is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub(crate) id: u64,
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub processing_units: f64,
}

/// Errors from the usage daemon.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UsageError {
    #[error(
        "quota exceeded for tenant {tenant} on {date}: used {used:.3} + reserved {reserved:.3} + requested {requested:.3} > budget {budget:.3}"
    )]
    QuotaExceeded {
        tenant: TenantId,
        date: NaiveDate,
        used: f64,
        reserved: f64,
        requested: f64,
        budget: f64,
    },

    #[error("usage daemon is not running")]
    Unavailable,
}

/// All usage counters plus outstanding reservations.
///
/// Only the daemon mutates this; it is kept free of channels so the
/// accounting rules can be tested directly.
#[derive(Debug, Default)]
pub struct UsageState {
    records: HashMap<(TenantId, NaiveDate), ApiUsageRecord>,
    reserved: HashMap<(TenantId, NaiveDate), f64>,
    reservations: HashMap<u64, Reservation>,
    next_reservation: u64,
}

impl UsageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `units` against `budget` for the tenant's day.
    ///
    /// With no budget the reservation always succeeds. With a budget the
    /// call is refused once used plus reserved plus requested units would
    /// exceed it, and always once the budget is fully spent.
    pub fn reserve(
        &mut self,
        tenant: &TenantId,
        date: NaiveDate,
        units: f64,
        budget: Option<f64>,
    ) -> Result<Reservation, UsageError> {
        let key = (tenant.clone(), date);
        let used = self.records.get(&key).map_or(0.0, |r| r.processing_units);
        let reserved = self.reserved.get(&key).copied().unwrap_or(0.0);
        let units = units.max(0.0);

        if let Some(budget) = budget {
            let exhausted = used >= budget - BUDGET_EPSILON;
            if exhausted || used + reserved + units > budget + BUDGET_EPSILON {
                return Err(UsageError::QuotaExceeded {
                    tenant: tenant.clone(),
                    date,
                    used,
                    reserved,
                    requested: units,
                    budget,
                });
            }
        }

        self.next_reservation += 1;
        let reservation = Reservation {
            id: self.next_reservation,
            tenant_id: tenant.clone(),
            date,
            processing_units: units,
        };
        *self.reserved.entry(key).or_insert(0.0) += units;
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    /// Records the call behind `reservation` and releases the held units.
    pub fn settle(&mut self, reservation: &Reservation, delta: &UsageDelta) {
        self.release(reservation);
        self.record(&reservation.tenant_id, reservation.date, delta);
    }

    /// Releases held units without recording a call.
    pub fn release(&mut self, reservation: &Reservation) {
        if let Some(held) = self.reservations.remove(&reservation.id) {
            let key = (held.tenant_id, held.date);
            if let Some(total) = self.reserved.get_mut(&key) {
                *total = (*total - held.processing_units).max(0.0);
                if *total <= BUDGET_EPSILON {
                    self.reserved.remove(&key);
                }
            }
        }
    }

    /// Records a call that was not reserved.
    pub fn record(&mut self, tenant: &TenantId, date: NaiveDate, delta: &UsageDelta) {
        self.records
            .entry((tenant.clone(), date))
            .or_insert_with(|| ApiUsageRecord::empty(tenant.clone(), date))
            .apply(delta);
    }

    /// Usage for a tenant's day; zeroed when nothing was recorded.
    pub fn get(&self, tenant: &TenantId, date: NaiveDate) -> ApiUsageRecord {
        self.records
            .get(&(tenant.clone(), date))
            .cloned()
            .unwrap_or_else(|| ApiUsageRecord::empty(tenant.clone(), date))
    }

    /// Units currently held by in-flight calls.
    pub fn reserved(&self, tenant: &TenantId, date: NaiveDate) -> f64 {
        self.reserved
            .get(&(tenant.clone(), date))
            .copied()
            .unwrap_or(0.0)
    }

    /// Every record, sorted by tenant then date.
    pub fn all(&self) -> Vec<ApiUsageRecord> {
        let mut all: Vec<_> = self.records.values().cloned().collect();
        all.sort_by(|a, b| (&a.tenant_id, a.date).cmp(&(&b.tenant_id, b.date)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    fn billed(units: f64) -> UsageDelta {
        UsageDelta {
            succeeded: true,
            bytes: 100,
            processing_units: units,
            cost: units * 0.5,
        }
    }

    #[test]
    fn test_unlimited_budget_always_reserves() {
        let mut state = UsageState::new();
        for _ in 0..10 {
            let r = state.reserve(&acme(), day(), 1000.0, None).unwrap();
            state.settle(&r, &billed(1000.0));
        }
        assert_eq!(state.get(&acme(), day()).processing_units, 10_000.0);
    }

    #[test]
    fn test_budget_refuses_when_reservation_would_overrun() {
        let mut state = UsageState::new();
        let r = state.reserve(&acme(), day(), 6.0, Some(10.0)).unwrap();
        assert_eq!(state.reserved(&acme(), day()), 6.0);

        let err = state.reserve(&acme(), day(), 5.0, Some(10.0)).unwrap_err();
        assert!(matches!(err, UsageError::QuotaExceeded { reserved, .. } if reserved == 6.0));

        state.release(&r);
        assert_eq!(state.reserved(&acme(), day()), 0.0);
        assert!(state.reserve(&acme(), day(), 5.0, Some(10.0)).is_ok());
    }

    #[test]
    fn test_exhausted_budget_refuses_free_calls() {
        let mut state = UsageState::new();
        let r = state.reserve(&acme(), day(), 10.0, Some(10.0)).unwrap();
        state.settle(&r, &billed(10.0));

        assert!(matches!(
            state.reserve(&acme(), day(), 0.0, Some(10.0)),
            Err(UsageError::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn test_budget_is_per_tenant_and_day() {
        let mut state = UsageState::new();
        let r = state.reserve(&acme(), day(), 10.0, Some(10.0)).unwrap();
        state.settle(&r, &billed(10.0));

        let other = TenantId::from("globex");
        assert!(state.reserve(&other, day(), 10.0, Some(10.0)).is_ok());
        let tomorrow = day().succ_opt().unwrap();
        assert!(state.reserve(&acme(), tomorrow, 10.0, Some(10.0)).is_ok());
    }

    #[test]
    fn test_settle_counts_success_and_failure() {
        let mut state = UsageState::new();
        let a = state.reserve(&acme(), day(), 1.0, None).unwrap();
        let b = state.reserve(&acme(), day(), 1.0, None).unwrap();
        state.settle(&a, &UsageDelta::failure());
        state.settle(&b, &billed(0.8));

        let rec = state.get(&acme(), day());
        assert_eq!(rec.calls_failed, 1);
        assert_eq!(rec.calls_succeeded, 1);
        assert_eq!(rec.calls(), 2);
        assert_eq!(rec.bytes, 100);
        assert!((rec.processing_units - 0.8).abs() < 1e-12);
        assert!((rec.cost_estimate - 0.4).abs() < 1e-12);
        assert_eq!(state.reserved(&acme(), day()), 0.0);
    }

    #[test]
    fn test_get_unknown_is_zeroed() {
        let state = UsageState::new();
        let rec = state.get(&acme(), day());
        assert_eq!(rec.calls(), 0);
        assert_eq!(rec.tenant_id, acme());
    }

    #[test]
    fn test_double_release_is_harmless() {
        let mut state = UsageState::new();
        let a = state.reserve(&acme(), day(), 3.0, Some(5.0)).unwrap();
        let _b = state.reserve(&acme(), day(), 2.0, Some(5.0)).unwrap();
        state.release(&a);
        state.release(&a);
        assert_eq!(state.reserved(&acme(), day()), 2.0);
    }
}
