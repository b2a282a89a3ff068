//! Run report rendering.

use chrono::NaiveDate;
use fieldlayer::cache::{CacheEntry, CacheLookup, CacheStats};
use fieldlayer::ids::{LandId, TenantId};
use fieldlayer::ledger::Alert;
use fieldlayer::mapper::LandParcel;
use fieldlayer::queue::QueueStats;
use fieldlayer::usage::ApiUsageRecord;
use serde::Serialize;

/// Cache state of one land after the run.
#[derive(Debug, Clone, Serialize)]
pub struct LandReport {
    pub land_id: LandId,
    pub tenant_id: TenantId,
    /// `hit`, `stale` or `miss`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CacheEntry>,
}

impl LandReport {
    pub fn from_lookup(parcel: &LandParcel, lookup: CacheLookup) -> Self {
        let (status, value) = match lookup {
            CacheLookup::Hit(entry) => ("hit", Some(entry)),
            CacheLookup::Stale(entry) => ("stale", Some(entry)),
            CacheLookup::Miss => ("miss", None),
        };
        Self {
            land_id: parcel.land_id.clone(),
            tenant_id: parcel.tenant_id.clone(),
            status,
            value,
        }
    }
}

/// A land the mapper refused.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedLand {
    pub land_id: LandId,
    pub reason: String,
}

/// Everything a run prints.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: NaiveDate,
    pub lands: Vec<LandReport>,
    pub rejected: Vec<RejectedLand>,
    /// Lands too large to join any cluster.
    pub oversized_clusters: usize,
    pub usage: Vec<ApiUsageRecord>,
    pub alerts: Vec<Alert>,
    pub queue: QueueStats,
    pub cache: CacheStats,
}

impl RunReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }

    pub fn hits(&self) -> usize {
        self.lands.iter().filter(|l| l.status == "hit").count()
    }

    /// Print the full text report.
    pub fn print(&self) {
        println!();
        println!("Vegetation index for {}", self.date);
        println!(
            "  {:<16} {:<12} {:<6} {:>7} {:>7} {:>7} {:>7} {:>6}  {}",
            "LAND", "TENANT", "STATUS", "MEAN", "MIN", "MAX", "HEALTH", "CLOUD", "EXPIRES"
        );
        for land in &self.lands {
            match &land.value {
                Some(v) => println!(
                    "  {:<16} {:<12} {:<6} {:>7.3} {:>7.3} {:>7.3} {:>7.1} {:>5.1}%  {}",
                    land.land_id.to_string(),
                    land.tenant_id.to_string(),
                    land.status,
                    v.mean,
                    v.min,
                    v.max,
                    v.health_score,
                    v.cloud_cover_pct,
                    v.expires_at.format("%Y-%m-%d %H:%M")
                ),
                None => println!(
                    "  {:<16} {:<12} {:<6}",
                    land.land_id.to_string(),
                    land.tenant_id.to_string(),
                    land.status
                ),
            }
        }
        println!("  {} of {} lands cached", self.hits(), self.lands.len());

        if !self.rejected.is_empty() {
            println!();
            println!("Rejected lands:");
            for r in &self.rejected {
                println!("  {}: {}", r.land_id, r.reason);
            }
        }
        if self.oversized_clusters > 0 {
            println!(
                "  {} lands exceed the cluster area cap",
                self.oversized_clusters
            );
        }

        self.print_usage();

        println!();
        println!(
            "Queue: {} completed, {} failed, {} canceled, {} still active",
            self.queue.completed,
            self.queue.failed,
            self.queue.canceled,
            self.queue.active()
        );
        println!(
            "Cache: {} entries, {:.0}% hit rate, {} refreshes scheduled",
            self.cache.entries,
            self.cache.hit_rate() * 100.0,
            self.cache.refreshes_scheduled
        );

        if !self.alerts.is_empty() {
            println!();
            println!("Alerts:");
            for alert in &self.alerts {
                println!(
                    "  [{}] {} at {}: {}",
                    alert.raised_at.format("%H:%M:%S"),
                    alert.subject,
                    alert.step,
                    alert.error
                );
            }
        }
    }

    /// Print provider usage per tenant and day.
    pub fn print_usage(&self) {
        println!();
        println!("Provider usage:");
        if self.usage.is_empty() {
            println!("  (no provider calls)");
            return;
        }
        println!(
            "  {:<12} {:<10} {:>6} {:>6} {:>10} {:>8} {:>9}",
            "TENANT", "DATE", "OK", "FAILED", "BYTES", "UNITS", "COST"
        );
        for u in &self.usage {
            println!(
                "  {:<12} {:<10} {:>6} {:>6} {:>10} {:>8.2} {:>9.4}",
                u.tenant_id.to_string(),
                u.date,
                u.calls_succeeded,
                u.calls_failed,
                u.bytes,
                u.processing_units,
                u.cost_estimate
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlayer::coord::Polygon;

    fn parcel() -> LandParcel {
        LandParcel {
            land_id: LandId::from("L1"),
            tenant_id: TenantId::from("acme"),
            boundary: Polygon::from_lon_lat(&[
                [1.0, 44.0],
                [1.003, 44.0],
                [1.003, 44.003],
                [1.0, 44.003],
            ]),
            priority: None,
        }
    }

    #[test]
    fn test_miss_report_serializes_without_value() {
        let report = RunReport {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            lands: vec![LandReport::from_lookup(&parcel(), CacheLookup::Miss)],
            rejected: vec![RejectedLand {
                land_id: LandId::from("L9"),
                reason: "outside grid".to_string(),
            }],
            oversized_clusters: 0,
            usage: Vec::new(),
            alerts: Vec::new(),
            queue: QueueStats::default(),
            cache: CacheStats::default(),
        };

        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["lands"][0]["status"], "miss");
        assert!(json["lands"][0].get("value").is_none());
        assert_eq!(json["rejected"][0]["land_id"], "L9");
        assert_eq!(json["date"], "2024-06-01");
        assert_eq!(report.hits(), 0);
    }
}
