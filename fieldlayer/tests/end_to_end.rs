//! End-to-end tests for the FieldLayer service.
//!
//! These tests drive the full pipeline through the facade:
//! - Lands are mapped, clustered, acquired, computed and cached
//! - Cached values expire on the configured TTL and are re-clustered
//! - A rate-limited provider falls back to the tenant's secondary
//! - A changed boundary invalidates cached values

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};

use fieldlayer::cache::CacheLookup;
use fieldlayer::config::ConfigFile;
use fieldlayer::coord::{BoundingBox, Polygon};
use fieldlayer::ids::{LandId, TenantId};
use fieldlayer::mapper::{LandParcel, MapChange};
use fieldlayer::provider::{ProviderError, SyntheticProvider};
use fieldlayer::queue::Priority;
use fieldlayer::service::FieldLayerService;
use fieldlayer::time::{Clock, ManualClock};

// =============================================================================
// Test Helpers
// =============================================================================

const TENANT: &str = "farm-co";

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ))
}

/// A square parcel of `size` degrees with its southwest corner at (lat, lon).
fn parcel(id: &str, lat: f64, lon: f64, size: f64) -> LandParcel {
    LandParcel {
        land_id: LandId::from(id),
        tenant_id: TenantId::from(TENANT),
        boundary: Polygon::from_lon_lat(&[
            [lon, lat],
            [lon + size, lat],
            [lon + size, lat + size],
            [lon, lat + size],
        ]),
        priority: None,
    }
}

/// Five neighbouring lands a few hundred metres apart.
fn village() -> Vec<LandParcel> {
    (0..5)
        .map(|i| {
            let offset = i as f64 * 0.004;
            parcel(&format!("land-{}", i), 44.0 + offset, 1.0 + offset, 0.003)
        })
        .collect()
}

fn region() -> BoundingBox {
    BoundingBox::new(0.9, 43.9, 1.2, 44.2)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lands_cluster_acquire_cache_and_expire() {
    let clock = clock();
    let provider = Arc::new(SyntheticProvider::new("synthetic").with_ndvi(0.6));
    let mut service = FieldLayerService::builder(ConfigFile::default())
        .with_clock(clock.clone())
        .with_provider(provider.clone())
        .build()
        .unwrap();
    service.generate_grid(&[region()]).unwrap();

    let lands = village();
    for land in &lands {
        assert_eq!(service.register_land(land).unwrap().change, MapChange::Created);
    }

    service.start();
    let report = service.build_clusters();
    assert_eq!(report.enqueued.len(), 1, "neighbouring lands share one cluster");
    let (cluster, outcome) = &report.enqueued[0];
    assert_eq!(cluster.land_ids.len(), 5);
    assert_eq!(outcome.priority, Priority::MAX, "never-cached lands are urgent");

    assert!(service.wait_idle(StdDuration::from_secs(10)).await);
    assert_eq!(provider.calls(), 1, "one acquisition serves the whole cluster");

    let now = clock.now();
    for land in &lands {
        match service.get(&land.land_id, None) {
            CacheLookup::Hit(entry) => {
                assert!(entry.date <= clock.today());
                assert!(entry.mean > 0.0 && entry.mean <= 1.0);
                assert!(entry.min <= entry.mean && entry.mean <= entry.max);
                assert_eq!(entry.expires_at - now, Duration::days(5), "clear scene TTL");
            }
            other => panic!("expected hit for {}, got {:?}", land.land_id, other),
        }
    }
    assert_eq!(service.queue_stats().completed, 1);
    assert!(service.alerts().is_empty());

    // Stop the scheduler so the next pass is observed deterministically.
    service.shutdown().await.unwrap();

    clock.advance(Duration::days(6));
    for land in &lands {
        assert!(service.get(&land.land_id, None).is_miss());
    }

    let again = service.build_clusters();
    assert_eq!(again.enqueued.len(), 1);
    let (cluster, outcome) = &again.enqueued[0];
    assert_eq!(cluster.land_ids.len(), 5);
    assert_ne!(outcome.id, report.enqueued[0].1.id);
    assert!(outcome.priority >= Priority::EXPIRED_BASE);
    assert!(outcome.priority < Priority::MAX);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rate_limited_provider_falls_back_to_secondary() {
    let mut config = ConfigFile::default();
    config.provider.preferred = "alpha".to_string();
    config.provider.secondary = Some("beta".to_string());
    config.provider.fallback = true;

    let alpha = Arc::new(SyntheticProvider::new("alpha"));
    alpha.push_failure(ProviderError::RateLimited { retry_after: None });
    let beta = Arc::new(SyntheticProvider::new("beta").with_units_per_call(2.0));

    let clock = clock();
    let mut service = FieldLayerService::builder(config)
        .with_clock(clock.clone())
        .with_provider(alpha.clone())
        .with_provider(beta.clone())
        .build()
        .unwrap();
    service.generate_grid(&[region()]).unwrap();

    let land = parcel("solo", 44.0, 1.0, 0.003);
    service.register_land(&land).unwrap();
    service.start();
    service.build_clusters();
    assert!(service.wait_idle(StdDuration::from_secs(10)).await);

    assert!(service.get(&land.land_id, None).is_hit());
    assert_eq!(alpha.calls(), 1);
    assert_eq!(beta.calls(), 1);

    let usage = service
        .get_usage(&TenantId::from(TENANT), clock.today())
        .await
        .unwrap();
    assert_eq!(usage.calls_failed, 1);
    assert_eq!(usage.calls_succeeded, 1);
    assert_eq!(usage.processing_units, 2.0, "only the served call is billed");

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_boundary_change_invalidates_cache() {
    let clock = clock();
    let mut service = FieldLayerService::builder(ConfigFile::default())
        .with_clock(clock.clone())
        .with_provider(Arc::new(SyntheticProvider::new("synthetic")))
        .build()
        .unwrap();
    service.generate_grid(&[region()]).unwrap();

    let land = parcel("moving", 44.0, 1.0, 0.003);
    service.register_land(&land).unwrap();
    service.start();
    service.build_clusters();
    assert!(service.wait_idle(StdDuration::from_secs(10)).await);
    assert!(service.get(&land.land_id, None).is_hit());
    service.shutdown().await.unwrap();

    let moved = parcel("moving", 44.01, 1.01, 0.004);
    assert_eq!(service.register_land(&moved).unwrap().change, MapChange::Updated);
    assert!(service.get(&land.land_id, None).is_miss());
    assert_eq!(service.build_clusters().enqueued.len(), 1);
}

#[tokio::test]
async fn test_queue_snapshot_survives_restart() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = ConfigFile::default();
    config.queue.snapshot = Some(temp.path().join("queue.json"));

    let mut first = FieldLayerService::builder(config.clone())
        .with_clock(clock())
        .build()
        .unwrap();
    first.generate_grid(&[region()]).unwrap();
    for land in village() {
        first.register_land(&land).unwrap();
    }
    let report = first.build_clusters();
    let id = report.enqueued[0].1.id;
    // Workers never started, so the entry is still queued at shutdown.
    first.shutdown().await.unwrap();
    drop(first);

    let mut second = FieldLayerService::builder(config)
        .with_clock(clock())
        .build()
        .unwrap();
    let restored = second.queue().get(id).expect("entry restored from snapshot");
    assert_eq!(restored.land_ids.len(), 5);
    assert_eq!(restored.priority, Priority::MAX);
    assert_eq!(second.queue_stats().active(), 1);

    // The restored entry still owns its lands; only the newcomer is planned.
    second.generate_grid(&[region()]).unwrap();
    let mut lands = village();
    lands.push(parcel("land-5", 44.022, 1.022, 0.003));
    for land in &lands {
        second.register_land(land).unwrap();
    }
    let rebuilt = second.build_clusters();
    assert_eq!(rebuilt.enqueued.len(), 1);
    assert_eq!(rebuilt.enqueued[0].0.land_ids, vec![LandId::from("land-5")]);

    let entries = second.queue().entries();
    for land in &lands {
        let holders = entries
            .iter()
            .filter(|e| !e.status.is_terminal() && e.land_ids.contains(&land.land_id))
            .count();
        assert_eq!(holders, 1, "{} held by {} active entries", land.land_id, holders);
    }
    second.shutdown().await.unwrap();
}
