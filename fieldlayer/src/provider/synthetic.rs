//! Offline provider producing deterministic imagery.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::types::{CostEstimate, Fetched, Imagery, ImageryProvider, ImageryRequest, ProviderError};

/// Red reflectance used for every synthetic pixel.
const BASE_RED: f32 = 0.08;

/// Cloud probability given to pixels chosen as cloudy.
const CLOUDY_PROBABILITY: f32 = 0.9;

/// Provider that fabricates imagery locally.
///
/// Pixels carry a target NDVI with a small fixed spatial ripple, and a
/// configurable share of them is marked cloudy. Failures can be scripted
/// so callers can exercise fallback and retry paths without a network.
pub struct SyntheticProvider {
    name: String,
    ndvi: f32,
    cloud_cover_pct: f64,
    units_per_call: f64,
    cost_per_unit: f64,
    latency: Duration,
    script: Mutex<VecDeque<ProviderError>>,
    calls: AtomicU64,
}

impl SyntheticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ndvi: 0.6,
            cloud_cover_pct: 0.0,
            units_per_call: 1.0,
            cost_per_unit: 0.0,
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_ndvi(mut self, ndvi: f32) -> Self {
        self.ndvi = ndvi.clamp(-0.9, 0.9);
        self
    }

    pub fn with_cloud_cover(mut self, pct: f64) -> Self {
        self.cloud_cover_pct = pct.clamp(0.0, 100.0);
        self
    }

    pub fn with_units_per_call(mut self, units: f64) -> Self {
        self.units_per_call = units.max(0.0);
        self
    }

    pub fn with_cost_per_unit(mut self, cost: f64) -> Self {
        self.cost_per_unit = cost.max(0.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next fetch fail with `error`. Scripted failures are
    /// consumed in order.
    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().push_back(error);
    }

    /// Number of fetches attempted so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn render(&self, request: &ImageryRequest) -> Imagery {
        let n = request.pixel_count() as usize;
        let mut red = Vec::with_capacity(n);
        let mut nir = Vec::with_capacity(n);
        let mut cloud = Vec::with_capacity(n);

        for i in 0..n {
            let x = i as u32 % request.width;
            let y = i as u32 / request.width;
            let ripple = ((x + y) % 5) as f32 * 0.025 - 0.05;
            let ndvi = (self.ndvi + ripple).clamp(-0.95, 0.95);
            red.push(BASE_RED);
            nir.push((BASE_RED * (1.0 + ndvi) / (1.0 - ndvi)).min(1.0));
            let cloudy = ((i as u64).wrapping_mul(7919) % 100) < self.cloud_cover_pct as u64;
            cloud.push(if cloudy { CLOUDY_PROBABILITY } else { 0.0 });
        }

        Imagery {
            width: request.width,
            height: request.height,
            bbox: request.bbox,
            acquired_on: request.dates.to,
            red,
            nir,
            cloud,
            cloud_cover_pct: self.cloud_cover_pct,
            source: self.name.clone(),
        }
    }

    async fn fetch(&self, request: &ImageryRequest) -> Result<Fetched, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        if request.pixel_count() == 0 {
            return Err(ProviderError::NoCoverage("empty raster requested".to_string()));
        }

        let imagery = self.render(request);
        let mut cost = self.estimate_cost(request);
        cost.bytes = imagery.pixel_count() as u64 * 4;
        Ok(Fetched { imagery, cost })
    }
}

impl ImageryProvider for SyntheticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate_cost(&self, _request: &ImageryRequest) -> CostEstimate {
        CostEstimate {
            processing_units: self.units_per_call,
            cost: self.units_per_call * self.cost_per_unit,
            bytes: 0,
        }
    }

    fn fetch_imagery<'a>(
        &'a self,
        request: &'a ImageryRequest,
    ) -> BoxFuture<'a, Result<Fetched, ProviderError>> {
        self.fetch(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BoundingBox;
    use crate::provider::types::{Band, DateRange};
    use chrono::NaiveDate;

    fn request() -> ImageryRequest {
        ImageryRequest {
            bbox: BoundingBox::new(1.0, 44.0, 1.01, 44.01),
            dates: DateRange::single(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            bands: vec![Band::Red, Band::Nir, Band::CloudProbability],
            width: 10,
            height: 10,
        }
    }

    #[tokio::test]
    async fn test_imagery_is_deterministic() {
        let p = SyntheticProvider::new("synthetic").with_ndvi(0.6);
        let a = p.fetch_imagery(&request()).await.unwrap();
        let b = p.fetch_imagery(&request()).await.unwrap();
        assert_eq!(a.imagery, b.imagery);
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn test_ndvi_close_to_target() {
        let p = SyntheticProvider::new("synthetic").with_ndvi(0.6);
        let img = p.fetch_imagery(&request()).await.unwrap().imagery;
        let mean: f32 = img
            .red
            .iter()
            .zip(&img.nir)
            .map(|(r, n)| (n - r) / (n + r))
            .sum::<f32>()
            / img.pixel_count() as f32;
        assert!((mean - 0.6).abs() < 0.02, "mean ndvi {}", mean);
    }

    #[tokio::test]
    async fn test_cloud_share_matches_cover() {
        let p = SyntheticProvider::new("synthetic").with_cloud_cover(30.0);
        let img = p.fetch_imagery(&request()).await.unwrap().imagery;
        let cloudy = img.cloud.iter().filter(|c| **c > 0.5).count();
        assert_eq!(cloudy, 30);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let p = SyntheticProvider::new("synthetic");
        p.push_failure(ProviderError::RateLimited { retry_after: None });
        p.push_failure(ProviderError::Transient("boom".into()));

        assert!(matches!(
            p.fetch_imagery(&request()).await,
            Err(ProviderError::RateLimited { .. })
        ));
        assert!(matches!(
            p.fetch_imagery(&request()).await,
            Err(ProviderError::Transient(_))
        ));
        assert!(p.fetch_imagery(&request()).await.is_ok());
    }

    #[test]
    fn test_cost_uses_units_per_call() {
        let p = SyntheticProvider::new("s")
            .with_units_per_call(2.5)
            .with_cost_per_unit(0.1);
        let c = p.estimate_cost(&request());
        assert_eq!(c.processing_units, 2.5);
        assert!((c.cost - 0.25).abs() < 1e-12);
    }
}
