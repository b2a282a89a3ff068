//! Core provider types.

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::coord::BoundingBox;

/// Spectral band carried in a provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Red,
    Nir,
    /// Per-pixel cloud probability in [0, 1].
    CloudProbability,
}

impl Band {
    pub fn name(&self) -> &'static str {
        match self {
            Band::Red => "B04",
            Band::Nir => "B08",
            Band::CloudProbability => "CLP",
        }
    }
}

/// Inclusive range of acquisition dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// Range covering a single day.
    pub fn single(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryRequest {
    pub bbox: BoundingBox,
    pub dates: DateRange,
    pub bands: Vec<Band>,
    /// Output raster width in pixels.
    pub width: u32,
    /// Output raster height in pixels.
    pub height: u32,
}

impl ImageryRequest {
    /// Builds a request whose raster resolution approximates `resolution_m`
    /// metres per pixel, clamped to `[1, max_pixels]` per axis.
    pub fn for_bbox(
        bbox: BoundingBox,
        dates: DateRange,
        resolution_m: f64,
        max_pixels: u32,
    ) -> Self {
        let px = |km: f64| ((km * 1000.0 / resolution_m).ceil() as u32).clamp(1, max_pixels.max(1));
        Self {
            bbox,
            dates,
            bands: vec![Band::Red, Band::Nir, Band::CloudProbability],
            width: px(bbox.width_km()),
            height: px(bbox.height_km()),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Multi-band raster returned by a provider.
///
/// Bands are row-major, `width * height` long, with pixel (0, 0) at the
/// north-west corner of `bbox`. Reflectances are in [0, 1]; a NaN marks a
/// pixel without data.
#[derive(Debug, Clone, PartialEq)]
pub struct Imagery {
    pub width: u32,
    pub height: u32,
    pub bbox: BoundingBox,
    pub acquired_on: NaiveDate,
    pub red: Vec<f32>,
    pub nir: Vec<f32>,
    pub cloud: Vec<f32>,
    /// Scene-level cloud cover percentage as reported by the source.
    pub cloud_cover_pct: f64,
    pub source: String,
}

impl Imagery {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Geographic centre of pixel `(x, y)` as `(lat, lon)`.
    pub fn pixel_center(&self, x: u32, y: u32) -> (f64, f64) {
        let lon = self.bbox.west
            + (x as f64 + 0.5) / self.width as f64 * (self.bbox.east - self.bbox.west);
        let lat = self.bbox.north
            - (y as f64 + 0.5) / self.height as f64 * (self.bbox.north - self.bbox.south);
        (lat, lon)
    }

    /// Checks that every band has one value per pixel.
    pub fn is_consistent(&self) -> bool {
        let n = self.pixel_count();
        n > 0 && self.red.len() == n && self.nir.len() == n && self.cloud.len() == n
    }
}

/// Processing-unit and monetary cost of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub processing_units: f64,
    pub cost: f64,
    pub bytes: u64,
}

/// Successful provider response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub imagery: Imagery,
    pub cost: CostEstimate,
}

/// Normalized provider failure.
///
/// Every adapter maps its transport and API errors onto these four kinds.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("no coverage: {0}")]
    NoCoverage(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Whether a queue retry (or a fallback provider) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::AuthFailed(_) => ProviderErrorKind::AuthFailed,
            Self::NoCoverage(_) => ProviderErrorKind::NoCoverage,
            Self::Transient(_) => ProviderErrorKind::Transient,
        }
    }
}

/// Discriminant of [`ProviderError`], used in logs and scripted mocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    RateLimited,
    AuthFailed,
    NoCoverage,
    Transient,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::NoCoverage => "no_coverage",
            Self::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// Uniform interface over satellite-imagery sources.
///
/// Object safe so adapters can be registered by name and selected per tenant
/// at runtime.
pub trait ImageryProvider: Send + Sync {
    /// Registry name of this provider.
    fn name(&self) -> &str;

    /// Cost this provider would charge for `request`.
    fn estimate_cost(&self, request: &ImageryRequest) -> CostEstimate;

    /// Fetches imagery for `request`.
    fn fetch_imagery<'a>(
        &'a self,
        request: &'a ImageryRequest,
    ) -> BoxFuture<'a, Result<Fetched, ProviderError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Transient("x".into()).is_retryable());
        assert!(!ProviderError::AuthFailed("x".into()).is_retryable());
        assert!(!ProviderError::NoCoverage("x".into()).is_retryable());
    }

    #[test]
    fn test_rate_limited_display() {
        let e = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(e.to_string(), "rate limited (retry after 30s)");
        let e = ProviderError::RateLimited { retry_after: None };
        assert_eq!(e.to_string(), "rate limited");
    }

    #[test]
    fn test_request_resolution_is_clamped() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let bbox = BoundingBox::new(1.0, 44.0, 1.1, 44.1);
        let req = ImageryRequest::for_bbox(bbox, DateRange::single(day), 10.0, 512);
        assert_eq!(req.width, 512);
        assert_eq!(req.height, 512);

        let tiny = BoundingBox::new(1.0, 44.0, 1.0001, 44.0001);
        let req = ImageryRequest::for_bbox(tiny, DateRange::single(day), 10.0, 512);
        assert!(req.width >= 1 && req.width <= 2);
    }

    #[test]
    fn test_pixel_center_orientation() {
        let imagery = Imagery {
            width: 2,
            height: 2,
            bbox: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            acquired_on: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            red: vec![0.0; 4],
            nir: vec![0.0; 4],
            cloud: vec![0.0; 4],
            cloud_cover_pct: 0.0,
            source: "test".into(),
        };
        assert_eq!(imagery.pixel_center(0, 0), (1.5, 0.5));
        assert_eq!(imagery.pixel_center(1, 1), (0.5, 1.5));
        assert!(imagery.is_consistent());
    }

    #[test]
    fn test_date_range_orders_bounds() {
        let a = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let r = DateRange::new(a, b);
        assert_eq!(r.from, b);
        assert_eq!(r.to, a);
    }
}
