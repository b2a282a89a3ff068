//! Land boundary polygons.
//!
//! A boundary is a single outer ring of `[lon, lat]` vertices as it arrives
//! from the platform (GeoJSON order). Rings may or may not repeat the first
//! vertex at the end. Deserialization never rejects a ring; callers run
//! [`Polygon::validate`] before trusting the geometry.

use super::types::{BoundingBox, GeoPoint, KM_PER_DEG_LAT, KM_PER_DEG_LON_EQUATOR};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Vertices are quantized to this many units per degree when fingerprinting.
const FINGERPRINT_SCALE: f64 = 1e7;

/// Signed areas (in square degrees) below this are treated as zero.
const DEGENERATE_AREA_DEG2: f64 = 1e-12;

/// Reasons a boundary is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolygonError {
    #[error("boundary needs at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),

    #[error("vertex {index} is not a valid coordinate ({lat}, {lon})")]
    InvalidVertex { index: usize, lat: f64, lon: f64 },

    #[error("boundary encloses no area")]
    Degenerate,

    #[error("boundary edges {first} and {second} intersect")]
    SelfIntersecting { first: usize, second: usize },
}

/// Outer ring of a land parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct Polygon {
    vertices: Vec<GeoPoint>,
}

impl From<Vec<[f64; 2]>> for Polygon {
    fn from(ring: Vec<[f64; 2]>) -> Self {
        Self::from_lon_lat(&ring)
    }
}

impl From<Polygon> for Vec<[f64; 2]> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices.iter().map(|p| [p.lon, p.lat]).collect()
    }
}

impl Polygon {
    /// Builds a ring from points, dropping a closing vertex and consecutive
    /// duplicates.
    pub fn new(points: Vec<GeoPoint>) -> Self {
        let mut vertices: Vec<GeoPoint> = Vec::with_capacity(points.len());
        for p in points {
            if vertices.last() != Some(&p) {
                vertices.push(p);
            }
        }
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        Self { vertices }
    }

    /// Builds a ring from GeoJSON-ordered `[lon, lat]` pairs.
    pub fn from_lon_lat(ring: &[[f64; 2]]) -> Self {
        Self::new(ring.iter().map(|[lon, lat]| GeoPoint::new(*lat, *lon)).collect())
    }

    /// Axis-aligned rectangle as a polygon.
    pub fn rectangle(bbox: &BoundingBox) -> Self {
        Self::new(vec![
            GeoPoint::new(bbox.south, bbox.west),
            GeoPoint::new(bbox.south, bbox.east),
            GeoPoint::new(bbox.north, bbox.east),
            GeoPoint::new(bbox.north, bbox.west),
        ])
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    /// Checks vertex count, coordinate ranges, enclosed area and
    /// self-intersection.
    pub fn validate(&self) -> Result<(), PolygonError> {
        let n = self.vertices.len();
        if n < 3 {
            return Err(PolygonError::TooFewVertices(n));
        }
        for (index, p) in self.vertices.iter().enumerate() {
            if !p.is_valid() {
                return Err(PolygonError::InvalidVertex {
                    index,
                    lat: p.lat,
                    lon: p.lon,
                });
            }
        }
        if self.signed_area_deg2().abs() < DEGENERATE_AREA_DEG2 {
            return Err(PolygonError::Degenerate);
        }
        for i in 0..n {
            // Edges i and i+1 share a vertex; the last edge shares one with edge 0.
            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    continue;
                }
                let (a1, a2) = self.edge(i);
                let (b1, b2) = self.edge(j);
                if segments_intersect(a1, a2, b1, b2) {
                    return Err(PolygonError::SelfIntersecting {
                        first: i,
                        second: j,
                    });
                }
            }
        }
        Ok(())
    }

    /// Bounding box of the ring, or `None` when it has no vertices.
    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.vertices)
    }

    /// Area-weighted centroid of the enclosed region.
    ///
    /// Falls back to the vertex mean when the ring encloses no area.
    pub fn centroid(&self) -> Option<GeoPoint> {
        if self.vertices.is_empty() {
            return None;
        }
        let area = self.signed_area_deg2();
        if area.abs() < DEGENERATE_AREA_DEG2 {
            let n = self.vertices.len() as f64;
            let lat = self.vertices.iter().map(|p| p.lat).sum::<f64>() / n;
            let lon = self.vertices.iter().map(|p| p.lon).sum::<f64>() / n;
            return Some(GeoPoint::new(lat, lon));
        }

        let origin = self.vertices[0];
        let (mut cx, mut cy) = (0.0, 0.0);
        for i in 0..self.vertices.len() {
            let (a, b) = self.edge(i);
            let (x0, y0) = (a.lon - origin.lon, a.lat - origin.lat);
            let (x1, y1) = (b.lon - origin.lon, b.lat - origin.lat);
            let cross = x0 * y1 - x1 * y0;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }
        Some(GeoPoint::new(
            origin.lat + cy / (6.0 * area),
            origin.lon + cx / (6.0 * area),
        ))
    }

    /// Enclosed area in square kilometres, using a local equirectangular
    /// projection at the ring's mean latitude.
    pub fn area_km2(&self) -> f64 {
        if self.vertices.len() < 3 {
            return 0.0;
        }
        let mean_lat =
            self.vertices.iter().map(|p| p.lat).sum::<f64>() / self.vertices.len() as f64;
        let kx = KM_PER_DEG_LON_EQUATOR * mean_lat.to_radians().cos();
        (self.signed_area_deg2() * kx * KM_PER_DEG_LAT).abs()
    }

    /// Ray-casting point-in-polygon test.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            if (vi.lat > p.lat) != (vj.lat > p.lat) {
                let x = (vj.lon - vi.lon) * (p.lat - vi.lat) / (vj.lat - vi.lat) + vi.lon;
                if p.lon < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Whether the enclosed region overlaps the rectangle.
    pub fn intersects_bbox(&self, bbox: &BoundingBox) -> bool {
        let Some(own) = self.bbox() else {
            return false;
        };
        if !own.intersects(bbox) {
            return false;
        }
        if self.vertices.iter().any(|p| bbox.contains(p)) {
            return true;
        }
        let rect = Polygon::rectangle(bbox);
        if rect.vertices.iter().any(|c| self.contains(c)) {
            return true;
        }
        (0..self.vertices.len()).any(|i| {
            let (a1, a2) = self.edge(i);
            (0..4).any(|k| {
                let (b1, b2) = rect.edge(k);
                segments_intersect(a1, a2, b1, b2)
            })
        })
    }

    /// Stable hex digest of the quantized ring.
    ///
    /// Two rings with the same vertices in the same order produce the same
    /// fingerprint regardless of float noise below 1e-7 degrees.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for p in &self.vertices {
            hasher.update(((p.lat * FINGERPRINT_SCALE).round() as i64).to_le_bytes());
            hasher.update(((p.lon * FINGERPRINT_SCALE).round() as i64).to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn edge(&self, i: usize) -> (GeoPoint, GeoPoint) {
        let n = self.vertices.len();
        (self.vertices[i], self.vertices[(i + 1) % n])
    }

    /// Shoelace area in square degrees (positive when counter-clockwise).
    fn signed_area_deg2(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let origin = self.vertices[0];
        let mut sum = 0.0;
        for i in 0..n {
            let (a, b) = self.edge(i);
            sum += (a.lon - origin.lon) * (b.lat - origin.lat)
                - (b.lon - origin.lon) * (a.lat - origin.lat);
        }
        sum / 2.0
    }
}

fn orientation(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: GeoPoint, b: GeoPoint, p: GeoPoint) -> bool {
    p.lon >= a.lon.min(b.lon)
        && p.lon <= a.lon.max(b.lon)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

/// Segment intersection including touching and collinear overlap.
fn segments_intersect(p1: GeoPoint, p2: GeoPoint, q1: GeoPoint, q2: GeoPoint) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}
