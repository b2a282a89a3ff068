//! Coordinate type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum latitude representable in Web Mercator
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude representable in Web Mercator
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum longitude
pub const MIN_LON: f64 = -180.0;

/// Maximum longitude
pub const MAX_LON: f64 = 180.0;

/// Minimum zoom level
pub const MIN_ZOOM: u8 = 0;

/// Maximum zoom level accepted for grid tiles
pub const MAX_ZOOM: u8 = 18;

/// Kilometres per degree of latitude.
pub const KM_PER_DEG_LAT: f64 = 110.574;

/// Kilometres per degree of longitude at the equator.
pub const KM_PER_DEG_LON_EQUATOR: f64 = 111.320;

/// Web Mercator tile coordinates.
///
/// Used as the identifier of a [`GridTile`](crate::grid::GridTile) and as an
/// acquisition target. Ordering is row-major so that sorted tile lists read
/// north-to-south, west-to-east.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub zoom: u8,
    /// Tile row (Y coordinate)
    pub row: u32,
    /// Tile column (X coordinate)
    pub col: u32,
}

impl TileCoord {
    /// Creates a tile coordinate, validating it against its zoom level.
    pub fn new(row: u32, col: u32, zoom: u8) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let n = 1u32 << zoom;
        if row >= n || col >= n {
            return Err(CoordError::TileOutOfRange { row, col, zoom });
        }
        Ok(Self { row, col, zoom })
    }

    /// Returns the eight-connected neighbours that exist at this zoom.
    pub fn neighbours(&self) -> Vec<TileCoord> {
        let n = 1i64 << self.zoom;
        let mut out = Vec::with_capacity(8);
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = self.row as i64 + dr;
                let c = self.col as i64 + dc;
                if (0..n).contains(&r) && (0..n).contains(&c) {
                    out.push(TileCoord {
                        row: r as u32,
                        col: c as u32,
                        zoom: self.zoom,
                    });
                }
            }
        }
        out
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.row, self.col)
    }
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both components are finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

/// Axis-aligned bounding box in degrees.
///
/// Boxes never cross the antimeridian; `west <= east` and `south <= north`
/// always hold for boxes built through [`BoundingBox::new`] or
/// [`BoundingBox::from_points`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Creates a box from its edges, normalizing swapped edges.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west: west.min(east),
            south: south.min(north),
            east: west.max(east),
            north: south.max(north),
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            west: first.lon,
            south: first.lat,
            east: first.lon,
            north: first.lat,
        };
        for p in iter {
            bbox.west = bbox.west.min(p.lon);
            bbox.east = bbox.east.max(p.lon);
            bbox.south = bbox.south.min(p.lat);
            bbox.north = bbox.north.max(p.lat);
        }
        Some(bbox)
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    /// Whether the boxes overlap (touching edges count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    /// Whether the point lies inside or on the edge of this box.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        (self.west..=self.east).contains(&p.lon) && (self.south..=self.north).contains(&p.lat)
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }

    /// East-west extent in kilometres, measured at the box's mid latitude.
    pub fn width_km(&self) -> f64 {
        let mid_lat = ((self.south + self.north) / 2.0).to_radians();
        (self.east - self.west) * KM_PER_DEG_LON_EQUATOR * mid_lat.cos()
    }

    /// North-south extent in kilometres.
    pub fn height_km(&self) -> f64 {
        (self.north - self.south) * KM_PER_DEG_LAT
    }

    /// Approximate area in square kilometres.
    pub fn area_km2(&self) -> f64 {
        self.width_km() * self.height_km()
    }
}

/// Errors that can occur during coordinate conversion or geometry validation.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range
    InvalidLatitude(f64),
    /// Longitude outside -180..=180
    InvalidLongitude(f64),
    /// Zoom level above [`MAX_ZOOM`]
    InvalidZoom(u8),
    /// Row or column outside the tile count at the zoom level
    TileOutOfRange { row: u32, col: u32, zoom: u8 },
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::InvalidLatitude(lat) => {
                write!(f, "Invalid latitude: {} (must be between {} and {})", lat, MIN_LAT, MAX_LAT)
            }
            CoordError::InvalidLongitude(lon) => {
                write!(f, "Invalid longitude: {} (must be between {} and {})", lon, MIN_LON, MAX_LON)
            }
            CoordError::InvalidZoom(zoom) => {
                write!(f, "Invalid zoom level: {} (must be between {} and {})", zoom, MIN_ZOOM, MAX_ZOOM)
            }
            CoordError::TileOutOfRange { row, col, zoom } => {
                write!(f, "Tile {}/{} out of range at zoom {}", row, col, zoom)
            }
        }
    }
}

impl std::error::Error for CoordError {}
