//! Mapper data types and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::{BoundingBox, GeoPoint, Polygon, PolygonError, TileCoord};
use crate::ids::{LandId, TenantId};

/// A land parcel as submitted by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandParcel {
    pub land_id: LandId,
    pub tenant_id: TenantId,
    pub boundary: Polygon,
    /// Explicit refresh priority requested for this land, if any.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Authoritative placement and freshness record for one land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandTileMapping {
    pub land_id: LandId,
    pub tenant_id: TenantId,
    pub boundary: Polygon,
    pub bbox: BoundingBox,
    pub centroid: GeoPoint,
    pub area_km2: f64,
    /// Tile containing the centroid.
    pub primary_tile: TileCoord,
    /// Every covered tile the boundary intersects, primary included, sorted.
    pub tiles: Vec<TileCoord>,
    pub last_index_value: Option<f64>,
    pub cache_expiry: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub requested_priority: Option<i32>,
    pub boundary_fingerprint: String,
    /// Incremented every time the boundary changes.
    pub revision: u64,
    pub mapped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LandTileMapping {
    /// Whether this land is due for acquisition at `now`.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.needs_refresh || self.cache_expiry.map_or(true, |expiry| expiry < now)
    }
}

/// What `map_land` did to the stored mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    /// First mapping for this land.
    Created,
    /// Boundary changed; previous mapping superseded.
    Updated,
    /// Same boundary as the stored mapping; nothing written.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct MapOutcome {
    pub mapping: LandTileMapping,
    pub change: MapChange,
}

/// Errors from mapping a land onto the grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("land {land_id}: invalid geometry: {reason}")]
    GeometryInvalid {
        land_id: LandId,
        #[source]
        reason: PolygonError,
    },

    #[error("land {land_id}: no grid tile covers centroid ({}, {})", .centroid.lat, .centroid.lon)]
    NoTileFound { land_id: LandId, centroid: GeoPoint },
}

#[cfg(test)]
impl LandTileMapping {
    /// Square parcel with its lower-left corner at (`lat`, `lon`), mapped to
    /// the zoom-12 tile under its centroid.
    pub(crate) fn for_test(id: &str, tenant: &str, lat: f64, lon: f64, size: f64) -> Self {
        let boundary = Polygon::from_lon_lat(&[
            [lon, lat],
            [lon + size, lat],
            [lon + size, lat + size],
            [lon, lat + size],
        ]);
        let bbox = boundary.bbox().unwrap();
        let centroid = boundary.centroid().unwrap();
        let tile = crate::coord::to_tile_coords(centroid.lat, centroid.lon, 12).unwrap();
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 6, 1, 0, 0, 0).unwrap();
        Self {
            land_id: LandId::from(id),
            tenant_id: TenantId::from(tenant),
            area_km2: boundary.area_km2(),
            boundary_fingerprint: boundary.fingerprint(),
            boundary,
            bbox,
            centroid,
            primary_tile: tile,
            tiles: vec![tile],
            last_index_value: None,
            cache_expiry: None,
            needs_refresh: true,
            requested_priority: None,
            revision: 1,
            mapped_at: now,
            updated_at: now,
        }
    }
}
