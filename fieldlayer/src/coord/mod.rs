//! Coordinate conversion and parcel geometry
//!
//! Converts between geographic coordinates and the Web Mercator tiles that
//! make up the grid, and validates the boundary polygons of land parcels.

mod polygon;
mod types;

pub use polygon::{Polygon, PolygonError};
pub use types::{
    BoundingBox, CoordError, GeoPoint, TileCoord, KM_PER_DEG_LAT, KM_PER_DEG_LON_EQUATOR, MAX_LAT,
    MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Converts geographic coordinates to tile coordinates.
///
/// Longitude 180 is folded into the last column rather than rejected.
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let n = 2.0_f64.powi(zoom as i32);
    let max_index = (1u32 << zoom) - 1;

    let col = (((lon + 180.0) / 360.0 * n) as u32).min(max_index);

    let lat_rad = lat * PI / 180.0;
    let row = (((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32).min(max_index);

    Ok(TileCoord { row, col, zoom })
}

/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);
    let lon = tile.col as f64 / n * 360.0 - 180.0;
    let y = tile.row as f64 / n;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan() * 180.0 / PI;
    (lat, lon)
}

/// Geographic bounds of a tile.
pub fn tile_bounds(tile: &TileCoord) -> BoundingBox {
    let (north, west) = tile_to_lat_lon(tile);
    let (south, east) = tile_to_lat_lon(&TileCoord {
        row: tile.row + 1,
        col: tile.col + 1,
        zoom: tile.zoom,
    });
    BoundingBox {
        west,
        south,
        east,
        north,
    }
}

/// Every tile at `zoom` whose bounds intersect `bbox`.
///
/// The box is clamped to the Web Mercator latitude range first.
pub fn tiles_covering(bbox: &BoundingBox, zoom: u8) -> Result<Vec<TileCoord>, CoordError> {
    let north = bbox.north.clamp(MIN_LAT, MAX_LAT);
    let south = bbox.south.clamp(MIN_LAT, MAX_LAT);
    let nw = to_tile_coords(north, bbox.west, zoom)?;
    let se = to_tile_coords(south, bbox.east, zoom)?;

    let mut tiles = Vec::with_capacity(((se.row - nw.row + 1) * (se.col - nw.col + 1)) as usize);
    for row in nw.row..=se.row {
        for col in nw.col..=se.col {
            tiles.push(TileCoord { row, col, zoom });
        }
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests;
