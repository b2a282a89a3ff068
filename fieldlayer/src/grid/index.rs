//! TileGrid: in-memory grid hash keyed by tile coordinate.
//!
//! # ACID Properties
//!
//! - **Atomicity**: `populate()` builds the new map outside the lock, swaps atomically
//! - **Consistency**: Readers see either the old grid or the new one, never a mix
//! - **Isolation**: Flag updates lock a single `DashMap` shard

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::tile::GridTile;
use crate::coord::{to_tile_coords, tiles_covering, BoundingBox, GeoPoint, TileCoord};

/// Thread-safe grid of [`GridTile`]s at a single zoom level.
pub struct TileGrid {
    zoom: u8,
    tiles: RwLock<Arc<DashMap<TileCoord, GridTile>>>,
}

impl TileGrid {
    /// Creates an empty grid at `zoom`.
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom,
            tiles: RwLock::new(Arc::new(DashMap::new())),
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    fn map(&self) -> Arc<DashMap<TileCoord, GridTile>> {
        Arc::clone(&*self.tiles.read())
    }

    /// Atomic bulk population: replaces the whole grid.
    ///
    /// Tiles at a different zoom are ignored.
    pub fn populate(&self, tiles: impl IntoIterator<Item = GridTile>) {
        let new_map = DashMap::new();
        for tile in tiles {
            if tile.coord.zoom == self.zoom {
                new_map.insert(tile.coord, tile);
            }
        }
        let count = new_map.len();
        *self.tiles.write() = Arc::new(new_map);
        debug!(zoom = self.zoom, tiles = count, "Grid populated");
    }

    /// Inserts or replaces a single tile.
    pub fn insert(&self, tile: GridTile) {
        if tile.coord.zoom == self.zoom {
            self.map().insert(tile.coord, tile);
        }
    }

    pub fn get(&self, coord: &TileCoord) -> Option<GridTile> {
        let map = self.map();
        let tile = map.get(coord).map(|entry| entry.value().clone());
        tile
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.map().contains_key(coord)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid tile containing `point`, if the grid covers it.
    pub fn tile_at(&self, point: &GeoPoint) -> Option<TileCoord> {
        let coord = to_tile_coords(point.lat, point.lon, self.zoom).ok()?;
        self.contains(&coord).then_some(coord)
    }

    /// Covered tiles whose bounds intersect `bbox`, sorted.
    pub fn tiles_intersecting(&self, bbox: &BoundingBox) -> Vec<TileCoord> {
        let Ok(candidates) = tiles_covering(bbox, self.zoom) else {
            return Vec::new();
        };
        let map = self.map();
        candidates
            .into_iter()
            .filter(|c| map.contains_key(c))
            .collect()
    }

    /// Records one more land in `coord`.
    ///
    /// Flags the tile land-containing and agricultural. Returns `true` when the
    /// tile was not agricultural before this call.
    pub fn add_land(&self, coord: &TileCoord, now: DateTime<Utc>) -> bool {
        let map = self.map();
        let Some(mut tile) = map.get_mut(coord) else {
            return false;
        };
        let newly_agricultural = !tile.is_agricultural;
        tile.is_agricultural = true;
        tile.is_land_containing = true;
        tile.agricultural_checked_at = Some(now);
        tile.land_count += 1;
        newly_agricultural
    }

    /// Records one fewer land in `coord`.
    ///
    /// The agricultural flag is sticky; only the land-containing flag follows
    /// the count back to zero.
    pub fn remove_land(&self, coord: &TileCoord) {
        let map = self.map();
        if let Some(mut tile) = map.get_mut(coord) {
            tile.land_count = tile.land_count.saturating_sub(1);
            if tile.land_count == 0 {
                tile.is_land_containing = false;
            }
        };
    }

    /// Marks a tile's index as computed at `now`.
    pub fn mark_index_ready(&self, coord: &TileCoord, now: DateTime<Utc>) {
        let map = self.map();
        if let Some(mut tile) = map.get_mut(coord) {
            tile.is_index_ready = true;
            tile.index_checked_at = Some(now);
        };
    }

    /// Coordinates of all agricultural tiles, sorted.
    pub fn agricultural_tiles(&self) -> Vec<TileCoord> {
        let mut coords: Vec<TileCoord> = self
            .map()
            .iter()
            .filter(|entry| entry.is_agricultural)
            .map(|entry| *entry.key())
            .collect();
        coords.sort_unstable();
        coords
    }
}

impl std::fmt::Debug for TileGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileGrid")
            .field("zoom", &self.zoom)
            .field("tiles", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridGenerator;
    use chrono::TimeZone;

    fn grid() -> TileGrid {
        let grid = TileGrid::new(12);
        grid.populate(
            GridGenerator::new(12)
                .generate(&[BoundingBox::new(0.9, 43.9, 1.2, 44.1)])
                .unwrap(),
        );
        grid
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_tile_at_inside_and_outside_coverage() {
        let grid = grid();
        assert!(grid.tile_at(&GeoPoint::new(44.0, 1.0)).is_some());
        assert!(grid.tile_at(&GeoPoint::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn test_add_land_flags_tile_once() {
        let grid = grid();
        let coord = grid.tile_at(&GeoPoint::new(44.0, 1.0)).unwrap();

        assert!(grid.add_land(&coord, now()));
        assert!(!grid.add_land(&coord, now()));

        let tile = grid.get(&coord).unwrap();
        assert!(tile.is_agricultural);
        assert!(tile.is_land_containing);
        assert_eq!(tile.land_count, 2);
        assert_eq!(grid.agricultural_tiles(), vec![coord]);
    }

    #[test]
    fn test_remove_land_clears_containing_flag_at_zero() {
        let grid = grid();
        let coord = grid.tile_at(&GeoPoint::new(44.0, 1.0)).unwrap();
        grid.add_land(&coord, now());
        grid.remove_land(&coord);
        grid.remove_land(&coord);

        let tile = grid.get(&coord).unwrap();
        assert_eq!(tile.land_count, 0);
        assert!(!tile.is_land_containing);
        assert!(tile.is_agricultural);
    }

    #[test]
    fn test_populate_replaces_grid() {
        let grid = grid();
        assert!(grid.len() > 1);
        grid.populate(vec![GridTile::new(TileCoord::new(0, 0, 12).unwrap())]);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_populate_skips_other_zoom() {
        let grid = TileGrid::new(12);
        grid.populate(vec![GridTile::new(TileCoord::new(0, 0, 3).unwrap())]);
        assert!(grid.is_empty());
    }

    #[test]
    fn test_tiles_intersecting_filters_uncovered() {
        let grid = grid();
        let inside = grid.tiles_intersecting(&BoundingBox::new(0.99, 43.99, 1.01, 44.01));
        assert_eq!(inside.len(), 1);
        let outside = grid.tiles_intersecting(&BoundingBox::new(5.0, 5.0, 5.01, 5.01));
        assert!(outside.is_empty());
    }

    #[test]
    fn test_mark_index_ready() {
        let grid = grid();
        let coord = grid.tile_at(&GeoPoint::new(44.0, 1.0)).unwrap();
        grid.mark_index_ready(&coord, now());
        let tile = grid.get(&coord).unwrap();
        assert!(tile.is_index_ready);
        assert_eq!(tile.index_checked_at, Some(now()));
    }
}
