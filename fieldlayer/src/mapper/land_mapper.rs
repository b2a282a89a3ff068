//! Boundary → grid resolution.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use super::store::MappingStore;
use super::types::{LandParcel, LandTileMapping, MapChange, MapOutcome, MappingError};
use crate::coord::TileCoord;
use crate::grid::TileGrid;
use crate::ids::LandId;
use crate::time::Clock;

/// Maps land parcels onto the tile grid and keeps tile land counts in step.
pub struct LandTileMapper {
    grid: Arc<TileGrid>,
    store: Arc<MappingStore>,
    clock: Arc<dyn Clock>,
}

impl LandTileMapper {
    pub fn new(grid: Arc<TileGrid>, store: Arc<MappingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { grid, store, clock }
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    /// Computes and upserts the mapping for `parcel`.
    ///
    /// An unchanged boundary returns the stored mapping without writing. A
    /// changed boundary supersedes the old mapping: land counts move to the new
    /// tiles, the revision is bumped and the land is flagged for refresh.
    pub fn map_land(&self, parcel: &LandParcel) -> Result<MapOutcome, MappingError> {
        let land_id = &parcel.land_id;
        parcel
            .boundary
            .validate()
            .map_err(|reason| MappingError::GeometryInvalid {
                land_id: land_id.clone(),
                reason,
            })?;
        let fingerprint = parcel.boundary.fingerprint();

        // Cheap path without the entry lock.
        if let Some(existing) = self.store.get(land_id) {
            if existing.boundary_fingerprint == fingerprint && existing.tenant_id == parcel.tenant_id {
                debug!(land_id = %land_id, "Boundary unchanged, mapping kept");
                return Ok(MapOutcome {
                    mapping: existing,
                    change: MapChange::Unchanged,
                });
            }
        }

        // validate() guarantees at least three finite vertices.
        let (Some(bbox), Some(centroid)) = (parcel.boundary.bbox(), parcel.boundary.centroid())
        else {
            return Err(MappingError::GeometryInvalid {
                land_id: land_id.clone(),
                reason: crate::coord::PolygonError::TooFewVertices(parcel.boundary.vertices().len()),
            });
        };

        let primary_tile = self
            .grid
            .tile_at(&centroid)
            .ok_or_else(|| MappingError::NoTileFound {
                land_id: land_id.clone(),
                centroid,
            })?;

        let mut tiles: Vec<TileCoord> = self
            .grid
            .tiles_intersecting(&bbox)
            .into_iter()
            .filter(|coord| {
                self.grid
                    .get(coord)
                    .is_some_and(|tile| parcel.boundary.intersects_bbox(&tile.bounds))
            })
            .collect();
        if !tiles.contains(&primary_tile) {
            tiles.push(primary_tile);
            tiles.sort_unstable();
        }

        let now = self.clock.now();
        let area_km2 = parcel.boundary.area_km2();

        // Per-land serialization: the entry's shard lock is held while land
        // counts move between tiles.
        let (mapping, change, old_tiles) = match self.store.mappings.entry(land_id.clone()) {
            Entry::Occupied(mut slot) => {
                let old = slot.get().clone();
                if old.boundary_fingerprint == fingerprint && old.tenant_id == parcel.tenant_id {
                    return Ok(MapOutcome {
                        mapping: old,
                        change: MapChange::Unchanged,
                    });
                }
                let mapping = LandTileMapping {
                    land_id: land_id.clone(),
                    tenant_id: parcel.tenant_id.clone(),
                    boundary: parcel.boundary.clone(),
                    bbox,
                    centroid,
                    area_km2,
                    primary_tile,
                    tiles: tiles.clone(),
                    last_index_value: old.last_index_value,
                    cache_expiry: None,
                    needs_refresh: true,
                    requested_priority: max_priority(old.requested_priority, parcel.priority),
                    boundary_fingerprint: fingerprint,
                    revision: old.revision + 1,
                    mapped_at: old.mapped_at,
                    updated_at: now,
                };
                slot.insert(mapping.clone());
                self.apply_tile_counts(&old.tiles, &tiles);
                (mapping, MapChange::Updated, Some(old.tiles))
            }
            Entry::Vacant(slot) => {
                let mapping = LandTileMapping {
                    land_id: land_id.clone(),
                    tenant_id: parcel.tenant_id.clone(),
                    boundary: parcel.boundary.clone(),
                    bbox,
                    centroid,
                    area_km2,
                    primary_tile,
                    tiles: tiles.clone(),
                    last_index_value: None,
                    cache_expiry: None,
                    needs_refresh: true,
                    requested_priority: parcel.priority,
                    boundary_fingerprint: fingerprint,
                    revision: 1,
                    mapped_at: now,
                    updated_at: now,
                };
                slot.insert(mapping.clone());
                self.apply_tile_counts(&[], &tiles);
                (mapping, MapChange::Created, None)
            }
        };

        match change {
            MapChange::Updated => info!(
                land_id = %land_id,
                revision = mapping.revision,
                old_tiles = old_tiles.map_or(0, |t| t.len()),
                new_tiles = mapping.tiles.len(),
                "Land boundary changed, mapping superseded"
            ),
            _ => debug!(
                land_id = %land_id,
                primary = %mapping.primary_tile,
                tiles = mapping.tiles.len(),
                area_km2 = mapping.area_km2,
                "Land mapped"
            ),
        }

        Ok(MapOutcome { mapping, change })
    }

    /// Deletes a land's mapping and releases its tile counts.
    pub fn remove_land(&self, land_id: &LandId) -> Option<LandTileMapping> {
        let removed = self.store.remove(land_id)?;
        self.apply_tile_counts(&removed.tiles, &[]);
        info!(land_id = %land_id, "Land mapping removed");
        Some(removed)
    }

    fn apply_tile_counts(&self, old: &[TileCoord], new: &[TileCoord]) {
        let now = self.clock.now();
        for coord in old {
            self.grid.remove_land(coord);
        }
        for coord in new {
            if self.grid.add_land(coord, now) {
                info!(tile = %coord, "Tile flagged agricultural");
            } else if !self.grid.contains(coord) {
                warn!(tile = %coord, "Mapped tile missing from grid");
            }
        }
    }
}

fn max_priority(a: Option<i32>, b: Option<i32>) -> Option<i32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{BoundingBox, GeoPoint, Polygon};
    use crate::grid::GridGenerator;
    use crate::ids::TenantId;
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn setup() -> (LandTileMapper, Arc<TileGrid>, ManualClock) {
        let grid = Arc::new(TileGrid::new(12));
        grid.populate(
            GridGenerator::new(12)
                .generate(&[BoundingBox::new(0.5, 43.5, 1.5, 44.5)])
                .unwrap(),
        );
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let mapper = LandTileMapper::new(
            Arc::clone(&grid),
            Arc::new(MappingStore::new()),
            Arc::new(clock.clone()),
        );
        (mapper, grid, clock)
    }

    fn parcel(id: &str, lat: f64, lon: f64, size: f64) -> LandParcel {
        LandParcel {
            land_id: LandId::from(id),
            tenant_id: TenantId::from("acme"),
            boundary: Polygon::from_lon_lat(&[
                [lon, lat],
                [lon + size, lat],
                [lon + size, lat + size],
                [lon, lat + size],
            ]),
            priority: None,
        }
    }

    #[test]
    fn test_new_land_creates_mapping_and_flags_tile() {
        let (mapper, grid, _) = setup();
        let outcome = mapper.map_land(&parcel("l1", 44.0, 1.0, 0.005)).unwrap();

        assert_eq!(outcome.change, MapChange::Created);
        let mapping = outcome.mapping;
        assert!(mapping.needs_refresh);
        assert_eq!(mapping.revision, 1);
        assert_eq!(mapping.tiles, vec![mapping.primary_tile]);

        let tile = grid.get(&mapping.primary_tile).unwrap();
        assert!(tile.is_agricultural);
        assert_eq!(tile.land_count, 1);
    }

    #[test]
    fn test_unchanged_boundary_is_noop() {
        let (mapper, grid, clock) = setup();
        let first = mapper.map_land(&parcel("l1", 44.0, 1.0, 0.005)).unwrap();
        clock.advance(chrono::Duration::hours(1));
        let second = mapper.map_land(&parcel("l1", 44.0, 1.0, 0.005)).unwrap();

        assert_eq!(second.change, MapChange::Unchanged);
        assert_eq!(second.mapping, first.mapping);
        assert_eq!(grid.get(&first.mapping.primary_tile).unwrap().land_count, 1);
    }

    #[test]
    fn test_boundary_change_moves_counts_and_bumps_revision() {
        let (mapper, grid, _) = setup();
        let first = mapper.map_land(&parcel("l1", 44.0, 1.0, 0.005)).unwrap().mapping;
        mapper
            .store()
            .record_cached(&first.land_id, first.revision, 0.6, Utc::now(), Utc::now(), || {});

        let moved = mapper.map_land(&parcel("l1", 43.7, 0.7, 0.005)).unwrap();

        assert_eq!(moved.change, MapChange::Updated);
        assert_eq!(moved.mapping.revision, 2);
        assert!(moved.mapping.needs_refresh);
        assert!(moved.mapping.cache_expiry.is_none());
        assert_ne!(moved.mapping.primary_tile, first.primary_tile);
        assert_eq!(grid.get(&first.primary_tile).unwrap().land_count, 0);
        assert_eq!(grid.get(&moved.mapping.primary_tile).unwrap().land_count, 1);
    }

    #[test]
    fn test_degenerate_geometry_rejected() {
        let (mapper, _, _) = setup();
        let mut bad = parcel("bad", 44.0, 1.0, 0.005);
        bad.boundary = Polygon::from_lon_lat(&[[1.0, 44.0], [1.01, 44.01], [1.02, 44.02]]);

        let err = mapper.map_land(&bad).unwrap_err();
        assert!(matches!(err, MappingError::GeometryInvalid { .. }));
        assert!(mapper.store().is_empty());
    }

    #[test]
    fn test_outside_grid_is_no_tile_found() {
        let (mapper, _, _) = setup();
        let err = mapper.map_land(&parcel("far", 10.0, 10.0, 0.005)).unwrap_err();
        assert!(matches!(err, MappingError::NoTileFound { .. }));
    }

    #[test]
    fn test_land_straddling_tiles_lists_all_tiles() {
        let (mapper, grid, _) = setup();
        let tile = grid.tile_at(&GeoPoint::new(44.0, 1.0)).unwrap();
        let b = grid.get(&tile).unwrap().bounds;
        // Square centred on the tile's east edge.
        let mapping = mapper
            .map_land(&parcel("edge", 44.0, b.east - 0.002, 0.004))
            .unwrap()
            .mapping;

        assert_eq!(mapping.tiles.len(), 2);
        assert!(mapping.tiles.contains(&mapping.primary_tile));
    }

    #[test]
    fn test_remove_land_releases_counts() {
        let (mapper, grid, _) = setup();
        let mapping = mapper.map_land(&parcel("l1", 44.0, 1.0, 0.005)).unwrap().mapping;
        assert!(mapper.remove_land(&mapping.land_id).is_some());
        assert_eq!(grid.get(&mapping.primary_tile).unwrap().land_count, 0);
        assert!(mapper.remove_land(&mapping.land_id).is_none());
    }

    #[test]
    fn test_requested_priority_carries_into_mapping() {
        let (mapper, _, _) = setup();
        let mut p = parcel("l1", 44.0, 1.0, 0.005);
        p.priority = Some(70);
        let mapping = mapper.map_land(&p).unwrap().mapping;
        assert_eq!(mapping.requested_priority, Some(70));
    }

    proptest! {
        #[test]
        fn prop_valid_square_has_one_primary_tile(
            lat in 43.6f64..44.4,
            lon in 0.6f64..1.4,
            size in 0.0005f64..0.05,
        ) {
            let (mapper, grid, _) = setup();
            let p = parcel("p", lat, lon, size);
            let first = mapper.map_land(&p).unwrap();
            let mapping = &first.mapping;

            prop_assert!(mapping.tiles.contains(&mapping.primary_tile));
            prop_assert_eq!(
                mapping.tiles.iter().filter(|t| **t == mapping.primary_tile).count(),
                1
            );
            prop_assert_eq!(grid.tile_at(&mapping.centroid), Some(mapping.primary_tile));

            let again = mapper.map_land(&p).unwrap();
            prop_assert_eq!(again.change, MapChange::Unchanged);
            prop_assert_eq!(&again.mapping, mapping);
        }
    }
}
