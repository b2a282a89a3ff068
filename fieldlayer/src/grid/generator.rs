//! One-time grid generation job.

use thiserror::Error;
use tracing::info;

use super::tile::GridTile;
use crate::coord::{tiles_covering, BoundingBox, CoordError, TileCoord, MAX_ZOOM};

/// Refuse to materialize more tiles than this unless overridden.
pub const DEFAULT_MAX_TILES: usize = 2_000_000;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("coverage region invalid: {0}")]
    Coord(#[from] CoordError),

    #[error("grid generation would create {requested} tiles (limit {limit})")]
    TooManyTiles { requested: usize, limit: usize },
}

/// Builds the tile set covering a list of regions.
#[derive(Debug, Clone)]
pub struct GridGenerator {
    zoom: u8,
    country: Option<String>,
    admin_ref: Option<String>,
    max_tiles: usize,
}

impl GridGenerator {
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom: zoom.min(MAX_ZOOM),
            country: None,
            admin_ref: None,
            max_tiles: DEFAULT_MAX_TILES,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_admin_ref(mut self, admin_ref: impl Into<String>) -> Self {
        self.admin_ref = Some(admin_ref.into());
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    /// Generates every tile intersecting any of `regions`, deduplicated.
    pub fn generate(&self, regions: &[BoundingBox]) -> Result<Vec<GridTile>, GridError> {
        let mut coords: Vec<TileCoord> = Vec::new();
        for region in regions {
            let covering = tiles_covering(region, self.zoom)?;
            if coords.len() + covering.len() > self.max_tiles {
                return Err(GridError::TooManyTiles {
                    requested: coords.len() + covering.len(),
                    limit: self.max_tiles,
                });
            }
            coords.extend(covering);
        }
        coords.sort_unstable();
        coords.dedup();

        info!(
            zoom = self.zoom,
            regions = regions.len(),
            tiles = coords.len(),
            "Generated grid tiles"
        );

        Ok(coords
            .into_iter()
            .map(|coord| {
                let mut tile = GridTile::new(coord);
                tile.country = self.country.clone();
                tile.admin_ref = self.admin_ref.clone();
                tile
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_regions_deduplicated() {
        let a = BoundingBox::new(1.0, 44.0, 1.1, 44.1);
        let generator = GridGenerator::new(12);
        let single = generator.generate(&[a]).unwrap();
        let double = generator.generate(&[a, a]).unwrap();
        assert_eq!(single.len(), double.len());
    }

    #[test]
    fn test_country_is_stamped_on_tiles() {
        let tiles = GridGenerator::new(10)
            .with_country("FR")
            .generate(&[BoundingBox::new(1.0, 44.0, 1.1, 44.1)])
            .unwrap();
        assert!(tiles.iter().all(|t| t.country.as_deref() == Some("FR")));
        assert!(tiles.iter().all(|t| !t.is_agricultural && t.land_count == 0));
    }

    #[test]
    fn test_tile_limit_enforced() {
        let result = GridGenerator::new(12)
            .with_max_tiles(10)
            .generate(&[BoundingBox::new(0.0, 40.0, 5.0, 45.0)]);
        assert!(matches!(result, Err(GridError::TooManyTiles { limit: 10, .. })));
    }

    #[test]
    fn test_invalid_region_rejected() {
        let result = GridGenerator::new(12).generate(&[BoundingBox::new(-200.0, 0.0, 0.0, 1.0)]);
        assert!(matches!(result, Err(GridError::Coord(_))));
    }
}
