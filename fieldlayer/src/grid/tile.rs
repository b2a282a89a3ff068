use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::{tile_bounds, BoundingBox, TileCoord};

/// One cell of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTile {
    pub coord: TileCoord,
    pub bounds: BoundingBox,
    /// ISO country code, when the generation job was given one.
    pub country: Option<String>,
    /// Administrative region reference.
    pub admin_ref: Option<String>,
    pub is_agricultural: bool,
    pub is_land_containing: bool,
    pub is_index_ready: bool,
    pub agricultural_checked_at: Option<DateTime<Utc>>,
    pub index_checked_at: Option<DateTime<Utc>>,
    /// Number of lands whose mapping references this tile.
    pub land_count: u32,
}

impl GridTile {
    /// A fresh tile with all flags cleared.
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            bounds: tile_bounds(&coord),
            country: None,
            admin_ref: None,
            is_agricultural: false,
            is_land_containing: false,
            is_index_ready: false,
            agricultural_checked_at: None,
            index_checked_at: None,
            land_count: 0,
        }
    }
}
