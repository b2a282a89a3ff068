//! Land-tile mapper.
//!
//! Resolves each land parcel's boundary to the grid: bounding box, centroid,
//! area, the primary tile (the tile containing the centroid) and every tile
//! the boundary intersects. The resulting [`LandTileMapping`] is the single
//! authoritative record of a land's placement and cache freshness.

mod land_mapper;
mod store;
mod types;

pub use land_mapper::LandTileMapper;
pub use store::MappingStore;
pub use types::{LandParcel, LandTileMapping, MapChange, MapOutcome, MappingError};
