//! Tile grid index.
//!
//! A static partition of the Earth's surface into Web Mercator tiles at a
//! single grid zoom. Each [`GridTile`] carries the agricultural, land-containing
//! and index-ready flags that the mapper and computation pipeline maintain.
//!
//! # Thread Safety
//!
//! - Whole-grid swaps (`populate`) take a brief write lock
//! - Per-tile reads and flag updates go through `DashMap` shards
//!
//! # Usage
//!
//! ```
//! use fieldlayer::coord::BoundingBox;
//! use fieldlayer::grid::{GridGenerator, TileGrid};
//!
//! let grid = TileGrid::new(12);
//! let tiles = GridGenerator::new(12)
//!     .generate(&[BoundingBox::new(1.0, 44.0, 1.1, 44.1)])
//!     .unwrap();
//! grid.populate(tiles);
//! assert!(grid.len() > 0);
//! ```

mod generator;
mod index;
mod tile;

pub use generator::{GridError, GridGenerator, DEFAULT_MAX_TILES};
pub use index::TileGrid;
pub use tile::GridTile;
