//! Tile command - show the grid tile containing a coordinate.

use std::path::PathBuf;

use fieldlayer::coord::{tile_bounds, to_tile_coords, MAX_ZOOM};

use crate::error::CliError;
use crate::runner::load_config;

/// Run the tile command.
pub fn run(config: Option<PathBuf>, lat: f64, lon: f64, zoom: Option<u8>) -> Result<(), CliError> {
    let zoom = match zoom {
        Some(zoom) => zoom,
        None => load_config(config.as_deref())?.grid.zoom,
    };
    if zoom > MAX_ZOOM {
        return Err(CliError::Config(format!(
            "zoom level must be between 0 and {}",
            MAX_ZOOM
        )));
    }

    let tile = to_tile_coords(lat, lon, zoom)
        .map_err(|e| CliError::Config(format!("invalid coordinate: {}", e)))?;
    let bounds = tile_bounds(&tile);

    println!("Location: {}, {}", lat, lon);
    println!("Tile:     row={}, col={}, zoom={}", tile.row, tile.col, tile.zoom);
    println!(
        "Bounds:   west={:.6} south={:.6} east={:.6} north={:.6}",
        bounds.west, bounds.south, bounds.east, bounds.north
    );
    println!("Area:     {:.2} km²", bounds.area_km2());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zoom_above_max() {
        let err = run(None, 44.0, 1.0, Some(MAX_ZOOM + 1)).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_rejects_latitude_out_of_range() {
        let err = run(None, 89.0, 1.0, Some(10)).unwrap_err();
        assert!(err.to_string().contains("invalid coordinate"));
    }

    #[test]
    fn test_valid_coordinate() {
        assert!(run(None, 44.0, 1.0, Some(12)).is_ok());
    }
}
