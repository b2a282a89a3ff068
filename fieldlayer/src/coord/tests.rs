//! Tests for coordinate conversion and boundary geometry

use super::*;

fn square(lat: f64, lon: f64, size: f64) -> Polygon {
    Polygon::from_lon_lat(&[
        [lon, lat],
        [lon + size, lat],
        [lon + size, lat + size],
        [lon, lat + size],
        [lon, lat],
    ])
}

// =============================================================================
// Tile conversion
// =============================================================================

#[test]
fn test_new_york_city_at_zoom_16() {
    let tile = to_tile_coords(40.7128, -74.0060, 16).unwrap();
    assert_eq!(tile.row, 24640);
    assert_eq!(tile.col, 19295);
    assert_eq!(tile.zoom, 16);
}

#[test]
fn test_london_at_zoom_10() {
    let tile = to_tile_coords(51.5074, -0.1278, 10).unwrap();
    assert_eq!((tile.row, tile.col), (340, 511));
}

#[test]
fn test_equator_prime_meridian() {
    let tile = to_tile_coords(0.0, 0.0, 1).unwrap();
    assert_eq!((tile.row, tile.col), (1, 1));
}

#[test]
fn test_antimeridian_folds_into_last_column() {
    let tile = to_tile_coords(0.0, 180.0, 4).unwrap();
    assert_eq!(tile.col, 15);
}

#[test]
fn test_invalid_inputs_rejected() {
    assert_eq!(
        to_tile_coords(90.0, 0.0, 10),
        Err(CoordError::InvalidLatitude(90.0))
    );
    assert_eq!(
        to_tile_coords(0.0, -181.0, 10),
        Err(CoordError::InvalidLongitude(-181.0))
    );
    assert_eq!(to_tile_coords(0.0, 0.0, 19), Err(CoordError::InvalidZoom(19)));
}

#[test]
fn test_tile_coord_new_checks_range() {
    assert!(TileCoord::new(3, 3, 2).is_ok());
    assert!(matches!(
        TileCoord::new(4, 0, 2),
        Err(CoordError::TileOutOfRange { .. })
    ));
}

#[test]
fn test_tile_bounds_contain_source_point() {
    let tile = to_tile_coords(44.0, 1.0, 12).unwrap();
    assert_eq!((tile.row, tile.col), (1489, 2059));

    let bounds = tile_bounds(&tile);
    assert!(bounds.contains(&GeoPoint::new(44.0, 1.0)));
    assert!((bounds.north - 44.0244).abs() < 1e-3);
    assert!((bounds.south - 43.9612).abs() < 1e-3);
    assert!((bounds.west - 0.9668).abs() < 1e-3);
    assert!((bounds.east - 1.0547).abs() < 1e-3);
}

#[test]
fn test_tiles_covering_spans_rows_and_cols() {
    let tile = to_tile_coords(44.0, 1.0, 12).unwrap();
    let b = tile_bounds(&tile);
    // Box straddling the tile's south-east corner touches four tiles.
    let bbox = BoundingBox::new(b.east - 0.01, b.south - 0.01, b.east + 0.01, b.south + 0.01);

    let tiles = tiles_covering(&bbox, 12).unwrap();

    assert_eq!(tiles.len(), 4);
    assert!(tiles.contains(&tile));
}

#[test]
fn test_neighbours_at_world_corner() {
    let corner = TileCoord::new(0, 0, 3).unwrap();
    assert_eq!(corner.neighbours().len(), 3);
    let middle = TileCoord::new(4, 4, 3).unwrap();
    assert_eq!(middle.neighbours().len(), 8);
}

#[test]
fn test_tile_display() {
    let tile = TileCoord::new(1489, 2059, 12).unwrap();
    assert_eq!(tile.to_string(), "12/1489/2059");
}

// =============================================================================
// Bounding boxes
// =============================================================================

#[test]
fn test_bbox_area_at_equator() {
    let bbox = BoundingBox::new(0.0, -0.05, 0.1, 0.05);
    let expected = 0.1 * KM_PER_DEG_LON_EQUATOR * 0.1 * KM_PER_DEG_LAT;
    assert!((bbox.area_km2() - expected).abs() < 1e-3);
}

#[test]
fn test_bbox_area_shrinks_with_latitude() {
    let equator = BoundingBox::new(0.0, 0.0, 0.1, 0.1);
    let north = BoundingBox::new(0.0, 60.0, 0.1, 60.1);
    assert!(north.area_km2() < equator.area_km2() * 0.51);
}

#[test]
fn test_bbox_union_and_intersects() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
    assert!(!a.intersects(&b));
    let u = a.union(&b);
    assert_eq!(u, BoundingBox::new(0.0, 0.0, 3.0, 3.0));
    assert!(u.intersects(&a));
}

#[test]
fn test_bbox_new_normalizes_edges() {
    let bbox = BoundingBox::new(1.0, 1.0, 0.0, 0.0);
    assert_eq!(bbox.west, 0.0);
    assert_eq!(bbox.north, 1.0);
}

// =============================================================================
// Polygons
// =============================================================================

#[test]
fn test_square_is_valid() {
    let poly = square(44.0, 1.0, 0.01);
    assert_eq!(poly.vertices().len(), 4, "closing vertex is dropped");
    assert!(poly.validate().is_ok());
}

#[test]
fn test_too_few_vertices() {
    let poly = Polygon::from_lon_lat(&[[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]);
    assert_eq!(poly.validate(), Err(PolygonError::TooFewVertices(2)));
}

#[test]
fn test_collinear_ring_is_degenerate() {
    let poly = Polygon::from_lon_lat(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
    assert_eq!(poly.validate(), Err(PolygonError::Degenerate));
}

#[test]
fn test_bowtie_is_self_intersecting() {
    let poly = Polygon::from_lon_lat(&[[0.0, 0.0], [2.0, 2.0], [2.0, 0.0], [0.0, 1.0]]);
    assert!(matches!(
        poly.validate(),
        Err(PolygonError::SelfIntersecting { .. })
    ));
}

#[test]
fn test_out_of_range_vertex() {
    let poly = Polygon::from_lon_lat(&[[0.0, 0.0], [200.0, 0.0], [0.0, 1.0]]);
    assert!(matches!(
        poly.validate(),
        Err(PolygonError::InvalidVertex { index: 1, .. })
    ));
}

#[test]
fn test_nan_vertex() {
    let poly = Polygon::from_lon_lat(&[[0.0, 0.0], [f64::NAN, 0.0], [0.0, 1.0]]);
    assert!(poly.validate().is_err());
}

#[test]
fn test_square_centroid_and_area() {
    let poly = square(0.0, 0.0, 0.1);
    let c = poly.centroid().unwrap();
    assert!((c.lat - 0.05).abs() < 1e-9);
    assert!((c.lon - 0.05).abs() < 1e-9);

    let expected = 0.1 * KM_PER_DEG_LAT * 0.1 * KM_PER_DEG_LON_EQUATOR * 0.05_f64.to_radians().cos();
    assert!((poly.area_km2() - expected).abs() < 1e-6);
}

#[test]
fn test_l_shape_centroid_is_area_weighted() {
    // 2x1 bar plus a 1x1 block on its left end: centroid pulled left and down.
    let poly = Polygon::from_lon_lat(&[
        [0.0, 0.0],
        [2.0, 0.0],
        [2.0, 1.0],
        [1.0, 1.0],
        [1.0, 2.0],
        [0.0, 2.0],
    ]);
    let c = poly.centroid().unwrap();
    assert!((c.lon - 5.0 / 6.0).abs() < 1e-9);
    assert!((c.lat - 5.0 / 6.0).abs() < 1e-9);
}

#[test]
fn test_contains() {
    let poly = square(0.0, 0.0, 1.0);
    assert!(poly.contains(&GeoPoint::new(0.5, 0.5)));
    assert!(!poly.contains(&GeoPoint::new(1.5, 0.5)));
}

#[test]
fn test_intersects_bbox_cases() {
    let poly = square(0.0, 0.0, 1.0);
    // Fully inside the polygon.
    assert!(poly.intersects_bbox(&BoundingBox::new(0.4, 0.4, 0.6, 0.6)));
    // Contains the polygon.
    assert!(poly.intersects_bbox(&BoundingBox::new(-1.0, -1.0, 2.0, 2.0)));
    // Box inside a diamond whose vertices all lie outside the box.
    let diamond = Polygon::from_lon_lat(&[[0.5, -1.0], [2.0, 0.5], [0.5, 2.0], [-1.0, 0.5]]);
    assert!(diamond.intersects_bbox(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)));
    // Disjoint.
    assert!(!poly.intersects_bbox(&BoundingBox::new(5.0, 5.0, 6.0, 6.0)));
}

#[test]
fn test_triangle_misses_bbox_corner_region() {
    // Triangle in the lower-left half; a box in the upper-right corner only
    // overlaps its bounding box.
    let tri = Polygon::from_lon_lat(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    assert!(!tri.intersects_bbox(&BoundingBox::new(0.8, 0.8, 1.0, 1.0)));
}

#[test]
fn test_fingerprint_stable_and_sensitive() {
    let a = square(44.0, 1.0, 0.01);
    let b = square(44.0, 1.0, 0.01);
    let c = square(44.0, 1.0, 0.02);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
    assert_eq!(a.fingerprint().len(), 64);
}

#[test]
fn test_polygon_serde_uses_lon_lat_pairs() {
    let poly: Polygon = serde_json::from_str("[[1.0,44.0],[1.1,44.0],[1.1,44.1]]").unwrap();
    assert_eq!(poly.vertices()[0], GeoPoint::new(44.0, 1.0));
    let json = serde_json::to_string(&poly).unwrap();
    assert_eq!(json, "[[1.0,44.0],[1.1,44.0],[1.1,44.1]]");
}
