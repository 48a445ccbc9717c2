use geo::{MultiPolygon, Rect, coord};

use basin_data_manager::crs::{Crs, Normalizer};
use basin_data_manager::domain::{BasinGeometry, GridSpec, RasterArtifact};

fn utm12() -> Crs {
    Crs::from_epsg(32612).unwrap()
}

#[test]
fn projected_round_trip_is_sub_micrometer() {
    let crs = utm12();
    for (x, y) in [
        (500_000.0, 3_880_000.0),
        (300_123.456, 3_500_000.0),
        (712_345.678, 4_100_000.0),
        (545_000.0, 3_873_000.0),
    ] {
        let original = coord! { x: x, y: y };
        let back = crs.project(crs.unproject(original));
        assert!((back.x - original.x).abs() < 1e-6, "x drift at {original:?}");
        assert!((back.y - original.y).abs() < 1e-6, "y drift at {original:?}");
    }
}

#[test]
fn transform_between_projected_systems_round_trips() {
    let p = coord! { x: -110.4, y: 35.1 };
    let utm = Crs::transform(Crs::Wgs84, utm12(), p);
    let mercator = Crs::transform(utm12(), Crs::WebMercator, utm);
    let back = Crs::transform(Crs::WebMercator, utm12(), mercator);
    assert!((back.x - utm.x).abs() < 1e-6);
    assert!((back.y - utm.y).abs() < 1e-6);
}

#[test]
fn known_utm_coordinate() {
    // Flagstaff area
    let p = utm12().project(coord! { x: -111.65, y: 35.2 });
    assert!((p.x - 440_830.678).abs() < 0.01, "easting {}", p.x);
    assert!((p.y - 3_895_416.142).abs() < 0.01, "northing {}", p.y);
}

#[test]
fn geometry_round_trip_through_normalizer() {
    let normalizer = Normalizer::new(Crs::Wgs84, utm12()).unwrap();
    let rect = Rect::new(coord! { x: -110.5, y: 35.0 }, coord! { x: -110.3, y: 35.2 });
    let basin = BasinGeometry::new(Crs::Wgs84, MultiPolygon::new(vec![rect.to_polygon()])).unwrap();

    let projected = normalizer.to_projected(&basin);
    assert_eq!(projected.crs, utm12());
    let again = normalizer.to_projected(&projected);
    assert_eq!(again, projected);

    let back = normalizer.to_geographic(&projected);
    for (a, b) in basin.shape.0[0]
        .exterior()
        .coords()
        .zip(back.shape.0[0].exterior().coords())
    {
        assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
    }
}

#[test]
fn raster_warp_aligns_to_resolution() {
    let normalizer = Normalizer::new(Crs::Wgs84, utm12()).unwrap();
    let extent = Normalizer::reproject_rect(
        Rect::new(coord! { x: -110.45, y: 35.05 }, coord! { x: -110.40, y: 35.10 }),
        Crs::Wgs84,
        Crs::WebMercator,
    );
    let grid = GridSpec::from_extent(extent, 100, 100);
    let raster = RasterArtifact {
        crs: Crs::WebMercator,
        grid,
        nodata: -9999.0,
        data: (0..10_000).map(|i| 1000.0 + (i / 100) as f32).collect(),
    };

    let warped = normalizer.raster_to_projected(&raster, 30.0, -9999.0);
    assert_eq!(warped.crs, utm12());
    assert_eq!(warped.grid.pixel_width, 30.0);
    assert_eq!(warped.grid.pixel_height, 30.0);
    assert_eq!(warped.grid.origin_x.rem_euclid(30.0), 0.0);
    assert!(warped.valid_cells() > warped.data.len() / 2);
    // rows run south, so elevations (rising with source row) rise down the grid
    let (rows, cols) = warped.shape();
    let top = warped.value(rows / 4, cols / 2);
    let bottom = warped.value(3 * rows / 4, cols / 2);
    assert!(bottom > top);
}
