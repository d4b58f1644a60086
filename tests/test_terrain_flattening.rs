mod common;

use approx::assert_relative_eq;
use ndarray::Array2;
use s1ard::core::terrain_flatten::{TerrainFlattener, TerrainFlatteningModel, TerrainFlatteningParams};
use s1ard::types::{Mask, OrbitPass, Polarization, RasterImage, SarError};

/// Plane whose elevation grows by `rise` meters per column (eastward)
fn column_ramp(shape: (usize, usize), rise: f32) -> Array2<f32> {
    Array2::from_shape_fn(shape, |(_, j)| 500.0 + rise * j as f32)
}

/// Ascending scene whose incidence grows eastward from 35 to 35.08 degrees,
/// so the radar sits to the west and looks east (heading -90)
fn east_looking_scene(id: &str, shape: (usize, usize)) -> RasterImage {
    let base = common::scene(id, 5, shape, 35.0, 5);
    let span = shape.1.saturating_sub(1).max(1) as f32;
    let angle = Array2::from_shape_fn(shape, |(_, j)| 35.0 + 0.08 * j as f32 / span);
    RasterImage::new(id, base.bands().clone(), angle, base.geometry, base.acquisition_time)
        .unwrap()
        .with_orbit(88, OrbitPass::Ascending)
}

/// Flattened over the flat-terrain value z / cos(theta) at one pixel
fn flattening_ratio(image: &RasterImage, out: &RasterImage, pixel: [usize; 2]) -> f32 {
    let z = image.band(Polarization::VV).unwrap()[pixel];
    let theta = image.angle()[pixel].to_radians();
    out.band(Polarization::VV).unwrap()[pixel] / (z / theta.cos())
}

fn flattener(model: TerrainFlatteningModel, buffer: f64) -> TerrainFlattener {
    TerrainFlattener::new(TerrainFlatteningParams {
        model,
        layover_shadow_buffer: buffer,
    })
    .unwrap()
}

#[test]
fn test_flat_dem_divides_by_cosine() {
    common::init_logging();
    let image = common::scene("flat", 5, (12, 12), 35.0, 11);
    let dem = Array2::from_elem(image.shape(), 120.0f32);

    for model in [TerrainFlatteningModel::Volume, TerrainFlatteningModel::Direct] {
        let out = flattener(model, 0.0).flatten(&image, &dem).unwrap();
        let cos = 35f32.to_radians().cos();

        for pol in [Polarization::VV, Polarization::VH] {
            let raw = image.band(pol).unwrap();
            let flat = out.band(pol).unwrap();
            for (&a, &b) in flat.iter().zip(raw.iter()) {
                assert_relative_eq!(a, b / cos, max_relative = 1e-5);
            }
        }
        assert_eq!(out.valid_pixel_count(), 144);
    }
}

#[test]
fn test_heading_follows_incidence_gradient() {
    let image = east_looking_scene("heading", (10, 10));
    let heading = flattener(TerrainFlatteningModel::Volume, 0.0).look_heading(&image).unwrap();
    assert_relative_eq!(heading, -90.0, epsilon = 1e-3);
}

#[test]
fn test_radar_facing_slope_is_darkened() {
    common::init_logging();
    let image = east_looking_scene("facing", (10, 10));
    let spacing = image.geometry.pixel_spacing as f32;
    let rise = spacing * 20f32.to_radians().tan();
    let pixel = [5, 5];

    let f = flattener(TerrainFlatteningModel::Volume, 0.0);
    // Terrain rising eastward faces the west-looking-east radar
    let facing = f.flatten(&image, &column_ramp(image.shape(), rise)).unwrap();
    let away = f.flatten(&image, &column_ramp(image.shape(), -rise)).unwrap();

    let theta = image.angle()[pixel];
    let expected = (90.0 - theta).to_radians().tan() / (90.0 - theta + 20.0).to_radians().tan();
    let (toward, from) = (flattening_ratio(&image, &facing, pixel), flattening_ratio(&image, &away, pixel));
    println!("radar facing {} facing away {} expected {}", toward, from, expected);

    assert_relative_eq!(toward, expected, max_relative = 1e-3);
    assert_relative_eq!(toward, 0.3832, epsilon = 2e-3);
    assert!(toward < 1.0);
    assert!(from > 1.0);
    assert_eq!(facing.valid_pixel_count(), 100);
    assert_eq!(away.valid_pixel_count(), 100);
}

#[test]
fn test_direct_model_direction() {
    let image = east_looking_scene("direct", (10, 10));
    let spacing = image.geometry.pixel_spacing as f32;
    let rise = spacing * 20f32.to_radians().tan();

    let f = flattener(TerrainFlatteningModel::Direct, 0.0);
    let facing = f.flatten(&image, &column_ramp(image.shape(), rise)).unwrap();
    let away = f.flatten(&image, &column_ramp(image.shape(), -rise)).unwrap();

    assert!(flattening_ratio(&image, &facing, [5, 5]) < 1.0);
    assert!(flattening_ratio(&image, &away, [5, 5]) > 1.0);
}

#[test]
fn test_steep_radar_facing_slope_is_layover() {
    let image = east_looking_scene("steep", (8, 8));
    let spacing = image.geometry.pixel_spacing as f32;
    let rise = spacing * 50f32.to_radians().tan();

    let f = flattener(TerrainFlatteningModel::Volume, 0.0);
    let facing = f.flatten(&image, &column_ramp(image.shape(), rise)).unwrap();
    let away = f.flatten(&image, &column_ramp(image.shape(), -rise)).unwrap();

    // A 50 degree face toward a 35 degree beam is layover
    assert_eq!(facing.valid_pixel_count(), 0);
    // Turned away it stays short of the 55 degree shadow limit
    assert_eq!(away.valid_pixel_count(), 64);
}

#[test]
fn test_buffer_erodes_around_invalid_pixels() {
    let image = common::scene("buffer", 5, (11, 11), 35.0, 2);
    let mut hole = Mask::from_elem(image.shape(), true);
    hole[[5, 5]] = false;
    let image = image.restrict_mask(&hole).unwrap();
    let dem = Array2::from_elem(image.shape(), 0.0f32);

    let unbuffered = flattener(TerrainFlatteningModel::Volume, 0.0).flatten(&image, &dem).unwrap();
    assert_eq!(unbuffered.valid_pixel_count(), 120);

    // 20 m at 10 m spacing removes every pixel within two pixels of the hole
    let buffered = flattener(TerrainFlatteningModel::Volume, 20.0).flatten(&image, &dem).unwrap();
    assert_eq!(buffered.valid_pixel_count(), 121 - 13);
    assert!(!buffered.mask()[[5, 7]]);
    assert!(!buffered.mask()[[6, 6]]);
    assert!(buffered.mask()[[7, 7]]);
}

#[test]
fn test_dem_shape_mismatch() {
    let image = common::scene("mismatch", 5, (6, 6), 35.0, 2);
    let dem = Array2::from_elem((5, 6), 0.0f32);
    let result = flattener(TerrainFlatteningModel::Volume, 0.0).flatten(&image, &dem);
    assert!(matches!(result, Err(SarError::Data(_))));
}

#[test]
fn test_negative_buffer_rejected() {
    let result = TerrainFlattener::new(TerrainFlatteningParams {
        model: TerrainFlatteningModel::Direct,
        layover_shadow_buffer: -5.0,
    });
    assert!(matches!(result, Err(SarError::Configuration(_))));
}
