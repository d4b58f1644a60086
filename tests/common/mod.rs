#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use s1ard::types::{GeoTransform, GridGeometry, OrbitPass, Polarization, RasterImage};
use std::collections::BTreeMap;

pub const PIXEL_DEGREES: f64 = 0.0001;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Seeded 5-look gamma speckle around `mean`
pub fn speckle_field(shape: (usize, usize), mean: f32, seed: u64) -> Array2<f32> {
    const LOOKS: f32 = 5.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let gamma = Gamma::new(LOOKS, mean / LOOKS).unwrap();
    Array2::from_shape_fn(shape, |_| gamma.sample(&mut rng))
}

pub fn geometry(shape: (usize, usize), lon: f64, lat: f64) -> GridGeometry {
    GridGeometry::new(
        GeoTransform::north_up(lon, lat, PIXEL_DEGREES, PIXEL_DEGREES),
        shape,
        10.0,
    )
}

/// Dual-pol scene on orbit 88 with a uniform incidence angle
pub fn scene(id: &str, day: u32, shape: (usize, usize), angle: f32, seed: u64) -> RasterImage {
    let mut bands = BTreeMap::new();
    bands.insert(Polarization::VV, speckle_field(shape, 0.12, seed));
    bands.insert(Polarization::VH, speckle_field(shape, 0.03, seed + 7919));
    RasterImage::new(
        id,
        bands,
        Array2::from_elem(shape, angle),
        geometry(shape, 7.5, 46.2),
        Utc.with_ymd_and_hms(2021, 4, day, 17, 20, 0).unwrap(),
    )
    .unwrap()
    .with_orbit(88, OrbitPass::Ascending)
}

/// Same as `scene` with the angle band rising from 29 to 47 degrees across range
pub fn ramp_scene(id: &str, day: u32, shape: (usize, usize), seed: u64) -> RasterImage {
    let base = scene(id, day, shape, 38.0, seed);
    let span = shape.1.saturating_sub(1).max(1) as f32;
    let angle = Array2::from_shape_fn(shape, |(_, j)| 29.0 + 18.0 * j as f32 / span);
    RasterImage::new(
        id,
        base.bands().clone(),
        angle,
        base.geometry,
        base.acquisition_time,
    )
    .unwrap()
    .with_orbit(88, OrbitPass::Ascending)
}
