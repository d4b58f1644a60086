mod common;

use approx::assert_relative_eq;
use ndarray::Array2;
use s1ard::core::neighborhood::{BoundaryPolicy, NeighborhoodKernel, NeighborhoodStatsEngine};
use s1ard::core::speckle_filter::{gamma_map_regions, GammaMapRegion, SpeckleFilter, SpeckleFilterType};
use s1ard::types::{Mask, Polarization, RasterImage};
use std::collections::BTreeMap;

fn all_filters() -> Vec<SpeckleFilterType> {
    vec![
        SpeckleFilterType::boxcar(5),
        SpeckleFilterType::lee(5),
        SpeckleFilterType::gamma_map(7),
        SpeckleFilterType::refined_lee(),
        SpeckleFilterType::lee_sigma(7),
    ]
}

fn same_values(a: &Array2<f32>, b: &Array2<f32>) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
}

/// Scene with a masked block so pass-through and partial windows show up in every tile
fn holed_scene() -> RasterImage {
    let image = common::scene("holed", 10, (37, 41), 38.0, 42);
    let mut mask = Mask::from_elem(image.shape(), true);
    for i in 9..14 {
        for j in 20..26 {
            mask[[i, j]] = false;
        }
    }
    image.restrict_mask(&mask).unwrap()
}

#[test]
fn test_lee_constant_image_unchanged() {
    common::init_logging();

    let mut bands = BTreeMap::new();
    bands.insert(Polarization::VV, Array2::from_elem((5, 5), 4.0f32));
    let base = common::scene("const", 1, (5, 5), 38.0, 1);
    let image = RasterImage::new("const", bands, base.angle().clone(), base.geometry, base.acquisition_time).unwrap();

    let filter = SpeckleFilter::new(SpeckleFilterType::lee(3)).unwrap();
    let out = filter.apply(&image).unwrap();

    for &v in out.band(Polarization::VV).unwrap().iter() {
        assert_relative_eq!(v, 4.0, epsilon = 1e-6);
    }
    assert_eq!(out.valid_pixel_count(), 25);
}

#[test]
fn test_tiled_matches_untiled() {
    common::init_logging();
    let image = holed_scene();

    for policy in [BoundaryPolicy::Shrink, BoundaryPolicy::MaskIncomplete] {
        for filter_type in all_filters() {
            let filter = SpeckleFilter::with_policy(filter_type, policy).unwrap();
            let whole = filter.apply(&image).unwrap();

            for tile_size in [8, 13, 64] {
                let tiled = filter.apply_tiled(&image, tile_size).unwrap();
                for pol in [Polarization::VV, Polarization::VH] {
                    assert!(
                        same_values(whole.band(pol).unwrap(), tiled.band(pol).unwrap()),
                        "{} {:?} tile {} differs",
                        filter_type.name(),
                        policy,
                        tile_size
                    );
                }
                assert_eq!(whole.mask(), tiled.mask());
            }
        }
    }
}

#[test]
fn test_filters_reduce_speckle_variance() {
    common::init_logging();
    let image = common::scene("noisy", 3, (48, 48), 38.0, 7);
    let raw = image.band(Polarization::VV).unwrap();
    let raw_var = variance(raw);

    for filter_type in all_filters() {
        let out = SpeckleFilter::new(filter_type).unwrap().apply(&image).unwrap();
        let filtered = out.band(Polarization::VV).unwrap();
        println!("{}: variance {:.6} -> {:.6}", filter_type.name(), raw_var, variance(filtered));
        assert!(
            variance(filtered) < raw_var,
            "{} did not reduce variance",
            filter_type.name()
        );
    }
}

#[test]
fn test_invalid_pixels_pass_through() {
    let image = holed_scene();
    let raw = image.band(Polarization::VV).unwrap();

    for filter_type in all_filters() {
        let out = SpeckleFilter::new(filter_type).unwrap().apply(&image).unwrap();
        let filtered = out.band(Polarization::VV).unwrap();
        assert_eq!(filtered[[10, 22]], raw[[10, 22]], "{}", filter_type.name());
        assert!(!out.mask()[[10, 22]]);
    }
}

#[test]
fn test_mask_incomplete_masks_border() {
    let image = common::scene("border", 2, (20, 20), 38.0, 3);
    let filter = SpeckleFilter::with_policy(SpeckleFilterType::boxcar(7), BoundaryPolicy::MaskIncomplete).unwrap();
    let out = filter.apply(&image).unwrap();

    assert!(!out.mask()[[2, 10]]);
    assert!(!out.mask()[[10, 17]]);
    assert!(out.mask()[[3, 3]]);
    assert_eq!(out.valid_pixel_count(), 14 * 14);
}

#[test]
fn test_gamma_map_regions_partition() {
    let image = holed_scene();
    let band = image.band(Polarization::VV).unwrap();
    let engine = NeighborhoodStatsEngine::default();
    let (k, looks) = (7, 5.0);

    let regions = gamma_map_regions(&engine, band, image.mask(), k, looks).unwrap();
    let out = SpeckleFilter::new(SpeckleFilterType::gamma_map(k))
        .unwrap()
        .filter_band(band, image.mask())
        .unwrap();
    let stats = engine.window_stats(band, image.mask(), &NeighborhoodKernel::square(k).unwrap());

    let mut seen = [0usize; 3];
    for ((idx, region), &valid) in regions.indexed_iter().zip(image.mask().iter()) {
        match (region, valid) {
            (None, false) => assert_eq!(out[idx], band[idx]),
            (None, true) => panic!("valid pixel {:?} has no region", idx),
            (Some(_), false) => panic!("invalid pixel {:?} was classified", idx),
            (Some(GammaMapRegion::Homogeneous), true) => {
                seen[0] += 1;
                assert_relative_eq!(out[idx], stats.mean[idx], max_relative = 1e-5);
            }
            (Some(GammaMapRegion::StrongScatterer), true) => {
                seen[2] += 1;
                assert_eq!(out[idx], band[idx]);
            }
            (Some(GammaMapRegion::Textured), true) => {
                seen[1] += 1;
                assert!(out[idx].is_finite());
            }
        }
    }

    println!("Gamma MAP regions (homogeneous, textured, strong): {:?}", seen);
    assert_eq!(seen.iter().sum::<usize>(), image.valid_pixel_count());
}

fn variance(data: &Array2<f32>) -> f64 {
    let n = data.len() as f64;
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
}
