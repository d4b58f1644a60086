mod common;

use approx::assert_relative_eq;
use ndarray::Array2;
use s1ard::config::ProcessingConfig;
use s1ard::core::conversion;
use s1ard::core::speckle_filter::{SpeckleFilter, SpeckleFilterType};
use s1ard::io::{MemorySink, MemorySource};
use s1ard::pipeline::{CancellationToken, Pipeline};
use s1ard::types::{Polarization, RasterImage, SarError, Scale};

const SHAPE: (usize, usize) = (16, 16);

fn archive() -> Vec<RasterImage> {
    vec![
        common::ramp_scene("d01", 1, SHAPE, 101),
        common::ramp_scene("d13", 13, SHAPE, 113),
        common::ramp_scene("d25", 25, SHAPE, 125),
    ]
}

fn options(extra: &[(&str, &str)]) -> ProcessingConfig {
    ProcessingConfig::from_options(extra.iter().copied()).unwrap()
}

#[test]
fn test_end_to_end_linear() {
    common::init_logging();

    let source = MemorySource::new(archive()).with_flat_dem(300.0);
    let sink = MemorySink::new();
    let config = options(&[
        ("SPECKLE_FILTER_FRAMEWORK", "MONO"),
        ("SPECKLE_FILTER", "GAMMA MAP"),
        ("SPECKLE_FILTER_KERNEL_SIZE", "5"),
        ("FORMAT", "LINEAR"),
        ("SAVE_OUTPUT", "true"),
    ]);

    let report = Pipeline::new(config, &source).unwrap().with_sink(&sink).run().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.collection.len(), 3);
    assert_eq!(sink.len(), 3);

    let ids: Vec<&str> = report.collection.iter().map(|image| image.id.as_str()).collect();
    assert_eq!(ids, vec!["d01", "d13", "d25"]);

    for image in report.collection.iter() {
        assert_eq!(image.scale(), Scale::Linear);
        assert_eq!(image.polarizations(), vec![Polarization::VV, Polarization::VH]);
        // Border noise drops the two near and two far range columns
        assert_eq!(image.valid_pixel_count(), 16 * 12);
        for i in 0..SHAPE.0 {
            assert!(!image.mask()[[i, 1]]);
            assert!(image.mask()[[i, 2]]);
            assert!(image.mask()[[i, 13]]);
            assert!(!image.mask()[[i, 14]]);
        }
        for pol in image.polarizations() {
            let band = image.band(pol).unwrap();
            for (&v, &valid) in band.iter().zip(image.mask().iter()) {
                if valid {
                    assert!(v.is_finite() && v > 0.0);
                }
            }
        }
    }
}

#[test]
fn test_db_output_round_trips_to_linear() {
    common::init_logging();
    let source = MemorySource::new(archive()).with_flat_dem(0.0);
    let base = [("SPECKLE_FILTER_FRAMEWORK", "MONO"), ("SPECKLE_FILTER", "LEE")];

    let linear = Pipeline::new(options(&[base[0], base[1], ("FORMAT", "LINEAR")]), &source)
        .unwrap()
        .run()
        .unwrap();
    let db = Pipeline::new(options(&[base[0], base[1], ("FORMAT", "DB")]), &source)
        .unwrap()
        .run()
        .unwrap();

    for (lin, log) in linear.collection.iter().zip(db.collection.iter()) {
        assert_eq!(log.scale(), Scale::Db);
        assert_eq!(lin.mask(), log.mask());
        let back = conversion::to_linear(log).unwrap();
        let (a, b) = (lin.band(Polarization::VV).unwrap(), back.band(Polarization::VV).unwrap());
        for ((&x, &y), &valid) in a.iter().zip(b.iter()).zip(lin.mask().iter()) {
            if valid {
                assert_relative_eq!(x, y, max_relative = 1e-5);
            }
        }
    }
}

#[test]
fn test_single_image_window_equals_mono() {
    common::init_logging();
    let source = MemorySource::new(archive()).with_flat_dem(0.0);

    let mono = Pipeline::new(options(&[("SPECKLE_FILTER_FRAMEWORK", "MONO")]), &source)
        .unwrap()
        .run()
        .unwrap();
    let multi = Pipeline::new(
        options(&[("SPECKLE_FILTER_FRAMEWORK", "MULTI"), ("SPECKLE_FILTER_NR_OF_IMAGES", "1")]),
        &source,
    )
    .unwrap()
    .run()
    .unwrap();

    for (a, b) in mono.collection.iter().zip(multi.collection.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.mask(), b.mask());
        for pol in a.polarizations() {
            let (x, y) = (a.band(pol).unwrap(), b.band(pol).unwrap());
            assert!(x.iter().zip(y.iter()).all(|(p, q)| p == q || (p.is_nan() && q.is_nan())));
        }
    }
}

#[test]
fn test_multitemporal_composite() {
    common::init_logging();
    let images = archive();
    let source = MemorySource::new(images.clone());
    let config = options(&[
        ("APPLY_BORDER_NOISE_CORRECTION", "false"),
        ("APPLY_TERRAIN_FLATTENING", "false"),
        ("SPECKLE_FILTER", "BOXCAR"),
        ("SPECKLE_FILTER_KERNEL_SIZE", "5"),
        ("SPECKLE_FILTER_NR_OF_IMAGES", "3"),
        ("FORMAT", "LINEAR"),
    ]);
    let report = Pipeline::new(config, &source).unwrap().run().unwrap();
    let out = report.collection.get("d25").unwrap();

    let boxcar = SpeckleFilter::new(SpeckleFilterType::boxcar(5)).unwrap();
    let filtered: Vec<RasterImage> = images.iter().map(|image| boxcar.apply(image).unwrap()).collect();

    let (i, j) = (8, 8);
    let pol = Polarization::VV;
    let ratio_sum: f32 = images
        .iter()
        .zip(filtered.iter())
        .map(|(raw, f)| raw.band(pol).unwrap()[[i, j]] / f.band(pol).unwrap()[[i, j]])
        .sum();
    let f_target = filtered[2].band(pol).unwrap()[[i, j]];
    let expected = f_target / 3.0 * ratio_sum;

    assert_relative_eq!(out.band(pol).unwrap()[[i, j]], expected, max_relative = 1e-5);
    assert_ne!(out.band(pol).unwrap()[[i, j]], f_target);
}

#[test]
fn test_tiled_pipeline_matches_untiled() {
    let source = MemorySource::new(archive()).with_flat_dem(10.0);
    let base = [("SPECKLE_FILTER", "REFINED LEE"), ("FORMAT", "LINEAR")];

    let whole = Pipeline::new(options(&[base[0], base[1]]), &source).unwrap().run().unwrap();
    let tiled = Pipeline::new(
        options(&[base[0], base[1], ("TILE_SIZE", "6"), ("NUM_THREADS", "2")]),
        &source,
    )
    .unwrap()
    .run()
    .unwrap();

    for (a, b) in whole.collection.iter().zip(tiled.collection.iter()) {
        assert_eq!(a.mask(), b.mask());
        for pol in a.polarizations() {
            let (x, y) = (a.band(pol).unwrap(), b.band(pol).unwrap());
            assert!(x.iter().zip(y.iter()).all(|(p, q)| p == q || (p.is_nan() && q.is_nan())));
        }
    }
}

#[test]
fn test_query_and_clip() {
    let source = MemorySource::new(archive()).with_flat_dem(0.0);
    let config = options(&[
        ("START_DATE", "2021-04-10"),
        ("STOP_DATE", "2021-05-01"),
        ("ROI", "7.4, 46.0, 7.5008, 46.3"),
        ("CLIP_TO_ROI", "true"),
        ("FORMAT", "LINEAR"),
    ]);

    let report = Pipeline::new(config, &source).unwrap().run().unwrap();
    assert_eq!(report.collection.len(), 2);

    for image in report.collection.iter() {
        assert_relative_eq!(image.geometry.footprint.max_lon, 7.5008, epsilon = 1e-9);
        for i in 0..SHAPE.0 {
            for j in 8..SHAPE.1 {
                assert!(!image.mask()[[i, j]]);
            }
        }
        assert!(image.mask()[[4, 5]]);
    }
}

#[test]
fn test_clip_precedes_filtering() {
    common::init_logging();
    let images = archive();
    let source = MemorySource::new(images.clone());
    let roi = "7.4, 46.0, 7.5008, 46.3";
    let config = options(&[
        ("APPLY_BORDER_NOISE_CORRECTION", "false"),
        ("APPLY_TERRAIN_FLATTENING", "false"),
        ("SPECKLE_FILTER_FRAMEWORK", "MONO"),
        ("SPECKLE_FILTER", "BOXCAR"),
        ("SPECKLE_FILTER_KERNEL_SIZE", "5"),
        ("FORMAT", "LINEAR"),
        ("ROI", roi),
        ("CLIP_TO_ROI", "true"),
    ]);
    let report = Pipeline::new(config, &source).unwrap().run().unwrap();
    let out = report.collection.get("d13").unwrap();

    // Column 7 is the last one inside the ROI; its window reaches columns 8 and 9
    let raw = images[1].band(Polarization::VV).unwrap();
    let (i, j) = (6, 7);
    let inside: Vec<f32> = (i - 2..=i + 2)
        .flat_map(|r| (j - 2..=j).map(move |c| raw[[r, c]]))
        .collect();
    let expected = inside.iter().sum::<f32>() / inside.len() as f32;
    let unclipped = SpeckleFilter::new(SpeckleFilterType::boxcar(5))
        .unwrap()
        .apply(&images[1])
        .unwrap();

    let value = out.band(Polarization::VV).unwrap()[[i, j]];
    assert_relative_eq!(value, expected, max_relative = 1e-5);
    assert!((value - unclipped.band(Polarization::VV).unwrap()[[i, j]]).abs() > 1e-6);
}

#[test]
fn test_clip_applies_to_temporal_members() {
    common::init_logging();
    let images = archive();
    let source = MemorySource::new(images.clone());
    let roi = "7.4, 46.0, 7.5008, 46.3";
    let config = options(&[
        ("APPLY_BORDER_NOISE_CORRECTION", "false"),
        ("APPLY_TERRAIN_FLATTENING", "false"),
        ("SPECKLE_FILTER", "BOXCAR"),
        ("SPECKLE_FILTER_KERNEL_SIZE", "5"),
        ("SPECKLE_FILTER_NR_OF_IMAGES", "3"),
        ("FORMAT", "LINEAR"),
        ("ROI", roi),
        ("CLIP_TO_ROI", "true"),
    ]);
    let report = Pipeline::new(config, &source).unwrap().run().unwrap();
    let out = report.collection.get("d25").unwrap();

    let bbox = s1ard::types::BoundingBox::new(7.4, 46.0, 7.5008, 46.3);
    let boxcar = SpeckleFilter::new(SpeckleFilterType::boxcar(5)).unwrap();
    let clipped: Vec<RasterImage> = images.iter().map(|image| image.clip_to(&bbox).unwrap()).collect();
    let filtered: Vec<RasterImage> = clipped.iter().map(|image| boxcar.apply(image).unwrap()).collect();

    let (i, j) = (6, 7);
    let pol = Polarization::VV;
    let ratio_sum: f32 = clipped
        .iter()
        .zip(filtered.iter())
        .map(|(raw, f)| raw.band(pol).unwrap()[[i, j]] / f.band(pol).unwrap()[[i, j]])
        .sum();
    let expected = filtered[2].band(pol).unwrap()[[i, j]] / 3.0 * ratio_sum;

    assert_relative_eq!(out.band(pol).unwrap()[[i, j]], expected, max_relative = 1e-5);
    assert!(!out.mask()[[i, 8]]);
}

#[test]
fn test_ratio_layer_follows_output_bands() {
    let source = MemorySource::new(archive()).with_flat_dem(0.0);
    let config = options(&[
        ("SPECKLE_FILTER_FRAMEWORK", "MONO"),
        ("FORMAT", "LINEAR"),
        ("ADD_RATIO", "true"),
    ]);
    let report = Pipeline::new(config, &source).unwrap().run().unwrap();

    for image in report.collection.iter() {
        let ratio = image.ratio().unwrap();
        let (vv, vh) = (image.band(Polarization::VV).unwrap(), image.band(Polarization::VH).unwrap());
        for (((&r, &a), &b), &valid) in ratio.iter().zip(vv.iter()).zip(vh.iter()).zip(image.mask().iter()) {
            if valid {
                assert_relative_eq!(r, a / b, max_relative = 1e-6);
            }
        }
    }

    let plain = Pipeline::new(options(&[("FORMAT", "LINEAR")]), &source).unwrap().run().unwrap();
    assert!(plain.collection.iter().all(|image| image.ratio().is_none()));
}

#[test]
fn test_configuration_fails_fast() {
    assert!(matches!(
        ProcessingConfig::from_options([("SPECKLE_FILTER_KERNEL_SIZE", "4")]),
        Err(SarError::Configuration(_))
    ));
    assert!(matches!(
        ProcessingConfig::from_options([("SPECKLE_FILTER", "MEDIAN")]),
        Err(SarError::Configuration(_))
    ));
    assert!(matches!(
        ProcessingConfig::from_options([("START_DATE", "2021-05-01"), ("STOP_DATE", "2021-04-01")]),
        Err(SarError::Configuration(_))
    ));
    assert!(matches!(
        ProcessingConfig::from_options([("CLIP_TO_ROI", "true")]),
        Err(SarError::Configuration(_))
    ));

    let source = MemorySource::new(archive());
    let config = ProcessingConfig {
        terrain_flattening_additional_layover_shadow_buffer: -1.0,
        ..Default::default()
    };
    assert!(matches!(Pipeline::new(config, &source), Err(SarError::Configuration(_))));
}

#[test]
fn test_external_source_failure_is_isolated() {
    common::init_logging();
    let mut images = archive();
    images[1].geometry = common::geometry(SHAPE, 8.5, 46.2);

    let source = MemorySource::new(images).with_dem(|grid, shape| {
        if grid.geo_transform.top_left_x > 8.0 {
            Err(SarError::ExternalSource("elevation tile unavailable".to_string()))
        } else {
            Ok(Array2::zeros(shape))
        }
    });

    let report = Pipeline::new(options(&[("SPECKLE_FILTER_FRAMEWORK", "MONO")]), &source)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.collection.len(), 2);
    assert!(report.collection.get("d13").is_none());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].image_id, "d13");
    assert!(report.failures[0].error.contains("elevation tile unavailable"));
}

#[test]
fn test_cancellation_stops_job() {
    common::init_logging();
    let token = CancellationToken::new();
    let trigger = token.clone();

    let source = MemorySource::new(archive()).with_dem(move |_, shape| {
        trigger.cancel();
        Ok(Array2::zeros(shape))
    });
    let sink = MemorySink::new();
    let config = options(&[("SAVE_OUTPUT", "true")]);

    let result = Pipeline::new(config, &source)
        .unwrap()
        .with_sink(&sink)
        .with_cancellation(token.clone())
        .run();

    assert!(matches!(result, Err(SarError::Cancelled)));
    assert!(token.is_cancelled());
    assert!(sink.is_empty());
}
