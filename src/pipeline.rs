//! Stage sequencing for a collection job

use crate::config::{OutputFormat, ProcessingConfig, SpeckleFilterFramework};
use crate::core::border_noise::{BorderNoiseMasker, BorderNoiseParams};
use crate::core::conversion;
use crate::core::multitemporal::{select_temporal_neighbors, QueganFilter};
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::terrain_flatten::TerrainFlattener;
use crate::io::{RasterSink, RasterSource};
use crate::types::{Polarization, RasterCollection, RasterImage, SarError, SarResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> SarResult<()> {
        if self.is_cancelled() {
            Err(SarError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// An image excluded from the output
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFailure {
    pub image_id: String,
    pub error: String,
}

/// Job result: processed images plus the images that were dropped
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    pub collection: RasterCollection,
    pub failures: Vec<ImageFailure>,
}

impl ProcessingReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum SpeckleStage {
    Mono(SpeckleFilter),
    Multi(QueganFilter),
}

/// Runs border noise masking, speckle filtering, terrain flattening and
/// format conversion over a collection
pub struct Pipeline<'a> {
    config: ProcessingConfig,
    source: &'a dyn RasterSource,
    sink: Option<&'a dyn RasterSink>,
    cancel: CancellationToken,
    border: Option<BorderNoiseMasker>,
    speckle: Option<SpeckleStage>,
    terrain: Option<TerrainFlattener>,
}

impl<'a> Pipeline<'a> {
    /// Validate the configuration and build the enabled stages
    pub fn new(config: ProcessingConfig, source: &'a dyn RasterSource) -> SarResult<Self> {
        config.validate()?;

        let border = config.apply_border_noise_correction.then(|| {
            BorderNoiseMasker::new(BorderNoiseParams {
                edge_trim: config.border_noise_edge_trim,
                ..Default::default()
            })
        });

        let speckle = if config.apply_speckle_filtering {
            let filter = SpeckleFilter::with_policy(config.speckle_filter_type()?, config.boundary_policy)?;
            Some(match config.speckle_filter_framework {
                SpeckleFilterFramework::Mono => SpeckleStage::Mono(filter),
                SpeckleFilterFramework::Multi => SpeckleStage::Multi(
                    QueganFilter::new(filter, config.speckle_filter_nr_of_images)?
                        .with_tile_size(config.tile_size),
                ),
            })
        } else {
            None
        };

        let terrain = if config.apply_terrain_flattening {
            Some(TerrainFlattener::new(config.terrain_flattening_params())?)
        } else {
            None
        };

        Ok(Self {
            config,
            source,
            sink: None,
            cancel: CancellationToken::new(),
            border,
            speckle,
            terrain,
        })
    }

    pub fn with_sink(mut self, sink: &'a dyn RasterSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Query the source and process every matching image
    pub fn run(&self) -> SarResult<ProcessingReport> {
        log::info!("Starting analysis-ready data job");
        log::debug!("Configuration: {:?}", self.config);

        if self.config.save_output && self.sink.is_none() {
            return Err(SarError::Configuration(
                "SAVE_OUTPUT is set but no sink was provided".to_string(),
            ));
        }
        self.cancel.check()?;

        let collection = self.source.query(&self.config.collection_query())?;
        if collection.is_empty() {
            return Err(SarError::Data("No images match the collection query".to_string()));
        }
        log::info!("{} images selected", collection.len());

        self.process_collection(collection)
    }

    /// Process an already retrieved collection
    pub fn process_collection(&self, collection: RasterCollection) -> SarResult<ProcessingReport> {
        let required = self.config.polarization.polarizations();
        for image in collection.iter() {
            image.validate()?;
            for &pol in &required {
                image.band(pol)?;
            }
        }

        let images = collection.into_images();
        let results = self.run_tasks(&images)?;

        let mut processed = Vec::with_capacity(images.len());
        let mut failures = Vec::new();
        for (image, result) in images.iter().zip(results) {
            match result {
                Ok(out) => processed.push(out),
                Err(e) if e.aborts_job() => return Err(e),
                Err(e) => {
                    log::warn!("Excluding {}: {}", image.id, e);
                    failures.push(ImageFailure {
                        image_id: image.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Job finished: {} processed, {} excluded",
            processed.len(),
            failures.len()
        );
        Ok(ProcessingReport {
            collection: RasterCollection::new(processed),
            failures,
        })
    }

    #[cfg(feature = "parallel")]
    fn run_tasks(&self, images: &[RasterImage]) -> SarResult<Vec<SarResult<RasterImage>>> {
        use rayon::prelude::*;

        let work = || {
            images
                .par_iter()
                .map(|image| self.process_image(image))
                .collect::<Vec<_>>()
        };

        if self.config.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_threads)
                .build()
                .map_err(|e| SarError::Processing(format!("Failed to build worker pool: {}", e)))?;
            Ok(pool.install(work))
        } else {
            Ok(work())
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run_tasks(&self, images: &[RasterImage]) -> SarResult<Vec<SarResult<RasterImage>>> {
        Ok(images.iter().map(|image| self.process_image(image)).collect())
    }

    /// All enabled stages for one image
    pub fn process_image(&self, image: &RasterImage) -> SarResult<RasterImage> {
        log::info!("Processing {}", image.id);
        let mut current = self.clip(image.select_bands(&self.config.polarization.polarizations())?)?;

        self.cancel.check()?;
        if let Some(border) = &self.border {
            current = border.apply(&current)?;
        }

        self.cancel.check()?;
        match &self.speckle {
            Some(SpeckleStage::Mono(filter)) => {
                current = if self.config.tile_size > 0 {
                    filter.apply_tiled(&current, self.config.tile_size)?
                } else {
                    filter.apply(&current)?
                };
            }
            Some(SpeckleStage::Multi(quegan)) => {
                current = self.multi_temporal(quegan, &current)?;
            }
            None => {}
        }

        self.cancel.check()?;
        if let Some(terrain) = &self.terrain {
            let dem = self.source.dem(&current.geometry, current.shape())?;
            current = terrain.flatten(&current, &dem)?;
        }

        self.cancel.check()?;
        if self.config.format == OutputFormat::Db {
            current = conversion::to_db(&current)?;
        }
        if self.config.add_ratio {
            current = conversion::add_ratio(&current)?;
        }

        if self.config.save_output {
            if let Some(sink) = self.sink {
                sink.export(&current)?;
            }
        }

        Ok(current)
    }

    /// Restrict to the ROI when clipping is on
    fn clip(&self, image: RasterImage) -> SarResult<RasterImage> {
        match (&self.config.roi, self.config.clip_to_roi) {
            (Some(roi), true) => image.clip_to(roi),
            _ => Ok(image),
        }
    }

    fn multi_temporal(&self, quegan: &QueganFilter, target: &RasterImage) -> SarResult<RasterImage> {
        let candidates = self.source.temporal_candidates(target)?;
        let window = select_temporal_neighbors(target, &candidates, quegan.nr_of_images());
        log::debug!(
            "{}: temporal window {:?}",
            target.id,
            window.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
        );

        let pols = target.polarizations();
        let mut members = Vec::with_capacity(window.len());
        for member in window.into_iter().filter(|m| m.id != target.id) {
            match self.prepare_member(member, target, &pols) {
                Ok(prepared) => members.push(prepared),
                Err(SarError::Cancelled) => return Err(SarError::Cancelled),
                Err(e) => log::warn!("{}: skipping temporal member {}: {}", target.id, member.id, e),
            }
        }

        quegan.composite(target, &members)
    }

    fn prepare_member(
        &self,
        member: &RasterImage,
        target: &RasterImage,
        pols: &[Polarization],
    ) -> SarResult<RasterImage> {
        self.cancel.check()?;
        let selected = self.clip(member.select_bands(pols)?)?;
        let aligned = self.source.align_to(&selected, &target.geometry, target.shape())?;
        match &self.border {
            Some(border) => border.apply(&aligned),
            None => Ok(aligned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};
    use crate::types::{GeoTransform, GridGeometry};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn scene(id: &str, day: u32, x0: f64) -> RasterImage {
        let mut bands = BTreeMap::new();
        bands.insert(Polarization::VV, Array2::from_elem((8, 8), 0.2f32));
        bands.insert(Polarization::VH, Array2::from_elem((8, 8), 0.05f32));
        let geometry = GridGeometry::new(GeoTransform::north_up(x0, 45.0, 0.001, 0.001), (8, 8), 10.0);
        RasterImage::new(
            id,
            bands,
            Array2::from_elem((8, 8), 38.0),
            geometry,
            Utc.with_ymd_and_hms(2021, 6, day, 5, 30, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SarError::Cancelled)));
    }

    #[test]
    fn test_cancelled_job() {
        let source = MemorySource::new(vec![scene("a", 1, 5.0)]).with_flat_dem(0.0);
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = Pipeline::new(ProcessingConfig::default(), &source)
            .unwrap()
            .with_cancellation(token);
        assert!(matches!(pipeline.run(), Err(SarError::Cancelled)));
    }

    #[test]
    fn test_external_failure_is_isolated() {
        let source = MemorySource::new(vec![scene("ok", 1, 5.0), scene("no-dem", 13, 7.0)]).with_dem(
            |grid, shape| {
                if grid.geo_transform.top_left_x > 6.0 {
                    Err(SarError::ExternalSource("tile not available".to_string()))
                } else {
                    Ok(Array2::zeros(shape))
                }
            },
        );

        let config = ProcessingConfig {
            speckle_filter_framework: SpeckleFilterFramework::Mono,
            ..Default::default()
        };
        let report = Pipeline::new(config, &source).unwrap().run().unwrap();
        assert_eq!(report.collection.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].image_id, "no-dem");
        assert!(!report.is_complete());
    }

    #[test]
    fn test_missing_band_aborts() {
        let mut vv_only = BTreeMap::new();
        vv_only.insert(Polarization::VV, Array2::from_elem((8, 8), 0.2f32));
        let image = scene("a", 1, 5.0).with_bands(vv_only).unwrap();

        let source = MemorySource::new(vec![]).with_flat_dem(0.0);
        let pipeline = Pipeline::new(ProcessingConfig::default(), &source).unwrap();
        let result = pipeline.process_collection(RasterCollection::new(vec![image]));
        assert!(matches!(result, Err(SarError::Data(_))));
    }

    #[test]
    fn test_empty_query_is_data_error() {
        let source = MemorySource::new(vec![]);
        let pipeline = Pipeline::new(ProcessingConfig::default(), &source).unwrap();
        assert!(matches!(pipeline.run(), Err(SarError::Data(_))));
    }

    #[test]
    fn test_save_requires_sink() {
        let source = MemorySource::new(vec![scene("a", 1, 5.0)]).with_flat_dem(0.0);
        let config = ProcessingConfig { save_output: true, ..Default::default() };
        let pipeline = Pipeline::new(config.clone(), &source).unwrap();
        assert!(matches!(pipeline.run(), Err(SarError::Configuration(_))));

        let sink = MemorySink::new();
        let report = Pipeline::new(config, &source).unwrap().with_sink(&sink).run().unwrap();
        assert_eq!(report.collection.len(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let source = MemorySource::new(vec![]);
        let config = ProcessingConfig { speckle_filter_kernel_size: 6, ..Default::default() };
        assert!(matches!(Pipeline::new(config, &source), Err(SarError::Configuration(_))));
    }
}
