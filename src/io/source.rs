use crate::types::{
    BoundingBox, GridGeometry, OrbitPass, Platform, Polarization, RasterCollection, RasterImage,
    SarError, SarRealImage, SarResult,
};
use chrono::NaiveDate;
use ndarray::Array2;

/// Catalog filter for the images a job processes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionQuery {
    pub roi: Option<BoundingBox>,
    /// Inclusive
    pub start_date: Option<NaiveDate>,
    /// Exclusive
    pub stop_date: Option<NaiveDate>,
    pub polarizations: Vec<Polarization>,
    pub orbit_pass: Option<OrbitPass>,
    pub platform: Option<Platform>,
    pub relative_orbit: Option<u32>,
}

impl CollectionQuery {
    pub fn matches(&self, image: &RasterImage) -> bool {
        let date = image.acquisition_date();
        self.roi.map_or(true, |roi| roi.intersects(&image.geometry.footprint))
            && self.start_date.map_or(true, |start| date >= start)
            && self.stop_date.map_or(true, |stop| date < stop)
            && self.polarizations.iter().all(|&pol| image.has_polarization(pol))
            && self.orbit_pass.map_or(true, |pass| image.orbit_pass == pass)
            && self.platform.map_or(true, |platform| image.platform == platform)
            && self.relative_orbit.map_or(true, |orbit| image.relative_orbit == orbit)
    }
}

/// Provider of backscatter tiles, temporal neighbors and elevation data
pub trait RasterSource: Send + Sync {
    /// Images matching the query, restricted to the queried polarizations
    fn query(&self, query: &CollectionQuery) -> SarResult<RasterCollection>;

    /// Pool of images a temporal window for `target` may be drawn from
    fn temporal_candidates(&self, target: &RasterImage) -> SarResult<Vec<RasterImage>>;

    /// Resample `image` onto `grid` with the given shape
    fn align_to(
        &self,
        image: &RasterImage,
        grid: &GridGeometry,
        shape: (usize, usize),
    ) -> SarResult<RasterImage>;

    /// Elevation (m) on `grid`
    fn dem(&self, grid: &GridGeometry, shape: (usize, usize)) -> SarResult<SarRealImage>;
}

type DemProvider = Box<dyn Fn(&GridGeometry, (usize, usize)) -> SarResult<SarRealImage> + Send + Sync>;

/// In-memory archive of co-registered images
pub struct MemorySource {
    archive: Vec<RasterImage>,
    dem: Option<DemProvider>,
}

impl MemorySource {
    pub fn new(archive: Vec<RasterImage>) -> Self {
        Self { archive, dem: None }
    }

    pub fn with_dem<F>(mut self, provider: F) -> Self
    where
        F: Fn(&GridGeometry, (usize, usize)) -> SarResult<SarRealImage> + Send + Sync + 'static,
    {
        self.dem = Some(Box::new(provider));
        self
    }

    /// Constant elevation everywhere
    pub fn with_flat_dem(self, elevation: f32) -> Self {
        self.with_dem(move |_, shape| Ok(Array2::from_elem(shape, elevation)))
    }

    pub fn archive(&self) -> &[RasterImage] {
        &self.archive
    }
}

impl RasterSource for MemorySource {
    fn query(&self, query: &CollectionQuery) -> SarResult<RasterCollection> {
        let images = self
            .archive
            .iter()
            .filter(|image| query.matches(image))
            .map(|image| {
                if query.polarizations.is_empty() {
                    Ok(image.clone())
                } else {
                    image.select_bands(&query.polarizations)
                }
            })
            .collect::<SarResult<Vec<_>>>()?;

        log::debug!("Query matched {} of {} archived images", images.len(), self.archive.len());
        Ok(RasterCollection::new(images))
    }

    fn temporal_candidates(&self, target: &RasterImage) -> SarResult<Vec<RasterImage>> {
        Ok(self
            .archive
            .iter()
            .filter(|image| image.relative_orbit == target.relative_orbit)
            .cloned()
            .collect())
    }

    fn align_to(
        &self,
        image: &RasterImage,
        grid: &GridGeometry,
        shape: (usize, usize),
    ) -> SarResult<RasterImage> {
        if image.shape() == shape && image.geometry.same_grid(grid) {
            Ok(image.clone())
        } else {
            Err(SarError::Data(format!(
                "Image {} is not on the requested grid and no resampler is available",
                image.id
            )))
        }
    }

    fn dem(&self, grid: &GridGeometry, shape: (usize, usize)) -> SarResult<SarRealImage> {
        match &self.dem {
            Some(provider) => provider(grid, shape),
            None => Err(SarError::ExternalSource("No elevation model configured".to_string())),
        }
    }
}
