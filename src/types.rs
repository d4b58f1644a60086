use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Real-valued backscatter intensity (linear power) or dB value
pub type SarReal = f32;

/// 2D real raster (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// Validity mask, `true` marks a valid pixel
pub type Mask = Array2<bool>;

/// Polarization channels carried by Sentinel-1 GRD products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(SarError::Configuration(format!("Invalid polarization: {}", other))),
        }
    }
}

/// Orbit pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// Sentinel-1 platform unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    A,
    B,
}

/// Radiometric scale of the backscatter bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Linear,
    Db,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Planar area in squared degrees
    pub fn area(&self) -> f64 {
        (self.max_lon - self.min_lon).max(0.0) * (self.max_lat - self.min_lat).max(0.0)
    }

    /// Overlapping box, `None` when the boxes do not share any area
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_lon = self.min_lon.max(other.min_lon);
        let max_lon = self.max_lon.min(other.max_lon);
        let min_lat = self.min_lat.max(other.min_lat);
        let max_lat = self.max_lat.min(other.max_lat);

        if min_lon < max_lon && min_lat < max_lat {
            Some(BoundingBox { min_lon, max_lon, min_lat, max_lat })
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Fraction of this box covered by `other`
    pub fn overlap_fraction(&self, other: &BoundingBox) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(other).map_or(0.0, |i| i.area() / area)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }
}

/// Grid placement of a raster tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub footprint: BoundingBox,
    pub geo_transform: GeoTransform,
    /// Ground pixel spacing in meters
    pub pixel_spacing: f64,
}

impl GridGeometry {
    /// Derive the footprint from the transform and the grid shape
    pub fn new(geo_transform: GeoTransform, shape: (usize, usize), pixel_spacing: f64) -> Self {
        let (rows, cols) = shape;
        let corners = [
            (geo_transform.top_left_x, geo_transform.top_left_y),
            (
                geo_transform.top_left_x + cols as f64 * geo_transform.pixel_width,
                geo_transform.top_left_y + cols as f64 * geo_transform.rotation_y,
            ),
            (
                geo_transform.top_left_x + rows as f64 * geo_transform.rotation_x,
                geo_transform.top_left_y + rows as f64 * geo_transform.pixel_height,
            ),
            (
                geo_transform.top_left_x
                    + cols as f64 * geo_transform.pixel_width
                    + rows as f64 * geo_transform.rotation_x,
                geo_transform.top_left_y
                    + cols as f64 * geo_transform.rotation_y
                    + rows as f64 * geo_transform.pixel_height,
            ),
        ];

        let mut footprint = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            footprint.min_lon = footprint.min_lon.min(x);
            footprint.max_lon = footprint.max_lon.max(x);
            footprint.min_lat = footprint.min_lat.min(y);
            footprint.max_lat = footprint.max_lat.max(y);
        }

        Self { footprint, geo_transform, pixel_spacing }
    }

    /// Same grid, i.e. co-registered pixels
    pub fn same_grid(&self, other: &GridGeometry) -> bool {
        self.geo_transform == other.geo_transform && self.pixel_spacing == other.pixel_spacing
    }
}

/// One multi-band Sentinel-1 backscatter tile with its angle band and metadata
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub id: String,
    bands: BTreeMap<Polarization, SarRealImage>,
    angle: SarRealImage,
    mask: Mask,
    pub geometry: GridGeometry,
    pub acquisition_time: DateTime<Utc>,
    pub relative_orbit: u32,
    pub orbit_pass: OrbitPass,
    pub platform: Platform,
    scale: Scale,
    /// Linear VV/VH ratio layer, dropped whenever the bands change
    ratio: Option<SarRealImage>,
}

impl RasterImage {
    /// Create a linear-scale image with an all-valid mask
    pub fn new(
        id: impl Into<String>,
        bands: BTreeMap<Polarization, SarRealImage>,
        angle: SarRealImage,
        geometry: GridGeometry,
        acquisition_time: DateTime<Utc>,
    ) -> SarResult<Self> {
        let mask = Mask::from_elem(angle.dim(), true);
        let image = Self {
            id: id.into(),
            bands,
            angle,
            mask,
            geometry,
            acquisition_time,
            relative_orbit: 0,
            orbit_pass: OrbitPass::Descending,
            platform: Platform::A,
            scale: Scale::Linear,
            ratio: None,
        };
        image.validate()?;
        Ok(image)
    }

    pub fn with_orbit(mut self, relative_orbit: u32, orbit_pass: OrbitPass) -> Self {
        self.relative_orbit = relative_orbit;
        self.orbit_pass = orbit_pass;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Check the shape invariants shared by bands, angle and mask
    pub fn validate(&self) -> SarResult<()> {
        let shape = self.angle.dim();
        if shape.0 == 0 || shape.1 == 0 {
            return Err(SarError::Data(format!("Image {} has an empty angle band", self.id)));
        }
        if self.bands.is_empty() {
            return Err(SarError::Data(format!("Image {} has no backscatter bands", self.id)));
        }
        if self.mask.dim() != shape {
            return Err(SarError::Data(format!(
                "Image {}: mask shape {:?} differs from angle band {:?}",
                self.id,
                self.mask.dim(),
                shape
            )));
        }
        for (pol, band) in &self.bands {
            if band.dim() != shape {
                return Err(SarError::Data(format!(
                    "Image {}: band {} shape {:?} differs from angle band {:?}",
                    self.id,
                    pol,
                    band.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.angle.dim()
    }

    pub fn polarizations(&self) -> Vec<Polarization> {
        self.bands.keys().copied().collect()
    }

    pub fn has_polarization(&self, pol: Polarization) -> bool {
        self.bands.contains_key(&pol)
    }

    pub fn bands(&self) -> &BTreeMap<Polarization, SarRealImage> {
        &self.bands
    }

    pub fn band(&self, pol: Polarization) -> SarResult<&SarRealImage> {
        self.bands
            .get(&pol)
            .ok_or_else(|| SarError::Data(format!("Image {} is missing band {}", self.id, pol)))
    }

    /// First backscatter band in polarization order
    pub fn first_band(&self) -> &SarRealImage {
        // validate() guarantees at least one band
        self.bands.values().next().unwrap_or(&self.angle)
    }

    pub fn angle(&self) -> &SarRealImage {
        &self.angle
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquisition_time.date_naive()
    }

    /// Band values with invalid pixels set to NaN
    pub fn masked_band(&self, pol: Polarization) -> SarResult<SarRealImage> {
        let band = self.band(pol)?;
        Ok(Zip::from(band)
            .and(&self.mask)
            .map_collect(|&v, &valid| if valid { v } else { f32::NAN }))
    }

    /// Keep only the requested polarizations
    pub fn select_bands(&self, pols: &[Polarization]) -> SarResult<RasterImage> {
        let mut bands = BTreeMap::new();
        for &pol in pols {
            bands.insert(pol, self.band(pol)?.clone());
        }
        self.with_bands(bands)
    }

    /// New image state with replaced backscatter bands; metadata, angle and mask carry over
    pub fn with_bands(&self, bands: BTreeMap<Polarization, SarRealImage>) -> SarResult<RasterImage> {
        let image = RasterImage {
            id: self.id.clone(),
            bands,
            angle: self.angle.clone(),
            mask: self.mask.clone(),
            geometry: self.geometry,
            acquisition_time: self.acquisition_time,
            relative_orbit: self.relative_orbit,
            orbit_pass: self.orbit_pass,
            platform: self.platform,
            scale: self.scale,
            ratio: None,
        };
        image.validate()?;
        Ok(image)
    }

    /// New image state whose mask is the logical AND of the current mask and `mask`
    pub fn restrict_mask(&self, mask: &Mask) -> SarResult<RasterImage> {
        if mask.dim() != self.shape() {
            return Err(SarError::Data(format!(
                "Image {}: mask shape {:?} differs from image shape {:?}",
                self.id,
                mask.dim(),
                self.shape()
            )));
        }
        let mut image = self.clone();
        Zip::from(&mut image.mask).and(mask).for_each(|m, &r| *m = *m && r);
        Ok(image)
    }

    /// Replace bands and restrict the mask in one step
    pub fn with_bands_and_mask(
        &self,
        bands: BTreeMap<Polarization, SarRealImage>,
        mask: &Mask,
    ) -> SarResult<RasterImage> {
        self.with_bands(bands)?.restrict_mask(mask)
    }

    pub fn ratio(&self) -> Option<&SarRealImage> {
        self.ratio.as_ref()
    }

    pub(crate) fn with_ratio(mut self, ratio: SarRealImage) -> SarResult<Self> {
        if ratio.dim() != self.shape() {
            return Err(SarError::Data(format!(
                "Image {}: ratio shape {:?} differs from image shape {:?}",
                self.id,
                ratio.dim(),
                self.shape()
            )));
        }
        self.ratio = Some(ratio);
        Ok(self)
    }

    pub(crate) fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    /// Mask every pixel whose centre falls outside `roi` and shrink the footprint
    pub fn clip_to(&self, roi: &BoundingBox) -> SarResult<RasterImage> {
        let footprint = self.geometry.footprint.intersection(roi).ok_or_else(|| {
            SarError::Processing(format!("Image {} does not intersect the region of interest", self.id))
        })?;

        let transform = self.geometry.geo_transform;
        let inside = Mask::from_shape_fn(self.shape(), |(row, col)| {
            let (x, y) = transform.pixel_center(row, col);
            roi.contains(x, y)
        });

        let mut clipped = self.restrict_mask(&inside)?;
        clipped.geometry.footprint = footprint;
        Ok(clipped)
    }
}

/// Time-ordered sequence of images
#[derive(Debug, Clone, Default)]
pub struct RasterCollection {
    images: Vec<RasterImage>,
}

impl RasterCollection {
    /// Sort by acquisition time, ties broken by id
    pub fn new(mut images: Vec<RasterImage>) -> Self {
        images.sort_by(|a, b| {
            a.acquisition_time
                .cmp(&b.acquisition_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterImage> {
        self.images.iter()
    }

    pub fn images(&self) -> &[RasterImage] {
        &self.images
    }

    pub fn get(&self, id: &str) -> Option<&RasterImage> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn into_images(self) -> Vec<RasterImage> {
        self.images
    }
}

impl IntoIterator for RasterCollection {
    type Item = RasterImage;
    type IntoIter = std::vec::IntoIter<RasterImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

impl FromIterator<RasterImage> for RasterCollection {
    fn from_iter<I: IntoIterator<Item = RasterImage>>(iter: I) -> Self {
        RasterCollection::new(iter.into_iter().collect())
    }
}

/// Error types for SAR processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Numeric error: {0}")]
    Numeric(String),

    #[error("External source error: {0}")]
    ExternalSource(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing cancelled")]
    Cancelled,
}

impl SarError {
    /// Errors that stop the whole collection job instead of excluding one image
    pub fn aborts_job(&self) -> bool {
        matches!(
            self,
            SarError::Configuration(_) | SarError::Data(_) | SarError::Cancelled
        )
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
