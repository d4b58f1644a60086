use crate::core::neighborhood::{
    map_pixels, region_percentile, BoundaryPolicy, NeighborhoodKernel, NeighborhoodStatsEngine,
    WindowStats,
};
use crate::core::tiling::TiledProcessor;
use crate::types::{Mask, RasterImage, SarError, SarRealImage, SarResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Equivalent number of looks of Sentinel-1 IW GRD products
pub const DEFAULT_NUM_LOOKS: f32 = 5.0;

/// Refined Lee sample windows, row-major over {-2, 0, 2} x {-2, 0, 2}
const REFINED_LEE_SAMPLES: [(isize, isize); 9] = [
    (-2, -2),
    (-2, 0),
    (-2, 2),
    (0, -2),
    (0, 0),
    (0, 2),
    (2, -2),
    (2, 0),
    (2, 2),
];

/// Lee Sigma parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeeSigmaParams {
    /// Filter window size (must be odd)
    pub window_size: usize,
    pub num_looks: u32,
    pub sigma: f32,
    /// Window of the a-priori mean and the bright pixel gate
    pub target_window: usize,
    /// Bright pixels needed in the target window to keep the centre unfiltered
    pub bright_count: u32,
    /// Region percentile that defines bright pixels
    pub percentile: f64,
}

impl Default for LeeSigmaParams {
    fn default() -> Self {
        Self {
            window_size: 7,
            num_looks: 4,
            sigma: 0.9,
            target_window: 3,
            bright_count: 7,
            percentile: 98.0,
        }
    }
}

/// Available speckle filters with their parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeckleFilterType {
    /// Normalized mean filter
    Boxcar { window_size: usize },
    /// Lee MMSE filter
    Lee { window_size: usize, num_looks: f32 },
    /// Gamma Maximum A Posteriori filter
    GammaMap { window_size: usize, num_looks: f32 },
    /// Edge-aligned Lee filter on fixed 7x7 directional windows
    RefinedLee,
    /// Lee Sigma filter with bright target preservation
    LeeSigma(LeeSigmaParams),
}

impl SpeckleFilterType {
    pub fn boxcar(window_size: usize) -> Self {
        SpeckleFilterType::Boxcar { window_size }
    }

    pub fn lee(window_size: usize) -> Self {
        SpeckleFilterType::Lee { window_size, num_looks: DEFAULT_NUM_LOOKS }
    }

    pub fn gamma_map(window_size: usize) -> Self {
        SpeckleFilterType::GammaMap { window_size, num_looks: DEFAULT_NUM_LOOKS }
    }

    pub fn refined_lee() -> Self {
        SpeckleFilterType::RefinedLee
    }

    pub fn lee_sigma(window_size: usize) -> Self {
        SpeckleFilterType::LeeSigma(LeeSigmaParams { window_size, ..Default::default() })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpeckleFilterType::Boxcar { .. } => "BOXCAR",
            SpeckleFilterType::Lee { .. } => "LEE",
            SpeckleFilterType::GammaMap { .. } => "GAMMA MAP",
            SpeckleFilterType::RefinedLee => "REFINED LEE",
            SpeckleFilterType::LeeSigma(_) => "LEE SIGMA",
        }
    }

    pub fn window_size(&self) -> usize {
        match *self {
            SpeckleFilterType::Boxcar { window_size }
            | SpeckleFilterType::Lee { window_size, .. }
            | SpeckleFilterType::GammaMap { window_size, .. } => window_size,
            SpeckleFilterType::RefinedLee => 7,
            SpeckleFilterType::LeeSigma(p) => p.window_size,
        }
    }

    /// Distance from a pixel to the farthest input pixel that can affect its output
    pub fn reach(&self) -> usize {
        match self {
            SpeckleFilterType::RefinedLee => 3,
            SpeckleFilterType::LeeSigma(p) => p.window_size / 2 + p.target_window / 2,
            _ => self.window_size() / 2,
        }
    }

    /// Halo width for tiled processing
    pub fn halo(&self) -> usize {
        ((self.window_size() + 1) / 2).max(self.reach())
    }

    pub fn validate(&self) -> SarResult<()> {
        let check_window = |size: usize, what: &str| {
            if size == 0 || size % 2 == 0 {
                Err(SarError::Configuration(format!(
                    "{} must be a positive odd integer, got {}",
                    what, size
                )))
            } else {
                Ok(())
            }
        };

        match *self {
            SpeckleFilterType::Boxcar { window_size } => check_window(window_size, "Kernel size"),
            SpeckleFilterType::Lee { window_size, num_looks }
            | SpeckleFilterType::GammaMap { window_size, num_looks } => {
                check_window(window_size, "Kernel size")?;
                if !(num_looks > 0.0) {
                    return Err(SarError::Configuration(format!(
                        "Number of looks must be positive, got {}",
                        num_looks
                    )));
                }
                Ok(())
            }
            SpeckleFilterType::RefinedLee => Ok(()),
            SpeckleFilterType::LeeSigma(p) => {
                check_window(p.window_size, "Kernel size")?;
                check_window(p.target_window, "Target window size")?;
                if !(0.0..=100.0).contains(&p.percentile) {
                    return Err(SarError::Configuration(format!(
                        "Percentile must be within [0, 100], got {}",
                        p.percentile
                    )));
                }
                SigmaLookupTable::lookup(p.num_looks, p.sigma).map(|_| ())
            }
        }
    }
}

/// Sigma range bounds and adjusted speckle coefficient of variation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaRange {
    pub i1: f32,
    pub i2: f32,
    pub eta: f32,
}

/// Lee Sigma range table for 4-look intensity data
const FOUR_LOOK_SIGMA_RANGES: [(f32, SigmaRange); 6] = [
    (0.5, SigmaRange { i1: 0.694, i2: 1.385, eta: 0.1921 }),
    (0.6, SigmaRange { i1: 0.630, i2: 1.495, eta: 0.2348 }),
    (0.7, SigmaRange { i1: 0.560, i2: 1.627, eta: 0.2825 }),
    (0.8, SigmaRange { i1: 0.480, i2: 1.804, eta: 0.3354 }),
    (0.9, SigmaRange { i1: 0.378, i2: 2.094, eta: 0.3991 }),
    (0.95, SigmaRange { i1: 0.302, i2: 2.360, eta: 0.4391 }),
];

/// Closed (ENL, sigma) -> range lookup
pub struct SigmaLookupTable;

impl SigmaLookupTable {
    pub fn lookup(num_looks: u32, sigma: f32) -> SarResult<SigmaRange> {
        if num_looks != 4 {
            return Err(SarError::Configuration(format!(
                "No sigma range table for {} looks",
                num_looks
            )));
        }
        FOUR_LOOK_SIGMA_RANGES
            .iter()
            .find(|(s, _)| (s - sigma).abs() < 1e-6)
            .map(|(_, range)| *range)
            .ok_or_else(|| {
                SarError::Configuration(format!("No sigma range for sigma {} at {} looks", sigma, num_looks))
            })
    }

    /// Sigma values available for a number of looks
    pub fn sigmas(num_looks: u32) -> Vec<f32> {
        if num_looks == 4 {
            FOUR_LOOK_SIGMA_RANGES.iter().map(|(s, _)| *s).collect()
        } else {
            Vec::new()
        }
    }
}

/// Gamma MAP region of a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaMapRegion {
    /// ci <= cu, output is the local mean
    Homogeneous,
    /// cu < ci < cmax, MAP estimate
    Textured,
    /// ci >= cmax, original value kept
    StrongScatterer,
}

/// Classify by the local coefficient of variation ci = std_dev / mean
///
/// A NaN ci or a non-positive mean counts as homogeneous, so every valid
/// pixel lands in exactly one of the three regions.
pub fn classify_gamma_map(mean: f32, std_dev: f32, num_looks: f32) -> GammaMapRegion {
    let cu = 1.0 / num_looks.sqrt();
    let cmax = std::f32::consts::SQRT_2 * cu;
    let ci = std_dev / mean;

    if !(mean > 0.0) || !ci.is_finite() || ci <= cu {
        GammaMapRegion::Homogeneous
    } else if ci >= cmax {
        GammaMapRegion::StrongScatterer
    } else {
        GammaMapRegion::Textured
    }
}

/// Per-pixel Gamma MAP regions; `None` where the pixel is invalid
pub fn gamma_map_regions(
    engine: &NeighborhoodStatsEngine,
    band: &SarRealImage,
    mask: &Mask,
    window_size: usize,
    num_looks: f32,
) -> SarResult<Array2<Option<GammaMapRegion>>> {
    let kernel = NeighborhoodKernel::square(window_size)?;
    let stats = engine.window_stats(band, mask, &kernel);
    let std_dev = stats.std_dev();

    let mut regions = Array2::from_elem(band.dim(), None);
    Zip::indexed(&mut regions).for_each(|(i, j), region| {
        if mask[[i, j]] && stats.count[[i, j]] > 0 {
            *region = Some(classify_gamma_map(stats.mean[[i, j]], std_dev[[i, j]], num_looks));
        }
    });
    Ok(regions)
}

/// Lee MMSE estimate; zero local variance gives the local mean
fn lee_estimate(z: f32, mean: f32, variance: f32, eta: f32) -> f32 {
    if !(variance > 0.0) {
        return mean.abs();
    }
    let eta2 = eta * eta;
    let var_x = (variance - mean * mean * eta2) / (1.0 + eta2);
    let b = (var_x / variance).max(0.0);
    (1.0 - b) * mean.abs() + b * z
}

fn gamma_map_estimate(z: f32, mean: f32, std_dev: f32, num_looks: f32) -> f32 {
    match classify_gamma_map(mean, std_dev, num_looks) {
        GammaMapRegion::Homogeneous => mean,
        GammaMapRegion::StrongScatterer => z,
        GammaMapRegion::Textured => {
            let enl = num_looks as f64;
            let (z, mean) = (z as f64, mean as f64);
            let cu2 = 1.0 / enl;
            let ci = std_dev as f64 / mean;
            let alpha = (1.0 + cu2) / (ci * ci - cu2);
            let a = alpha - enl - 1.0;
            let q = mean * mean * (mean * a).powi(2) + 4.0 * alpha * enl * z * mean;
            ((mean * a + q.max(0.0).sqrt()) / (2.0 * alpha)) as f32
        }
    }
}

/// Refined Lee direction 1..=8 from the nine sample means
fn edge_direction(means: &[f32; 9]) -> u8 {
    let m = means;
    let gradients = [
        (m[1] - m[7]).abs(),
        (m[6] - m[2]).abs(),
        (m[3] - m[5]).abs(),
        (m[0] - m[8]).abs(),
    ];

    let mut best = 0;
    for k in 1..4 {
        let g = gradients[k];
        if g > gradients[best] || (gradients[best].is_nan() && !g.is_nan()) {
            best = k;
        }
    }

    let positive = match best {
        0 => (m[1] - m[4]) > (m[4] - m[7]),
        1 => (m[6] - m[4]) > (m[4] - m[2]),
        2 => (m[3] - m[4]) > (m[4] - m[5]),
        _ => (m[0] - m[4]) > (m[4] - m[8]),
    };

    if positive {
        best as u8 + 1
    } else {
        best as u8 + 5
    }
}

/// Mean of the five smallest variance / mean^2 ratios
fn refined_lee_noise_variance(means: &[f32; 9], variances: &[f32; 9]) -> f32 {
    let mut ratios: Vec<f32> = means
        .iter()
        .zip(variances.iter())
        .map(|(&m, &v)| v / (m * m))
        .filter(|r| r.is_finite())
        .collect();

    if ratios.is_empty() {
        return 0.0;
    }

    ratios.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = ratios.len().min(5);
    ratios[..n].iter().sum::<f32>() / n as f32
}

/// Whole-band quantities that must not depend on the tile
#[derive(Debug, Clone, Copy)]
struct BandContext {
    bright_threshold: f32,
}

/// Speckle filter processor
pub struct SpeckleFilter {
    filter_type: SpeckleFilterType,
    engine: NeighborhoodStatsEngine,
}

impl SpeckleFilter {
    /// Create a filter with the default boundary policy
    pub fn new(filter_type: SpeckleFilterType) -> SarResult<Self> {
        Self::with_policy(filter_type, BoundaryPolicy::default())
    }

    pub fn with_policy(filter_type: SpeckleFilterType, policy: BoundaryPolicy) -> SarResult<Self> {
        filter_type.validate()?;
        Ok(Self {
            filter_type,
            engine: NeighborhoodStatsEngine::new(policy),
        })
    }

    pub fn filter_type(&self) -> SpeckleFilterType {
        self.filter_type
    }

    pub fn engine(&self) -> &NeighborhoodStatsEngine {
        &self.engine
    }

    /// Filter every band of the image
    pub fn apply(&self, image: &RasterImage) -> SarResult<RasterImage> {
        log::info!("Applying {} speckle filter to {}", self.filter_type.name(), image.id);
        log::debug!("Filter parameters: {:?}", self.filter_type);

        let mut bands = BTreeMap::new();
        for (&pol, band) in image.bands() {
            bands.insert(pol, self.filter_band(band, image.mask())?);
        }

        let mask = self.engine.boundary_mask(image.mask(), self.filter_type.reach());
        image.with_bands_and_mask(bands, &mask)
    }

    /// Filter every band tile by tile; the result equals `apply`
    pub fn apply_tiled(&self, image: &RasterImage, tile_size: usize) -> SarResult<RasterImage> {
        log::info!(
            "Applying {} speckle filter to {} in {}x{} tiles",
            self.filter_type.name(),
            image.id,
            tile_size,
            tile_size
        );

        let processor = TiledProcessor::new(tile_size, self.filter_type.halo())?;
        let mask = image.mask();

        let mut bands = BTreeMap::new();
        for (&pol, band) in image.bands() {
            let ctx = self.band_context(band, mask);
            let filtered = processor.process(band.dim(), |tile| {
                self.filter_band_with(&tile.extract(band), &tile.extract(mask), &ctx)
            })?;
            bands.insert(pol, filtered);
        }

        let out_mask = self.engine.boundary_mask(mask, self.filter_type.reach());
        image.with_bands_and_mask(bands, &out_mask)
    }

    /// Filter a single band; invalid pixels pass through unchanged
    pub fn filter_band(&self, band: &SarRealImage, mask: &Mask) -> SarResult<SarRealImage> {
        let ctx = self.band_context(band, mask);
        self.filter_band_with(band, mask, &ctx)
    }

    fn band_context(&self, band: &SarRealImage, mask: &Mask) -> BandContext {
        let bright_threshold = match self.filter_type {
            SpeckleFilterType::LeeSigma(p) => region_percentile(band, mask, p.percentile)
                .unwrap_or_else(|| {
                    log::warn!("Empty footprint, Lee Sigma bright pixel gate disabled");
                    f32::INFINITY
                }),
            _ => f32::INFINITY,
        };
        BandContext { bright_threshold }
    }

    fn filter_band_with(
        &self,
        band: &SarRealImage,
        mask: &Mask,
        ctx: &BandContext,
    ) -> SarResult<SarRealImage> {
        if band.dim() != mask.dim() {
            return Err(SarError::Data(format!(
                "Band shape {:?} differs from mask shape {:?}",
                band.dim(),
                mask.dim()
            )));
        }

        match self.filter_type {
            SpeckleFilterType::Boxcar { window_size } => self.boxcar(band, mask, window_size),
            SpeckleFilterType::Lee { window_size, num_looks } => {
                self.lee(band, mask, window_size, num_looks)
            }
            SpeckleFilterType::GammaMap { window_size, num_looks } => {
                self.gamma_map(band, mask, window_size, num_looks)
            }
            SpeckleFilterType::RefinedLee => self.refined_lee(band, mask),
            SpeckleFilterType::LeeSigma(params) => self.lee_sigma(band, mask, &params, ctx),
        }
    }

    fn boxcar(&self, band: &SarRealImage, mask: &Mask, window_size: usize) -> SarResult<SarRealImage> {
        log::debug!("Applying boxcar filter");
        let kernel = NeighborhoodKernel::square(window_size)?.normalized();
        let mean = self.engine.convolve(band, mask, &kernel);
        Ok(pass_invalid(band, mask, mean))
    }

    fn lee(
        &self,
        band: &SarRealImage,
        mask: &Mask,
        window_size: usize,
        num_looks: f32,
    ) -> SarResult<SarRealImage> {
        log::debug!("Applying Lee filter");
        let kernel = NeighborhoodKernel::square(window_size)?;
        let stats = self.engine.window_stats(band, mask, &kernel);
        let eta = 1.0 / num_looks.sqrt();

        Ok(map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            if !mask[[i, j]] || !z.is_finite() || stats.count[[i, j]] == 0 {
                return z;
            }
            lee_estimate(z, stats.mean[[i, j]], stats.variance[[i, j]], eta)
        }))
    }

    fn gamma_map(
        &self,
        band: &SarRealImage,
        mask: &Mask,
        window_size: usize,
        num_looks: f32,
    ) -> SarResult<SarRealImage> {
        log::debug!("Applying Gamma MAP filter");
        let kernel = NeighborhoodKernel::square(window_size)?;
        let stats = self.engine.window_stats(band, mask, &kernel);
        let std_dev = stats.std_dev();

        Ok(map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            if !mask[[i, j]] || !z.is_finite() || stats.count[[i, j]] == 0 {
                return z;
            }
            gamma_map_estimate(z, stats.mean[[i, j]], std_dev[[i, j]], num_looks)
        }))
    }

    fn refined_lee(&self, band: &SarRealImage, mask: &Mask) -> SarResult<SarRealImage> {
        log::debug!("Applying Refined Lee filter");
        let (rows, cols) = band.dim();
        let stats3 = self
            .engine
            .window_stats(band, mask, &NeighborhoodKernel::square(3)?);

        let directional: Vec<WindowStats> = (1..=8u8)
            .map(|d| {
                NeighborhoodKernel::for_direction(d)
                    .map(|kernel| self.engine.window_stats(band, mask, &kernel))
            })
            .collect::<SarResult<_>>()?;

        Ok(map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            if !mask[[i, j]] || !z.is_finite() {
                return z;
            }

            let mut means = [0.0f32; 9];
            let mut variances = [0.0f32; 9];
            for (k, &(dr, dc)) in REFINED_LEE_SAMPLES.iter().enumerate() {
                let r = (i as isize + dr).clamp(0, rows as isize - 1) as usize;
                let c = (j as isize + dc).clamp(0, cols as isize - 1) as usize;
                means[k] = stats3.mean[[r, c]];
                variances[k] = stats3.variance[[r, c]];
            }

            let direction = edge_direction(&means);
            let dir = &directional[direction as usize - 1];
            if dir.count[[i, j]] == 0 {
                return z;
            }
            let dir_mean = dir.mean[[i, j]];
            let dir_var = dir.variance[[i, j]];

            let sigma_v = refined_lee_noise_variance(&means, &variances);
            let var_x = (dir_var - dir_mean * dir_mean * sigma_v) / (sigma_v + 1.0);
            let b = if dir_var > 0.0 { var_x / dir_var } else { 0.0 };
            dir_mean + b * (z - dir_mean)
        }))
    }

    fn lee_sigma(
        &self,
        band: &SarRealImage,
        mask: &Mask,
        params: &LeeSigmaParams,
        ctx: &BandContext,
    ) -> SarResult<SarRealImage> {
        log::debug!("Applying Lee Sigma filter, bright threshold {}", ctx.bright_threshold);
        let range = SigmaLookupTable::lookup(params.num_looks, params.sigma)?;
        let target = NeighborhoodKernel::square(params.target_window)?;
        let window = NeighborhoodKernel::square(params.window_size)?;

        let threshold = ctx.bright_threshold;
        let bright = Zip::from(band)
            .and(mask)
            .map_collect(|&z, &valid| valid && z.is_finite() && z >= threshold);
        let bright_counts = self.engine.count_true(&bright, &target);

        // A-priori mean from the target window
        let target_stats = self.engine.window_stats(band, mask, &target);
        let eta = 1.0 / (params.num_looks as f32).sqrt();
        let apriori = map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            if target_stats.count[[i, j]] == 0 {
                return z;
            }
            lee_estimate(z, target_stats.mean[[i, j]], target_stats.variance[[i, j]], eta)
        });

        let in_range = map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            let x = apriori[[i, j]];
            mask[[i, j]] && z.is_finite() && x.is_finite() && z >= range.i1 * x && z <= range.i2 * x
        });
        let stats = self.engine.window_stats(band, &in_range, &window);

        Ok(map_pixels(band.dim(), |i, j| {
            let z = band[[i, j]];
            if !mask[[i, j]] || !z.is_finite() {
                return z;
            }
            if bright_counts[[i, j]] >= params.bright_count || stats.count[[i, j]] == 0 {
                return z;
            }
            if in_range[[i, j]] {
                lee_estimate(z, stats.mean[[i, j]], stats.variance[[i, j]], range.eta)
            } else {
                stats.mean[[i, j]]
            }
        }))
    }
}

fn pass_invalid(band: &SarRealImage, mask: &Mask, mut filtered: SarRealImage) -> SarRealImage {
    Zip::from(&mut filtered)
        .and(band)
        .and(mask)
        .for_each(|f, &z, &valid| {
            if !valid || !z.is_finite() {
                *f = z;
            }
        });
    filtered
}
