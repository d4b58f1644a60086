//! Processing configuration

use crate::core::neighborhood::BoundaryPolicy;
use crate::core::speckle_filter::SpeckleFilterType;
use crate::core::terrain_flatten::{TerrainFlatteningModel, TerrainFlatteningParams};
use crate::io::source::CollectionQuery;
use crate::types::{BoundingBox, OrbitPass, Platform, Polarization, SarError, SarResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper-case and map spaces and dashes to underscores, so "gamma map" parses as GAMMA_MAP
fn normalize_token(s: &str) -> String {
    s.trim().to_uppercase().replace(&[' ', '-'][..], "_")
}

fn parse_bool(key: &str, value: &str) -> SarResult<bool> {
    match normalize_token(value).as_str() {
        "TRUE" | "1" | "YES" => Ok(true),
        "FALSE" | "0" | "NO" => Ok(false),
        other => Err(SarError::Configuration(format!("{}: expected a boolean, got {}", key, other))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> SarResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| SarError::Configuration(format!("{}: invalid number {}", key, value.trim())))
}

fn parse_date(key: &str, value: &str) -> SarResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| SarError::Configuration(format!("{}: invalid date {} ({})", key, value.trim(), e)))
}

/// Band selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolarizationSelection {
    VV,
    VH,
    VVVH,
}

impl PolarizationSelection {
    pub fn polarizations(&self) -> Vec<Polarization> {
        match self {
            PolarizationSelection::VV => vec![Polarization::VV],
            PolarizationSelection::VH => vec![Polarization::VH],
            PolarizationSelection::VVVH => vec![Polarization::VV, Polarization::VH],
        }
    }
}

impl FromStr for PolarizationSelection {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "VV" => Ok(PolarizationSelection::VV),
            "VH" => Ok(PolarizationSelection::VH),
            "VVVH" | "VV_VH" => Ok(PolarizationSelection::VVVH),
            other => Err(SarError::Configuration(format!("Invalid polarization selection: {}", other))),
        }
    }
}

/// Mono- or multi-temporal speckle filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeckleFilterFramework {
    Mono,
    Multi,
}

impl FromStr for SpeckleFilterFramework {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "MONO" => Ok(SpeckleFilterFramework::Mono),
            "MULTI" => Ok(SpeckleFilterFramework::Multi),
            other => Err(SarError::Configuration(format!("Invalid speckle filter framework: {}", other))),
        }
    }
}

/// Speckle filter variant as named in the options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeckleFilterKind {
    Boxcar,
    Lee,
    GammaMap,
    RefinedLee,
    LeeSigma,
}

impl FromStr for SpeckleFilterKind {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "BOXCAR" => Ok(SpeckleFilterKind::Boxcar),
            "LEE" => Ok(SpeckleFilterKind::Lee),
            "GAMMA_MAP" => Ok(SpeckleFilterKind::GammaMap),
            "REFINED_LEE" => Ok(SpeckleFilterKind::RefinedLee),
            "LEE_SIGMA" => Ok(SpeckleFilterKind::LeeSigma),
            other => Err(SarError::Configuration(format!("Invalid speckle filter: {}", other))),
        }
    }
}

/// Output backscatter scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Linear,
    Db,
}

impl FromStr for OutputFormat {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "LINEAR" => Ok(OutputFormat::Linear),
            "DB" => Ok(OutputFormat::Db),
            other => Err(SarError::Configuration(format!("Invalid output format: {}", other))),
        }
    }
}

/// Orbit pass filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitSelection {
    Ascending,
    Descending,
    Both,
}

impl OrbitSelection {
    pub fn orbit_pass(&self) -> Option<OrbitPass> {
        match self {
            OrbitSelection::Ascending => Some(OrbitPass::Ascending),
            OrbitSelection::Descending => Some(OrbitPass::Descending),
            OrbitSelection::Both => None,
        }
    }
}

impl FromStr for OrbitSelection {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "ASCENDING" => Ok(OrbitSelection::Ascending),
            "DESCENDING" => Ok(OrbitSelection::Descending),
            "BOTH" => Ok(OrbitSelection::Both),
            other => Err(SarError::Configuration(format!("Invalid orbit: {}", other))),
        }
    }
}

/// Platform filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformSelection {
    A,
    B,
    Both,
}

impl PlatformSelection {
    pub fn platform(&self) -> Option<Platform> {
        match self {
            PlatformSelection::A => Some(Platform::A),
            PlatformSelection::B => Some(Platform::B),
            PlatformSelection::Both => None,
        }
    }
}

impl FromStr for PlatformSelection {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "A" => Ok(PlatformSelection::A),
            "B" => Ok(PlatformSelection::B),
            "BOTH" => Ok(PlatformSelection::Both),
            other => Err(SarError::Configuration(format!("Invalid platform number: {}", other))),
        }
    }
}

impl FromStr for BoundaryPolicy {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "SHRINK" => Ok(BoundaryPolicy::Shrink),
            "MASK_INCOMPLETE" => Ok(BoundaryPolicy::MaskIncomplete),
            other => Err(SarError::Configuration(format!("Invalid boundary policy: {}", other))),
        }
    }
}

/// Complete job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub apply_border_noise_correction: bool,
    pub border_noise_edge_trim: bool,
    pub apply_terrain_flattening: bool,
    pub apply_speckle_filtering: bool,
    pub polarization: PolarizationSelection,
    pub speckle_filter_framework: SpeckleFilterFramework,
    pub speckle_filter: SpeckleFilterKind,
    pub speckle_filter_kernel_size: usize,
    pub speckle_filter_nr_of_images: usize,
    pub terrain_flattening_model: TerrainFlatteningModel,
    /// Meters
    pub terrain_flattening_additional_layover_shadow_buffer: f64,
    pub format: OutputFormat,
    /// Attach a linear VV/VH ratio layer to every output
    pub add_ratio: bool,
    pub clip_to_roi: bool,
    pub orbit: OrbitSelection,
    pub platform_number: PlatformSelection,
    pub orbit_num: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub stop_date: Option<NaiveDate>,
    pub roi: Option<BoundingBox>,
    pub boundary_policy: BoundaryPolicy,
    /// 0 processes whole images
    pub tile_size: usize,
    /// 0 uses the global rayon pool
    pub num_threads: usize,
    pub save_output: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            apply_border_noise_correction: true,
            border_noise_edge_trim: true,
            apply_terrain_flattening: true,
            apply_speckle_filtering: true,
            polarization: PolarizationSelection::VVVH,
            speckle_filter_framework: SpeckleFilterFramework::Multi,
            speckle_filter: SpeckleFilterKind::GammaMap,
            speckle_filter_kernel_size: 7,
            speckle_filter_nr_of_images: 10,
            terrain_flattening_model: TerrainFlatteningModel::Volume,
            terrain_flattening_additional_layover_shadow_buffer: 0.0,
            format: OutputFormat::Db,
            add_ratio: false,
            clip_to_roi: false,
            orbit: OrbitSelection::Both,
            platform_number: PlatformSelection::Both,
            orbit_num: None,
            start_date: None,
            stop_date: None,
            roi: None,
            boundary_policy: BoundaryPolicy::Shrink,
            tile_size: 0,
            num_threads: 0,
            save_output: false,
        }
    }
}

impl ProcessingConfig {
    /// Build from KEY=value style options on top of the defaults, then validate
    pub fn from_options<I, K, V>(options: I) -> SarResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = ProcessingConfig::default();
        for (key, value) in options {
            config.set_option(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set one option by name
    pub fn set_option(&mut self, key: &str, value: &str) -> SarResult<()> {
        let key = normalize_token(key);
        let k = key.as_str();
        match k {
            "APPLY_BORDER_NOISE_CORRECTION" => self.apply_border_noise_correction = parse_bool(k, value)?,
            "BORDER_NOISE_EDGE_TRIM" => self.border_noise_edge_trim = parse_bool(k, value)?,
            "APPLY_TERRAIN_FLATTENING" => self.apply_terrain_flattening = parse_bool(k, value)?,
            "APPLY_SPECKLE_FILTERING" => self.apply_speckle_filtering = parse_bool(k, value)?,
            "POLARIZATION" => self.polarization = value.parse()?,
            "SPECKLE_FILTER_FRAMEWORK" => self.speckle_filter_framework = value.parse()?,
            "SPECKLE_FILTER" => self.speckle_filter = value.parse()?,
            "SPECKLE_FILTER_KERNEL_SIZE" => {
                let size: i64 = parse_number(k, value)?;
                if size <= 0 {
                    return Err(SarError::Configuration(format!("{} must be positive, got {}", k, size)));
                }
                self.speckle_filter_kernel_size = size as usize;
            }
            "SPECKLE_FILTER_NR_OF_IMAGES" => {
                let n: i64 = parse_number(k, value)?;
                if n <= 0 {
                    return Err(SarError::Configuration(format!("{} must be positive, got {}", k, n)));
                }
                self.speckle_filter_nr_of_images = n as usize;
            }
            "TERRAIN_FLATTENING_MODEL" => self.terrain_flattening_model = value.parse()?,
            "TERRAIN_FLATTENING_ADDITIONAL_LAYOVER_SHADOW_BUFFER" => {
                self.terrain_flattening_additional_layover_shadow_buffer = parse_number(k, value)?
            }
            "FORMAT" => self.format = value.parse()?,
            "ADD_RATIO" | "ADD_RATIO_LIN" => self.add_ratio = parse_bool(k, value)?,
            "CLIP_TO_ROI" => self.clip_to_roi = parse_bool(k, value)?,
            "ORBIT" => self.orbit = value.parse()?,
            "PLATFORM_NUMBER" => self.platform_number = value.parse()?,
            "ORBIT_NUM" => {
                self.orbit_num = match normalize_token(value).as_str() {
                    "" | "NONE" => None,
                    _ => Some(parse_number(k, value)?),
                }
            }
            "START_DATE" => self.start_date = Some(parse_date(k, value)?),
            "STOP_DATE" => self.stop_date = Some(parse_date(k, value)?),
            "ROI" => {
                let coords = value
                    .split(',')
                    .map(|c| parse_number::<f64>(k, c))
                    .collect::<SarResult<Vec<_>>>()?;
                if coords.len() != 4 {
                    return Err(SarError::Configuration(format!(
                        "ROI expects min_lon,min_lat,max_lon,max_lat, got {} values",
                        coords.len()
                    )));
                }
                self.roi = Some(BoundingBox::new(coords[0], coords[1], coords[2], coords[3]));
            }
            "BOUNDARY_POLICY" => self.boundary_policy = value.parse()?,
            "TILE_SIZE" => self.tile_size = parse_number(k, value)?,
            "NUM_THREADS" => self.num_threads = parse_number(k, value)?,
            "SAVE_OUTPUT" | "SAVE_ASSET" => self.save_output = parse_bool(k, value)?,
            other => {
                return Err(SarError::Configuration(format!("Unknown option: {}", other)));
            }
        }
        Ok(())
    }

    /// Reject inconsistent settings before any image is touched
    pub fn validate(&self) -> SarResult<()> {
        if self.apply_speckle_filtering {
            self.speckle_filter_type()?.validate()?;
        }
        if self.speckle_filter_kernel_size == 0 || self.speckle_filter_kernel_size % 2 == 0 {
            return Err(SarError::Configuration(format!(
                "SPECKLE_FILTER_KERNEL_SIZE must be a positive odd integer, got {}",
                self.speckle_filter_kernel_size
            )));
        }
        if self.speckle_filter_nr_of_images == 0 {
            return Err(SarError::Configuration(
                "SPECKLE_FILTER_NR_OF_IMAGES must be positive".to_string(),
            ));
        }

        let buffer = self.terrain_flattening_additional_layover_shadow_buffer;
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(SarError::Configuration(format!(
                "TERRAIN_FLATTENING_ADDITIONAL_LAYOVER_SHADOW_BUFFER must be >= 0, got {}",
                buffer
            )));
        }

        if let (Some(start), Some(stop)) = (self.start_date, self.stop_date) {
            if start >= stop {
                return Err(SarError::Configuration(format!(
                    "START_DATE {} must be before STOP_DATE {}",
                    start, stop
                )));
            }
        }

        if let Some(roi) = &self.roi {
            if !(roi.min_lon < roi.max_lon && roi.min_lat < roi.max_lat) {
                return Err(SarError::Configuration(format!("Degenerate ROI {:?}", roi)));
            }
        }
        if self.add_ratio
            && (self.polarization != PolarizationSelection::VVVH || self.format != OutputFormat::Linear)
        {
            return Err(SarError::Configuration(
                "ADD_RATIO requires POLARIZATION VVVH and FORMAT LINEAR".to_string(),
            ));
        }
        if self.clip_to_roi && self.roi.is_none() {
            return Err(SarError::Configuration("CLIP_TO_ROI requires an ROI".to_string()));
        }

        Ok(())
    }

    /// The configured filter variant with its parameters
    pub fn speckle_filter_type(&self) -> SarResult<SpeckleFilterType> {
        let k = self.speckle_filter_kernel_size;
        let filter = match self.speckle_filter {
            SpeckleFilterKind::Boxcar => SpeckleFilterType::boxcar(k),
            SpeckleFilterKind::Lee => SpeckleFilterType::lee(k),
            SpeckleFilterKind::GammaMap => SpeckleFilterType::gamma_map(k),
            SpeckleFilterKind::RefinedLee => SpeckleFilterType::refined_lee(),
            SpeckleFilterKind::LeeSigma => SpeckleFilterType::lee_sigma(k),
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn terrain_flattening_params(&self) -> TerrainFlatteningParams {
        TerrainFlatteningParams {
            model: self.terrain_flattening_model,
            layover_shadow_buffer: self.terrain_flattening_additional_layover_shadow_buffer,
        }
    }

    pub fn collection_query(&self) -> CollectionQuery {
        CollectionQuery {
            roi: self.roi,
            start_date: self.start_date,
            stop_date: self.stop_date,
            polarizations: self.polarization.polarizations(),
            orbit_pass: self.orbit.orbit_pass(),
            platform: self.platform_number.platform(),
            relative_orbit: self.orbit_num,
        }
    }
}
