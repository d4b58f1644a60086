use crate::core::neighborhood::region_mean;
use crate::types::{Mask, RasterImage, SarError, SarRealImage, SarResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;
use std::str::FromStr;

/// Scattering model used for the area correction factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerrainFlatteningModel {
    /// Direct (surface) scattering
    Direct,
    /// Volume scattering
    #[default]
    Volume,
}

impl FromStr for TerrainFlatteningModel {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DIRECT" => Ok(TerrainFlatteningModel::Direct),
            "VOLUME" => Ok(TerrainFlatteningModel::Volume),
            other => Err(SarError::Configuration(format!(
                "Invalid terrain flattening model: {}",
                other
            ))),
        }
    }
}

/// Parameters for terrain flattening computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainFlatteningParams {
    pub model: TerrainFlatteningModel,
    /// Extra distance (m) removed around layover and shadow areas
    pub layover_shadow_buffer: f64,
}

impl Default for TerrainFlatteningParams {
    fn default() -> Self {
        Self {
            model: TerrainFlatteningModel::Volume,
            layover_shadow_buffer: 0.0,
        }
    }
}

/// DEM with derived slope and aspect, all in degrees
#[derive(Debug, Clone)]
pub struct TerrainModel {
    pub elevation: SarRealImage,
    pub slope: SarRealImage,
    pub aspect: SarRealImage,
}

impl TerrainModel {
    pub fn from_dem(elevation: SarRealImage, pixel_spacing: f64) -> SarResult<Self> {
        let (slope, aspect) = compute_slope_aspect(&elevation, pixel_spacing)?;
        Ok(Self { elevation, slope, aspect })
    }
}

/// Slope and aspect of a north-up grid in degrees
///
/// Central differences, one-sided at the edges. Aspect is the downslope
/// direction measured clockwise from north; flat cells get 0.
pub fn compute_slope_aspect(
    grid: &SarRealImage,
    pixel_spacing: f64,
) -> SarResult<(SarRealImage, SarRealImage)> {
    if !(pixel_spacing > 0.0) {
        return Err(SarError::Data(format!("Invalid pixel spacing {}", pixel_spacing)));
    }

    let (rows, cols) = grid.dim();
    let spacing = pixel_spacing as f32;
    let mut slope = Array2::<f32>::zeros((rows, cols));
    let mut aspect = Array2::<f32>::zeros((rows, cols));

    Zip::indexed(&mut slope)
        .and(&mut aspect)
        .for_each(|(i, j), s, a| {
            let (jm, jp) = (j.saturating_sub(1), (j + 1).min(cols - 1));
            let (im, ip) = (i.saturating_sub(1), (i + 1).min(rows - 1));

            let dz_dx = if jp > jm {
                (grid[[i, jp]] - grid[[i, jm]]) / (spacing * (jp - jm) as f32)
            } else {
                0.0
            };
            // Rows run southward
            let dz_dn = if ip > im {
                -(grid[[ip, j]] - grid[[im, j]]) / (spacing * (ip - im) as f32)
            } else {
                0.0
            };

            *s = (dz_dx * dz_dx + dz_dn * dz_dn).sqrt().atan().to_degrees();
            *a = if dz_dx == 0.0 && dz_dn == 0.0 {
                0.0
            } else {
                let deg = (-dz_dx).atan2(-dz_dn).to_degrees();
                if deg < 0.0 {
                    deg + 360.0
                } else {
                    deg
                }
            };
        });

    Ok((slope, aspect))
}

/// Scattering area correction factor for one pixel; angles in radians
pub fn scattering_area_factor(
    model: TerrainFlatteningModel,
    theta_i: f32,
    alpha_r: f32,
    alpha_az: f32,
) -> f32 {
    let ninety = FRAC_PI_2;
    match model {
        TerrainFlatteningModel::Volume => {
            (ninety - theta_i + alpha_r).tan() / (ninety - theta_i).tan()
        }
        TerrainFlatteningModel::Direct => {
            (ninety - theta_i).cos() / (alpha_az.cos() * (ninety - theta_i + alpha_r).cos())
        }
    }
}

/// Squared-distance lower envelope along one line
fn distance_transform_1d(f: &[f64], out: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let d = q as f64 - v[k] as f64;
        *o = d * d + f[v[k]];
    }
}

/// Exact Euclidean distance (pixels) from every cell to the nearest `true` cell
///
/// Grids without any feature give infinity everywhere.
pub fn euclidean_distance_transform(features: &Mask) -> Array2<f64> {
    const FAR: f64 = 1e20;
    let (rows, cols) = features.dim();
    let mut grid = features.mapv(|f| if f { 0.0 } else { FAR });

    let mut line = vec![0.0f64; rows.max(cols)];
    let mut out = vec![0.0f64; rows.max(cols)];

    for j in 0..cols {
        for i in 0..rows {
            line[i] = grid[[i, j]];
        }
        distance_transform_1d(&line[..rows], &mut out[..rows]);
        for i in 0..rows {
            grid[[i, j]] = out[i];
        }
    }

    for i in 0..rows {
        for j in 0..cols {
            line[j] = grid[[i, j]];
        }
        distance_transform_1d(&line[..cols], &mut out[..cols]);
        for j in 0..cols {
            grid[[i, j]] = out[j];
        }
    }

    grid.mapv(|d2| if d2 >= FAR / 2.0 { f64::INFINITY } else { d2.sqrt() })
}

/// Keep valid pixels farther than `buffer` meters from any invalid pixel
pub fn erode_mask(valid: &Mask, buffer: f64, pixel_spacing: f64) -> Mask {
    if buffer <= 0.0 {
        return valid.clone();
    }
    let distance = euclidean_distance_transform(&valid.mapv(|v| !v));
    Zip::from(valid)
        .and(&distance)
        .map_collect(|&v, &d| v && d * pixel_spacing > buffer)
}

/// Radiometric terrain flattening processor
pub struct TerrainFlattener {
    params: TerrainFlatteningParams,
}

impl TerrainFlattener {
    pub fn new(params: TerrainFlatteningParams) -> SarResult<Self> {
        if !(params.layover_shadow_buffer >= 0.0) || !params.layover_shadow_buffer.is_finite() {
            return Err(SarError::Configuration(format!(
                "Layover/shadow buffer must be a non-negative distance, got {}",
                params.layover_shadow_buffer
            )));
        }
        Ok(Self { params })
    }

    pub fn standard() -> Self {
        Self { params: TerrainFlatteningParams::default() }
    }

    pub fn params(&self) -> &TerrainFlatteningParams {
        &self.params
    }

    /// Mean aspect of the angle band in degrees, wrapped into (-180, 180]
    pub fn look_heading(&self, image: &RasterImage) -> SarResult<f32> {
        let (_, aspect) = compute_slope_aspect(image.angle(), image.geometry.pixel_spacing)?;
        let heading = region_mean(&aspect, image.mask()).unwrap_or_else(|| {
            log::warn!("{}: no valid pixels for the heading estimate, using 0", image.id);
            0.0
        });
        Ok(if heading > 180.0 { heading - 360.0 } else { heading })
    }

    /// Flatten every backscatter band; layover and shadow areas are masked
    pub fn flatten(&self, image: &RasterImage, dem: &SarRealImage) -> SarResult<RasterImage> {
        log::info!("Applying {:?} terrain flattening to {}", self.params.model, image.id);

        if dem.dim() != image.shape() {
            return Err(SarError::Data(format!(
                "DEM shape {:?} differs from image shape {:?}",
                dem.dim(),
                image.shape()
            )));
        }

        let terrain = TerrainModel::from_dem(dem.clone(), image.geometry.pixel_spacing)?;
        let heading = self.look_heading(image)?;
        log::debug!("Look heading {:.3} deg", heading);
        let phi_i = heading.to_radians();

        // Local slope projected into range and azimuth
        let geometry = Zip::from(&terrain.slope)
            .and(&terrain.aspect)
            .map_collect(|&slope, &aspect| {
                let phi_r = phi_i - aspect.to_radians();
                let tan_s = slope.to_radians().tan();
                ((tan_s * phi_r.cos()).atan(), (tan_s * phi_r.sin()).atan())
            });

        let model = self.params.model;
        let mut scf = Array2::<f32>::zeros(image.shape());
        let mut terrain_valid = Mask::from_elem(image.shape(), false);
        Zip::from(&mut scf)
            .and(&mut terrain_valid)
            .and(image.angle())
            .and(&geometry)
            .for_each(|f, valid, &angle, &(alpha_r, alpha_az)| {
                let theta = angle.to_radians();
                *f = scattering_area_factor(model, theta, alpha_r, alpha_az);
                let layover = alpha_r < theta;
                let shadow = alpha_r > -(FRAC_PI_2 - theta);
                *valid = layover && shadow;
            });

        let mut valid = Zip::from(&terrain_valid)
            .and(image.mask())
            .map_collect(|&t, &m| t && m);
        valid = erode_mask(
            &valid,
            self.params.layover_shadow_buffer,
            image.geometry.pixel_spacing,
        );

        let mut bands = BTreeMap::new();
        for (&pol, band) in image.bands() {
            let flattened = Zip::from(band)
                .and(image.angle())
                .and(&scf)
                .map_collect(|&z, &angle, &f| z / angle.to_radians().cos() / f);
            Zip::from(&mut valid)
                .and(&flattened)
                .for_each(|v, &x| *v = *v && x.is_finite());
            bands.insert(pol, flattened);
        }

        let out = image.with_bands_and_mask(bands, &valid)?;
        log::debug!(
            "Terrain flattening: {} of {} pixels valid",
            out.valid_pixel_count(),
            image.shape().0 * image.shape().1
        );
        Ok(out)
    }
}
