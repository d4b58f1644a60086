use crate::types::{Mask, RasterImage, SarRealImage, SarResult};
use ndarray::{Array2, Zip};
use std::collections::VecDeque;

/// Lower incidence angle bound (degrees, exclusive) of the usable swath
pub const MIN_VALID_ANGLE: f32 = 30.64;
/// Upper incidence angle bound (degrees, exclusive) of the usable swath
pub const MAX_VALID_ANGLE: f32 = 45.24;
/// Intensity at or below which a pixel counts as no-data fringe
pub const EDGE_NOISE_FLOOR: f32 = 0.000316;
/// Low-intensity components larger than this are masked
pub const EDGE_COMPONENT_MAX_PIXELS: usize = 100;

/// Border noise masking parameters
#[derive(Debug, Clone)]
pub struct BorderNoiseParams {
    pub min_angle: f32,
    pub max_angle: f32,
    /// Remove low-intensity fringe components along the tile edge
    pub edge_trim: bool,
    pub noise_floor: f32,
    pub max_component_size: usize,
}

impl Default for BorderNoiseParams {
    fn default() -> Self {
        Self {
            min_angle: MIN_VALID_ANGLE,
            max_angle: MAX_VALID_ANGLE,
            edge_trim: true,
            noise_floor: EDGE_NOISE_FLOOR,
            max_component_size: EDGE_COMPONENT_MAX_PIXELS,
        }
    }
}

/// Summary of one 8-connected component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub size: usize,
    pub touches_border: bool,
}

/// Masks the low-quality near and far range edges of GRD scenes
pub struct BorderNoiseMasker {
    params: BorderNoiseParams,
}

impl BorderNoiseMasker {
    pub fn new(params: BorderNoiseParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(BorderNoiseParams::default())
    }

    pub fn params(&self) -> &BorderNoiseParams {
        &self.params
    }

    /// `true` where min_angle < angle < max_angle
    pub fn angle_mask(&self, angle: &SarRealImage) -> Mask {
        let (lo, hi) = (self.params.min_angle, self.params.max_angle);
        angle.mapv(|a| a > lo && a < hi)
    }

    /// `false` for low-intensity pixels that belong to a border-touching or oversized component
    pub fn edge_trim_mask(&self, band: &SarRealImage, mask: &Mask) -> Mask {
        let floor = self.params.noise_floor;
        let low = Zip::from(band)
            .and(mask)
            .map_collect(|&v, &valid| valid && v <= floor);

        let (labels, components) = label_components(&low);
        log::debug!("Edge trim: {} low-intensity components", components.len());

        let max_size = self.params.max_component_size;
        labels.mapv(|label| match label {
            0 => true,
            l => {
                let info = components[l as usize - 1];
                !(info.touches_border || info.size > max_size)
            }
        })
    }

    /// New image state with the border noise masked out
    pub fn apply(&self, image: &RasterImage) -> SarResult<RasterImage> {
        log::info!("Applying border noise correction to {}", image.id);

        let mut mask = self.angle_mask(image.angle());
        if self.params.edge_trim {
            let combined = Zip::from(&mask)
                .and(image.mask())
                .map_collect(|&a, &b| a && b);
            let trim = self.edge_trim_mask(image.first_band(), &combined);
            Zip::from(&mut mask).and(&trim).for_each(|m, &t| *m = *m && t);
        }

        let out = image.restrict_mask(&mask)?;
        log::debug!(
            "Border noise: {} of {} pixels valid",
            out.valid_pixel_count(),
            image.shape().0 * image.shape().1
        );
        Ok(out)
    }
}

/// Label 8-connected `true` regions; label 0 is background, label k maps to `components[k - 1]`
pub fn label_components(flags: &Mask) -> (Array2<u32>, Vec<ComponentInfo>) {
    let (rows, cols) = flags.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start_r in 0..rows {
        for start_c in 0..cols {
            if !flags[[start_r, start_c]] || labels[[start_r, start_c]] != 0 {
                continue;
            }

            let label = components.len() as u32 + 1;
            let mut info = ComponentInfo { size: 0, touches_border: false };
            labels[[start_r, start_c]] = label;
            queue.push_back((start_r, start_c));

            while let Some((r, c)) = queue.pop_front() {
                info.size += 1;
                if r == 0 || c == 0 || r + 1 == rows || c + 1 == cols {
                    info.touches_border = true;
                }

                for dr in -1isize..=1 {
                    for dc in -1isize..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = r as isize + dr;
                        let nc = c as isize + dc;
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if flags[[nr, nc]] && labels[[nr, nc]] == 0 {
                            labels[[nr, nc]] = label;
                            queue.push_back((nr, nc));
                        }
                    }
                }
            }

            components.push(info);
        }
    }

    (labels, components)
}
