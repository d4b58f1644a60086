//! Windowed and region statistics over masked rasters

use crate::types::{Mask, SarError, SarRealImage, SarResult};
use ndarray::{Array2, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Side length of the directional Refined Lee kernels
pub const DIRECTIONAL_KERNEL_SIZE: usize = 7;

/// How windows that cross the tile edge are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Use the in-bounds part of the window only
    #[default]
    Shrink,
    /// Same statistics as `Shrink`, but pixels whose window leaves the tile are masked
    MaskIncomplete,
}

/// Shape of a 7x7 directional kernel before rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionalShape {
    /// Lower half of the window, centre row included
    Rect,
    /// Lower-left triangle, diagonal included
    Diagonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelShape {
    Square(usize),
    Directional(DirectionalShape),
}

/// Binary neighborhood kernel
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodKernel {
    shape: KernelShape,
    quarter_turns: u8,
    normalize: bool,
    weights: Array2<bool>,
}

impl NeighborhoodKernel {
    /// Square K x K kernel, K must be positive and odd
    pub fn square(size: usize) -> SarResult<Self> {
        if size == 0 || size % 2 == 0 {
            return Err(SarError::Configuration(format!(
                "Kernel size must be a positive odd integer, got {}",
                size
            )));
        }
        Ok(Self {
            shape: KernelShape::Square(size),
            quarter_turns: 0,
            normalize: false,
            weights: Array2::from_elem((size, size), true),
        })
    }

    /// 7x7 directional kernel rotated clockwise by `quarter_turns` x 90 degrees
    pub fn directional(shape: DirectionalShape, quarter_turns: u8) -> Self {
        let n = DIRECTIONAL_KERNEL_SIZE;
        let base = Array2::from_shape_fn((n, n), |(r, c)| match shape {
            DirectionalShape::Rect => r >= n / 2,
            DirectionalShape::Diagonal => c <= r,
        });

        let turns = quarter_turns % 4;
        let mut weights = base;
        for _ in 0..turns {
            let prev = weights.clone();
            weights = Array2::from_shape_fn((n, n), |(r, c)| prev[[n - 1 - c, r]]);
        }

        Self {
            shape: KernelShape::Directional(shape),
            quarter_turns: turns,
            normalize: false,
            weights,
        }
    }

    /// Kernel for Refined Lee direction 1..=8
    pub fn for_direction(direction: u8) -> SarResult<Self> {
        match direction {
            1 | 3 | 5 | 7 => Ok(Self::directional(DirectionalShape::Rect, (direction - 1) / 2)),
            2 | 4 | 6 | 8 => Ok(Self::directional(DirectionalShape::Diagonal, (direction - 2) / 2)),
            d => Err(SarError::Configuration(format!("Invalid edge direction {}", d))),
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    pub fn is_normalized(&self) -> bool {
        self.normalize
    }

    pub fn size(&self) -> usize {
        match self.shape {
            KernelShape::Square(size) => size,
            KernelShape::Directional(_) => DIRECTIONAL_KERNEL_SIZE,
        }
    }

    /// Largest row or column offset from the centre
    pub fn radius(&self) -> usize {
        self.size() / 2
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.quarter_turns as u32 * 90
    }

    pub fn weights(&self) -> &Array2<bool> {
        &self.weights
    }

    /// (row, col) offsets of the active kernel cells relative to the centre
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius() as isize;
        self.weights
            .indexed_iter()
            .filter(|(_, &w)| w)
            .map(|((i, j), _)| (i as isize - r, j as isize - r))
            .collect()
    }
}

/// Per-pixel window statistics
#[derive(Debug, Clone)]
pub struct WindowStats {
    pub mean: SarRealImage,
    /// Population variance (divide by n)
    pub variance: SarRealImage,
    /// Number of contributing pixels
    pub count: Array2<u32>,
}

impl WindowStats {
    pub fn std_dev(&self) -> SarRealImage {
        self.variance.mapv(|v| v.max(0.0).sqrt())
    }
}

/// Windowed statistics under a boundary policy
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborhoodStatsEngine {
    policy: BoundaryPolicy,
}

impl NeighborhoodStatsEngine {
    pub fn new(policy: BoundaryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    /// Mean, variance and count over every kernel window
    ///
    /// Only in-bounds pixels that are valid in `mask` and finite contribute.
    pub fn window_stats(
        &self,
        band: &SarRealImage,
        mask: &Mask,
        kernel: &NeighborhoodKernel,
    ) -> WindowStats {
        let offsets = kernel.offsets();
        let stats = map_pixels(band.dim(), |i, j| pixel_stats(band, mask, &offsets, i, j));

        WindowStats {
            mean: stats.mapv(|s| s.0),
            variance: stats.mapv(|s| s.1),
            count: stats.mapv(|s| s.2),
        }
    }

    /// Kernel-weighted sum, divided by the contributing weight when the kernel is normalized
    pub fn convolve(&self, band: &SarRealImage, mask: &Mask, kernel: &NeighborhoodKernel) -> SarRealImage {
        let offsets = kernel.offsets();
        let normalize = kernel.is_normalized();
        let (rows, cols) = band.dim();

        map_pixels(band.dim(), |i, j| {
            let mut sum = 0.0f64;
            let mut weight = 0u32;
            for &(dr, dc) in &offsets {
                if let Some((r, c)) = offset_index(i, j, dr, dc, rows, cols) {
                    let v = band[[r, c]];
                    if mask[[r, c]] && v.is_finite() {
                        sum += v as f64;
                        weight += 1;
                    }
                }
            }
            if !normalize {
                sum as f32
            } else if weight > 0 {
                (sum / weight as f64) as f32
            } else {
                f32::NAN
            }
        })
    }

    /// Number of `true` flags inside each window
    pub fn count_true(&self, flags: &Mask, kernel: &NeighborhoodKernel) -> Array2<u32> {
        let offsets = kernel.offsets();
        let (rows, cols) = flags.dim();

        map_pixels(flags.dim(), |i, j| {
            offsets
                .iter()
                .filter_map(|&(dr, dc)| offset_index(i, j, dr, dc, rows, cols))
                .filter(|&(r, c)| flags[[r, c]])
                .count() as u32
        })
    }

    /// Mask restricted according to the boundary policy for a filter of the given reach
    pub fn boundary_mask(&self, mask: &Mask, reach: usize) -> Mask {
        match self.policy {
            BoundaryPolicy::Shrink => mask.clone(),
            BoundaryPolicy::MaskIncomplete => {
                let (rows, cols) = mask.dim();
                let mut out = mask.clone();
                Zip::indexed(&mut out).for_each(|(i, j), valid| {
                    let complete = i >= reach
                        && j >= reach
                        && i + reach < rows
                        && j + reach < cols;
                    *valid = *valid && complete;
                });
                out
            }
        }
    }
}

fn pixel_stats(
    band: &SarRealImage,
    mask: &Mask,
    offsets: &[(isize, isize)],
    i: usize,
    j: usize,
) -> (f32, f32, u32) {
    let (rows, cols) = band.dim();
    let mut sum = 0.0f64;
    let mut count = 0u32;

    for &(dr, dc) in offsets {
        if let Some((r, c)) = offset_index(i, j, dr, dc, rows, cols) {
            let v = band[[r, c]];
            if mask[[r, c]] && v.is_finite() {
                sum += v as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        return (f32::NAN, f32::NAN, 0);
    }

    let mean = sum / count as f64;
    let mut sq = 0.0f64;
    for &(dr, dc) in offsets {
        if let Some((r, c)) = offset_index(i, j, dr, dc, rows, cols) {
            let v = band[[r, c]];
            if mask[[r, c]] && v.is_finite() {
                let d = v as f64 - mean;
                sq += d * d;
            }
        }
    }

    (mean as f32, (sq / count as f64) as f32, count)
}

#[inline]
pub(crate) fn offset_index(
    i: usize,
    j: usize,
    dr: isize,
    dc: isize,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    let r = i as isize + dr;
    let c = j as isize + dc;
    if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
        Some((r as usize, c as usize))
    } else {
        None
    }
}

/// Evaluate `f` at every pixel, row-parallel when the `parallel` feature is on
pub(crate) fn map_pixels<T, F>(shape: (usize, usize), f: F) -> Array2<T>
where
    T: Clone + Default + Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    let mut out = Array2::from_elem(shape, T::default());

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut out).par_for_each(|(i, j), v| *v = f(i, j));

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut out).for_each(|(i, j), v| *v = f(i, j));

    out
}

/// Mean of the valid, finite pixels; `None` for an empty region
pub fn region_mean<T: Float>(band: &Array2<T>, mask: &Mask) -> Option<T> {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    Zip::from(band).and(mask).for_each(|&v, &valid| {
        if valid && v.is_finite() {
            if let Some(x) = v.to_f64() {
                sum += x;
                count += 1;
            }
        }
    });

    if count == 0 {
        None
    } else {
        num_traits::cast(sum / count as f64)
    }
}

/// Nearest-rank percentile of the valid, finite pixels; `None` for an empty region
pub fn region_percentile<T: Float>(band: &Array2<T>, mask: &Mask, percentile: f64) -> Option<T> {
    let mut values: Vec<T> = Zip::from(band)
        .and(mask)
        .fold(Vec::new(), |mut acc, &v, &valid| {
            if valid && v.is_finite() {
                acc.push(v);
            }
            acc
        });

    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = values.len();
    let rank = ((percentile.clamp(0.0, 100.0) / 100.0) * n as f64).ceil() as usize;
    Some(values[rank.clamp(1, n) - 1])
}
