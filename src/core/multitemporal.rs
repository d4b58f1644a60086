//! Quegan multi-temporal speckle filtering

use crate::core::speckle_filter::SpeckleFilter;
use crate::types::{RasterImage, SarError, SarResult};
use chrono::NaiveDate;
use ndarray::Array2;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Minimum fraction of the target footprint a temporal neighbor must cover
pub const MIN_TEMPORAL_OVERLAP: f64 = 0.95;

/// Whether `candidate` can act as a temporal neighbor of `target`
pub fn is_temporal_candidate(target: &RasterImage, candidate: &RasterImage) -> bool {
    candidate.relative_orbit == target.relative_orbit
        && target
            .polarizations()
            .iter()
            .all(|&pol| candidate.has_polarization(pol))
        && target.geometry.footprint.overlap_fraction(&candidate.geometry.footprint)
            >= MIN_TEMPORAL_OVERLAP
}

/// Pick the temporal window of `target`, target included, in chronological order
///
/// One image per UTC date. The target's date is always represented by the
/// target; the other `nr_of_images - 1` slots go to the most recent earlier
/// dates, topped up with the nearest later dates when the past is too short.
pub fn select_temporal_neighbors<'a>(
    target: &'a RasterImage,
    candidates: &'a [RasterImage],
    nr_of_images: usize,
) -> Vec<&'a RasterImage> {
    let target_date = target.acquisition_date();
    let overlap = |image: &RasterImage| {
        target.geometry.footprint.overlap_fraction(&image.geometry.footprint)
    };

    let mut by_date: BTreeMap<NaiveDate, &RasterImage> = BTreeMap::new();
    for candidate in candidates {
        if candidate.id == target.id
            || candidate.acquisition_date() == target_date
            || !is_temporal_candidate(target, candidate)
        {
            continue;
        }
        by_date
            .entry(candidate.acquisition_date())
            .and_modify(|best| {
                if preferred(candidate, *best, overlap(candidate), overlap(*best)) {
                    *best = candidate;
                }
            })
            .or_insert(candidate);
    }

    let slots = nr_of_images.saturating_sub(1);
    let mut selected: Vec<&RasterImage> = by_date
        .range(..target_date)
        .rev()
        .take(slots)
        .map(|(_, image)| *image)
        .collect();

    if selected.len() < slots {
        let missing = slots - selected.len();
        log::debug!(
            "{}: {} earlier acquisitions, adding up to {} later ones",
            target.id,
            selected.len(),
            missing
        );
        selected.extend(
            by_date
                .range(target_date..)
                .take(missing)
                .map(|(_, image)| *image),
        );
    }

    selected.push(target);
    selected.sort_by(|a, b| {
        a.acquisition_time
            .cmp(&b.acquisition_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    selected
}

/// Same-date tie break: larger overlap, then earlier timestamp, then id
fn preferred(a: &RasterImage, b: &RasterImage, overlap_a: f64, overlap_b: f64) -> bool {
    match overlap_a.partial_cmp(&overlap_b).unwrap_or(Ordering::Equal) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => (a.acquisition_time, &a.id) < (b.acquisition_time, &b.id),
    }
}

/// Quegan & Yu multi-temporal filter built on a mono-temporal filter
pub struct QueganFilter {
    filter: SpeckleFilter,
    nr_of_images: usize,
    tile_size: usize,
}

impl QueganFilter {
    pub fn new(filter: SpeckleFilter, nr_of_images: usize) -> SarResult<Self> {
        if nr_of_images == 0 {
            return Err(SarError::Configuration(
                "Number of images for multi-temporal filtering must be positive".to_string(),
            ));
        }
        Ok(Self {
            filter,
            nr_of_images,
            tile_size: 0,
        })
    }

    /// Filter members tile by tile; 0 filters whole images
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn nr_of_images(&self) -> usize {
        self.nr_of_images
    }

    pub fn filter(&self) -> &SpeckleFilter {
        &self.filter
    }

    fn filter_image(&self, image: &RasterImage) -> SarResult<RasterImage> {
        if self.tile_size > 0 {
            self.filter.apply_tiled(image, self.tile_size)
        } else {
            self.filter.apply(image)
        }
    }

    /// Composite `target` with its temporal window
    ///
    /// `members` must share the target grid; the target may or may not be
    /// among them. Per pixel, only members valid there with a non-zero
    /// filtered value contribute. Pixels with a single contributor keep the
    /// mono-temporal result.
    pub fn composite(&self, target: &RasterImage, members: &[RasterImage]) -> SarResult<RasterImage> {
        log::info!(
            "Quegan filtering {} with {} temporal members",
            target.id,
            members.len()
        );

        let filtered_target = self.filter_image(target)?;
        let shape = target.shape();

        let others: Vec<&RasterImage> = members.iter().filter(|m| m.id != target.id).collect();
        for member in &others {
            if member.shape() != shape {
                return Err(SarError::Data(format!(
                    "Temporal member {} shape {:?} differs from target {} shape {:?}",
                    member.id,
                    member.shape(),
                    target.id,
                    shape
                )));
            }
        }
        if others.is_empty() {
            return Ok(filtered_target);
        }

        let filtered_others = others
            .iter()
            .map(|member| self.filter_image(member))
            .collect::<SarResult<Vec<_>>>()?;

        let mut bands = BTreeMap::new();
        for (&pol, target_filtered) in filtered_target.bands() {
            let mut ratio_sum = Array2::<f32>::zeros(shape);
            let mut count = Array2::<u32>::zeros(shape);

            let sources = std::iter::once((target, &filtered_target))
                .chain(others.iter().copied().zip(filtered_others.iter()));
            for (raw, filtered) in sources {
                let raw_band = raw.band(pol)?;
                let filtered_band = filtered.band(pol)?;
                ndarray::Zip::from(&mut ratio_sum)
                    .and(&mut count)
                    .and(raw_band)
                    .and(filtered_band)
                    .and(filtered.mask())
                    .for_each(|sum, n, &z, &f, &valid| {
                        if valid && f != 0.0 && z.is_finite() && f.is_finite() {
                            *sum += z / f;
                            *n += 1;
                        }
                    });
            }

            let band = ndarray::Zip::from(target_filtered)
                .and(&ratio_sum)
                .and(&count)
                .map_collect(|&f, &sum, &n| if n > 1 { f / n as f32 * sum } else { f });
            bands.insert(pol, band);
        }

        filtered_target.with_bands(bands)
    }
}
