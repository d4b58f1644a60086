//! Linear power / dB conversion and band ratios

use crate::types::{Mask, Polarization, RasterImage, Scale, SarError, SarRealImage, SarResult};
use ndarray::Zip;
use std::collections::BTreeMap;

/// 10 * log10(x); non-positive values give NaN
pub fn linear_to_db(data: &SarRealImage) -> SarRealImage {
    data.mapv(|v| {
        if v > 0.0 {
            (10.0 * (v as f64).log10()) as f32
        } else {
            f32::NAN
        }
    })
}

/// 10^(x / 10)
pub fn db_to_linear(data: &SarRealImage) -> SarRealImage {
    data.mapv(|v| 10.0f64.powf(v as f64 / 10.0) as f32)
}

/// Convert all backscatter bands to dB; pixels without a finite dB value are masked
pub fn to_db(image: &RasterImage) -> SarResult<RasterImage> {
    if image.scale() == Scale::Db {
        return Ok(image.clone());
    }

    let mut bands = BTreeMap::new();
    let mut mask = Mask::from_elem(image.shape(), true);
    for (&pol, band) in image.bands() {
        let db = linear_to_db(band);
        Zip::from(&mut mask).and(&db).for_each(|m, &v| *m = *m && v.is_finite());
        bands.insert(pol, db);
    }

    let dropped = Zip::from(&mask)
        .and(image.mask())
        .fold(0usize, |n, &m, &valid| n + usize::from(valid && !m));
    if dropped > 0 {
        log::warn!("{}: {} non-positive pixels masked in dB conversion", image.id, dropped);
    }

    Ok(image.with_bands_and_mask(bands, &mask)?.with_scale(Scale::Db))
}

/// Convert all backscatter bands back to linear power
pub fn to_linear(image: &RasterImage) -> SarResult<RasterImage> {
    if image.scale() == Scale::Linear {
        return Ok(image.clone());
    }

    let bands = image
        .bands()
        .iter()
        .map(|(&pol, band)| (pol, db_to_linear(band)))
        .collect();
    Ok(image.with_bands(bands)?.with_scale(Scale::Linear))
}

/// VV / VH ratio in linear power, NaN where VH is zero
pub fn vv_vh_ratio(image: &RasterImage) -> SarResult<SarRealImage> {
    if image.scale() != Scale::Linear {
        return Err(SarError::Data(format!(
            "Image {}: ratio requires linear backscatter",
            image.id
        )));
    }
    let vv = image.band(Polarization::VV)?;
    let vh = image.band(Polarization::VH)?;
    Ok(Zip::from(vv)
        .and(vh)
        .map_collect(|&a, &b| if b != 0.0 { a / b } else { f32::NAN }))
}

/// Attach the VV/VH ratio layer
pub fn add_ratio(image: &RasterImage) -> SarResult<RasterImage> {
    let ratio = vv_vh_ratio(image)?;
    log::debug!("{}: added VV/VH ratio layer", image.id);
    image.clone().with_ratio(ratio)
}
