//! Python bindings over single-band arrays

use crate::config::{ProcessingConfig, SpeckleFilterKind};
use crate::core::border_noise::{BorderNoiseMasker, BorderNoiseParams};
use crate::core::conversion;
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::terrain_flatten::{TerrainFlattener, TerrainFlatteningModel, TerrainFlatteningParams};
use crate::types::{GeoTransform, GridGeometry, Mask, Polarization, RasterImage, SarError, SarRealImage};
use chrono::Utc;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyInterruptedError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::BTreeMap;

impl From<SarError> for PyErr {
    fn from(err: SarError) -> PyErr {
        match err {
            SarError::Configuration(_) | SarError::Data(_) => PyValueError::new_err(err.to_string()),
            SarError::Cancelled => PyInterruptedError::new_err(err.to_string()),
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

/// Wrap a single VV band and its angle band as an image on a unit grid
fn raster(band: SarRealImage, angle: SarRealImage, pixel_spacing: f64) -> PyResult<RasterImage> {
    let shape = angle.dim();
    let geometry = GridGeometry::new(
        GeoTransform::north_up(0.0, 0.0, pixel_spacing, pixel_spacing),
        shape,
        pixel_spacing,
    );
    let mut bands = BTreeMap::new();
    bands.insert(Polarization::VV, band);
    Ok(RasterImage::new("array", bands, angle, geometry, Utc::now())?)
}

/// Filter one linear backscatter band
#[pyfunction]
#[pyo3(signature = (band, filter = "GAMMA MAP", window_size = 7, mask = None))]
fn speckle_filter<'py>(
    py: Python<'py>,
    band: PyReadonlyArray2<'py, f32>,
    filter: &str,
    window_size: usize,
    mask: Option<PyReadonlyArray2<'py, bool>>,
) -> PyResult<&'py PyArray2<f32>> {
    let kind: SpeckleFilterKind = filter.parse()?;
    let config = ProcessingConfig {
        speckle_filter: kind,
        speckle_filter_kernel_size: window_size,
        ..Default::default()
    };
    let filter = SpeckleFilter::new(config.speckle_filter_type()?)?;

    let band = band.as_array().to_owned();
    let mask = match mask {
        Some(mask) => mask.as_array().to_owned(),
        None => Mask::from_elem(band.dim(), true),
    };
    if mask.dim() != band.dim() {
        return Err(PyValueError::new_err(format!(
            "Mask shape {:?} differs from band shape {:?}",
            mask.dim(),
            band.dim()
        )));
    }

    let filtered = py.allow_threads(|| filter.filter_band(&band, &mask))?;
    Ok(filtered.into_pyarray(py))
}

/// Validity mask after border noise correction
#[pyfunction]
#[pyo3(signature = (band, angle, edge_trim = true))]
fn border_noise_mask<'py>(
    py: Python<'py>,
    band: PyReadonlyArray2<'py, f32>,
    angle: PyReadonlyArray2<'py, f32>,
    edge_trim: bool,
) -> PyResult<&'py PyArray2<bool>> {
    let image = raster(band.as_array().to_owned(), angle.as_array().to_owned(), 10.0)?;
    let masker = BorderNoiseMasker::new(BorderNoiseParams {
        edge_trim,
        ..Default::default()
    });
    let masked = py.allow_threads(|| masker.apply(&image))?;
    Ok(masked.mask().clone().into_pyarray(py))
}

/// Terrain-flattened band and its validity mask
#[pyfunction]
#[pyo3(signature = (band, angle, dem, pixel_spacing, model = "VOLUME", layover_shadow_buffer = 0.0))]
fn terrain_flatten<'py>(
    py: Python<'py>,
    band: PyReadonlyArray2<'py, f32>,
    angle: PyReadonlyArray2<'py, f32>,
    dem: PyReadonlyArray2<'py, f32>,
    pixel_spacing: f64,
    model: &str,
    layover_shadow_buffer: f64,
) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<bool>)> {
    let model: TerrainFlatteningModel = model.parse()?;
    let flattener = TerrainFlattener::new(TerrainFlatteningParams {
        model,
        layover_shadow_buffer,
    })?;

    let image = raster(band.as_array().to_owned(), angle.as_array().to_owned(), pixel_spacing)?;
    let dem = dem.as_array().to_owned();
    let flat = py.allow_threads(|| flattener.flatten(&image, &dem))?;

    let values = flat.band(Polarization::VV)?.clone();
    Ok((values.into_pyarray(py), flat.mask().clone().into_pyarray(py)))
}

/// 10·log10, NaN for non-positive input
#[pyfunction]
fn linear_to_db<'py>(py: Python<'py>, data: PyReadonlyArray2<'py, f32>) -> &'py PyArray2<f32> {
    conversion::linear_to_db(&data.as_array().to_owned()).into_pyarray(py)
}

#[pyfunction]
fn db_to_linear<'py>(py: Python<'py>, data: PyReadonlyArray2<'py, f32>) -> &'py PyArray2<f32> {
    conversion::db_to_linear(&data.as_array().to_owned()).into_pyarray(py)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(speckle_filter, m)?)?;
    m.add_function(wrap_pyfunction!(border_noise_mask, m)?)?;
    m.add_function(wrap_pyfunction!(terrain_flatten, m)?)?;
    m.add_function(wrap_pyfunction!(linear_to_db, m)?)?;
    m.add_function(wrap_pyfunction!(db_to_linear, m)?)?;
    Ok(())
}
