//! s1ard: analysis-ready Sentinel-1 backscatter
//!
//! Border noise masking, mono- and multi-temporal speckle filtering and
//! radiometric terrain flattening over time-ordered collections of
//! GRD backscatter tiles.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::ProcessingConfig;
pub use io::{CollectionQuery, MemorySink, MemorySource, RasterSink, RasterSource};
pub use pipeline::{CancellationToken, ImageFailure, Pipeline, ProcessingReport};
pub use types::{
    BoundingBox, GeoTransform, GridGeometry, Mask, OrbitPass, Platform, Polarization,
    RasterCollection, RasterImage, SarError, SarRealImage, SarResult, Scale,
};
