//! Core SAR processing modules

pub mod border_noise;
pub mod conversion;
pub mod multitemporal;
pub mod neighborhood;
pub mod speckle_filter;
pub mod terrain_flatten;
pub mod tiling;

// Re-export main types
pub use border_noise::{BorderNoiseMasker, BorderNoiseParams};
pub use conversion::{db_to_linear, linear_to_db, to_db, to_linear};
pub use multitemporal::{select_temporal_neighbors, QueganFilter};
pub use neighborhood::{BoundaryPolicy, NeighborhoodKernel, NeighborhoodStatsEngine, WindowStats};
pub use speckle_filter::{LeeSigmaParams, SpeckleFilter, SpeckleFilterType};
pub use terrain_flatten::{TerrainFlattener, TerrainFlatteningModel, TerrainFlatteningParams};
pub use tiling::{Tile, TileIterator, TiledProcessor};
