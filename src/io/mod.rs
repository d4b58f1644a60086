//! External collaborators: image source and result sink

pub mod sink;
pub mod source;

pub use sink::{MemorySink, RasterSink};
pub use source::{CollectionQuery, MemorySource, RasterSource};
