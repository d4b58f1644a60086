use crate::types::{RasterImage, SarError, SarResult};
use std::sync::Mutex;

/// Destination for processed images
pub trait RasterSink: Send + Sync {
    fn export(&self, image: &RasterImage) -> SarResult<()>;
}

/// Collects exported images in memory
#[derive(Default)]
pub struct MemorySink {
    images: Mutex<Vec<RasterImage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the exported images in export order
    pub fn images(&self) -> Vec<RasterImage> {
        self.images
            .lock()
            .map(|images| images.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.images.lock().map(|images| images.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RasterSink for MemorySink {
    fn export(&self, image: &RasterImage) -> SarResult<()> {
        log::debug!("Exporting {}", image.id);
        self.images
            .lock()
            .map_err(|_| SarError::ExternalSource("Sink lock poisoned".to_string()))?
            .push(image.clone());
        Ok(())
    }
}
