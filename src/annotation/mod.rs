mod cloud_vision;

pub use cloud_vision::CloudVisionClient;

use crate::error::NetworkError;
use crate::frame::{AnnotationResult, ImageBuffer};
use async_trait::async_trait;
use tracing::debug;

/// Remote image classifier
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    fn name(&self) -> &str;

    /// Label an encoded photo. Labels map to confidences in [0, 1].
    async fn annotate(&self, image: &ImageBuffer) -> Result<AnnotationResult, NetworkError>;
}

/// Answers every request with the same labels, without touching the network
#[derive(Debug, Clone)]
pub struct StaticAnnotationClient {
    labels: AnnotationResult,
}

impl StaticAnnotationClient {
    pub fn new(labels: AnnotationResult) -> Self {
        Self { labels }
    }
}

impl Default for StaticAnnotationClient {
    fn default() -> Self {
        Self::new([("Person", 0.92f32), ("Door", 0.81), ("Porch", 0.64)].into_iter().collect())
    }
}

#[async_trait]
impl AnnotationClient for StaticAnnotationClient {
    fn name(&self) -> &str {
        "static"
    }

    async fn annotate(&self, image: &ImageBuffer) -> Result<AnnotationResult, NetworkError> {
        debug!("Static annotation for {} byte image", image.len());
        Ok(self.labels.clone())
    }
}
