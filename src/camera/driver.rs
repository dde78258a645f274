use super::sink::FrameSink;
use crate::error::CaptureError;
use async_trait::async_trait;

/// Still-photo camera backend.
///
/// `trigger` must return promptly; the frame arrives later through the sink,
/// from whatever thread the driver uses.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), CaptureError>;

    fn trigger(&self, sink: FrameSink) -> Result<(), CaptureError>;

    async fn close(&self);
}
