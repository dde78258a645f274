use super::driver::CameraDriver;
use super::sink::FrameSink;
use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::frame::ImageBuffer;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(10);

/// V4L2 still capture through a one-shot GStreamer pipeline per trigger.
///
/// Frames are converted to RGB24 in the pipeline so they can be re-encoded
/// at the configured JPEG quality.
pub struct GstCameraDriver {
    device: String,
    resolution: (u32, u32),
    pull_timeout: Duration,
    ready: Arc<AtomicBool>,
}

impl GstCameraDriver {
    pub fn new(config: &CameraConfig) -> Self {
        let pull_timeout = match config.capture_timeout_seconds {
            0 => DEFAULT_PULL_TIMEOUT,
            seconds => Duration::from_secs(seconds),
        };
        Self {
            device: config.device.clone(),
            resolution: config.resolution,
            pull_timeout,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    fn pipeline_description(&self) -> String {
        let (width, height) = self.resolution;
        format!(
            "v4l2src device={} num-buffers=1 ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=sink sync=false max-buffers=1 emit-signals=false",
            self.device, width, height
        )
    }

    fn build_pipeline(description: &str) -> Result<(Pipeline, AppSink), CaptureError> {
        let pipeline = gstreamer::parse::launch(description)
            .map_err(|e| CaptureError::Driver {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CaptureError::Driver {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.dynamic_cast::<AppSink>().ok())
            .ok_or_else(|| CaptureError::Driver {
                details: "Pipeline has no appsink".to_string(),
            })?;

        Ok((pipeline, appsink))
    }

    fn capture_once(
        description: &str,
        resolution: (u32, u32),
        timeout: Duration,
    ) -> Result<ImageBuffer, CaptureError> {
        let (pipeline, appsink) = Self::build_pipeline(description)?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CaptureError::Driver {
                details: format!("Failed to start pipeline: {}", e),
            })?;

        let sample =
            appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64));
        let _ = pipeline.set_state(gstreamer::State::Null);

        let sample = sample.ok_or(CaptureError::Timeout {
            seconds: timeout.as_secs(),
        })?;
        let buffer = sample.buffer().ok_or_else(|| CaptureError::Driver {
            details: "No buffer in sample".to_string(),
        })?;
        let map = buffer.map_readable().map_err(|e| CaptureError::Driver {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let (width, height) = resolution;
        ImageBuffer::from_padded_rgb(map.as_slice(), width, height).ok_or_else(|| {
            CaptureError::Driver {
                details: format!(
                    "Unexpected frame size {} for {}x{} RGB",
                    map.size(),
                    width,
                    height
                ),
            }
        })
    }
}

#[async_trait]
impl CameraDriver for GstCameraDriver {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Driver {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        // Validate the pipeline once up front
        let description = self.pipeline_description();
        info!("Camera pipeline: {}", description);
        Self::build_pipeline(&description)?;

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn trigger(&self, sink: FrameSink) -> Result<(), CaptureError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(CaptureError::NotInitialized);
        }

        let description = self.pipeline_description();
        let resolution = self.resolution;
        let timeout = self.pull_timeout;
        let cycle_id = sink.cycle_id();

        std::thread::Builder::new()
            .name(format!("capture-{}", cycle_id))
            .spawn(move || match Self::capture_once(&description, resolution, timeout) {
                Ok(image) => {
                    debug!("Captured frame for cycle {} ({} bytes)", cycle_id, image.len());
                    sink.deliver(image);
                }
                Err(e) => {
                    error!("Capture {} failed: {}", cycle_id, e);
                    sink.fail(e);
                }
            })
            .map(|_| ())
            .map_err(|e| CaptureError::Driver {
                details: format!("Failed to spawn capture thread: {}", e),
            })
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}
