use super::driver::CameraDriver;
use super::sink::FrameSink;
use crate::error::CaptureError;
use crate::frame::{ImageBuffer, ImageEncoding};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// How the mock camera answers a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCaptureMode {
    /// Deliver a synthetic frame after `delay`
    Deliver { delay: Duration },
    /// Report a driver failure after `delay`
    Fail { delay: Duration, details: String },
    /// Release the sink without a frame
    Drop,
    /// Hold the sink until the camera is closed
    Hang,
}

impl Default for MockCaptureMode {
    fn default() -> Self {
        Self::Deliver {
            delay: Duration::from_millis(50),
        }
    }
}

/// Build a raw RGB24 gradient frame; `seq` shifts the pattern
pub fn synthetic_frame(width: u32, height: u32, seq: u64) -> ImageBuffer {
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    let shift = (seq % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let r = ((x * 255) / width.max(1)) as u8;
            let g = ((y * 255) / height.max(1)) as u8;
            data.extend_from_slice(&[r.wrapping_add(shift), g, 128u8.wrapping_sub(shift)]);
        }
    }
    ImageBuffer::new(data, ImageEncoding::Raw { width, height })
}

/// Camera stand-in for simulation and tests. Frames are delivered from a
/// task on the runtime that called `trigger`.
pub struct MockCameraDriver {
    resolution: (u32, u32),
    mode: Mutex<MockCaptureMode>,
    held: Mutex<Vec<FrameSink>>,
    triggers: AtomicU64,
    initialized: AtomicBool,
    fail_initialize: AtomicBool,
}

impl MockCameraDriver {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self::with_mode(resolution, MockCaptureMode::default())
    }

    pub fn with_mode(resolution: (u32, u32), mode: MockCaptureMode) -> Self {
        Self {
            resolution,
            mode: Mutex::new(mode),
            held: Mutex::new(Vec::new()),
            triggers: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
        }
    }

    pub fn set_mode(&self, mode: MockCaptureMode) {
        *self.mode.lock() = mode;
    }

    pub fn fail_initialize(&self) {
        self.fail_initialize.store(true, Ordering::SeqCst);
    }

    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Sinks currently held by [`MockCaptureMode::Hang`]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

#[async_trait]
impl CameraDriver for MockCameraDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(CaptureError::Driver {
                details: "mock camera configured to fail".to_string(),
            });
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "Mock camera ready at {}x{}",
            self.resolution.0, self.resolution.1
        );
        Ok(())
    }

    fn trigger(&self, sink: FrameSink) -> Result<(), CaptureError> {
        if !self.is_initialized() {
            return Err(CaptureError::NotInitialized);
        }

        let seq = self.triggers.fetch_add(1, Ordering::SeqCst) + 1;
        let (width, height) = self.resolution;
        let mode = self.mode.lock().clone();
        debug!("Mock camera trigger {} ({:?})", seq, mode);

        match mode {
            MockCaptureMode::Deliver { delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    sink.deliver(synthetic_frame(width, height, seq));
                });
            }
            MockCaptureMode::Fail { delay, details } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    sink.fail(CaptureError::Driver { details });
                });
            }
            MockCaptureMode::Drop => drop(sink),
            MockCaptureMode::Hang => self.held.lock().push(sink),
        }
        Ok(())
    }

    async fn close(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        let held: Vec<FrameSink> = self.held.lock().drain(..).collect();
        drop(held);
    }
}
