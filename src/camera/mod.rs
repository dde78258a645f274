mod client;
mod driver;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
mod mock;
mod sink;

pub use client::CaptureClient;
pub use driver::CameraDriver;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gst::GstCameraDriver;
pub use mock::{synthetic_frame, MockCameraDriver, MockCaptureMode};
pub use sink::{CaptureOutcome, FrameHandler, FrameSink};
