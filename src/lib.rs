pub mod annotation;
pub mod app;
pub mod button;
pub mod camera;
pub mod config;
pub mod domain;
pub mod encode;
pub mod error;
pub mod events;
pub mod frame;
pub mod gpio;
pub mod heartbeat;
pub mod keyboard_input;
pub mod preview;
pub mod publisher;

pub use annotation::{AnnotationClient, CloudVisionClient, StaticAnnotationClient};
pub use app::{
    Collaborators, ComponentState, CycleOutcome, CycleStage, CycleState, CycleStats,
    DoorbellOrchestrator, ShutdownHandle, ShutdownReason,
};
pub use button::{ButtonEvent, ButtonInput, ButtonWatcher};
pub use camera::{CameraDriver, CaptureClient, CaptureOutcome, MockCameraDriver};
pub use config::DoorbellConfig;
pub use domain::{DomainHandle, SchedulingDomain};
pub use error::{DoorbellError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, SystemEvent};
pub use frame::{AnnotationResult, DoorbellEvent, ImageBuffer, ImageEncoding};
pub use gpio::{GpioLine, Level, MockPeripheralDriver, PeripheralDriver, Polarity};
pub use heartbeat::HeartbeatScheduler;
pub use preview::PreviewSink;
pub use publisher::{EventPublisher, HttpEventPublisher, LogEventPublisher};
