use super::components::Collaborators;
use super::state::OrchestratorState;
use super::types::{ComponentState, ShutdownReason};
use crate::button::ButtonInput;
use crate::camera::CaptureOutcome;
use crate::config::DoorbellConfig;
use crate::domain::SchedulingDomain;
use crate::error::{EncodeError, NetworkError, Result};
use crate::events::EventBus;
use crate::frame::{AnnotationResult, ImageBuffer};
use crate::gpio::{GpioLine, MockPeripheralDriver};
use crate::heartbeat::HeartbeatScheduler;
use crate::keyboard_input::KeyboardInputHandler;
use crate::preview::PreviewSink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub(super) const IO_DOMAIN: &str = "io-worker";
pub(super) const NETWORK_DOMAIN: &str = "network-worker";

/// Result of a stage that ran off the main loop, handed back by value
#[derive(Debug)]
pub(super) enum StageResult {
    Captured(CaptureOutcome),
    Encoded {
        cycle_id: u64,
        result: std::result::Result<ImageBuffer, EncodeError>,
    },
    Annotated {
        cycle_id: u64,
        image: ImageBuffer,
        result: std::result::Result<AnnotationResult, NetworkError>,
    },
    Published {
        cycle_id: u64,
        event_id: Uuid,
        result: std::result::Result<(), NetworkError>,
    },
}

/// Requests a graceful stop of a running orchestrator
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: mpsc::UnboundedSender<ShutdownReason>,
}

impl ShutdownHandle {
    pub(crate) fn new(sender: mpsc::UnboundedSender<ShutdownReason>) -> Self {
        Self { sender }
    }

    /// Returns `false` if the orchestrator is already gone
    pub fn request(&self, reason: ShutdownReason) -> bool {
        self.sender.send(reason).is_ok()
    }
}

/// Main application coordinator: owns the lines, the camera session and the
/// worker domains, and runs the capture-cycle state machine.
pub struct DoorbellOrchestrator {
    pub(super) config: DoorbellConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) collaborators: Collaborators,
    pub(super) preview: Option<PreviewSink>,

    // Acquired at start-up
    pub(super) button: Option<ButtonInput>,
    pub(super) led: Option<Arc<GpioLine>>,
    pub(super) heartbeat: HeartbeatScheduler,
    pub(super) io_domain: Option<SchedulingDomain>,
    pub(super) network_domain: Option<SchedulingDomain>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,

    // Cycle state machine
    pub(super) state: OrchestratorState,
    pub(super) stage_tx: mpsc::UnboundedSender<StageResult>,
    pub(super) stage_rx: mpsc::UnboundedReceiver<StageResult>,

    // Lifecycle management
    pub(super) component_states: HashMap<String, ComponentState>,
    pub(super) shutdown_tx: mpsc::UnboundedSender<ShutdownReason>,
    pub(super) shutdown_rx: mpsc::UnboundedReceiver<ShutdownReason>,
    pub(super) started: bool,
    pub(super) exit_code: Option<i32>,
}

impl DoorbellOrchestrator {
    /// Create an orchestrator with the backends selected in `config`
    pub fn new(config: DoorbellConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collaborators))
    }

    /// Create an orchestrator around explicit collaborators
    pub fn with_collaborators(config: DoorbellConfig, collaborators: Collaborators) -> Self {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let heartbeat =
            HeartbeatScheduler::new(config.heartbeat.interval()).with_event_bus(Arc::clone(&event_bus));
        let preview = config
            .preview
            .enabled
            .then(|| PreviewSink::new(&config.preview.path));
        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        debug!("Doorbell orchestrator created");

        Self {
            config,
            event_bus,
            collaborators,
            preview,
            button: None,
            led: None,
            heartbeat,
            io_domain: None,
            network_domain: None,
            keyboard_handler: None,
            state: OrchestratorState::new(),
            stage_tx,
            stage_rx,
            component_states: HashMap::new(),
            shutdown_tx,
            shutdown_rx,
            started: false,
            exit_code: None,
        }
    }

    /// Drive the button from the terminal instead of a physical line
    pub fn enable_keyboard(&mut self, driver: Arc<MockPeripheralDriver>) {
        info!("Keyboard simulated button enabled");
        self.keyboard_handler = Some(KeyboardInputHandler::new(
            driver,
            &self.config.gpio.button_pin,
            self.config.gpio.button_polarity,
            self.shutdown_handle(),
        ));
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown_tx.clone())
    }

    pub fn config(&self) -> &DoorbellConfig {
        &self.config
    }
}
