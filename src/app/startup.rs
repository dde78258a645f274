use super::orchestrator::{StageResult, IO_DOMAIN, NETWORK_DOMAIN};
use super::{ComponentState, DoorbellOrchestrator};
use crate::button::ButtonInput;
use crate::camera::FrameHandler;
use crate::domain::SchedulingDomain;
use crate::error::{DoorbellError, Result};
use crate::events::SystemEvent;
use crate::gpio::{Direction, GpioLine, Level, Polarity};
use std::sync::Arc;
use tracing::{error, info, warn};

impl DoorbellOrchestrator {
    /// Acquire every resource in order: worker domains, button line, camera
    /// session, LED line, heartbeat.
    ///
    /// A failure to open the button or the camera aborts start-up; whatever
    /// was already acquired is released by [`DoorbellOrchestrator::shutdown`]
    /// or on drop. A missing LED only disables the heartbeat.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DoorbellError::system("Doorbell system already started"));
        }
        info!("Starting doorbell system");

        self.io_domain = Some(SchedulingDomain::spawn(IO_DOMAIN)?);
        self.network_domain = Some(SchedulingDomain::spawn(NETWORK_DOMAIN)?);

        let peripheral = Arc::clone(&self.collaborators.peripheral);
        let lines = peripheral.list_lines();
        info!("Available GPIO lines ({}): {}", lines.len(), lines.join(", "));

        // Button
        self.set_component_state("button", ComponentState::Starting);
        let button = match ButtonInput::open(
            Arc::clone(&peripheral),
            &self.config.gpio.button_pin,
            self.config.gpio.button_polarity,
        ) {
            Ok(button) => button,
            Err(e) => {
                error!("Unable to access button: {}", e);
                self.set_component_state("button", ComponentState::Failed);
                return Err(e.into());
            }
        };
        self.button = Some(button);
        self.set_component_state("button", ComponentState::Running);

        // Camera, delivering on the I/O domain
        self.set_component_state("camera", ComponentState::Starting);
        let io = match &self.io_domain {
            Some(domain) => domain.handle(),
            None => return Err(DoorbellError::system("I/O domain missing")),
        };
        let stage_tx = self.stage_tx.clone();
        let handler: FrameHandler = Arc::new(move |outcome| {
            let _ = stage_tx.send(StageResult::Captured(outcome));
        });
        let initialized = self.collaborators.capture.initialize(io, handler).await;
        if let Err(e) = initialized {
            error!("Failed to initialize camera: {}", e);
            self.set_component_state("camera", ComponentState::Failed);
            return Err(e.into());
        }
        self.set_component_state("camera", ComponentState::Running);

        // LED + heartbeat
        self.set_component_state("led", ComponentState::Starting);
        match GpioLine::open(
            peripheral,
            &self.config.gpio.led_pin,
            Direction::Output,
            Polarity::ActiveHigh,
            Some(Level::Low),
        ) {
            Ok(line) => {
                let line = Arc::new(line);
                self.led = Some(Arc::clone(&line));
                self.set_component_state("led", ComponentState::Running);

                if self.config.heartbeat.enabled {
                    self.heartbeat.start(line, Level::Low)?;
                    self.set_component_state("heartbeat", ComponentState::Running);
                } else {
                    info!("Heartbeat disabled by configuration");
                }
            }
            Err(e) => {
                error!("Error opening LED line; heartbeat disabled: {}", e);
                self.set_component_state("led", ComponentState::Failed);
                self.event_bus.publish(SystemEvent::SystemError {
                    component: "led".to_string(),
                    error: e.to_string(),
                });
            }
        }

        // Keyboard simulated button
        if let Some(keyboard) = &self.keyboard_handler {
            keyboard.start()?;
            self.set_component_state("keyboard", ComponentState::Running);
        }

        if self.preview.is_some() {
            info!("Preview enabled at {}", self.config.preview.path);
        }

        match self.config.camera.capture_timeout() {
            Some(timeout) => info!("Capture timeout set to {:?}", timeout),
            None => warn!("Capture timeout disabled; a lost frame stalls the doorbell"),
        }

        self.started = true;
        info!("Doorbell system started successfully");
        Ok(())
    }
}
