use super::{ComponentState, DoorbellOrchestrator};
use crate::error::{DoorbellError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const KEYBOARD_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const HEARTBEAT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const CAMERA_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const DOMAIN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl DoorbellOrchestrator {
    /// Release everything in reverse acquisition order: stop the heartbeat,
    /// close the LED, close the camera session, close the button, then drain
    /// the worker domains.
    ///
    /// Idempotent; a second call returns the first exit code.
    pub async fn shutdown(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        if let Err(e) = self.stop_keyboard().await {
            error!("Error stopping keyboard: {}", e);
            exit_code = 1;
        }

        // The LED must not be toggled once it is closed
        self.heartbeat.cancel();
        self.heartbeat.join(HEARTBEAT_STOP_TIMEOUT).await;
        if self.get_component_state("heartbeat").is_some() {
            self.set_component_state("heartbeat", ComponentState::Stopped);
        }

        if let Some(led) = self.led.take() {
            match led.close() {
                Ok(()) => self.set_component_state("led", ComponentState::Stopped),
                Err(e) => {
                    error!("Error closing LED line: {}", e);
                    self.set_component_state("led", ComponentState::Failed);
                    exit_code = 1;
                }
            }
        }

        let capture = std::sync::Arc::clone(&self.collaborators.capture);
        let closed = async move {
            capture.close().await;
            Ok(())
        };
        if let Err(e) = self.stop_with_timeout("camera", CAMERA_STOP_TIMEOUT, closed).await {
            error!("Error stopping camera: {}", e);
            exit_code = 1;
        }

        if let Some(button) = self.button.take() {
            match button.close() {
                Ok(()) => self.set_component_state("button", ComponentState::Stopped),
                Err(e) => {
                    error!("Error closing button line: {}", e);
                    self.set_component_state("button", ComponentState::Failed);
                    exit_code = 1;
                }
            }
        }

        // Work already posted runs to completion; nothing is force-cancelled
        for (name, domain) in [
            ("io-domain", self.io_domain.take()),
            ("network-domain", self.network_domain.take()),
        ] {
            let Some(mut domain) = domain else {
                continue;
            };
            if domain.shutdown(DOMAIN_STOP_TIMEOUT).await {
                self.set_component_state(name, ComponentState::Stopped);
            } else {
                warn!("{} left running after timeout", domain.name());
                self.set_component_state(name, ComponentState::Failed);
                exit_code = 1;
            }
        }

        self.started = false;
        self.exit_code = Some(exit_code);
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_keyboard(&mut self) -> Result<()> {
        let Some(keyboard) = self.keyboard_handler.take() else {
            return Ok(());
        };
        let stopped = async move { keyboard.stop().await };
        self.stop_with_timeout("keyboard", KEYBOARD_STOP_TIMEOUT, stopped)
            .await
    }

    /// Stop a specific component within `limit`
    async fn stop_with_timeout<F>(&mut self, component: &str, limit: Duration, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping);

        match timeout(limit, stop).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped);
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("{} component stop timeout", component);
                Err(DoorbellError::System {
                    message: format!("{} component stop timeout", component),
                })
            }
        }
    }
}
