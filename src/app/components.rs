use crate::annotation::{AnnotationClient, CloudVisionClient, StaticAnnotationClient};
use crate::camera::{CameraDriver, CaptureClient, MockCameraDriver};
use crate::config::{
    AnnotationBackend, CameraBackend, DoorbellConfig, GpioBackend, PublisherBackend,
};
use crate::error::{DoorbellError, Result};
use crate::gpio::{MockPeripheralDriver, PeripheralDriver};
use crate::publisher::{EventPublisher, HttpEventPublisher, LogEventPublisher};
use std::sync::Arc;
use tracing::info;

/// External collaborators the orchestrator sequences
pub struct Collaborators {
    pub peripheral: Arc<dyn PeripheralDriver>,
    pub capture: Arc<CaptureClient>,
    pub annotator: Arc<dyn AnnotationClient>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl Collaborators {
    pub fn new(
        peripheral: Arc<dyn PeripheralDriver>,
        camera: Arc<dyn CameraDriver>,
        annotator: Arc<dyn AnnotationClient>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            peripheral,
            capture: Arc::new(CaptureClient::new(camera)),
            annotator,
            publisher,
        }
    }

    /// Build the backends selected in the configuration
    pub fn from_config(config: &DoorbellConfig) -> Result<Self> {
        let peripheral: Arc<dyn PeripheralDriver> = match config.gpio.backend {
            GpioBackend::Mock => mock_peripheral(config),
            GpioBackend::Cdev => cdev_peripheral(config)?,
        };

        let camera: Arc<dyn CameraDriver> = match config.camera.backend {
            CameraBackend::Mock => Arc::new(MockCameraDriver::new(config.camera.resolution)),
            CameraBackend::Gstreamer => gstreamer_camera(config)?,
        };

        let annotator: Arc<dyn AnnotationClient> = match config.annotation.backend {
            AnnotationBackend::CloudVision => Arc::new(CloudVisionClient::new(&config.annotation)?),
            AnnotationBackend::Static => Arc::new(StaticAnnotationClient::default()),
        };

        let publisher: Arc<dyn EventPublisher> = match config.publisher.backend {
            PublisherBackend::Http => Arc::new(HttpEventPublisher::new(&config.publisher)?),
            PublisherBackend::Log => Arc::new(LogEventPublisher),
        };

        info!(
            "Collaborators: camera={}, annotation={}, publisher={}",
            camera.name(),
            annotator.name(),
            publisher.name()
        );

        Ok(Self::new(peripheral, camera, annotator, publisher))
    }

    /// Fully simulated backends. The mock peripheral is returned as well so
    /// the simulated button can drive it.
    pub fn simulated(config: &DoorbellConfig) -> (Self, Arc<MockPeripheralDriver>) {
        let peripheral = mock_peripheral(config);
        let collaborators = Self::new(
            peripheral.clone(),
            Arc::new(MockCameraDriver::new(config.camera.resolution)),
            Arc::new(StaticAnnotationClient::default()),
            Arc::new(LogEventPublisher),
        );
        (collaborators, peripheral)
    }
}

/// Board-style mock lines with the button resting in its released level
pub fn mock_peripheral(config: &DoorbellConfig) -> Arc<MockPeripheralDriver> {
    let driver = MockPeripheralDriver::with_board_lines();
    driver.set_level(
        &config.gpio.button_pin,
        config.gpio.button_polarity.level_for(false),
    );
    Arc::new(driver)
}

#[cfg(all(target_os = "linux", feature = "hardware-gpio"))]
fn cdev_peripheral(config: &DoorbellConfig) -> Result<Arc<dyn PeripheralDriver>> {
    let driver = crate::gpio::CdevPeripheralDriver::new(&config.gpio.chip)?;
    Ok(Arc::new(driver))
}

#[cfg(not(all(target_os = "linux", feature = "hardware-gpio")))]
fn cdev_peripheral(config: &DoorbellConfig) -> Result<Arc<dyn PeripheralDriver>> {
    Err(DoorbellError::component(
        "gpio",
        format!(
            "cannot open {}: built without the hardware-gpio feature",
            config.gpio.chip
        ),
    ))
}

#[cfg(all(target_os = "linux", feature = "camera"))]
fn gstreamer_camera(config: &DoorbellConfig) -> Result<Arc<dyn CameraDriver>> {
    Ok(Arc::new(crate::camera::GstCameraDriver::new(&config.camera)))
}

#[cfg(not(all(target_os = "linux", feature = "camera")))]
fn gstreamer_camera(config: &DoorbellConfig) -> Result<Arc<dyn CameraDriver>> {
    Err(DoorbellError::component(
        "camera",
        format!(
            "cannot open {}: built without the camera feature",
            config.camera.device
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{Level, Polarity};

    #[test]
    fn test_default_config_builds_simulated_backends() {
        let collaborators = Collaborators::from_config(&DoorbellConfig::default()).unwrap();
        assert_eq!(collaborators.capture.driver_name(), "mock");
        assert_eq!(collaborators.annotator.name(), "static");
        assert_eq!(collaborators.publisher.name(), "log");
        assert!(collaborators
            .peripheral
            .list_lines()
            .contains(&"BCM21".to_string()));
    }

    #[test]
    fn test_mock_button_rests_released() {
        let mut config = DoorbellConfig::default();
        assert_eq!(
            mock_peripheral(&config).level("BCM21"),
            Some(Level::High)
        );

        config.gpio.button_polarity = Polarity::ActiveHigh;
        assert_eq!(mock_peripheral(&config).level("BCM21"), Some(Level::Low));
    }

    #[test]
    fn test_http_publisher_requires_url() {
        let mut config = DoorbellConfig::default();
        config.publisher.backend = PublisherBackend::Http;
        assert!(Collaborators::from_config(&config).is_err());
    }
}
