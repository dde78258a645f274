use crate::gpio::Polarity;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DoorbellConfig {
    pub gpio: GpioConfig,
    pub heartbeat: HeartbeatConfig,
    pub camera: CameraConfig,
    pub encoding: EncodingConfig,
    pub annotation: AnnotationConfig,
    pub publisher: PublisherConfig,
    pub preview: PreviewConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    /// In-memory lines, driven by the keyboard in simulation
    Mock,
    /// Linux GPIO character device
    Cdev,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_backend")]
    pub backend: GpioBackend,

    /// GPIO chip device for the cdev backend
    #[serde(default = "default_gpio_chip")]
    pub chip: String,

    /// Line the doorbell button is wired to
    #[serde(default = "default_button_pin")]
    pub button_pin: String,

    /// Line driving the status LED
    #[serde(default = "default_led_pin")]
    pub led_pin: String,

    /// Electrical level that means "pressed"
    #[serde(default = "default_button_polarity")]
    pub button_polarity: Polarity,

    /// Button sampling period in milliseconds
    #[serde(default = "default_button_poll_ms")]
    pub button_poll_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Toggle period in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    Mock,
    Gstreamer,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// V4L2 device path
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Give up on a capture after this many seconds (0 waits forever)
    #[serde(default = "default_capture_timeout_seconds")]
    pub capture_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncodingConfig {
    /// JPEG quality, 1-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationBackend {
    /// Google Cloud Vision label detection
    CloudVision,
    /// Fixed labels, no network
    Static,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnnotationConfig {
    #[serde(default = "default_annotation_backend")]
    pub backend: AnnotationBackend,

    /// images:annotate endpoint
    #[serde(default = "default_annotation_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    /// Maximum number of labels to request
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublisherBackend {
    /// JSON over HTTP to a realtime database REST endpoint
    Http,
    /// Log the event summary only
    Log,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PublisherConfig {
    #[serde(default = "default_publisher_backend")]
    pub backend: PublisherBackend,

    /// Database root URL, e.g. https://<project>.firebaseio.com
    #[serde(default)]
    pub database_url: String,

    /// Collection events are appended to
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Optional `auth` query parameter
    #[serde(default)]
    pub auth_token: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Write the latest encoded photo to `path`
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_preview_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl DoorbellConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("doorbell.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("gpio.backend", "mock")?
            .set_default("gpio.chip", default_gpio_chip())?
            .set_default("gpio.button_pin", default_button_pin())?
            .set_default("gpio.led_pin", default_led_pin())?
            .set_default("gpio.button_polarity", "active_low")?
            .set_default("gpio.button_poll_ms", default_button_poll_ms())?
            .set_default("heartbeat.interval_ms", default_heartbeat_interval_ms())?
            .set_default("heartbeat.enabled", default_heartbeat_enabled())?
            .set_default("camera.backend", "mock")?
            .set_default("camera.device", default_camera_device())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default(
                "camera.capture_timeout_seconds",
                default_capture_timeout_seconds(),
            )?
            .set_default("encoding.jpeg_quality", default_jpeg_quality() as u64)?
            .set_default("annotation.backend", "static")?
            .set_default("annotation.endpoint", default_annotation_endpoint())?
            .set_default("annotation.api_key", "")?
            .set_default("annotation.max_results", default_max_results())?
            .set_default(
                "annotation.request_timeout_seconds",
                default_request_timeout_seconds(),
            )?
            .set_default("publisher.backend", "log")?
            .set_default("publisher.database_url", "")?
            .set_default("publisher.collection", default_collection())?
            .set_default("publisher.auth_token", "")?
            .set_default(
                "publisher.request_timeout_seconds",
                default_request_timeout_seconds(),
            )?
            .set_default("preview.enabled", false)?
            .set_default("preview.path", default_preview_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // DOORBELL_<SECTION>__<KEY>, e.g. DOORBELL_GPIO__BUTTON_PIN
            .add_source(
                Environment::with_prefix("DOORBELL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: DoorbellConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // GPIO
        if self.gpio.button_pin.trim().is_empty() || self.gpio.led_pin.trim().is_empty() {
            return Err(ConfigError::Message(
                "Button and LED pin names must not be empty".to_string(),
            ));
        }

        if self.gpio.button_pin == self.gpio.led_pin {
            return Err(ConfigError::Message(format!(
                "Button and LED cannot share line {}",
                self.gpio.button_pin
            )));
        }

        if self.gpio.button_poll_ms == 0 {
            return Err(ConfigError::Message(
                "Button poll interval must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        // Camera
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.encoding.jpeg_quality) {
            return Err(ConfigError::Message(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        // Remote services
        if self.annotation.backend == AnnotationBackend::CloudVision {
            if self.annotation.endpoint.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Annotation endpoint is required for cloud_vision".to_string(),
                ));
            }
            if self.annotation.max_results == 0 {
                return Err(ConfigError::Message(
                    "Annotation max_results must be greater than 0".to_string(),
                ));
            }
        }

        if self.publisher.backend == PublisherBackend::Http {
            if self.publisher.database_url.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Publisher database_url is required for http".to_string(),
                ));
            }
            if self.publisher.collection.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Publisher collection must not be empty".to_string(),
                ));
            }
        }

        if self.preview.enabled && self.preview.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Preview path must not be empty when preview is enabled".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl GpioConfig {
    pub fn button_poll_interval(&self) -> Duration {
        Duration::from_millis(self.button_poll_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CameraConfig {
    /// `None` when the capture timeout is disabled
    pub fn capture_timeout(&self) -> Option<Duration> {
        match self.capture_timeout_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        }
    }
}

impl Default for DoorbellConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig {
                backend: default_gpio_backend(),
                chip: default_gpio_chip(),
                button_pin: default_button_pin(),
                led_pin: default_led_pin(),
                button_polarity: default_button_polarity(),
                button_poll_ms: default_button_poll_ms(),
            },
            heartbeat: HeartbeatConfig {
                interval_ms: default_heartbeat_interval_ms(),
                enabled: default_heartbeat_enabled(),
            },
            camera: CameraConfig {
                backend: default_camera_backend(),
                device: default_camera_device(),
                resolution: default_camera_resolution(),
                capture_timeout_seconds: default_capture_timeout_seconds(),
            },
            encoding: EncodingConfig {
                jpeg_quality: default_jpeg_quality(),
            },
            annotation: AnnotationConfig {
                backend: default_annotation_backend(),
                endpoint: default_annotation_endpoint(),
                api_key: String::new(),
                max_results: default_max_results(),
                request_timeout_seconds: default_request_timeout_seconds(),
            },
            publisher: PublisherConfig {
                backend: default_publisher_backend(),
                database_url: String::new(),
                collection: default_collection(),
                auth_token: String::new(),
                request_timeout_seconds: default_request_timeout_seconds(),
            },
            preview: PreviewConfig {
                enabled: false,
                path: default_preview_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_gpio_backend() -> GpioBackend {
    GpioBackend::Mock
}
fn default_gpio_chip() -> String {
    "/dev/gpiochip0".to_string()
}
fn default_button_pin() -> String {
    "BCM21".to_string()
}
fn default_led_pin() -> String {
    "BCM6".to_string()
}
fn default_button_polarity() -> Polarity {
    Polarity::ActiveLow
}
fn default_button_poll_ms() -> u64 {
    20
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}
fn default_heartbeat_enabled() -> bool {
    true
}

fn default_camera_backend() -> CameraBackend {
    CameraBackend::Mock
}
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_capture_timeout_seconds() -> u64 {
    10
}

fn default_jpeg_quality() -> u8 {
    crate::encode::DEFAULT_JPEG_QUALITY
}

fn default_annotation_backend() -> AnnotationBackend {
    AnnotationBackend::Static
}
fn default_annotation_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}
fn default_max_results() -> u32 {
    10
}
fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_publisher_backend() -> PublisherBackend {
    PublisherBackend::Log
}
fn default_collection() -> String {
    "logs".to_string()
}

fn default_preview_path() -> String {
    "./preview/latest.jpg".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
