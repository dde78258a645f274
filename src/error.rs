use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoorbellError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Peripheral error: {0}")]
    Peripheral(#[from] PeripheralError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl DoorbellError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// GPIO line failures. Never fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("GPIO line '{line}' not found")]
    LineNotFound { line: String },

    #[error("Failed to open GPIO line '{line}': {details}")]
    Open { line: String, details: String },

    #[error("Failed to read GPIO line '{line}': {details}")]
    Read { line: String, details: String },

    #[error("Failed to write GPIO line '{line}': {details}")]
    Write { line: String, details: String },

    #[error("GPIO line '{line}' is closed")]
    Closed { line: String },

    #[error("Unsupported operation on GPIO line '{line}': {details}")]
    Unsupported { line: String, details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("A capture is already in flight")]
    Busy,

    #[error("No frame delivered within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Camera released the frame slot without delivering a frame")]
    FrameDropped,

    #[error("Capture client is not initialized")]
    NotInitialized,

    #[error("Camera driver error: {details}")]
    Driver { details: String },
}

/// Failures talking to the classification service or the event store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request failed: {details}")]
    Request { details: String },

    #[error("Remote service returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Remote service reported an error: {message}")]
    Service { message: String },

    #[error("Failed to parse response: {details}")]
    Parse { details: String },

    #[error("Client configuration error: {details}")]
    Config { details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Failed to decode captured frame: {details}")]
    Decode { details: String },

    #[error("Failed to encode JPEG: {details}")]
    Encode { details: String },

    #[error("Raw frame has {actual} bytes, expected {expected}")]
    InvalidRaw { expected: usize, actual: usize },

    #[error("Raw frame dimensions {width}x{height} are too large")]
    RawTooLarge { width: u32, height: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Failed to receive event: {details}")]
    Lagged { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, DoorbellError>;
