use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivescanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl LivescanError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by a capture device while acquiring a stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Camera permission was denied")]
    PermissionDenied,

    #[error("No capture device matches {selector}")]
    NotFound { selector: String },

    #[error("Failed to acquire capture stream: {details}")]
    Acquisition { details: String },
}

/// Failures while turning a frame sample into a payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Source frame has zero area ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Encoded payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("JPEG encoding failed: {details}")]
    Codec { details: String },
}

/// Failures of a single classification request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Endpoint responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network failure: {details}")]
    Network { details: String },

    #[error("Response body could not be read: {details}")]
    Malformed { details: String },

    #[error("Service reported failure: {details}")]
    ServiceFailure { details: String },

    #[error("Response violates the classification contract: {details}")]
    Protocol { details: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether a fresh attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::Protocol { .. } | TransportError::Cancelled
        )
    }
}

/// User-facing error taxonomy of the sampling pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(DeviceError),

    #[error("Stream dimensions are not known yet")]
    StreamNotReady,

    #[error("Frame encoding failed: {0}")]
    EncodingFailed(EncodeError),

    #[error("Transmission failed: {0}")]
    TransmissionFailed(TransportError),

    #[error("Protocol error: {details}")]
    ProtocolError { details: String },

    #[error("Classification service unavailable after {attempts} attempts")]
    ServiceUnavailable { attempts: u32 },
}

impl PipelineError {
    /// Terminal errors stop the session until an external reset
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::DeviceUnavailable(_) | PipelineError::ServiceUnavailable { .. }
        )
    }

    /// Transient startup conditions that skip a tick without surfacing anything
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            PipelineError::StreamNotReady | PipelineError::EncodingFailed(_)
        )
    }

    /// Action offered to the user alongside the message, if any
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            PipelineError::DeviceUnavailable(DeviceError::PermissionDenied) => {
                Some("Allow camera access in your browser or system settings, then retry")
            }
            PipelineError::DeviceUnavailable(DeviceError::NotFound { .. }) => {
                Some("Connect a camera or choose another device")
            }
            PipelineError::DeviceUnavailable(DeviceError::Acquisition { .. }) => {
                Some("Close other applications using the camera and retry")
            }
            PipelineError::ServiceUnavailable { .. } => {
                Some("The classification service is not responding; reload to try again")
            }
            PipelineError::ProtocolError { .. } => {
                Some("The classification service returned an unexpected response")
            }
            _ => None,
        }
    }
}

impl From<DeviceError> for PipelineError {
    fn from(error: DeviceError) -> Self {
        PipelineError::DeviceUnavailable(error)
    }
}

impl From<EncodeError> for PipelineError {
    fn from(error: EncodeError) -> Self {
        PipelineError::EncodingFailed(error)
    }
}

impl From<TransportError> for PipelineError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Protocol { details } => PipelineError::ProtocolError { details },
            other => PipelineError::TransmissionFailed(other),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, LivescanError>;
