use crate::config::{CameraConfig, FacingMode};
use crate::error::DeviceError;
use crate::frame::{FrameDimensions, FrameSample};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which device a stream should be opened on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    Id(String),
    Facing(FacingMode),
}

impl DeviceSelector {
    pub fn from_config(config: &CameraConfig) -> Self {
        match &config.device_id {
            Some(id) => DeviceSelector::Id(id.clone()),
            None => DeviceSelector::Facing(config.facing),
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Id(id) => write!(f, "device '{}'", id),
            DeviceSelector::Facing(facing) => write!(f, "{}-facing camera", facing.as_str()),
        }
    }
}

/// An enumerable capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub facing: Option<FacingMode>,
}

/// Constraints for opening a stream; resolution and rate are ideals, not guarantees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub selector: DeviceSelector,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub fps: u32,
}

impl StreamConstraints {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            selector: DeviceSelector::from_config(config),
            ideal_width: config.resolution.0,
            ideal_height: config.resolution.1,
            fps: config.fps,
        }
    }

    pub fn with_selector(mut self, selector: DeviceSelector) -> Self {
        self.selector = selector;
        self
    }
}

/// Pick the device a selector refers to.
///
/// A facing preference falls back to the first device when no device
/// reports that facing; an explicit id must match exactly.
pub fn resolve_device<'a>(
    devices: &'a [DeviceInfo],
    selector: &DeviceSelector,
) -> Result<&'a DeviceInfo, DeviceError> {
    let not_found = || DeviceError::NotFound {
        selector: selector.to_string(),
    };

    match selector {
        DeviceSelector::Id(id) => devices.iter().find(|d| &d.id == id).ok_or_else(not_found),
        DeviceSelector::Facing(facing) => devices
            .iter()
            .find(|d| d.facing == Some(*facing))
            .or_else(|| devices.first())
            .ok_or_else(not_found),
    }
}

/// Source of live capture streams
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// List devices for a selector UI
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open a live stream. Dimensions arrive later through
    /// [`CaptureStream::dimensions`].
    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError>;
}

/// A live stream handle, owned exclusively by the stream manager
#[async_trait]
pub trait CaptureStream: Send + Sync {
    fn device(&self) -> &DeviceInfo;

    /// Native dimensions; `None` until the device signals readiness
    fn dimensions(&self) -> watch::Receiver<Option<FrameDimensions>>;

    /// The frame currently shown by the stream, if any
    fn grab_frame(&self) -> Option<FrameSample>;

    fn is_active(&self) -> bool;

    /// Stop all tracks and free the device
    async fn release(&mut self);
}
