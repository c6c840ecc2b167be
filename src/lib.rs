pub mod camera;
pub mod client;
pub mod config;
pub mod detection;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod overlay;
pub mod pipeline;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use camera::{
    CaptureDevice, CaptureStream, CaptureStreamManager, DeviceInfo, DeviceSelector,
    StreamConstraints, SyntheticDevice,
};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use camera::GstCaptureDevice;
pub use client::{
    BackoffPolicy, CircuitState, ClassificationClient, ClassificationTransport, HttpTransport,
    ServiceHealth,
};
pub use config::LivescanConfig;
pub use detection::{ClassificationOutcome, Detection, Rect, ResponseMetadata};
pub use encoder::{EncodeOptions, EncodedPayload, FrameEncoder};
pub use error::{LivescanError, PipelineError, Result};
pub use events::{ClassificationResult, EventBus, EventFilter, EventReceiver, LivescanEvent};
pub use frame::{FrameDimensions, FrameFormat, FrameSample};
pub use overlay::{map_rect, FitPolicy, OverlayModel, OverlayRenderer, OverlayShape, Size};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStatus};
pub use scheduler::{LatestDetections, SamplingScheduler, SingleFlight};
pub use session::{HistoryEntry, SessionAggregator, SessionSummary};
