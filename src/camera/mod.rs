mod device;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gstreamer;
mod manager;
mod synthetic;

pub use device::{
    resolve_device, CaptureDevice, CaptureStream, DeviceInfo, DeviceSelector, StreamConstraints,
};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gstreamer::GstCaptureDevice;
pub use manager::CaptureStreamManager;
pub use synthetic::SyntheticDevice;
