use super::device::{
    resolve_device, CaptureDevice, CaptureStream, DeviceInfo, StreamConstraints,
};
use crate::error::DeviceError;
use crate::frame::{FrameDimensions, FrameFormat, FrameSample};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// V4L2 devices captured through a GStreamer pipeline
#[derive(Debug, Default)]
pub struct GstCaptureDevice;

impl GstCaptureDevice {
    pub fn new() -> Result<Self, DeviceError> {
        gstreamer::init().map_err(|e| DeviceError::Acquisition {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        Ok(Self)
    }

    fn build_pipeline_string(device: &str, constraints: &StreamConstraints) -> String {
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false",
            device, constraints.ideal_width, constraints.ideal_height, constraints.fps
        )
    }
}

/// Classify why a device node cannot be opened
fn probe_device_node(path: &str) -> Result<(), DeviceError> {
    match std::fs::OpenOptions::new().read(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DeviceError::PermissionDenied)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DeviceError::NotFound {
            selector: path.to_string(),
        }),
        Err(e) => Err(DeviceError::Acquisition {
            details: format!("{}: {}", path, e),
        }),
    }
}

#[async_trait]
impl CaptureDevice for GstCaptureDevice {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let entries = std::fs::read_dir("/dev").map_err(|e| DeviceError::Acquisition {
            details: format!("Cannot list /dev: {}", e),
        })?;

        let mut devices: Vec<DeviceInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("video").then(|| DeviceInfo {
                    id: format!("/dev/{}", name),
                    label: video4linux_name(&name).unwrap_or_else(|| name.clone()),
                    facing: None,
                })
            })
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));

        debug!("Enumerated {} V4L2 devices", devices.len());
        Ok(devices)
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let devices = self.enumerate().await?;
        let device = resolve_device(&devices, &constraints.selector)?.clone();
        probe_device_node(&device.id)?;

        let pipeline_desc = Self::build_pipeline_string(&device.id, constraints);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| DeviceError::Acquisition {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| DeviceError::Acquisition {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| DeviceError::Acquisition {
                details: "Pipeline has no appsink".to_string(),
            })?;

        let (dims_tx, _) = watch::channel(None);
        let dims_tx = Arc::new(dims_tx);
        let latest = Arc::new(Mutex::new(None));
        let frame_counter = Arc::new(AtomicU64::new(0));

        {
            let dims_tx = Arc::clone(&dims_tx);
            let latest = Arc::clone(&latest);
            let frame_counter = Arc::clone(&frame_counter);
            appsink.set_callbacks(
                gstreamer_app::AppSinkCallbacks::builder()
                    .new_sample(move |sink| {
                        let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                        match sample_to_frame(&sample, &frame_counter) {
                            Ok(frame) => {
                                let dims = frame.dimensions();
                                if *dims_tx.borrow() != Some(dims) {
                                    dims_tx.send_replace(Some(dims));
                                }
                                *latest.lock() = Some(frame);
                            }
                            Err(details) => warn!("Dropping GStreamer sample: {}", details),
                        }
                        Ok(gstreamer::FlowSuccess::Ok)
                    })
                    .build(),
            );
        }

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| DeviceError::Acquisition {
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!("GStreamer stream started on {}", device.id);

        Ok(Box::new(GstCaptureStream {
            device,
            pipeline,
            dims_tx,
            latest,
            active: AtomicBool::new(true),
        }))
    }
}

fn video4linux_name(node: &str) -> Option<String> {
    let path = Path::new("/sys/class/video4linux").join(node).join("name");
    std::fs::read_to_string(path)
        .ok()
        .map(|name| name.trim().to_string())
}

fn sample_to_frame(
    sample: &gstreamer::Sample,
    frame_counter: &AtomicU64,
) -> Result<FrameSample, String> {
    let buffer = sample.buffer().ok_or("No buffer in sample")?;
    let caps = sample.caps().ok_or("No caps in sample")?;
    let video_info =
        VideoInfo::from_caps(caps).map_err(|e| format!("Failed to get video info: {}", e))?;
    let map = buffer
        .map_readable()
        .map_err(|e| format!("Failed to map buffer: {}", e))?;

    let width = video_info.width();
    let height = video_info.height();
    let stride = video_info.stride()[0] as usize;
    let row = width as usize * 3;

    // rows may be padded to the stride
    let data = if stride == row {
        map.as_slice().to_vec()
    } else {
        map.as_slice()
            .chunks(stride)
            .take(height as usize)
            .flat_map(|line| &line[..row.min(line.len())])
            .copied()
            .collect()
    };

    let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
    trace!("Captured RGB frame {} ({}x{})", frame_id, width, height);

    Ok(FrameSample::new(
        frame_id,
        SystemTime::now(),
        data,
        width,
        height,
        FrameFormat::Rgb24,
    ))
}

struct GstCaptureStream {
    device: DeviceInfo,
    pipeline: Pipeline,
    dims_tx: Arc<watch::Sender<Option<FrameDimensions>>>,
    latest: Arc<Mutex<Option<FrameSample>>>,
    active: AtomicBool,
}

impl GstCaptureStream {
    fn shutdown(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                error!("Failed to stop GStreamer pipeline: {}", e);
            }
            self.dims_tx.send_replace(None);
            self.latest.lock().take();
        }
    }
}

#[async_trait]
impl CaptureStream for GstCaptureStream {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn dimensions(&self) -> watch::Receiver<Option<FrameDimensions>> {
        self.dims_tx.subscribe()
    }

    fn grab_frame(&self) -> Option<FrameSample> {
        self.latest.lock().clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn release(&mut self) {
        self.shutdown();
        info!("GStreamer stream on {} released", self.device.id);
    }
}

impl Drop for GstCaptureStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}
