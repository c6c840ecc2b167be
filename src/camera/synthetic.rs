use super::device::{
    resolve_device, CaptureDevice, CaptureStream, DeviceInfo, StreamConstraints,
};
use crate::config::FacingMode;
use crate::error::DeviceError;
use crate::frame::{FrameDimensions, FrameFormat, FrameSample};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// In-process capture device producing gradient test frames
pub struct SyntheticDevice {
    devices: Vec<DeviceInfo>,
    ready_delay: Duration,
    native_size: Option<FrameDimensions>,
    failure: Mutex<Option<DeviceError>>,
    live_streams: Arc<AtomicUsize>,
    acquisitions: AtomicU32,
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            devices: vec![
                DeviceInfo {
                    id: "synthetic-back".to_string(),
                    label: "Synthetic rear camera".to_string(),
                    facing: Some(FacingMode::Back),
                },
                DeviceInfo {
                    id: "synthetic-front".to_string(),
                    label: "Synthetic front camera".to_string(),
                    facing: Some(FacingMode::Front),
                },
            ],
            ready_delay: Duration::from_millis(100),
            native_size: None,
            failure: Mutex::new(None),
            live_streams: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicU32::new(0),
        }
    }

    /// Time between acquisition and the readiness signal
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Report this size instead of the requested ideal
    pub fn with_native_size(mut self, width: u32, height: u32) -> Self {
        self.native_size = Some(FrameDimensions::new(width, height));
        self
    }

    /// Make the next acquisitions fail with `error` until cleared
    pub fn fail_with(&self, error: Option<DeviceError>) {
        *self.failure.lock() = error;
    }

    /// Streams acquired and not yet released
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for SyntheticDevice {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices.clone())
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        if let Some(error) = self.failure.lock().clone() {
            debug!("Synthetic device refusing acquisition: {}", error);
            return Err(error);
        }

        let device = resolve_device(&self.devices, &constraints.selector)?.clone();
        let size = self.native_size.unwrap_or_else(|| {
            FrameDimensions::new(constraints.ideal_width, constraints.ideal_height)
        });

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.live_streams.fetch_add(1, Ordering::SeqCst);
        info!("Synthetic stream opened on {} at {}", device.id, size);

        Ok(Box::new(SyntheticStream::open(
            device,
            size,
            self.ready_delay,
            Arc::clone(&self.live_streams),
        )))
    }
}

struct SyntheticStream {
    device: DeviceInfo,
    dims_tx: Arc<watch::Sender<Option<FrameDimensions>>>,
    active: AtomicBool,
    frame_counter: AtomicU64,
    live_streams: Arc<AtomicUsize>,
    readiness: Option<JoinHandle<()>>,
}

impl SyntheticStream {
    fn open(
        device: DeviceInfo,
        size: FrameDimensions,
        ready_delay: Duration,
        live_streams: Arc<AtomicUsize>,
    ) -> Self {
        let (dims_tx, _) = watch::channel(None);
        let dims_tx = Arc::new(dims_tx);

        let readiness = {
            let dims_tx = Arc::clone(&dims_tx);
            tokio::spawn(async move {
                tokio::time::sleep(ready_delay).await;
                dims_tx.send_replace(Some(size));
                trace!("Synthetic stream ready at {}", size);
            })
        };

        Self {
            device,
            dims_tx,
            active: AtomicBool::new(true),
            frame_counter: AtomicU64::new(0),
            live_streams,
            readiness: Some(readiness),
        }
    }

    fn close(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(task) = self.readiness.take() {
                task.abort();
            }
            self.dims_tx.send_replace(None);
            self.live_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl CaptureStream for SyntheticStream {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn dimensions(&self) -> watch::Receiver<Option<FrameDimensions>> {
        self.dims_tx.subscribe()
    }

    fn grab_frame(&self) -> Option<FrameSample> {
        if !self.is_active() {
            return None;
        }
        let size = (*self.dims_tx.borrow())?;
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);

        Some(FrameSample::new(
            frame_id,
            SystemTime::now(),
            gradient(size, frame_id),
            size.width,
            size.height,
            FrameFormat::Rgb24,
        ))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn release(&mut self) {
        self.close();
        debug!("Synthetic stream on {} released", self.device.id);
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Diagonal RGB gradient that drifts with the frame id
fn gradient(size: FrameDimensions, frame_id: u64) -> Vec<u8> {
    let shift = (frame_id % 256) as u32;
    let mut data = Vec::with_capacity(size.width as usize * size.height as usize * 3);
    for y in 0..size.height {
        for x in 0..size.width {
            data.push(((x + shift) % 256) as u8);
            data.push(((y + shift) % 256) as u8);
            data.push(((x + y) % 256) as u8);
        }
    }
    data
}
