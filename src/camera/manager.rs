use super::device::{CaptureDevice, CaptureStream, DeviceInfo, DeviceSelector, StreamConstraints};
use crate::error::{DeviceError, PipelineError};
use crate::events::{EventBus, LivescanEvent};
use crate::frame::{FrameDimensions, FrameSample};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Owns the single live capture stream.
///
/// `start` always tears down the previous stream first, so at most one
/// stream is ever live. Dimensions are reported through a watch channel
/// once the device signals readiness. Every acquired or released stream
/// bumps a generation counter, so a restart is observable even when the
/// active flag ends up where it started.
pub struct CaptureStreamManager {
    device: Arc<dyn CaptureDevice>,
    constraints: Mutex<StreamConstraints>,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
    lifecycle: tokio::sync::Mutex<()>,
    dims_tx: Arc<watch::Sender<Option<FrameDimensions>>>,
    active_tx: Arc<watch::Sender<bool>>,
    generation_tx: watch::Sender<u64>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<DeviceError>>,
    event_bus: Option<Arc<EventBus>>,
}

impl CaptureStreamManager {
    pub fn new(device: Arc<dyn CaptureDevice>, constraints: StreamConstraints) -> Self {
        let (dims_tx, _) = watch::channel(None);
        let (active_tx, _) = watch::channel(false);
        let (generation_tx, _) = watch::channel(0);
        Self {
            device,
            constraints: Mutex::new(constraints),
            stream: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            dims_tx: Arc::new(dims_tx),
            active_tx: Arc::new(active_tx),
            generation_tx,
            forwarder: Mutex::new(None),
            last_error: Mutex::new(None),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        self.device.enumerate().await
    }

    /// Open a stream, optionally on a different device than last time
    pub async fn start(&self, selector: Option<DeviceSelector>) -> Result<DeviceInfo, DeviceError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;

        let constraints = {
            let mut constraints = self.constraints.lock();
            if let Some(selector) = selector {
                constraints.selector = selector;
            }
            constraints.clone()
        };

        info!("Starting capture stream on {}", constraints.selector);

        let stream = match self.device.acquire(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to acquire {}: {}", constraints.selector, e);
                *self.last_error.lock() = Some(e.clone());
                self.publish(LivescanEvent::DeviceUnavailable {
                    reason: e.to_string(),
                    timestamp: SystemTime::now(),
                })
                .await;
                return Err(e);
            }
        };

        let info = stream.device().clone();
        let dims_rx = stream.dimensions();
        *self.stream.lock() = Some(stream);
        *self.last_error.lock() = None;
        self.generation_tx.send_modify(|generation| *generation += 1);
        self.active_tx.send_replace(true);

        let forwarder = self.spawn_forwarder(dims_rx);
        *self.forwarder.lock() = Some(forwarder);

        self.publish(LivescanEvent::StreamStarted {
            device_id: info.id.clone(),
            timestamp: SystemTime::now(),
        })
        .await;

        Ok(info)
    }

    /// Release the live stream, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Switch device or facing by restarting on the new selector
    pub async fn switch_device(&self, selector: DeviceSelector) -> Result<DeviceInfo, DeviceError> {
        debug!("Switching capture device to {}", selector);
        self.start(Some(selector)).await
    }

    /// Grab the frame currently presented by the stream
    pub fn current_frame(&self) -> Result<FrameSample, PipelineError> {
        if self.dimensions().is_none() {
            return Err(PipelineError::StreamNotReady);
        }

        let stream = self.stream.lock();
        let frame = stream
            .as_ref()
            .filter(|stream| stream.is_active())
            .and_then(|stream| stream.grab_frame())
            .ok_or(PipelineError::StreamNotReady)?;

        trace!("Grabbed frame {} ({}x{})", frame.id, frame.width, frame.height);
        Ok(frame)
    }

    pub fn dimensions(&self) -> Option<FrameDimensions> {
        *self.dims_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        *self.active_tx.borrow()
    }

    pub fn subscribe_dimensions(&self) -> watch::Receiver<Option<FrameDimensions>> {
        self.dims_tx.subscribe()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    /// Identifies the current stream; changes on every acquisition and release
    pub fn generation(&self) -> u64 {
        *self.generation_tx.borrow()
    }

    pub fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Error of the most recent failed `start`, cleared by a successful one
    pub fn last_error(&self) -> Option<DeviceError> {
        self.last_error.lock().clone()
    }

    pub fn current_device(&self) -> Option<DeviceInfo> {
        self.stream.lock().as_ref().map(|stream| stream.device().clone())
    }

    async fn stop_locked(&self) {
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }

        let stream = self.stream.lock().take();
        self.dims_tx.send_replace(None);
        self.active_tx.send_replace(false);

        if let Some(mut stream) = stream {
            self.generation_tx.send_modify(|generation| *generation += 1);
            let device_id = stream.device().id.clone();
            stream.release().await;
            info!("Capture stream on {} stopped", device_id);
            self.publish(LivescanEvent::StreamStopped {
                timestamp: SystemTime::now(),
            })
            .await;
        } else {
            trace!("Stop requested with no live stream");
        }
    }

    /// Mirror the stream's readiness into the manager's channels
    fn spawn_forwarder(&self, mut dims_rx: watch::Receiver<Option<FrameDimensions>>) -> JoinHandle<()> {
        let dims_tx = Arc::clone(&self.dims_tx);
        let active_tx = Arc::clone(&self.active_tx);
        let event_bus = self.event_bus.clone();

        tokio::spawn(async move {
            loop {
                let dims = *dims_rx.borrow_and_update();
                dims_tx.send_replace(dims);

                if let Some(dimensions) = dims {
                    info!("Capture stream ready at {}", dimensions);
                    if let Some(event_bus) = &event_bus {
                        let _ = event_bus
                            .publish(LivescanEvent::StreamReady {
                                dimensions,
                                timestamp: SystemTime::now(),
                            })
                            .await;
                    }
                }

                if dims_rx.changed().await.is_err() {
                    warn!("Capture stream ended unexpectedly");
                    dims_tx.send_replace(None);
                    active_tx.send_replace(false);
                    break;
                }
            }
        })
    }

    async fn publish(&self, event: LivescanEvent) {
        if let Some(event_bus) = &self.event_bus {
            let _ = event_bus.publish(event).await;
        }
    }
}
