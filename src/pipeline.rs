use crate::camera::{
    CaptureDevice, CaptureStreamManager, DeviceInfo, DeviceSelector, StreamConstraints,
};
use crate::client::{
    CircuitState, ClassificationClient, ClassificationTransport, HttpTransport, ServiceHealth,
};
use crate::config::LivescanConfig;
use crate::encoder::FrameEncoder;
use crate::error::{DeviceError, LivescanError, PipelineError, Result, TransportError};
use crate::events::{EventBus, LivescanEvent};
use crate::overlay::{rasterize, OverlayModel, OverlayRenderer, OverlayStyle, Size};
use crate::scheduler::{LatestDetections, SamplingScheduler};
use crate::session::{SessionAggregator, SessionSummary};
use image::RgbaImage;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{error, info};

/// What the UI should show for the pipeline right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Stream live, nothing outstanding
    Idle,
    /// A classification cycle is in flight
    Processing,
    /// Transient failure being retried; shown without an error
    Retrying(u32),
    /// Retries exhausted; persistent message until reset
    Unavailable,
    /// Stream acquisition failed
    DeviceUnavailable(DeviceError),
    Stopped,
}

impl PipelineStatus {
    /// Persistent message and remediation for terminal states
    pub fn user_message(&self) -> Option<(String, Option<&'static str>)> {
        match self {
            PipelineStatus::Unavailable => Some((
                "Classification service is unavailable".to_string(),
                PipelineError::ServiceUnavailable { attempts: 0 }.remediation(),
            )),
            PipelineStatus::DeviceUnavailable(e) => {
                let error = PipelineError::DeviceUnavailable(e.clone());
                Some((error.to_string(), error.remediation()))
            }
            _ => None,
        }
    }
}

/// Wires the capture, sampling, classification and session components
pub struct PipelineBuilder {
    config: LivescanConfig,
    device: Option<Arc<dyn CaptureDevice>>,
    transport: Option<Arc<dyn ClassificationTransport>>,
    event_bus: Option<Arc<EventBus>>,
}

impl PipelineBuilder {
    pub fn new(config: LivescanConfig) -> Self {
        Self {
            config,
            device: None,
            transport: None,
            event_bus: None,
        }
    }

    pub fn with_device(mut self, device: Arc<dyn CaptureDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Replace the HTTP transport built from `client.endpoint`
    pub fn with_transport(mut self, transport: Arc<dyn ClassificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let device = self
            .device
            .ok_or_else(|| LivescanError::component("pipeline", "no capture device configured"))?;

        let transport: Arc<dyn ClassificationTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &config.client.endpoint,
                config.client.timeout(),
            )?),
        };

        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(config.system.event_bus_capacity)));

        let manager = Arc::new(
            CaptureStreamManager::new(device, StreamConstraints::from_config(&config.camera))
                .with_event_bus(Arc::clone(&event_bus)),
        );
        let client = Arc::new(
            ClassificationClient::from_config(transport, &config.client)
                .with_event_bus(Arc::clone(&event_bus)),
        );
        let session = Arc::new(SessionAggregator::new(config.session.history_capacity));
        let scheduler = SamplingScheduler::new(
            Arc::clone(&manager),
            FrameEncoder::from_config(&config.encoder),
            Arc::clone(&client),
            Arc::clone(&session),
            Arc::clone(&event_bus),
        );
        let renderer = OverlayRenderer::new(OverlayStyle::from_config(&config.overlay));

        info!(
            "Pipeline built: endpoint {}, sampling every {}ms, {} retries",
            config.client.endpoint, config.sampling.period_ms, config.client.max_retries
        );

        Ok(Pipeline {
            config,
            event_bus,
            manager,
            client,
            session,
            scheduler,
            renderer,
        })
    }
}

/// A running classification session over one capture stream
pub struct Pipeline {
    config: LivescanConfig,
    event_bus: Arc<EventBus>,
    manager: Arc<CaptureStreamManager>,
    client: Arc<ClassificationClient>,
    session: Arc<SessionAggregator>,
    scheduler: SamplingScheduler,
    renderer: OverlayRenderer,
}

impl Pipeline {
    pub fn builder(config: LivescanConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Acquire the stream and, if configured, begin sampling
    pub async fn start(&self) -> Result<DeviceInfo> {
        let device = self.manager.start(None).await.map_err(|e| {
            error!("Pipeline could not start: {}", e);
            LivescanError::Pipeline(PipelineError::DeviceUnavailable(e))
        })?;

        if self.config.sampling.enabled {
            self.scheduler.enable(self.config.sampling.period());
        }

        info!("Pipeline started on {}", device.label);
        Ok(device)
    }

    /// Stop sampling and release the camera. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.scheduler.disable().await;
        self.manager.stop().await;
        self.scheduler.clear_latest();
    }

    pub fn enable_sampling(&self) {
        self.scheduler.enable(self.config.sampling.period());
    }

    pub async fn disable_sampling(&self) {
        self.scheduler.disable().await;
    }

    /// Restart on another device; sampling resumes if it was running
    pub async fn switch_device(&self, selector: DeviceSelector) -> Result<DeviceInfo> {
        let was_sampling = self.scheduler.is_enabled();
        self.scheduler.disable().await;
        self.scheduler.clear_latest();

        let device = self
            .manager
            .switch_device(selector)
            .await
            .map_err(|e| LivescanError::Pipeline(PipelineError::DeviceUnavailable(e)))?;

        if was_sampling {
            self.scheduler.enable(self.config.sampling.period());
        }
        Ok(device)
    }

    /// External reset: closes the circuit, clears the session and restarts
    pub async fn reset_session(&self) -> Result<DeviceInfo> {
        info!("Resetting session");
        self.stop().await;
        self.client.reset().await;
        self.session.reset();

        let _ = self
            .event_bus
            .publish(LivescanEvent::SessionReset {
                timestamp: SystemTime::now(),
            })
            .await;

        self.start().await
    }

    /// Overlay for a display surface of the given size, recomputed per call
    pub fn render(&self, display: Size) -> OverlayModel {
        match self.scheduler.latest() {
            Some(latest) => self.renderer.render(
                &latest.detections,
                Size::from(latest.source),
                display,
                self.config.overlay.fit,
            ),
            None => OverlayModel::empty(display),
        }
    }

    pub fn rasterize(&self, display: Size) -> RgbaImage {
        rasterize(&self.render(display))
    }

    pub fn latest(&self) -> Option<LatestDetections> {
        self.scheduler.latest()
    }

    pub fn summary(&self) -> SessionSummary {
        self.session.summary()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.client.circuit_state()
    }

    pub fn status(&self) -> PipelineStatus {
        if let CircuitState::Unavailable = self.client.circuit_state() {
            return PipelineStatus::Unavailable;
        }
        if let Some(error) = self.manager.last_error() {
            return PipelineStatus::DeviceUnavailable(error);
        }
        if !self.manager.is_active() {
            return PipelineStatus::Stopped;
        }
        match self.client.circuit_state() {
            CircuitState::Retrying(attempt) => PipelineStatus::Retrying(attempt),
            _ if self.scheduler.in_flight() => PipelineStatus::Processing,
            _ => PipelineStatus::Idle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LivescanEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.manager.enumerate().await?)
    }

    pub async fn health(&self) -> std::result::Result<ServiceHealth, TransportError> {
        self.client.health().await
    }

    pub fn config(&self) -> &LivescanConfig {
        &self.config
    }
}
