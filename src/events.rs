use crate::client::CircuitState;
use crate::detection::{Detection, ResponseMetadata};
use crate::error::EventBusError;
use crate::frame::FrameDimensions;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Payload delivered to the UI for every successful classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub frame_id: u64,
    /// Boxes in native source-frame pixels
    pub detections: Vec<Detection>,
    pub metadata: Option<ResponseMetadata>,
    pub source: FrameDimensions,
    pub attempts: u32,
    pub timestamp: SystemTime,
}

/// Events that can occur in the livescan pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LivescanEvent {
    /// A capture stream was acquired
    StreamStarted {
        device_id: String,
        timestamp: SystemTime,
    },
    /// Native stream dimensions became known
    StreamReady {
        dimensions: FrameDimensions,
        timestamp: SystemTime,
    },
    /// The capture stream was released
    StreamStopped { timestamp: SystemTime },
    /// Acquiring a capture device failed
    DeviceUnavailable {
        reason: String,
        timestamp: SystemTime,
    },
    SamplingStarted {
        period_ms: u64,
        timestamp: SystemTime,
    },
    SamplingStopped { timestamp: SystemTime },
    /// A tick fired while a cycle was still in flight
    TickSkipped { timestamp: SystemTime },
    /// The classification circuit changed state
    CircuitStateChanged {
        from: CircuitState,
        to: CircuitState,
        timestamp: SystemTime,
    },
    ClassificationResult(ClassificationResult),
    /// A cycle ended without detections because of an error
    ClassificationFailed {
        error: String,
        attempts: u32,
        timestamp: SystemTime,
    },
    /// Retries were exhausted and sampling has been stopped
    ServiceUnavailable {
        attempts: u32,
        timestamp: SystemTime,
    },
    SessionReset { timestamp: SystemTime },
}

impl LivescanEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            LivescanEvent::StreamStarted { timestamp, .. } => *timestamp,
            LivescanEvent::StreamReady { timestamp, .. } => *timestamp,
            LivescanEvent::StreamStopped { timestamp } => *timestamp,
            LivescanEvent::DeviceUnavailable { timestamp, .. } => *timestamp,
            LivescanEvent::SamplingStarted { timestamp, .. } => *timestamp,
            LivescanEvent::SamplingStopped { timestamp } => *timestamp,
            LivescanEvent::TickSkipped { timestamp } => *timestamp,
            LivescanEvent::CircuitStateChanged { timestamp, .. } => *timestamp,
            LivescanEvent::ClassificationResult(result) => result.timestamp,
            LivescanEvent::ClassificationFailed { timestamp, .. } => *timestamp,
            LivescanEvent::ServiceUnavailable { timestamp, .. } => *timestamp,
            LivescanEvent::SessionReset { timestamp } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            LivescanEvent::StreamStarted { device_id, .. } => {
                format!("Stream started on device {}", device_id)
            }
            LivescanEvent::StreamReady { dimensions, .. } => {
                format!("Stream ready at {}", dimensions)
            }
            LivescanEvent::StreamStopped { .. } => "Stream stopped".to_string(),
            LivescanEvent::DeviceUnavailable { reason, .. } => {
                format!("Camera unavailable: {}", reason)
            }
            LivescanEvent::SamplingStarted { period_ms, .. } => {
                format!("Sampling started every {}ms", period_ms)
            }
            LivescanEvent::SamplingStopped { .. } => "Sampling stopped".to_string(),
            LivescanEvent::TickSkipped { .. } => "Tick skipped, cycle in flight".to_string(),
            LivescanEvent::CircuitStateChanged { from, to, .. } => {
                format!("Circuit {} -> {}", from, to)
            }
            LivescanEvent::ClassificationResult(result) => format!(
                "Frame {} classified with {} detections",
                result.frame_id,
                result.detections.len()
            ),
            LivescanEvent::ClassificationFailed {
                error, attempts, ..
            } => {
                format!("Classification failed after {} attempts: {}", attempts, error)
            }
            LivescanEvent::ServiceUnavailable { attempts, .. } => {
                format!("Classification service unavailable after {} attempts", attempts)
            }
            LivescanEvent::SessionReset { .. } => "Session reset".to_string(),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LivescanEvent::StreamStarted { .. } => "stream_started",
            LivescanEvent::StreamReady { .. } => "stream_ready",
            LivescanEvent::StreamStopped { .. } => "stream_stopped",
            LivescanEvent::DeviceUnavailable { .. } => "device_unavailable",
            LivescanEvent::SamplingStarted { .. } => "sampling_started",
            LivescanEvent::SamplingStopped { .. } => "sampling_stopped",
            LivescanEvent::TickSkipped { .. } => "tick_skipped",
            LivescanEvent::CircuitStateChanged { .. } => "circuit_state_changed",
            LivescanEvent::ClassificationResult(_) => "classification_result",
            LivescanEvent::ClassificationFailed { .. } => "classification_failed",
            LivescanEvent::ServiceUnavailable { .. } => "service_unavailable",
            LivescanEvent::SessionReset { .. } => "session_reset",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<LivescanEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        Self {
            debug_logging: true,
            ..Self::new(capacity)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LivescanEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers reached; zero when nobody listens.
    pub async fn publish(&self, event: LivescanEvent) -> Result<usize, EventBusError> {
        match &event {
            LivescanEvent::DeviceUnavailable { reason, .. } => {
                warn!("Camera unavailable: {}", reason);
            }
            LivescanEvent::ServiceUnavailable { attempts, .. } => {
                error!(
                    "Classification service unavailable after {} attempts",
                    attempts
                );
            }
            _ => {
                if self.debug_logging {
                    debug!("Publishing event: {}", event.description());
                }
            }
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    Custom(fn(&LivescanEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &LivescanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<LivescanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<LivescanEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event passing the filter.
    ///
    /// A lagging receiver skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Result<LivescanEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<LivescanEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
