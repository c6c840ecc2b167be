use super::circuit::{BackoffPolicy, CircuitBreaker, CircuitState, CircuitTransition};
use super::protocol::parse_response;
use super::transport::{ClassificationTransport, ServiceHealth, TransportResponse};
use crate::config::{ClientConfig, ConfidenceScale};
use crate::detection::{ClassificationOutcome, Detection, ResponseMetadata};
use crate::encoder::EncodedPayload;
use crate::error::{PipelineError, TransportError};
use crate::events::{EventBus, LivescanEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ERROR_BODY_PREVIEW: usize = 200;

/// Sends encoded frames to the classification service with bounded retries.
///
/// Owns the circuit state; other components only read it through
/// [`ClassificationClient::circuit_state`] or a watch subscription.
pub struct ClassificationClient {
    transport: Arc<dyn ClassificationTransport>,
    circuit: Mutex<CircuitBreaker>,
    state_tx: watch::Sender<CircuitState>,
    timeout: Duration,
    confidence_scale: ConfidenceScale,
    event_bus: Option<Arc<EventBus>>,
}

impl ClassificationClient {
    pub fn new(
        transport: Arc<dyn ClassificationTransport>,
        policy: BackoffPolicy,
        timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(CircuitState::Idle);
        Self {
            transport,
            circuit: Mutex::new(CircuitBreaker::new(policy)),
            state_tx,
            timeout,
            confidence_scale: ConfidenceScale::Auto,
            event_bus: None,
        }
    }

    pub fn from_config(transport: Arc<dyn ClassificationTransport>, config: &ClientConfig) -> Self {
        Self::new(transport, BackoffPolicy::from_config(config), config.timeout())
            .with_confidence_scale(config.confidence_scale)
    }

    pub fn with_confidence_scale(mut self, scale: ConfidenceScale) -> Self {
        self.confidence_scale = scale;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.lock().state()
    }

    /// Watch circuit transitions
    pub fn subscribe_state(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    pub fn policy(&self) -> BackoffPolicy {
        *self.circuit.lock().policy()
    }

    /// Classify one payload, retrying transient failures with backoff.
    ///
    /// Returns without touching the network while the circuit is
    /// `Unavailable`. Cancellation aborts an in-flight attempt or backoff
    /// sleep and closes the sequence.
    pub async fn classify(
        &self,
        payload: &EncodedPayload,
        cancel: &CancellationToken,
    ) -> ClassificationOutcome {
        if self.circuit_state().is_unavailable() {
            debug!("Skipping classification of frame {}: service unavailable", payload.frame_id);
            return ClassificationOutcome::failed(PipelineError::ServiceUnavailable { attempts: 0 }, 0);
        }

        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.attempt(payload) => result,
            };

            match result {
                Ok((detections, metadata)) => {
                    let transition = self.circuit.lock().record_success();
                    self.publish_transition(transition).await;
                    debug!(
                        "Frame {} classified with {} detections after {} attempt(s)",
                        payload.frame_id,
                        detections.len(),
                        attempts
                    );
                    return ClassificationOutcome::succeeded(detections, metadata, attempts);
                }
                Err(TransportError::Cancelled) => {
                    let transition = self.circuit.lock().end_sequence();
                    self.publish_transition(transition).await;
                    debug!("Classification of frame {} cancelled", payload.frame_id);
                    return ClassificationOutcome::failed(
                        PipelineError::TransmissionFailed(TransportError::Cancelled),
                        attempts,
                    );
                }
                Err(e) if !e.is_retryable() => {
                    let transition = self.circuit.lock().end_sequence();
                    self.publish_transition(transition).await;
                    error!("Classification protocol error on frame {}: {}", payload.frame_id, e);
                    return ClassificationOutcome::failed(PipelineError::from(e), attempts);
                }
                Err(e) => {
                    let (transition, delay) = {
                        let mut circuit = self.circuit.lock();
                        let transition = circuit.record_failure();
                        (transition, circuit.next_delay())
                    };
                    self.publish_transition(transition).await;

                    if transition.to.is_unavailable() {
                        error!(
                            "Classification service unavailable after {} attempts, last error: {}",
                            attempts, e
                        );
                        return ClassificationOutcome::failed(
                            PipelineError::ServiceUnavailable { attempts },
                            attempts,
                        );
                    }

                    warn!(
                        "Classification attempt {} failed: {}; retrying in {:?}",
                        attempts, e, delay
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            let transition = self.circuit.lock().end_sequence();
                            self.publish_transition(transition).await;
                            debug!("Retry backoff for frame {} cancelled", payload.frame_id);
                            return ClassificationOutcome::failed(
                                PipelineError::TransmissionFailed(TransportError::Cancelled),
                                attempts,
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// External reset; the only way out of `Unavailable`
    pub async fn reset(&self) {
        let transition = self.circuit.lock().reset();
        self.publish_transition(transition).await;
    }

    /// Probe the service without touching the circuit
    pub async fn health(&self) -> Result<ServiceHealth, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.health()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout: self.timeout,
            }),
        }
    }

    async fn attempt(
        &self,
        payload: &EncodedPayload,
    ) -> Result<(Vec<Detection>, Option<ResponseMetadata>), TransportError> {
        let response = match tokio::time::timeout(self.timeout, self.transport.send(payload)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    timeout: self.timeout,
                })
            }
        };

        let detections = interpret_response(&response, self.confidence_scale)?;
        Ok(detections)
    }

    async fn publish_transition(&self, transition: CircuitTransition) {
        if !transition.changed() {
            return;
        }

        self.state_tx.send_replace(transition.to);

        if transition.to == CircuitState::Idle && transition.from.is_unavailable() {
            info!("Classification circuit closed by reset");
        }

        if let Some(event_bus) = &self.event_bus {
            let _ = event_bus
                .publish(LivescanEvent::CircuitStateChanged {
                    from: transition.from,
                    to: transition.to,
                    timestamp: SystemTime::now(),
                })
                .await;
        }
    }
}

/// Map a raw response onto detections or a classified failure
pub(crate) fn interpret_response(
    response: &TransportResponse,
    scale: ConfidenceScale,
) -> Result<(Vec<Detection>, Option<ResponseMetadata>), TransportError> {
    match response.status {
        200..=299 => parse_response(&response.body, scale),
        408 | 429 | 500..=599 => Err(TransportError::Status {
            status: response.status,
            body: preview(&response.body),
        }),
        status => Err(TransportError::Protocol {
            details: format!("unexpected status {}: {}", status, preview(&response.body)),
        }),
    }
}

fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_PREVIEW)
        .collect()
}
