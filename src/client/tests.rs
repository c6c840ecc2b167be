use super::*;
use crate::config::ConfidenceScale;
use crate::error::{PipelineError, TransportError};
use crate::events::{EventBus, LivescanEvent};
use crate::testing::{network_error, ok, payload, status, ScriptedTransport, ORGANIK_BODY};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(1500),
    }
}

fn client(transport: Arc<ScriptedTransport>) -> ClassificationClient {
    ClassificationClient::new(transport, policy(), Duration::from_secs(10))
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_makes_n_plus_one_attempts() {
    let transport = Arc::new(ScriptedTransport::always_failing());
    let client = client(transport.clone());

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;

    assert!(!outcome.success);
    assert_eq!(transport.calls(), 4);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(
        outcome.error,
        Some(PipelineError::ServiceUnavailable { attempts: 4 })
    );
    assert_eq!(client.circuit_state(), CircuitState::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_follow_capped_exponential_backoff() {
    let transport = Arc::new(ScriptedTransport::always_failing());
    let client = client(transport.clone());

    client.classify(&payload(), &CancellationToken::new()).await;

    let times = transport.call_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(1500),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_short_circuits_without_network() {
    let transport = Arc::new(ScriptedTransport::always_failing());
    let client = client(transport.clone());
    client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 4);

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 4);
    assert_eq!(outcome.attempts, 0);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::ServiceUnavailable { .. })
    ));

    client.reset().await;
    assert_eq!(client.circuit_state(), CircuitState::Idle);
    client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_failures_resets_counter() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        status(503),
        network_error(),
        ok(ORGANIK_BODY),
    ]));
    let client = client(transport.clone());

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.detections[0].id, "0");
    assert_eq!(client.circuit_state(), CircuitState::Idle);

    // a fresh sequence gets the full retry budget again
    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(outcome.attempts, 4);
    assert_eq!(transport.calls(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_error_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok(r#"{"success": true}"#)]));
    let client = client(transport.clone());

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 1);
    assert_eq!(outcome.attempts, 1);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::ProtocolError { .. })
    ));
    assert_eq!(client.circuit_state(), CircuitState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_status_is_protocol_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![status(400)]));
    let client = client(transport.clone());

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 1);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::ProtocolError { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_counts_as_failure() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![ok(ORGANIK_BODY), ok(ORGANIK_BODY)])
            .with_latency(Duration::from_secs(30)),
    );
    let client = ClassificationClient::new(
        transport.clone(),
        BackoffPolicy {
            max_retries: 1,
            ..policy()
        },
        Duration::from_secs(2),
    );

    let outcome = client.classify(&payload(), &CancellationToken::new()).await;
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        outcome.error,
        Some(PipelineError::ServiceUnavailable { attempts: 2 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_closes_sequence() {
    let transport = Arc::new(ScriptedTransport::always_failing());
    let client = Arc::new(client(transport.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.classify(&payload(), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let outcome = task.await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(
        outcome.error,
        Some(PipelineError::TransmissionFailed(TransportError::Cancelled))
    );
    assert_eq!(client.circuit_state(), CircuitState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_transitions_are_published() {
    let bus = Arc::new(EventBus::new(32));
    let mut rx = bus.subscribe();
    let transport = Arc::new(ScriptedTransport::new(vec![status(500), ok(ORGANIK_BODY)]));
    let client = client(transport).with_event_bus(bus.clone());
    let mut state_rx = client.subscribe_state();

    client.classify(&payload(), &CancellationToken::new()).await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LivescanEvent::CircuitStateChanged { from, to, .. } = event {
            seen.push((from, to));
        }
    }
    assert_eq!(
        seen,
        vec![
            (CircuitState::Idle, CircuitState::Retrying(1)),
            (CircuitState::Retrying(1), CircuitState::Idle),
        ]
    );
    assert!(state_rx.has_changed().unwrap());
    assert_eq!(*state_rx.borrow_and_update(), CircuitState::Idle);
}

#[test]
fn test_parse_response_normalizes_percent_confidence() {
    let body = br#"{"success": true, "data": {"detections": [
        {"category": "Anorganik", "confidence": 87.5,
         "bbox": {"x": 1, "y": 2, "width": 3, "height": 4},
         "all_confidences": {"Anorganik": 87.5, "Organik": 12.5}}
    ]}}"#;

    let (detections, metadata) = parse_response(body, ConfidenceScale::Auto).unwrap();
    assert!(metadata.is_none());
    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert!((detection.confidence - 0.875).abs() < 1e-9);
    assert!(!detection.id.is_empty());
    let scores = detection.all_confidences.as_ref().unwrap();
    assert!((scores["Organik"] - 0.125).abs() < 1e-9);
}

#[test]
fn test_parse_response_error_classes() {
    assert!(matches!(
        parse_response(b"<html>bad gateway</html>", ConfidenceScale::Auto),
        Err(TransportError::Malformed { .. })
    ));
    assert!(matches!(
        parse_response(br#"{"detections": []}"#, ConfidenceScale::Auto),
        Err(TransportError::Protocol { .. })
    ));
    assert!(matches!(
        parse_response(
            br#"{"success": false, "error": "model crashed"}"#,
            ConfidenceScale::Auto
        ),
        Err(TransportError::ServiceFailure { .. })
    ));
}

#[test]
fn test_normalize_confidence() {
    assert_eq!(normalize_confidence(0.5, ConfidenceScale::Auto), 0.5);
    assert_eq!(normalize_confidence(50.0, ConfidenceScale::Auto), 0.5);
    assert_eq!(normalize_confidence(0.5, ConfidenceScale::Percent), 0.005);
    assert_eq!(normalize_confidence(1.5, ConfidenceScale::Unit), 1.0);
    assert_eq!(normalize_confidence(-3.0, ConfidenceScale::Unit), 0.0);
}

#[test]
fn test_status_interpretation() {
    let retryable = super::classifier::interpret_response(
        &TransportResponse {
            status: 429,
            body: Bytes::new(),
        },
        ConfidenceScale::Auto,
    );
    assert!(matches!(retryable, Err(TransportError::Status { status: 429, .. })));

    let fatal = super::classifier::interpret_response(
        &TransportResponse {
            status: 413,
            body: Bytes::new(),
        },
        ConfidenceScale::Auto,
    );
    assert!(matches!(fatal, Err(TransportError::Protocol { .. })));
}
