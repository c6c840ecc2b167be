//! Scripted fakes shared by unit tests.

use crate::client::{ClassificationTransport, ServiceHealth, TransportResponse};
use crate::encoder::{EncodedPayload, JPEG_CONTENT_TYPE};
use crate::error::TransportError;
use crate::frame::FrameDimensions;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub const ORGANIK_BODY: &str = r#"{
    "success": true,
    "data": {
        "detections": [
            {"id": 0, "category": "Organik", "confidence": 0.92,
             "bbox": {"x": 100, "y": 100, "width": 50, "height": 50}}
        ],
        "metadata": {"processing_time_ms": 84.0, "num_detections": 1}
    }
}"#;

/// Single detection of `category` at {100, 100, 50, 50}
pub fn detection_body(category: &str) -> String {
    ORGANIK_BODY.replace("Organik", category)
}

pub fn ok(body: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status: 200,
        body: Bytes::from(body.to_string()),
    })
}

pub fn status(code: u16) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status: code,
        body: Bytes::from_static(b"{\"detail\":\"nope\"}"),
    })
}

pub fn network_error() -> Result<TransportResponse, TransportError> {
    Err(TransportError::Network {
        details: "connection refused".to_string(),
    })
}

pub fn payload() -> EncodedPayload {
    EncodedPayload {
        data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        content_type: JPEG_CONTENT_TYPE,
        dimensions: FrameDimensions::new(640, 480),
        source: FrameDimensions::new(640, 480),
        frame_id: 1,
    }
}

/// Replays a script of responses, then fails with a network error forever
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, response: Result<TransportResponse, TransportError>) {
        self.script.lock().push_back(response);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClassificationTransport for ScriptedTransport {
    async fn send(&self, _payload: &EncodedPayload) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(network_error)
    }

    async fn health(&self) -> Result<ServiceHealth, TransportError> {
        Ok(ServiceHealth {
            status: "healthy".to_string(),
            models_loaded: true,
        })
    }
}
