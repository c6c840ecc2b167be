//! Wire format of the classification endpoint.
//!
//! ```json
//! { "success": true,
//!   "data": { "detections": [ { "id": 0, "category": "Organik", "confidence": 0.92,
//!                               "bbox": { "x": 100, "y": 100, "width": 50, "height": 50 } } ],
//!             "metadata": { "processing_time_ms": 84 } } }
//! ```
//!
//! Bodies that are not JSON at all are treated as transport noise (a proxy
//! error page, a truncated read) and retried. JSON that does not match the
//! contract is a protocol error and is not.

use crate::config::ConfidenceScale;
use crate::detection::{Detection, Rect, ResponseMetadata};
use crate::error::TransportError;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<ClassifyResponseData>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponseData {
    pub detections: Vec<WireDetection>,
    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDetection {
    /// Numeric or string; generated when absent
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub category: String,
    pub confidence: f64,
    pub bbox: WireBoundingBox,
    #[serde(default)]
    pub all_confidences: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WireBoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Bring a reported confidence into 0.0..=1.0
pub fn normalize_confidence(value: f64, scale: ConfidenceScale) -> f64 {
    if !value.is_finite() {
        return value;
    }

    let unit = match scale {
        ConfidenceScale::Unit => value,
        ConfidenceScale::Percent => value / 100.0,
        ConfidenceScale::Auto if value > 1.0 => value / 100.0,
        ConfidenceScale::Auto => value,
    };
    unit.clamp(0.0, 1.0)
}

/// Decode a success-status body into detections and metadata
pub fn parse_response(
    body: &[u8],
    scale: ConfidenceScale,
) -> Result<(Vec<Detection>, Option<ResponseMetadata>), TransportError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| TransportError::Malformed {
            details: e.to_string(),
        })?;

    let response: ClassifyResponse =
        serde_json::from_value(value).map_err(|e| TransportError::Protocol {
            details: e.to_string(),
        })?;

    if !response.success {
        let details = response
            .error
            .or_else(|| response.detail.map(|d| d.to_string()))
            .unwrap_or_else(|| "success=false without detail".to_string());
        return Err(TransportError::ServiceFailure { details });
    }

    let data = response.data.ok_or_else(|| TransportError::Protocol {
        details: "successful response is missing `data`".to_string(),
    })?;

    let detections = data
        .detections
        .into_iter()
        .map(|wire| Detection {
            id: match wire.id {
                Some(serde_json::Value::String(id)) => id,
                Some(other) if !other.is_null() => other.to_string(),
                _ => Uuid::new_v4().to_string(),
            },
            category: wire.category,
            confidence: normalize_confidence(wire.confidence, scale),
            bbox: Rect::new(wire.bbox.x, wire.bbox.y, wire.bbox.width, wire.bbox.height),
            all_confidences: wire.all_confidences.map(|scores| {
                scores
                    .into_iter()
                    .map(|(category, score)| (category, normalize_confidence(score, scale)))
                    .collect()
            }),
        })
        .collect();

    Ok((detections, data.metadata))
}
