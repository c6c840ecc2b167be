use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned rectangle in pixel units of some coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Finite in all four values with strictly positive extent
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn min_side(&self) -> f64 {
        self.width.min(self.height)
    }

    /// Scale position and extent independently per axis
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

/// One recognized object with its box in source-frame pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub category: String,
    /// Normalized to 0.0..=1.0
    pub confidence: f64,
    pub bbox: Rect,
    /// Per-category scores when the service reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_confidences: Option<BTreeMap<String, f64>>,
}

impl Detection {
    pub fn is_renderable(&self) -> bool {
        self.bbox.is_valid() && self.confidence.is_finite()
    }

    pub fn confidence_percent(&self) -> f64 {
        self.confidence * 100.0
    }
}

/// Service-side metadata accompanying a classification response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
    #[serde(default)]
    pub num_detections: Option<u32>,
    #[serde(default)]
    pub image_size: Option<serde_json::Value>,
    /// Anything else the service attached
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of one classification cycle, successful or not
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub success: bool,
    /// Empty when nothing was recognized or the cycle failed
    pub detections: Vec<Detection>,
    pub metadata: Option<ResponseMetadata>,
    pub error: Option<PipelineError>,
    /// Requests made during this cycle, including the successful one
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ClassificationOutcome {
    pub fn succeeded(
        detections: Vec<Detection>,
        metadata: Option<ResponseMetadata>,
        attempts: u32,
    ) -> Self {
        Self {
            success: true,
            detections,
            metadata,
            error: None,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: PipelineError, attempts: u32) -> Self {
        Self {
            success: false,
            detections: Vec::new(),
            metadata: None,
            error: Some(error),
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Categories of all detections, in response order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.detections.iter().map(|d| d.category.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_validity() {
        assert!(Rect::new(0.0, 0.0, 10.0, 10.0).is_valid());
        assert!(Rect::new(-5.0, -5.0, 1.0, 1.0).is_valid());
        assert!(!Rect::new(0.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!Rect::new(0.0, 0.0, 10.0, -1.0).is_valid());
        assert!(!Rect::new(f64::NAN, 0.0, 10.0, 10.0).is_valid());
        assert!(!Rect::new(0.0, f64::INFINITY, 10.0, 10.0).is_valid());
    }

    #[test]
    fn test_rect_scaling() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0).scaled(2.0, 0.5);
        assert_eq!(rect, Rect::new(20.0, 10.0, 60.0, 20.0));
        assert_eq!(rect.min_side(), 20.0);
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let metadata: ResponseMetadata = serde_json::from_value(serde_json::json!({
            "processing_time_ms": 42,
            "num_detections": 1,
            "model": "v2"
        }))
        .unwrap();

        assert_eq!(metadata.processing_time_ms, Some(42.0));
        assert_eq!(metadata.num_detections, Some(1));
        assert_eq!(metadata.extra.get("model"), Some(&serde_json::json!("v2")));
    }
}
