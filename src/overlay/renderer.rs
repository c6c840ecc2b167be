use super::mapper::{FitPolicy, FitTransform, Size};
use crate::config::OverlayConfig;
use crate::detection::{Detection, Rect};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{trace, warn};

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Parse `#rrggbb` or `rrggbb`
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

const FALLBACK_COLORS: [Rgb; 6] = [
    Rgb([239, 68, 68]),
    Rgb([168, 85, 247]),
    Rgb([236, 72, 153]),
    Rgb([20, 184, 166]),
    Rgb([249, 115, 22]),
    Rgb([99, 102, 241]),
];

/// Category to color lookup; unknown categories get a stable fallback color
#[derive(Debug, Clone)]
pub struct CategoryPalette {
    colors: HashMap<String, Rgb>,
}

impl Default for CategoryPalette {
    fn default() -> Self {
        let mut colors = HashMap::new();
        colors.insert("organik".to_string(), Rgb([34, 197, 94]));
        colors.insert("anorganik".to_string(), Rgb([59, 130, 246]));
        colors.insert("lainnya".to_string(), Rgb([234, 179, 8]));
        Self { colors }
    }
}

impl CategoryPalette {
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut palette = Self::default();
        for (category, hex) in overrides {
            match Rgb::from_hex(hex) {
                Some(color) => {
                    palette.colors.insert(category.to_lowercase(), color);
                }
                None => warn!("Ignoring invalid color '{}' for category '{}'", hex, category),
            }
        }
        palette
    }

    pub fn color_for(&self, category: &str) -> Rgb {
        let key = category.to_lowercase();
        if let Some(color) = self.colors.get(&key) {
            return *color;
        }
        // FNV-1a keeps the fallback stable across runs
        let hash = key.bytes().fold(0x811c9dc5u32, |hash, byte| {
            (hash ^ byte as u32).wrapping_mul(0x01000193)
        });
        FALLBACK_COLORS[hash as usize % FALLBACK_COLORS.len()]
    }
}

/// Visual parameters of the overlay shapes
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub palette: CategoryPalette,
    pub min_stroke_width: f64,
    /// Stroke width as a fraction of the smaller box side, before clamping
    pub stroke_ratio: f64,
    pub corner_accent_length: f64,
    /// Cap on the corner accent as a fraction of the smaller box side
    pub corner_accent_ratio: f64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            palette: CategoryPalette::default(),
            min_stroke_width: 2.0,
            stroke_ratio: 0.02,
            corner_accent_length: 24.0,
            corner_accent_ratio: 0.15,
        }
    }
}

impl OverlayStyle {
    pub fn from_config(config: &OverlayConfig) -> Self {
        Self {
            palette: CategoryPalette::with_overrides(&config.category_colors),
            min_stroke_width: config.min_stroke_width,
            corner_accent_ratio: config.corner_accent_ratio,
            ..Self::default()
        }
    }
}

/// One box to draw, already in display coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayShape {
    pub detection_id: String,
    pub category: String,
    pub label: String,
    pub color: Rgb,
    pub rect: Rect,
    pub stroke_width: f64,
    pub corner_accent: f64,
}

/// Everything a drawing layer needs for one render pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayModel {
    pub display: Size,
    pub shapes: Vec<OverlayShape>,
}

impl OverlayModel {
    pub fn empty(display: Size) -> Self {
        Self {
            display,
            shapes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Stateless builder of overlay render models
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Build the render model; the fit is recomputed on every call
    pub fn render(
        &self,
        detections: &[Detection],
        source: Size,
        surface: Size,
        fit: FitPolicy,
    ) -> OverlayModel {
        let Some(transform) = FitTransform::compute(source, surface, fit) else {
            trace!(
                "Skipping overlay render for source {:?} on surface {:?}",
                source,
                surface
            );
            return OverlayModel::empty(surface);
        };

        let shapes = detections
            .iter()
            .filter_map(|detection| self.shape_for(detection, &transform))
            .collect();

        OverlayModel {
            display: surface,
            shapes,
        }
    }

    fn shape_for(&self, detection: &Detection, transform: &FitTransform) -> Option<OverlayShape> {
        if !detection.is_renderable() {
            trace!(
                "Dropping detection {} with degenerate box {:?}",
                detection.id,
                detection.bbox
            );
            return None;
        }

        let rect = transform.apply(&detection.bbox);
        if !rect.is_valid() {
            return None;
        }

        let min_side = rect.min_side();
        let stroke_width = (min_side * self.style.stroke_ratio).max(self.style.min_stroke_width);
        let corner_accent = self
            .style
            .corner_accent_length
            .min(min_side * self.style.corner_accent_ratio);

        Some(OverlayShape {
            detection_id: detection.id.clone(),
            category: detection.category.clone(),
            label: format!(
                "{} {:.1}%",
                detection.category,
                detection.confidence_percent()
            ),
            color: self.style.palette.color_for(&detection.category),
            rect,
            stroke_width,
            corner_accent,
        })
    }
}
