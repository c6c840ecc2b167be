use crate::detection::Rect;
use crate::frame::FrameDimensions;
use serde::{Deserialize, Serialize};

/// How a captured stream is fit into a differently-proportioned surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// Scale until both axes are covered, cropping the overflowing axis
    CropToFill,
    /// Scale until both axes fit, padding the axis with slack
    LetterboxToFit,
}

/// Pixel size of a surface; fractional sizes come from high-DPI layouts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl From<FrameDimensions> for Size {
    fn from(dimensions: FrameDimensions) -> Self {
        Self::new(dimensions.width as f64, dimensions.height as f64)
    }
}

/// Uniform scale plus centering offset from frame space to display space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl FitTransform {
    /// `None` when either size is empty or non-finite
    pub fn compute(source: Size, display: Size, fit: FitPolicy) -> Option<Self> {
        if !source.is_usable() || !display.is_usable() {
            return None;
        }

        let scale_x = display.width / source.width;
        let scale_y = display.height / source.height;
        let scale = match fit {
            FitPolicy::CropToFill => scale_x.max(scale_y),
            FitPolicy::LetterboxToFit => scale_x.min(scale_y),
        };

        // Zero on the limiting axis, negative (crop) or positive (padding) on the other
        Some(Self {
            scale,
            offset_x: (display.width - source.width * scale) / 2.0,
            offset_y: (display.height - source.height * scale) / 2.0,
        })
    }

    pub fn apply(&self, rect: &Rect) -> Rect {
        Rect {
            x: rect.x * self.scale + self.offset_x,
            y: rect.y * self.scale + self.offset_y,
            width: rect.width * self.scale,
            height: rect.height * self.scale,
        }
    }
}

/// Map a rectangle from frame pixels into display pixels
pub fn map_rect(rect: &Rect, source: Size, display: Size, fit: FitPolicy) -> Option<Rect> {
    FitTransform::compute(source, display, fit).map(|transform| transform.apply(rect))
}
