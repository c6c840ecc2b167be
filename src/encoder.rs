use crate::config::EncoderConfig;
use crate::detection::Rect;
use crate::error::EncodeError;
use crate::frame::{FrameDimensions, FrameFormat, FrameSample};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat, RgbImage, RgbaImage};
use tracing::{debug, trace};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Bounds and quality for one encode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality in (0, 1]
    pub quality: f32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 1280,
            quality: 0.8,
        }
    }
}

/// Compressed frame ready for transmission
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub data: Bytes,
    pub content_type: &'static str,
    /// Pixel size of the encoded image
    pub dimensions: FrameDimensions,
    /// Pixel size of the frame it was produced from
    pub source: FrameDimensions,
    pub frame_id: u64,
}

impl EncodedPayload {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert a rectangle reported against the encoded image back to source pixels
    pub fn to_source_rect(&self, rect: &Rect) -> Rect {
        if self.dimensions == self.source || self.dimensions.is_empty() {
            return *rect;
        }
        rect.scaled(
            self.source.width as f64 / self.dimensions.width as f64,
            self.source.height as f64 / self.dimensions.height as f64,
        )
    }
}

/// Output size for a frame under the given bounds; never upscales
pub fn target_dimensions(
    source: FrameDimensions,
    max_width: u32,
    max_height: u32,
) -> FrameDimensions {
    if source.is_empty() || (source.width <= max_width && source.height <= max_height) {
        return source;
    }

    let scale =
        (max_width as f64 / source.width as f64).min(max_height as f64 / source.height as f64);
    FrameDimensions::new(
        ((source.width as f64 * scale).round() as u32).clamp(1, max_width),
        ((source.height as f64 * scale).round() as u32).clamp(1, max_height),
    )
}

/// Downsamples captured frames and encodes them as JPEG
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    options: EncodeOptions,
    max_payload_bytes: usize,
}

impl FrameEncoder {
    pub fn new(options: EncodeOptions, max_payload_bytes: usize) -> Self {
        Self {
            options,
            max_payload_bytes,
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(
            EncodeOptions {
                max_width: config.max_width,
                max_height: config.max_height,
                quality: config.quality,
            },
            config.max_payload_bytes,
        )
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    pub fn encode(&self, frame: &FrameSample) -> Result<EncodedPayload, EncodeError> {
        encode(frame, &self.options).and_then(|payload| {
            if payload.len() > self.max_payload_bytes {
                return Err(EncodeError::PayloadTooLarge {
                    size: payload.len(),
                    limit: self.max_payload_bytes,
                });
            }
            Ok(payload)
        })
    }
}

/// Encode one frame within the bounds of `options`
pub fn encode(frame: &FrameSample, options: &EncodeOptions) -> Result<EncodedPayload, EncodeError> {
    if frame.dimensions().is_empty() {
        return Err(EncodeError::EmptyFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    let image = decode_rgb(frame)?;
    let source = FrameDimensions::new(image.width(), image.height());
    let target = target_dimensions(source, options.max_width, options.max_height);

    let image = if target != source {
        trace!("Downscaling frame {} from {} to {}", frame.id, source, target);
        image::imageops::resize(&image, target.width, target.height, FilterType::Triangle)
    } else {
        image
    };

    let quality = (options.quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode(image.as_raw(), target.width, target.height, ColorType::Rgb8)
        .map_err(|e| EncodeError::Codec {
            details: e.to_string(),
        })?;

    debug!(
        "Encoded frame {} at {} (quality {}): {} bytes",
        frame.id,
        target,
        quality,
        buffer.len()
    );

    Ok(EncodedPayload {
        data: Bytes::from(buffer),
        content_type: JPEG_CONTENT_TYPE,
        dimensions: target,
        source,
        frame_id: frame.id,
    })
}

fn decode_rgb(frame: &FrameSample) -> Result<RgbImage, EncodeError> {
    let size_error = || EncodeError::BufferSize {
        expected: frame.expected_size().unwrap_or(0),
        actual: frame.data.len(),
    };

    match frame.format {
        FrameFormat::Rgb24 => RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .ok_or_else(size_error),
        FrameFormat::Rgba32 => RgbaImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .map(|rgba| DynamicImage::ImageRgba8(rgba).to_rgb8())
            .ok_or_else(size_error),
        FrameFormat::Mjpeg => image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
            .map(|decoded| decoded.to_rgb8())
            .map_err(|e| EncodeError::Codec {
                details: format!("Failed to decode MJPEG frame: {}", e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn rgb_frame(width: u32, height: u32) -> FrameSample {
        let data = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, (i % 127) as u8, (i % 63) as u8])
            .collect();
        FrameSample::new(7, SystemTime::now(), data, width, height, FrameFormat::Rgb24)
    }

    #[test]
    fn test_target_dimensions_scale_down_only() {
        assert_eq!(
            target_dimensions(FrameDimensions::new(2000, 1000), 1280, 720),
            FrameDimensions::new(1280, 640)
        );
        assert_eq!(
            target_dimensions(FrameDimensions::new(800, 600), 1280, 720),
            FrameDimensions::new(800, 600)
        );
        assert_eq!(
            target_dimensions(FrameDimensions::new(1000, 2000), 1280, 720),
            FrameDimensions::new(360, 720)
        );
    }

    #[test]
    fn test_encode_downscales_preserving_aspect() {
        let options = EncodeOptions {
            max_width: 1280,
            max_height: 720,
            quality: 0.8,
        };

        let payload = encode(&rgb_frame(2000, 1000), &options).unwrap();
        assert_eq!(payload.dimensions, FrameDimensions::new(1280, 640));
        assert_eq!(payload.source, FrameDimensions::new(2000, 1000));
        assert_eq!(payload.content_type, "image/jpeg");
        assert_eq!(&payload.data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&payload.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 640));
    }

    #[test]
    fn test_encode_keeps_small_frames() {
        let payload = encode(&rgb_frame(800, 600), &EncodeOptions::default()).unwrap();
        assert_eq!(payload.dimensions, FrameDimensions::new(800, 600));
        assert_eq!(payload.frame_id, 7);
    }

    #[test]
    fn test_encode_rejects_zero_area() {
        let frame = FrameSample::new(1, SystemTime::now(), Vec::new(), 0, 720, FrameFormat::Rgb24);
        assert_eq!(
            encode(&frame, &EncodeOptions::default()).unwrap_err(),
            EncodeError::EmptyFrame {
                width: 0,
                height: 720
            }
        );
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = FrameSample::new(1, SystemTime::now(), vec![0; 10], 64, 48, FrameFormat::Rgb24);
        assert!(matches!(
            encode(&frame, &EncodeOptions::default()),
            Err(EncodeError::BufferSize { actual: 10, .. })
        ));
    }

    #[test]
    fn test_encoder_enforces_payload_limit() {
        let encoder = FrameEncoder::new(EncodeOptions::default(), 16);
        assert!(matches!(
            encoder.encode(&rgb_frame(64, 48)),
            Err(EncodeError::PayloadTooLarge { limit: 16, .. })
        ));
    }

    #[test]
    fn test_rgba_and_mjpeg_sources() {
        let pixels = vec![128; 32 * 16 * 4];
        let rgba = FrameSample::new(2, SystemTime::now(), pixels, 32, 16, FrameFormat::Rgba32);
        let first = encode(&rgba, &EncodeOptions::default()).unwrap();
        assert_eq!(first.dimensions, FrameDimensions::new(32, 16));

        let jpeg = first.data.to_vec();
        let mjpeg = FrameSample::new(3, SystemTime::now(), jpeg, 32, 16, FrameFormat::Mjpeg);
        let second = encode(&mjpeg, &EncodeOptions::default()).unwrap();
        assert_eq!(second.dimensions, FrameDimensions::new(32, 16));
    }

    #[test]
    fn test_payload_maps_rects_back_to_source() {
        let payload = encode(
            &rgb_frame(200, 100),
            &EncodeOptions {
                max_width: 100,
                max_height: 100,
                quality: 0.5,
            },
        )
        .unwrap();
        assert_eq!(payload.dimensions, FrameDimensions::new(100, 50));

        let rect = payload.to_source_rect(&Rect::new(10.0, 10.0, 20.0, 5.0));
        assert_eq!(rect, Rect::new(20.0, 20.0, 40.0, 10.0));
    }
}
