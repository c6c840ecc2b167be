use super::renderer::{OverlayModel, OverlayShape};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect as PixelRect;

const LABEL_HEIGHT: f64 = 16.0;
const LABEL_CHAR_WIDTH: f64 = 7.0;
const LABEL_ALPHA: u8 = 200;
/// Longest side of a rasterized layer, in pixels
pub const MAX_RASTER_SIDE: u32 = 8192;

/// Draw an overlay model onto a transparent layer the size of the display.
///
/// Hosts that have a vector drawing surface should consume the model directly;
/// this is for hosts that composite bitmaps. Labels get a background plate
/// only, text is left to the host's font stack. Unusable display sizes give
/// an empty layer and each side is capped at [`MAX_RASTER_SIDE`].
pub fn rasterize(model: &OverlayModel) -> RgbaImage {
    if !model.display.is_usable() {
        return RgbaImage::new(0, 0);
    }

    let cap = MAX_RASTER_SIDE as f64;
    let width = model.display.width.round().min(cap) as u32;
    let height = model.display.height.round().min(cap) as u32;
    let mut layer = RgbaImage::new(width, height);

    if width == 0 || height == 0 {
        return layer;
    }

    for shape in &model.shapes {
        draw_shape(&mut layer, shape);
    }

    layer
}

fn draw_shape(layer: &mut RgbaImage, shape: &OverlayShape) {
    let [r, g, b] = shape.color.0;
    let solid = Rgba([r, g, b, 255]);
    let rect = shape.rect;
    let stroke = shape.stroke_width.max(1.0);

    // Box outline as four bands
    fill(layer, rect.x, rect.y, rect.width, stroke, solid);
    fill(layer, rect.x, rect.y + rect.height - stroke, rect.width, stroke, solid);
    fill(layer, rect.x, rect.y, stroke, rect.height, solid);
    fill(layer, rect.x + rect.width - stroke, rect.y, stroke, rect.height, solid);

    // Corner accents at double stroke weight
    let accent = shape.corner_accent;
    if accent >= 1.0 {
        let weight = stroke * 2.0;
        let right = rect.x + rect.width;
        let bottom = rect.y + rect.height;
        for (cx, cy, dx, dy) in [
            (rect.x, rect.y, 0.0, 0.0),
            (right - accent, rect.y, accent - weight, 0.0),
            (rect.x, bottom - accent, 0.0, accent - weight),
            (right - accent, bottom - accent, accent - weight, accent - weight),
        ] {
            fill(layer, cx, cy + dy, accent, weight, solid);
            fill(layer, cx + dx, cy, weight, accent, solid);
        }
    }

    // Label plate sits above the box, or inside it when the box touches the top
    let plate_width = shape.label.chars().count() as f64 * LABEL_CHAR_WIDTH + 8.0;
    let plate_y = if rect.y >= LABEL_HEIGHT {
        rect.y - LABEL_HEIGHT
    } else {
        rect.y
    };
    fill(
        layer,
        rect.x,
        plate_y,
        plate_width,
        LABEL_HEIGHT,
        Rgba([r, g, b, LABEL_ALPHA]),
    );
}

fn fill(layer: &mut RgbaImage, x: f64, y: f64, width: f64, height: f64, color: Rgba<u8>) {
    let bound_w = layer.width() as f64;
    let bound_h = layer.height() as f64;

    let left = x.max(0.0);
    let top = y.max(0.0);
    let right = (x + width).min(bound_w);
    let bottom = (y + height).min(bound_h);

    if !(right - left >= 1.0 && bottom - top >= 1.0) {
        return;
    }

    let rect = PixelRect::at(left.floor() as i32, top.floor() as i32)
        .of_size((right - left).round() as u32, (bottom - top).round() as u32);
    draw_filled_rect_mut(layer, rect, color);
}
