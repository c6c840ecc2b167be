use super::*;
use crate::detection::{Detection, Rect};

fn detection(id: &str, category: &str, confidence: f64, bbox: Rect) -> Detection {
    Detection {
        id: id.to_string(),
        category: category.to_string(),
        confidence,
        bbox,
        all_confidences: None,
    }
}

#[test]
fn test_crop_to_fill_centers_overflowing_axis() {
    let mapped = map_rect(
        &Rect::new(0.0, 0.0, 1000.0, 1000.0),
        Size::new(1000.0, 1000.0),
        Size::new(500.0, 1000.0),
        FitPolicy::CropToFill,
    )
    .unwrap();

    assert_eq!(mapped, Rect::new(-250.0, 0.0, 1000.0, 1000.0));
}

#[test]
fn test_letterbox_to_fit_pads_slack_axis() {
    let mapped = map_rect(
        &Rect::new(0.0, 0.0, 1000.0, 1000.0),
        Size::new(1000.0, 1000.0),
        Size::new(500.0, 1000.0),
        FitPolicy::LetterboxToFit,
    )
    .unwrap();

    assert_eq!(mapped, Rect::new(0.0, 250.0, 500.0, 500.0));
}

#[test]
fn test_fit_transform_landscape_stream_on_portrait_display() {
    let source = Size::new(1280.0, 720.0);
    let display = Size::new(360.0, 640.0);

    let crop = FitTransform::compute(source, display, FitPolicy::CropToFill).unwrap();
    assert!((crop.scale - 640.0 / 720.0).abs() < 1e-9);
    assert!(crop.offset_y.abs() < 1e-9);
    assert!(crop.offset_x < 0.0);

    let letterbox = FitTransform::compute(source, display, FitPolicy::LetterboxToFit).unwrap();
    assert!((letterbox.scale - 360.0 / 1280.0).abs() < 1e-9);
    assert_eq!(letterbox.offset_x, 0.0);
    assert!(letterbox.offset_y > 0.0);
}

#[test]
fn test_mapping_rejects_empty_sizes() {
    let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
    assert!(map_rect(&rect, Size::new(0.0, 720.0), Size::new(100.0, 100.0), FitPolicy::CropToFill).is_none());
    assert!(map_rect(&rect, Size::new(1280.0, 720.0), Size::new(100.0, 0.0), FitPolicy::LetterboxToFit).is_none());
}

#[test]
fn test_renderer_builds_labeled_shape() {
    let renderer = OverlayRenderer::default();
    let model = renderer.render(
        &[detection("d1", "Organik", 0.92, Rect::new(100.0, 100.0, 50.0, 50.0))],
        Size::new(1280.0, 720.0),
        Size::new(1280.0, 720.0),
        FitPolicy::CropToFill,
    );

    assert_eq!(model.shapes.len(), 1);
    let shape = &model.shapes[0];
    assert_eq!(shape.label, "Organik 92.0%");
    assert_eq!(shape.rect, Rect::new(100.0, 100.0, 50.0, 50.0));
    assert_eq!(shape.color, Rgb([34, 197, 94]));
    // 15% of the 50px side caps the 24px default accent
    assert!((shape.corner_accent - 7.5).abs() < 1e-9);
    assert_eq!(shape.stroke_width, 2.0);
}

#[test]
fn test_renderer_drops_degenerate_detections() {
    let renderer = OverlayRenderer::default();
    let model = renderer.render(
        &[
            detection("zero-width", "A", 0.5, Rect::new(10.0, 10.0, 0.0, 20.0)),
            detection("nan-x", "A", 0.5, Rect::new(f64::NAN, 10.0, 20.0, 20.0)),
            detection("negative", "A", 0.5, Rect::new(10.0, 10.0, 20.0, -3.0)),
            detection("nan-confidence", "A", f64::NAN, Rect::new(10.0, 10.0, 20.0, 20.0)),
            detection("ok", "A", 0.5, Rect::new(10.0, 10.0, 20.0, 20.0)),
        ],
        Size::new(100.0, 100.0),
        Size::new(100.0, 100.0),
        FitPolicy::LetterboxToFit,
    );

    let ids: Vec<_> = model.shapes.iter().map(|s| s.detection_id.as_str()).collect();
    assert_eq!(ids, vec!["ok"]);
}

#[test]
fn test_renderer_is_deterministic() {
    let renderer = OverlayRenderer::default();
    let detections = vec![
        detection("a", "Anorganik", 0.4, Rect::new(0.0, 0.0, 400.0, 300.0)),
        detection("b", "Unlisted", 0.75, Rect::new(50.0, 60.0, 70.0, 80.0)),
    ];
    let first = renderer.render(&detections, Size::new(800.0, 600.0), Size::new(400.0, 400.0), FitPolicy::CropToFill);
    let second = renderer.render(&detections, Size::new(800.0, 600.0), Size::new(400.0, 400.0), FitPolicy::CropToFill);
    assert_eq!(first, second);

    // display size changes are picked up on the next pass
    let rotated = renderer.render(&detections, Size::new(800.0, 600.0), Size::new(400.0, 700.0), FitPolicy::CropToFill);
    assert_ne!(first.shapes[0].rect, rotated.shapes[0].rect);
}

#[test]
fn test_stroke_width_grows_with_large_boxes() {
    let renderer = OverlayRenderer::default();
    let model = renderer.render(
        &[detection("big", "A", 0.9, Rect::new(0.0, 0.0, 500.0, 500.0))],
        Size::new(500.0, 500.0),
        Size::new(500.0, 500.0),
        FitPolicy::CropToFill,
    );
    assert_eq!(model.shapes[0].stroke_width, 10.0);
    assert_eq!(model.shapes[0].corner_accent, 24.0);
}

#[test]
fn test_palette_overrides_and_fallback() {
    let mut overrides = std::collections::HashMap::new();
    overrides.insert("Organik".to_string(), "#ff0000".to_string());
    overrides.insert("Broken".to_string(), "not-a-color".to_string());
    let palette = CategoryPalette::with_overrides(&overrides);

    assert_eq!(palette.color_for("organik"), Rgb([255, 0, 0]));
    assert_eq!(palette.color_for("Broken"), palette.color_for("broken"));
    assert_eq!(palette.color_for("glass"), palette.color_for("Glass"));
    assert_eq!(Rgb::from_hex("#22c55e"), Some(Rgb([34, 197, 94])));
    assert_eq!(Rgb([34, 197, 94]).to_hex(), "#22c55e");
}

#[test]
fn test_rasterize_draws_inside_display_bounds() {
    let renderer = OverlayRenderer::default();
    let model = renderer.render(
        &[detection("d1", "Organik", 0.92, Rect::new(20.0, 30.0, 40.0, 40.0))],
        Size::new(100.0, 100.0),
        Size::new(100.0, 100.0),
        FitPolicy::CropToFill,
    );

    let layer = rasterize(&model);
    assert_eq!(layer.dimensions(), (100, 100));
    // outline pixel is opaque category color
    assert_eq!(layer.get_pixel(20, 50).0, [34, 197, 94, 255]);
    // box interior stays transparent
    assert_eq!(layer.get_pixel(40, 50).0[3], 0);
    // far corner untouched
    assert_eq!(layer.get_pixel(99, 99).0[3], 0);
}

#[test]
fn test_rasterize_clips_cropped_shapes() {
    let renderer = OverlayRenderer::default();
    let model = renderer.render(
        &[detection("d1", "A", 0.5, Rect::new(0.0, 0.0, 1000.0, 1000.0))],
        Size::new(1000.0, 1000.0),
        Size::new(500.0, 1000.0),
        FitPolicy::CropToFill,
    );

    let layer = rasterize(&model);
    assert_eq!(layer.dimensions(), (500, 1000));
}

#[test]
fn test_render_on_unusable_surface_is_empty() {
    let renderer = OverlayRenderer::default();
    let surface = Size::new(0.0, 720.0);
    let model = renderer.render(
        &[detection("d1", "A", 0.5, Rect::new(0.0, 0.0, 10.0, 10.0))],
        Size::new(1280.0, 720.0),
        surface,
        FitPolicy::LetterboxToFit,
    );
    assert!(model.is_empty());
    assert_eq!(model.display, surface);
}

#[test]
fn test_rasterize_rejects_unusable_and_caps_huge_displays() {
    let infinite = rasterize(&OverlayModel::empty(Size::new(f64::INFINITY, 100.0)));
    assert_eq!(infinite.dimensions(), (0, 0));

    let nan = rasterize(&OverlayModel::empty(Size::new(640.0, f64::NAN)));
    assert_eq!(nan.dimensions(), (0, 0));

    let huge = rasterize(&OverlayModel::empty(Size::new(1e12, 10.0)));
    assert_eq!(huge.dimensions(), (MAX_RASTER_SIDE, 10));
}
