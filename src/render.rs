//! Annotation renderer.
//!
//! Every metadata message fully replaces the drawn primitives: the surface
//! is cleared, boxes and skeletons are redrawn from the message alone, and
//! the result is presented. Duplicated or out-of-order messages therefore
//! can never leave stale shapes behind.

use image::Rgba;
use kurbo::{Point, Rect};

use crate::geometry::DisplayMapping;
use crate::metadata::{DetectionBox, MetadataFrame, Pose};
use crate::skeleton::{self, rgb, BLACK, CONNECTIONS, WHITE};
use crate::surface::{DrawSurface, Primitive};

/// Box colours, indexed by `cls mod len`.
pub const BOX_PALETTE: [Rgba<u8>; 5] = [
    rgb(0x00, 0xf2, 0xff),
    rgb(0x70, 0x00, 0xff),
    rgb(0x00, 0xff, 0x9d),
    rgb(0xff, 0xbd, 0x2e),
    rgb(0xff, 0x00, 0x55),
];

pub const KEYPOINT_CONFIDENCE: f64 = 0.5;

pub const STROKE_WIDTH: f64 = 2.0;
pub const HOVER_STROKE_WIDTH: f64 = 4.0;
pub const HOVER_GLOW: f64 = 15.0;
/// Vertical gap between a hovered box and its label.
pub const LABEL_LIFT: f64 = 10.0;
pub const LIMB_WIDTH: f64 = 3.0;
pub const MARKER_RADIUS: f64 = 4.0;

pub fn box_color(cls: i64) -> Rgba<u8> {
    BOX_PALETTE[cls.rem_euclid(BOX_PALETTE.len() as i64) as usize]
}

pub struct AnnotationRenderer<S: DrawSurface> {
    surface: S,
    active: bool,
    caption: Option<String>,
    frames_drawn: u64,
}

impl<S: DrawSurface> AnnotationRenderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            active: false,
            caption: None,
            frames_drawn: 0,
        }
    }

    /// One-time surface initialisation, run when the first media frame
    /// decodes. Later calls are no-ops.
    pub fn activate(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.surface.clear();
        self.surface.present();
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Caption currently shown, kept until a message carries a new one.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Clears and redraws the overlay for one metadata message.
    ///
    /// Caption updates apply even before activation; shapes are only drawn
    /// once the surface exists.
    pub fn draw_metadata(
        &mut self,
        frame: &MetadataFrame,
        mapping: &DisplayMapping,
        pointer: Option<Point>,
    ) {
        if let Some(caption) = frame.caption_text() {
            self.caption = Some(caption.to_string());
        }
        if !self.active {
            return;
        }

        self.surface.clear();
        let pointer = pointer.filter(|p| self.on_surface(*p));

        for det in frame.boxes.iter().flatten() {
            self.draw_box(frame, det, mapping, pointer);
        }
        for pose in frame.poses.iter().flatten() {
            self.draw_pose(pose, mapping);
        }

        self.surface.present();
        self.frames_drawn += 1;
    }

    fn on_surface(&self, p: Point) -> bool {
        let size = self.surface.size();
        p.x >= 0.0 && p.y >= 0.0 && p.x <= size.width && p.y <= size.height
    }

    fn draw_box(
        &mut self,
        frame: &MetadataFrame,
        det: &DetectionBox,
        mapping: &DisplayMapping,
        pointer: Option<Point>,
    ) {
        let rect = mapping.map_xyxy(det.xyxy);
        let color = box_color(det.cls);
        let hovered = pointer.is_some_and(|p| contains_inclusive(rect, p));

        self.surface.add_primitive(Primitive::Outline {
            rect,
            stroke: color,
            stroke_width: if hovered { HOVER_STROKE_WIDTH } else { STROKE_WIDTH },
            glow: if hovered { HOVER_GLOW } else { 0.0 },
        });
        if hovered {
            self.surface.add_primitive(Primitive::Label {
                anchor: Point::new(rect.x0, rect.y0 - LABEL_LIFT),
                text: box_label(frame, det),
                fill: color,
                text_color: BLACK,
            });
        }
    }

    fn draw_pose(&mut self, pose: &Pose, mapping: &DisplayMapping) {
        let kpts = &pose.keypoints;
        for conn in CONNECTIONS {
            let (Some(a), Some(b)) = (kpts.get(conn.from), kpts.get(conn.to)) else {
                continue;
            };
            if a.confidence > KEYPOINT_CONFIDENCE && b.confidence > KEYPOINT_CONFIDENCE {
                self.surface.add_primitive(Primitive::Segment {
                    from: mapping.map_point(a.x, a.y),
                    to: mapping.map_point(b.x, b.y),
                    stroke: conn.color,
                    width: LIMB_WIDTH,
                });
            }
        }
        for (idx, kp) in kpts.iter().enumerate() {
            if kp.confidence > KEYPOINT_CONFIDENCE {
                self.surface.add_primitive(Primitive::Marker {
                    center: mapping.map_point(kp.x, kp.y),
                    radius: MARKER_RADIUS,
                    fill: skeleton::keypoint_color(idx),
                    outline: WHITE,
                });
            }
        }
    }

    /// Resizes the existing surface in place.
    pub fn resize(&mut self, size: kurbo::Size) {
        self.surface.resize(size);
    }
}

/// `"<class> 0.87"`, or `"<class> #<id> 0.87"` for tracked objects.
pub fn box_label(frame: &MetadataFrame, det: &DetectionBox) -> String {
    let name = frame.class_label(det.cls);
    match det.id {
        Some(id) => format!("{} #{} {:.2}", name, id, det.conf),
        None => format!("{} {:.2}", name, det.conf),
    }
}

fn contains_inclusive(rect: Rect, p: Point) -> bool {
    p.x >= rect.x0 && p.x <= rect.x1 && p.y >= rect.y0 && p.y <= rect.y1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Keypoint;
    use crate::surface::SceneSurface;
    use kurbo::Size;
    use std::collections::BTreeMap;

    fn renderer() -> AnnotationRenderer<SceneSurface> {
        let mut r = AnnotationRenderer::new(SceneSurface::new(Size::new(640.0, 480.0)));
        r.activate();
        r
    }

    fn single_box(cls: i64, id: Option<i64>) -> MetadataFrame {
        MetadataFrame {
            boxes: Some(vec![DetectionBox {
                xyxy: [0.0, 0.0, 100.0, 100.0],
                cls,
                id,
                conf: 0.87,
            }]),
            ..MetadataFrame::default()
        }
    }

    #[test]
    fn hovered_box_gets_thick_outline_and_label() {
        let mut r = renderer();
        r.draw_metadata(&single_box(0, None), &DisplayMapping::IDENTITY, Some(Point::new(50.0, 50.0)));
        let prims = r.surface().primitives();
        assert_eq!(prims.len(), 2);
        assert!(matches!(prims[0], Primitive::Outline { stroke_width, .. } if stroke_width == HOVER_STROKE_WIDTH));
        match &prims[1] {
            Primitive::Label { text, anchor, .. } => {
                assert_eq!(text, "0 0.87");
                assert_eq!(*anchor, Point::new(0.0, -LABEL_LIFT));
            }
            other => panic!("expected label, got {:?}", other),
        }
    }

    #[test]
    fn pointer_off_box_renders_plain_outline() {
        let mut r = renderer();
        r.draw_metadata(&single_box(0, None), &DisplayMapping::IDENTITY, Some(Point::new(500.0, 500.0)));
        let prims = r.surface().primitives();
        assert_eq!(prims.len(), 1);
        assert!(matches!(prims[0], Primitive::Outline { stroke_width, glow, .. } if stroke_width == STROKE_WIDTH && glow == 0.0));
    }

    #[test]
    fn pointer_outside_surface_never_hovers() {
        let mut r = AnnotationRenderer::new(SceneSurface::new(Size::new(50.0, 50.0)));
        r.activate();
        r.draw_metadata(&single_box(0, None), &DisplayMapping::IDENTITY, Some(Point::new(75.0, 20.0)));
        assert_eq!(r.surface().primitives().len(), 1);
    }

    #[test]
    fn label_uses_class_name_and_track_id() {
        let mut frame = single_box(2, Some(14));
        frame.class_names = Some(BTreeMap::from([(2, "car".to_string())]));
        let det = &frame.boxes.as_ref().unwrap()[0];
        assert_eq!(box_label(&frame, det), "car #14 0.87");
    }

    #[test]
    fn colour_is_stable_per_class() {
        assert_eq!(box_color(0), box_color(5));
        assert_eq!(box_color(-1), BOX_PALETTE[4]);
        assert_ne!(box_color(1), box_color(2));
    }

    #[test]
    fn low_confidence_keypoint_drops_marker_and_segment() {
        let mut r = renderer();
        let mut keypoints = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                confidence: 0.0
            };
            17
        ];
        keypoints[0] = Keypoint {
            x: 10.0,
            y: 10.0,
            confidence: 0.9,
        };
        keypoints[1] = Keypoint {
            x: 20.0,
            y: 10.0,
            confidence: 0.3,
        };
        let frame = MetadataFrame {
            poses: Some(vec![Pose {
                keypoints,
                id: None,
                bbox: None,
            }]),
            ..MetadataFrame::default()
        };
        r.draw_metadata(&frame, &DisplayMapping::IDENTITY, None);
        let prims = r.surface().primitives();
        assert_eq!(prims.len(), 1);
        assert!(matches!(prims[0], Primitive::Marker { center, .. } if center == Point::new(10.0, 10.0)));
    }

    #[test]
    fn caption_is_sticky_across_messages() {
        let mut r = renderer();
        let with_caption = MetadataFrame {
            caption: Some("dog".to_string()),
            ..MetadataFrame::default()
        };
        r.draw_metadata(&with_caption, &DisplayMapping::IDENTITY, None);
        r.draw_metadata(&MetadataFrame::default(), &DisplayMapping::IDENTITY, None);
        assert_eq!(r.caption(), Some("dog"));
    }

    #[test]
    fn each_message_replaces_previous_shapes() {
        let mut r = renderer();
        r.draw_metadata(&single_box(0, None), &DisplayMapping::IDENTITY, None);
        r.draw_metadata(&single_box(0, None), &DisplayMapping::IDENTITY, None);
        assert_eq!(r.surface().primitives().len(), 1);
        r.draw_metadata(&MetadataFrame::default(), &DisplayMapping::IDENTITY, None);
        assert!(r.surface().primitives().is_empty());
        assert_eq!(r.frames_drawn(), 3);
    }

    #[test]
    fn inactive_renderer_keeps_caption_but_draws_nothing() {
        let mut r = AnnotationRenderer::new(SceneSurface::new(Size::new(640.0, 480.0)));
        let mut frame = single_box(0, None);
        frame.caption = Some("warming up".to_string());
        r.draw_metadata(&frame, &DisplayMapping::IDENTITY, None);
        assert_eq!(r.caption(), Some("warming up"));
        assert_eq!(r.surface().present_count(), 0);
    }

    #[test]
    fn mapping_applies_letterbox_offset() {
        let mut r = renderer();
        let mapping = DisplayMapping {
            scale_x: 0.5,
            scale_y: 0.5,
            offset_x: 20.0,
            offset_y: 0.0,
        };
        r.draw_metadata(&single_box(0, None), &mapping, Some(Point::new(60.0, 40.0)));
        match &r.surface().primitives()[0] {
            Primitive::Outline { rect, stroke_width, .. } => {
                assert_eq!(*rect, Rect::new(20.0, 0.0, 70.0, 50.0));
                assert_eq!(*stroke_width, HOVER_STROKE_WIDTH);
            }
            other => panic!("expected outline, got {:?}", other),
        }
    }
}
