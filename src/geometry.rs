//! Source-pixel to on-screen coordinate mapping.
//!
//! Metadata boxes and keypoints are expressed in the pixel space of the
//! decoded media frame. The overlay surface covers the whole container, while
//! the media itself is displayed in a centred, possibly letterboxed box. A
//! [`DisplayMapping`] converts between the two and is recomputed on every
//! render and every container resize; it is never cached.

use kurbo::{Affine, Point, Rect, Size};

/// Native size assumed before the first frame has been decoded.
pub const DEFAULT_NATIVE_WIDTH: f64 = 640.0;
pub const DEFAULT_NATIVE_HEIGHT: f64 = 640.0;

/// Scale and letterbox offset from source-pixel space to surface space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayMapping {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl DisplayMapping {
    pub const IDENTITY: DisplayMapping = DisplayMapping {
        scale_x: 1.0,
        scale_y: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    pub fn map_point(&self, x: f64, y: f64) -> Point {
        Point::new(x * self.scale_x + self.offset_x, y * self.scale_y + self.offset_y)
    }

    /// Maps an `[x1, y1, x2, y2]` box into surface space.
    pub fn map_xyxy(&self, xyxy: [f64; 4]) -> Rect {
        let [x1, y1, x2, y2] = xyxy;
        Rect::from_points(self.map_point(x1, y1), self.map_point(x2, y2))
    }

    pub fn to_affine(&self) -> Affine {
        Affine::new([
            self.scale_x,
            0.0,
            0.0,
            self.scale_y,
            self.offset_x,
            self.offset_y,
        ])
    }
}

/// Pure mapper from native media size, displayed media box and container
/// size to a [`DisplayMapping`].
#[derive(Clone, Copy, Debug)]
pub struct GeometryMapper {
    fallback: Size,
}

impl Default for GeometryMapper {
    fn default() -> Self {
        Self {
            fallback: Size::new(DEFAULT_NATIVE_WIDTH, DEFAULT_NATIVE_HEIGHT),
        }
    }
}

impl GeometryMapper {
    /// Mapper with a custom native-size fallback. Non-positive fallback
    /// dimensions are replaced by the defaults.
    pub fn with_fallback(fallback: Size) -> Self {
        Self {
            fallback: Size::new(
                positive_or(fallback.width, DEFAULT_NATIVE_WIDTH),
                positive_or(fallback.height, DEFAULT_NATIVE_HEIGHT),
            ),
        }
    }

    pub fn fallback(&self) -> Size {
        self.fallback
    }

    /// Native size with zero, negative or non-finite axes replaced by the
    /// fallback, per axis.
    pub fn effective_native(&self, native: Option<Size>) -> Size {
        let native = native.unwrap_or(self.fallback);
        Size::new(
            positive_or(native.width, self.fallback.width),
            positive_or(native.height, self.fallback.height),
        )
    }

    /// `scale = D / W`, `offset = (C - D) / 2` on each axis.
    ///
    /// Never divides by zero: an unavailable native size falls back to the
    /// configured default, and unusable display sizes collapse to zero scale.
    pub fn map(&self, native: Option<Size>, display: Size, container: Size) -> DisplayMapping {
        let native = self.effective_native(native);
        let dw = non_negative(display.width);
        let dh = non_negative(display.height);
        let cw = finite_or_zero(container.width);
        let ch = finite_or_zero(container.height);
        DisplayMapping {
            scale_x: dw / native.width,
            scale_y: dh / native.height,
            offset_x: (cw - dw) / 2.0,
            offset_y: (ch - dh) / 2.0,
        }
    }

    /// Size of the media box when `native` is fitted, aspect preserved, into
    /// `container` (CSS `object-fit: contain`).
    pub fn fit_contain(&self, native: Option<Size>, container: Size) -> Size {
        let native = self.effective_native(native);
        let cw = non_negative(container.width);
        let ch = non_negative(container.height);
        let scale = (cw / native.width).min(ch / native.height);
        Size::new(native.width * scale, native.height * scale)
    }
}

/// Live view geometry: native media size (once known) and current
/// container size. Resizes update it in place.
#[derive(Clone, Debug)]
pub struct Viewport {
    mapper: GeometryMapper,
    native: Option<Size>,
    container: Size,
}

impl Viewport {
    pub fn new(mapper: GeometryMapper, container: Size) -> Self {
        Self {
            mapper,
            native: None,
            container,
        }
    }

    pub fn native(&self) -> Option<Size> {
        self.native
    }

    pub fn container(&self) -> Size {
        self.container
    }

    pub fn set_native(&mut self, native: Size) {
        if native.width > 0.0 && native.height > 0.0 {
            self.native = Some(native);
        }
    }

    pub fn clear_native(&mut self) {
        self.native = None;
    }

    pub fn resize(&mut self, container: Size) {
        self.container = container;
    }

    /// Displayed media box, centred in the container.
    pub fn display_box(&self) -> Rect {
        let display = self.mapper.fit_contain(self.native, self.container);
        let x0 = (self.container.width - display.width) / 2.0;
        let y0 = (self.container.height - display.height) / 2.0;
        Rect::from_origin_size((x0, y0), display)
    }

    /// Mapping for the current instant.
    pub fn mapping(&self) -> DisplayMapping {
        let display = self.mapper.fit_contain(self.native, self.container);
        self.mapper.map(self.native, display, self.container)
    }

    /// Whether `point` lies on the overlay surface (edges inclusive).
    pub fn contains(&self, point: Point) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x <= self.container.width
            && point.y <= self.container.height
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn letterbox_identity_holds() {
        let mapper = GeometryMapper::default();
        let cases = [
            (1920.0, 1080.0, 800.0, 450.0, 800.0, 600.0),
            (640.0, 480.0, 320.0, 240.0, 1000.0, 240.0),
            (17.0, 3.0, 5.0, 1.0, 5.5, 9.25),
            (1280.0, 720.0, 1280.0, 720.0, 1280.0, 720.0),
        ];
        for (w, h, dw, dh, cw, ch) in cases {
            let m = mapper.map(
                Some(Size::new(w, h)),
                Size::new(dw, dh),
                Size::new(cw, ch),
            );
            assert!((m.scale_x * w - dw).abs() < EPS);
            assert!((m.scale_y * h - dh).abs() < EPS);
            assert!((m.offset_x + dw + m.offset_x - cw).abs() < EPS);
            assert!((m.offset_y + dh + m.offset_y - ch).abs() < EPS);
        }
    }

    #[test]
    fn zero_native_falls_back_to_default() {
        let mapper = GeometryMapper::default();
        for native in [
            None,
            Some(Size::new(0.0, 0.0)),
            Some(Size::new(0.0, 480.0)),
            Some(Size::new(f64::NAN, 0.0)),
        ] {
            let m = mapper.map(native, Size::new(320.0, 320.0), Size::new(400.0, 320.0));
            assert!(m.scale_x.is_finite() && m.scale_x >= 0.0);
            assert!(m.scale_y.is_finite() && m.scale_y >= 0.0);
        }
        let m = mapper.map(None, Size::new(320.0, 320.0), Size::new(320.0, 320.0));
        assert!((m.scale_x - 0.5).abs() < EPS);
    }

    #[test]
    fn zero_display_collapses_to_zero_scale() {
        let m = GeometryMapper::default().map(
            Some(Size::new(640.0, 480.0)),
            Size::ZERO,
            Size::new(100.0, 100.0),
        );
        assert_eq!(m.scale_x, 0.0);
        assert_eq!(m.scale_y, 0.0);
        assert_eq!(m.offset_x, 50.0);
    }

    #[test]
    fn fit_contain_pillarboxes_wide_container() {
        let mapper = GeometryMapper::default();
        let display = mapper.fit_contain(Some(Size::new(640.0, 480.0)), Size::new(1000.0, 480.0));
        assert!((display.width - 640.0).abs() < EPS);
        assert!((display.height - 480.0).abs() < EPS);
    }

    #[test]
    fn viewport_mapping_tracks_resizes() {
        let mut viewport = Viewport::new(GeometryMapper::default(), Size::new(800.0, 600.0));
        viewport.set_native(Size::new(1600.0, 900.0));
        let before = viewport.mapping();
        assert!((before.scale_x - 0.5).abs() < EPS);
        assert!((before.offset_y - 75.0).abs() < EPS);

        viewport.resize(Size::new(400.0, 400.0));
        let after = viewport.mapping();
        assert!((after.scale_x - 0.25).abs() < EPS);
        assert!((after.offset_y - (400.0 - 225.0) / 2.0).abs() < EPS);

        let p = after.map_point(1600.0, 900.0);
        assert!((p.x - 400.0).abs() < EPS);
        assert!((p.y - (after.offset_y + 225.0)).abs() < EPS);
    }

    #[test]
    fn affine_agrees_with_map_point() {
        let m = DisplayMapping {
            scale_x: 0.5,
            scale_y: 2.0,
            offset_x: 10.0,
            offset_y: -4.0,
        };
        let via_affine = m.to_affine() * Point::new(8.0, 3.0);
        assert_eq!(via_affine, m.map_point(8.0, 3.0));
    }
}
