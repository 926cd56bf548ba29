//! Retained drawable surfaces.
//!
//! The renderer only needs three operations: `clear`, `add_primitive` and
//! `present`. [`SceneSurface`] keeps the primitives as a scene list for
//! embedding hosts and tests; [`RasterSurface`] composites them over the
//! latest media frame into an RGBA image.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{Rgba, RgbaImage};
use kurbo::{Point, Rect, Size};
use tiny_skia::{
    self as skia, Color, FillRule, FilterQuality, IntSize, LineCap, LineJoin, Paint, PathBuilder,
    Pixmap, PixmapPaint, Stroke, Transform,
};

/// Width of one glyph in the monospace label font, used to size label tags.
pub const LABEL_GLYPH_WIDTH: f64 = 8.4;
pub const LABEL_HEIGHT: f64 = 24.0;
pub const LABEL_PADDING: f64 = 5.0;
/// Opacity of the halo stroked under a glowing outline.
const GLOW_ALPHA: u8 = 0x60;

#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    /// Stroked, unfilled rectangle.
    Outline {
        rect: Rect,
        stroke: Rgba<u8>,
        stroke_width: f64,
        glow: f64,
    },
    /// Text tag whose bottom edge sits on `anchor`.
    Label {
        anchor: Point,
        text: String,
        fill: Rgba<u8>,
        text_color: Rgba<u8>,
    },
    Segment {
        from: Point,
        to: Point,
        stroke: Rgba<u8>,
        width: f64,
    },
    Marker {
        center: Point,
        radius: f64,
        fill: Rgba<u8>,
        outline: Rgba<u8>,
    },
}

impl Primitive {
    pub fn label_rect(anchor: Point, text: &str) -> Rect {
        let width = text.chars().count() as f64 * LABEL_GLYPH_WIDTH + 2.0 * LABEL_PADDING;
        Rect::new(anchor.x, anchor.y - LABEL_HEIGHT, anchor.x + width, anchor.y)
    }
}

pub trait DrawSurface {
    /// Drops every primitive added since the last present.
    fn clear(&mut self);

    fn add_primitive(&mut self, primitive: Primitive);

    /// Makes the current primitive set visible.
    fn present(&mut self);

    /// Reconfigures the surface in place for a new container size.
    fn resize(&mut self, size: Size);

    fn size(&self) -> Size;

    /// Latest media frame and where it is displayed. Surfaces that do not
    /// composite the media ignore it.
    fn set_backdrop(&mut self, _frame: RgbaImage, _display: Rect) {}
}

/// Scene-list surface. `primitives()` is what is currently on screen.
#[derive(Debug, Default)]
pub struct SceneSurface {
    size: Size,
    pending: Vec<Primitive>,
    visible: Vec<Primitive>,
    presents: u64,
}

impl SceneSurface {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.visible
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }
}

impl DrawSurface for SceneSurface {
    fn clear(&mut self) {
        self.pending.clear();
    }

    fn add_primitive(&mut self, primitive: Primitive) {
        self.pending.push(primitive);
    }

    fn present(&mut self) {
        self.visible = self.pending.clone();
        self.presents += 1;
    }

    fn resize(&mut self, size: Size) {
        self.size = size;
    }

    fn size(&self) -> Size {
        self.size
    }
}

/// Software compositor over the latest decoded frame.
#[derive(Debug)]
pub struct RasterSurface {
    size: Size,
    background: Option<(Pixmap, Rect)>,
    primitives: Vec<Primitive>,
    canvas: RgbaImage,
}

impl RasterSurface {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            background: None,
            primitives: Vec::new(),
            canvas: blank_canvas(size),
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.canvas
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write snapshot {}", path.display()))
    }

    fn composite(&mut self) -> Result<()> {
        let (w, h) = pixel_size(self.size);
        let mut pixmap =
            Pixmap::new(w, h).ok_or_else(|| anyhow!("failed to allocate {}x{} canvas", w, h))?;
        pixmap.fill(Color::BLACK);
        if let Some((frame, display)) = &self.background {
            let sx = display.width() / frame.width().max(1) as f64;
            let sy = display.height() / frame.height().max(1) as f64;
            let paint = PixmapPaint {
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            pixmap.draw_pixmap(
                0,
                0,
                frame.as_ref(),
                &paint,
                Transform::from_row(
                    sx as f32,
                    0.0,
                    0.0,
                    sy as f32,
                    display.x0 as f32,
                    display.y0 as f32,
                ),
                None,
            );
        }
        for primitive in &self.primitives {
            rasterize(&mut pixmap, primitive);
        }
        self.canvas = to_rgba_image(&pixmap);
        Ok(())
    }
}

impl DrawSurface for RasterSurface {
    fn clear(&mut self) {
        self.primitives.clear();
    }

    fn add_primitive(&mut self, primitive: Primitive) {
        self.primitives.push(primitive);
    }

    fn present(&mut self) {
        if let Err(err) = self.composite() {
            log::warn!("raster composite skipped: {:#}", err);
        }
    }

    fn resize(&mut self, size: Size) {
        self.size = size;
        self.canvas = blank_canvas(size);
    }

    fn size(&self) -> Size {
        self.size
    }

    fn set_backdrop(&mut self, frame: RgbaImage, display: Rect) {
        match to_pixmap(frame) {
            Some(pixmap) => self.background = Some((pixmap, display)),
            None => log::debug!("empty media frame ignored"),
        }
    }
}

fn pixel_size(size: Size) -> (u32, u32) {
    (
        size.width.max(1.0).round() as u32,
        size.height.max(1.0).round() as u32,
    )
}

fn blank_canvas(size: Size) -> RgbaImage {
    let (w, h) = pixel_size(size);
    RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0xff]))
}

/// Decoded frames are opaque, so straight and premultiplied RGBA agree
/// except where alpha is below 255.
fn to_pixmap(frame: RgbaImage) -> Option<Pixmap> {
    let size = IntSize::from_wh(frame.width(), frame.height())?;
    let mut data = frame.into_raw();
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a < 255 {
            for c in &mut px[..3] {
                *c = ((*c as u16 * a + 127) / 255) as u8;
            }
        }
    }
    Pixmap::from_vec(data, size)
}

fn to_rgba_image(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    image
}

fn paint(color: Rgba<u8>, alpha: u8) -> Paint<'static> {
    let mut paint = Paint::default();
    let a = (color[3] as u16 * alpha as u16 / 255) as u8;
    paint.set_color_rgba8(color[0], color[1], color[2], a);
    paint.anti_alias = true;
    paint
}

fn stroke(width: f64) -> Stroke {
    Stroke {
        width: width.max(0.5) as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Miter,
        ..Stroke::default()
    }
}

fn to_skia_rect(rect: Rect) -> Option<skia::Rect> {
    let rect = rect.abs();
    skia::Rect::from_ltrb(rect.x0 as f32, rect.y0 as f32, rect.x1 as f32, rect.y1 as f32)
}

fn rasterize(pixmap: &mut Pixmap, primitive: &Primitive) {
    let identity = Transform::identity();
    match primitive {
        Primitive::Outline {
            rect,
            stroke: color,
            stroke_width,
            glow,
        } => {
            let Some(path) = to_skia_rect(*rect).map(PathBuilder::from_rect) else {
                return;
            };
            if *glow > 0.0 {
                pixmap.stroke_path(
                    &path,
                    &paint(*color, GLOW_ALPHA),
                    &stroke(stroke_width + glow),
                    identity,
                    None,
                );
            }
            pixmap.stroke_path(&path, &paint(*color, 255), &stroke(*stroke_width), identity, None);
        }
        Primitive::Label { anchor, text, fill, .. } => {
            if let Some(rect) = to_skia_rect(Primitive::label_rect(*anchor, text)) {
                pixmap.fill_rect(rect, &paint(*fill, 255), identity, None);
            }
        }
        Primitive::Segment {
            from,
            to,
            stroke: color,
            width,
        } => {
            let mut pb = PathBuilder::new();
            pb.move_to(from.x as f32, from.y as f32);
            pb.line_to(to.x as f32, to.y as f32);
            if let Some(path) = pb.finish() {
                pixmap.stroke_path(&path, &paint(*color, 255), &stroke(*width), identity, None);
            }
        }
        Primitive::Marker {
            center,
            radius,
            fill,
            outline,
        } => {
            let (cx, cy) = (center.x as f32, center.y as f32);
            for (r, color) in [(*radius + 1.5, *outline), (*radius, *fill)] {
                if let Some(path) = PathBuilder::from_circle(cx, cy, r as f32) {
                    pixmap.fill_path(&path, &paint(color, 255), FillRule::Winding, identity, None);
                }
            }
        }
    }
}
