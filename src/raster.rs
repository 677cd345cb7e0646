//! Raster capture of a resolved document.
//!
//! A [`Rasterizer`] turns the print markup (or the model behind it) into one
//! tall image holding every natural page stacked top to bottom, the way a
//! browser capture of the print document would look. [`collapse_to_single_page`]
//! then reduces that to exactly one page.

use std::path::PathBuf;

use image::{Rgba, RgbaImage, imageops};
use ttf_parser::{GlyphId, OutlineBuilder};

use crate::assets::ImageCache;
use crate::cancel::CancellationToken;
use crate::color::Color;
use crate::error::Error;
use crate::fonts::{FontSet, LoadedFont, to_winansi_bytes, winansi_to_char};
use crate::layout::Item;
use crate::model::DocumentModel;
use crate::page::CSS_DPI;
use crate::scene::{Layer, Scene, compose};

pub const DEFAULT_RASTER_DPI: f32 = 150.0;

/// Sub-scanlines per device pixel row.
const SAMPLES: usize = 4;
/// Line segments per curve when flattening glyph outlines.
const CURVE_STEPS: usize = 8;

pub struct RasterRequest {
    /// Standalone print markup of `model`.
    pub html: String,
    /// The resolved model the markup was rendered from.
    pub model: DocumentModel,
    pub dpi: f32,
    /// Directory relative image paths are resolved against.
    pub base: Option<PathBuf>,
    /// Raised when the export is abandoned; checked between pages and layers.
    pub cancel: CancellationToken,
}

pub trait Rasterizer: Send + Sync {
    /// Captures the whole document as one image, pages stacked vertically,
    /// each `page_device_px(dpi)` in size.
    fn rasterize(&self, request: &RasterRequest) -> Result<RgbaImage, Error>;
}

/// Paints the model directly: background, floating objects, flowed content,
/// then the images wrapped in front of the text.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModelRasterizer;

impl Rasterizer for ModelRasterizer {
    fn rasterize(&self, request: &RasterRequest) -> Result<RgbaImage, Error> {
        let t0 = std::time::Instant::now();
        let fonts = FontSet::load(&request.model.font_family, true);
        let cache = ImageCache::new(request.base.as_deref());
        let scene = compose(&request.model, &fonts, &cache);
        let image = paint(&scene, &fonts, &cache, request.dpi, &request.cancel)?;
        log::info!(
            "Rasterized {} pages at {} dpi ({}x{}) in {:.1}ms",
            scene.page_count(),
            request.dpi,
            image.width(),
            image.height(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(image)
    }
}

/// Scales `image` to the page width, then crops or pads the bottom to exactly
/// one page. Overflow beyond the first page is dropped.
pub fn collapse_to_single_page(image: &RgbaImage, page: (u32, u32)) -> RgbaImage {
    let (page_w, page_h) = (page.0.max(1), page.1.max(1));
    let scaled;
    let source = if image.width() == page_w || image.width() == 0 {
        image
    } else {
        let height = (f64::from(image.height()) * f64::from(page_w) / f64::from(image.width()))
            .round()
            .max(1.0) as u32;
        scaled = imageops::resize(image, page_w, height, imageops::FilterType::Triangle);
        &scaled
    };

    let mut out = RgbaImage::from_pixel(page_w, page_h, Rgba([255, 255, 255, 255]));
    let copy_h = source.height().min(page_h);
    if source.width() > 0 && copy_h > 0 {
        let top = imageops::crop_imm(source, 0, 0, source.width().min(page_w), copy_h).to_image();
        imageops::overlay(&mut out, &top, 0, 0);
    }
    out
}

/// Device-space clip rectangle.
#[derive(Clone, Copy)]
struct Clip {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

struct Canvas {
    image: RgbaImage,
    /// Device pixels per CSS pixel.
    scale: f32,
    /// Device position of the printable box on the current page.
    origin_x: f32,
    origin_y: f32,
    clip: Option<Clip>,
}

impl Canvas {
    fn dx(&self, px: f32) -> f32 {
        self.origin_x + px * self.scale
    }

    fn dy(&self, px: f32) -> f32 {
        self.origin_y + px * self.scale
    }

    fn blend(&mut self, x: u32, y: u32, color: Color, alpha: f32) {
        if alpha <= 0.0 || x >= self.image.width() || y >= self.image.height() {
            return;
        }
        if let Some(clip) = self.clip {
            let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
            if fx < clip.x0 || fx > clip.x1 || fy < clip.y0 || fy > clip.y1 {
                return;
            }
        }
        let a = (alpha * color.alpha()).clamp(0.0, 1.0);
        let dst = self.image.get_pixel_mut(x, y);
        for (channel, src) in dst.0.iter_mut().take(3).zip([color.r, color.g, color.b]) {
            *channel = (f32::from(src) * a + f32::from(*channel) * (1.0 - a)).round() as u8;
        }
    }

    /// Fills a device-space box with fractional edge coverage.
    fn fill_box(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, color: Color) {
        let (w, h) = (self.image.width() as f32, self.image.height() as f32);
        let (x0, x1) = (x0.max(0.0), x1.min(w));
        let (y0, y1) = (y0.max(0.0), y1.min(h));
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        for y in y0.floor() as u32..y1.ceil() as u32 {
            let cover_y = (y1.min(y as f32 + 1.0) - y0.max(y as f32)).clamp(0.0, 1.0);
            for x in x0.floor() as u32..x1.ceil() as u32 {
                let cover_x = (x1.min(x as f32 + 1.0) - x0.max(x as f32)).clamp(0.0, 1.0);
                self.blend(x, y, color, cover_x * cover_y);
            }
        }
    }

    /// Scanline fill of closed polygons with the nonzero winding rule.
    fn fill_path(&mut self, edges: &[Edge], color: Color) {
        if edges.is_empty() {
            return;
        }
        let y_min = edges.iter().map(|e| e.y0.min(e.y1)).fold(f32::MAX, f32::min).max(0.0);
        let y_max = edges
            .iter()
            .map(|e| e.y0.max(e.y1))
            .fold(f32::MIN, f32::max)
            .min(self.image.height() as f32);
        let x_min = edges.iter().map(|e| e.x0.min(e.x1)).fold(f32::MAX, f32::min).max(0.0);
        let x_max = edges
            .iter()
            .map(|e| e.x0.max(e.x1))
            .fold(f32::MIN, f32::max)
            .min(self.image.width() as f32);
        if y_max <= y_min || x_max <= x_min {
            return;
        }

        let left = x_min.floor() as usize;
        let mut coverage = vec![0.0f32; x_max.ceil() as usize - left + 1];
        let mut crossings: Vec<(f32, i32)> = Vec::new();
        for y in y_min.floor() as u32..y_max.ceil() as u32 {
            coverage.iter_mut().for_each(|c| *c = 0.0);
            for sample in 0..SAMPLES {
                let sy = y as f32 + (sample as f32 + 0.5) / SAMPLES as f32;
                crossings.clear();
                for edge in edges {
                    if let Some(crossing) = edge.crossing(sy) {
                        crossings.push(crossing);
                    }
                }
                crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
                let mut winding = 0;
                for pair in crossings.windows(2) {
                    winding += pair[0].1;
                    if winding == 0 {
                        continue;
                    }
                    let (xa, xb) = (pair[0].0.max(x_min), pair[1].0.min(x_max));
                    if xb <= xa {
                        continue;
                    }
                    for x in xa.floor() as usize..xb.ceil() as usize {
                        let overlap = xb.min(x as f32 + 1.0) - xa.max(x as f32);
                        if let Some(slot) = coverage.get_mut(x - left) {
                            *slot += overlap.max(0.0) / SAMPLES as f32;
                        }
                    }
                }
            }
            for (i, c) in coverage.iter().enumerate() {
                if *c > 0.0 {
                    self.blend((left + i) as u32, y, color, c.min(1.0));
                }
            }
        }
    }

    /// Draws `source` scaled into a device-space box.
    fn draw_image(&mut self, source: &RgbaImage, x: f32, y: f32, w: f32, h: f32, opacity: f32) {
        let (tw, th) = (w.round().max(1.0) as u32, h.round().max(1.0) as u32);
        if tw > self.image.width() * 4 || th > self.image.height() * 4 {
            return;
        }
        let scaled = imageops::resize(source, tw, th, imageops::FilterType::Triangle);
        let (ox, oy) = (x.round() as i64, y.round() as i64);
        for (sx, sy, pixel) in scaled.enumerate_pixels() {
            let (px, py) = (ox + i64::from(sx), oy + i64::from(sy));
            if px < 0 || py < 0 {
                continue;
            }
            let color = Color::rgb(pixel.0[0], pixel.0[1], pixel.0[2]);
            let alpha = f32::from(pixel.0[3]) / 255.0 * opacity;
            self.blend(px as u32, py as u32, color, alpha);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl Edge {
    /// Where the edge crosses the horizontal line `y`, with its winding direction.
    fn crossing(&self, y: f32) -> Option<(f32, i32)> {
        let (top, bottom, dir) = if self.y0 < self.y1 {
            (self.y0, self.y1, 1)
        } else {
            (self.y1, self.y0, -1)
        };
        if y < top || y >= bottom || top == bottom {
            return None;
        }
        let t = (y - self.y0) / (self.y1 - self.y0);
        Some((self.x0 + t * (self.x1 - self.x0), dir))
    }
}

/// Flattens a glyph outline into device-space edges.
struct GlyphPath {
    edges: Vec<Edge>,
    start: (f32, f32),
    current: (f32, f32),
    /// Font units -> device pixels.
    scale: f32,
    x: f32,
    baseline: f32,
}

impl GlyphPath {
    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.scale, self.baseline - y * self.scale)
    }

    fn line(&mut self, to: (f32, f32)) {
        let from = self.current;
        if from != to {
            self.edges.push(Edge {
                x0: from.0,
                y0: from.1,
                x1: to.0,
                y1: to.1,
            });
        }
        self.current = to;
    }
}

impl OutlineBuilder for GlyphPath {
    fn move_to(&mut self, x: f32, y: f32) {
        let p = self.point(x, y);
        self.start = p;
        self.current = p;
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let p = self.point(x, y);
        self.line(p);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (p0, c, p1) = (self.current, self.point(x1, y1), self.point(x, y));
        for step in 1..=CURVE_STEPS {
            let t = step as f32 / CURVE_STEPS as f32;
            let u = 1.0 - t;
            self.line((
                u * u * p0.0 + 2.0 * u * t * c.0 + t * t * p1.0,
                u * u * p0.1 + 2.0 * u * t * c.1 + t * t * p1.1,
            ));
        }
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (p0, c1, c2, p1) = (
            self.current,
            self.point(x1, y1),
            self.point(x2, y2),
            self.point(x, y),
        );
        for step in 1..=CURVE_STEPS {
            let t = step as f32 / CURVE_STEPS as f32;
            let u = 1.0 - t;
            let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
            self.line((
                a * p0.0 + b * c1.0 + c * c2.0 + d * p1.0,
                a * p0.1 + b * c1.1 + c * c2.1 + d * p1.1,
            ));
        }
    }

    fn close(&mut self) {
        let start = self.start;
        self.line(start);
    }
}

fn draw_text(canvas: &mut Canvas, font: &LoadedFont, x: f32, baseline: f32, text: &str, size: f32) {
    let Some(face) = font.face() else {
        return;
    };
    let size_dev = size * canvas.scale;
    let mut path = GlyphPath {
        edges: Vec::new(),
        start: (0.0, 0.0),
        current: (0.0, 0.0),
        scale: size_dev / f32::from(face.units_per_em()),
        x: canvas.dx(x),
        baseline: canvas.dy(baseline),
    };
    for byte in to_winansi_bytes(text) {
        if byte < 32 {
            continue;
        }
        let glyph = face.glyph_index(winansi_to_char(byte)).unwrap_or(GlyphId(0));
        face.outline_glyph(glyph, &mut path);
        path.x += font.widths_1000[(byte - 32) as usize] / 1000.0 * size_dev;
    }
    let edges = std::mem::take(&mut path.edges);
    canvas.fill_path(&edges, Color::BLACK);
}

fn draw_items(canvas: &mut Canvas, items: &[Item], fonts: &FontSet, images: &ImageCache) {
    for item in items {
        match item {
            Item::Text {
                x,
                baseline,
                text,
                size,
                style,
                ..
            } => draw_text(canvas, fonts.variant(*style), *x, *baseline, text, *size),
            Item::Rule {
                x,
                y,
                width,
                height,
            } => {
                let (x0, y0) = (canvas.dx(*x), canvas.dy(*y));
                let (w, h) = (width * canvas.scale, (height * canvas.scale).max(1.0));
                canvas.fill_box(x0, y0, x0 + w, y0 + h, Color::BLACK);
            }
            Item::Image {
                x,
                y,
                width,
                height,
                src,
            } => {
                let Some(decoded) = images.get(src).and_then(|asset| asset.decode().ok()) else {
                    continue;
                };
                let (dx, dy) = (canvas.dx(*x), canvas.dy(*y));
                canvas.draw_image(
                    &decoded,
                    dx,
                    dy,
                    width * canvas.scale,
                    height * canvas.scale,
                    1.0,
                );
            }
        }
    }
}

fn draw_layer(canvas: &mut Canvas, layer: &Layer, fonts: &FontSet, images: &ImageCache) {
    match layer {
        Layer::Box {
            x,
            y,
            width,
            height,
            fill,
            border,
            items,
        } => {
            let (x0, y0) = (canvas.dx(*x), canvas.dy(*y));
            let (x1, y1) = (canvas.dx(x + width), canvas.dy(y + height));
            if let Some(fill) = fill {
                canvas.fill_box(x0, y0, x1, y1, *fill);
            }
            if let Some((color, line)) = border {
                let b = line * canvas.scale;
                canvas.fill_box(x0, y0, x1, y0 + b, *color);
                canvas.fill_box(x0, y1 - b, x1, y1, *color);
                canvas.fill_box(x0, y0 + b, x0 + b, y1 - b, *color);
                canvas.fill_box(x1 - b, y0 + b, x1, y1 - b, *color);
            }
            canvas.clip = Some(Clip { x0, y0, x1, y1 });
            draw_items(canvas, items, fonts, images);
            canvas.clip = None;
        }
        Layer::Flow(items) => draw_items(canvas, items, fonts, images),
    }
}

fn paint(
    scene: &Scene,
    fonts: &FontSet,
    images: &ImageCache,
    dpi: f32,
    cancel: &CancellationToken,
) -> Result<RgbaImage, Error> {
    let (page_w, page_h) = scene.geometry.page_device_px(dpi);
    let pages = scene.page_count() as u32;
    let height = page_h
        .checked_mul(pages)
        .ok_or_else(|| Error::Host(format!("raster of {pages} pages is too large")))?;
    let scale = dpi / CSS_DPI;
    let printable = scene.geometry.printable_px();
    let background = scene.background.as_ref().and_then(|bg| {
        let decoded = images.get(&bg.src)?.decode();
        match decoded {
            Ok(image) => Some((image, bg.opacity)),
            Err(e) => {
                log::warn!("Background image could not be decoded: {e}");
                None
            }
        }
    });

    let mut canvas = Canvas {
        image: RgbaImage::from_pixel(page_w, height, Rgba([255, 255, 255, 255])),
        scale,
        origin_x: 0.0,
        origin_y: 0.0,
        clip: None,
    };
    for page in 0..pages {
        cancel.check()?;
        let top = (page * page_h) as f32;
        if let Some((image, opacity)) = &background {
            canvas.draw_image(image, 0.0, top, page_w as f32, page_h as f32, *opacity);
        }
        canvas.origin_x = printable.x * scale;
        canvas.origin_y = top + printable.y * scale;
        if page == 0 {
            for layer in &scene.layers {
                cancel.check()?;
                draw_layer(&mut canvas, layer, fonts, images);
            }
        }
        draw_items(&mut canvas, scene.content_page(page as usize), fonts, images);
        if page == 0 {
            for layer in &scene.overlays {
                cancel.check()?;
                draw_layer(&mut canvas, layer, fonts, images);
            }
        }
    }
    Ok(canvas.image)
}
