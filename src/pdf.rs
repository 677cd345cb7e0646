use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use image::ColorType;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use crate::assets::{ImageAsset, ImageCache};
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::flow::RunStyle;
use crate::fonts::{FontEntry, FontSet, register_font, to_winansi_bytes};
use crate::layout::Item;
use crate::model::DocumentModel;
use crate::page::{PageGeometry, px_to_pt};
use crate::scene::{Layer, compose};

/// Maps CSS pixels in the printable box to PDF user space (points, y up).
#[derive(Clone, Copy)]
struct PageSpace {
    left: f32,
    top: f32,
}

impl PageSpace {
    fn new(geometry: &PageGeometry) -> Self {
        let printable = geometry.printable_px();
        let (_, page_h) = geometry.page_pt();
        Self {
            left: px_to_pt(printable.x),
            top: page_h - px_to_pt(printable.y),
        }
    }

    fn x(&self, px: f32) -> f32 {
        self.left + px_to_pt(px)
    }

    fn y(&self, px: f32) -> f32 {
        self.top - px_to_pt(px)
    }

    /// A px box as a PDF rect (lower-left corner, size).
    fn rect(&self, x: f32, y: f32, width: f32, height: f32) -> Rect {
        let x0 = self.x(x);
        let y0 = self.y(y + height);
        Rect::new(x0, y0, x0 + px_to_pt(width), y0 + px_to_pt(height))
    }
}

struct Fonts {
    set: FontSet,
    entries: [FontEntry; 4],
}

impl Fonts {
    fn entry(&self, style: RunStyle) -> &FontEntry {
        &self.entries[usize::from(style.bold) * 2 + usize::from(style.italic)]
    }
}

/// Embeds an image once. JPEG RGB data passes through; everything else is
/// decoded and re-encoded as Flate RGB with an alpha soft mask when needed.
fn embed_image(
    pdf: &mut Pdf,
    asset: &ImageAsset,
    alloc: &mut dyn FnMut() -> Ref,
) -> Result<Ref, Error> {
    let decoded = image::load_from_memory(&asset.data)?;
    let (w, h) = (decoded.width() as i32, decoded.height() as i32);
    let xobj_ref = alloc();

    if asset.mime == "image/jpeg" && decoded.color() == ColorType::Rgb8 {
        let mut xobj = pdf.image_xobject(xobj_ref, &asset.data);
        xobj.filter(Filter::DctDecode);
        xobj.width(w);
        xobj.height(h);
        xobj.color_space().device_rgb();
        xobj.bits_per_component(8);
        return Ok(xobj_ref);
    }

    let rgba = decoded.to_rgba8();
    let has_alpha = rgba.pixels().any(|p| p.0[3] < 255);
    let rgb_data: Vec<u8> = rgba
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    let compressed_rgb = miniz_oxide::deflate::compress_to_vec_zlib(&rgb_data, 6);

    let smask_ref = if has_alpha {
        let alpha_data: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
        let compressed_alpha = miniz_oxide::deflate::compress_to_vec_zlib(&alpha_data, 6);
        let mask_ref = alloc();
        let mut mask = pdf.image_xobject(mask_ref, &compressed_alpha);
        mask.filter(Filter::FlateDecode);
        mask.width(w);
        mask.height(h);
        mask.color_space().device_gray();
        mask.bits_per_component(8);
        Some(mask_ref)
    } else {
        None
    };

    let mut xobj = pdf.image_xobject(xobj_ref, &compressed_rgb);
    xobj.filter(Filter::FlateDecode);
    xobj.width(w);
    xobj.height(h);
    xobj.color_space().device_rgb();
    xobj.bits_per_component(8);
    if let Some(mask_ref) = smask_ref {
        xobj.s_mask(mask_ref);
    }
    Ok(xobj_ref)
}

/// Image XObjects keyed by source, named `/Im{n}` in embedding order.
#[derive(Default)]
struct ImageTable {
    names: HashMap<String, Option<String>>,
    xobjects: Vec<(String, Ref)>,
}

impl ImageTable {
    fn name_for(
        &mut self,
        src: &str,
        cache: &ImageCache,
        pdf: &mut Pdf,
        alloc: &mut dyn FnMut() -> Ref,
    ) -> Option<String> {
        if let Some(name) = self.names.get(src) {
            return name.clone();
        }
        let name = cache.get(src).and_then(|asset| match embed_image(pdf, &asset, alloc) {
            Ok(xobj_ref) => {
                let name = format!("Im{}", self.xobjects.len() + 1);
                self.xobjects.push((name.clone(), xobj_ref));
                Some(name)
            }
            Err(e) => {
                log::warn!("Could not embed image: {e}");
                None
            }
        });
        self.names.insert(src.to_string(), name.clone());
        name
    }
}

fn draw_items(
    content: &mut Content,
    items: &[Item],
    space: PageSpace,
    fonts: &Fonts,
    image_names: &HashMap<String, Option<String>>,
) {
    for item in items {
        match item {
            Item::Text {
                x,
                baseline,
                text,
                size,
                style,
                ..
            } => {
                let bytes = to_winansi_bytes(text);
                if bytes.is_empty() {
                    continue;
                }
                let entry = fonts.entry(*style);
                content
                    .set_fill_rgb(0.0, 0.0, 0.0)
                    .begin_text()
                    .set_font(Name(entry.pdf_name.as_bytes()), px_to_pt(*size))
                    .next_line(space.x(*x), space.y(*baseline))
                    .show(Str(&bytes))
                    .end_text();
            }
            Item::Rule {
                x,
                y,
                width,
                height,
            } => {
                let r = space.rect(*x, *y, *width, *height);
                content
                    .set_fill_rgb(0.0, 0.0, 0.0)
                    .rect(r.x1, r.y1, r.x2 - r.x1, r.y2 - r.y1)
                    .fill_nonzero();
            }
            Item::Image {
                x,
                y,
                width,
                height,
                src,
            } => {
                let Some(Some(name)) = image_names.get(src) else {
                    continue;
                };
                let r = space.rect(*x, *y, *width, *height);
                content
                    .save_state()
                    .transform([r.x2 - r.x1, 0.0, 0.0, r.y2 - r.y1, r.x1, r.y1])
                    .x_object(Name(name.as_bytes()))
                    .restore_state();
            }
        }
    }
}

fn draw_layer(
    content: &mut Content,
    layer: &Layer,
    space: PageSpace,
    fonts: &Fonts,
    image_names: &HashMap<String, Option<String>>,
) {
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
            let r = space.rect(*x, *y, *width, *height);
            let (w, h) = (r.x2 - r.x1, r.y2 - r.y1);
            if let Some(fill) = fill {
                let (red, green, blue) = fill.unit_rgb();
                content
                    .set_fill_rgb(red, green, blue)
                    .rect(r.x1, r.y1, w, h)
                    .fill_nonzero();
            }
            if let Some((color, line_px)) = border {
                // Border-box: the stroke sits inside the box.
                let line = px_to_pt(*line_px);
                let (red, green, blue) = color.unit_rgb();
                content
                    .set_stroke_rgb(red, green, blue)
                    .set_line_width(line)
                    .rect(
                        r.x1 + line / 2.0,
                        r.y1 + line / 2.0,
                        (w - line).max(0.0),
                        (h - line).max(0.0),
                    )
                    .stroke();
            }
            if !items.is_empty() {
                content.save_state();
                content.rect(r.x1, r.y1, w, h).clip_nonzero().end_path();
                draw_items(content, items, space, fonts, image_names);
                content.restore_state();
            }
        }
        Layer::Flow(items) => draw_items(content, items, space, fonts, image_names),
    }
}

/// Renders a resolved model as a vector PDF.
/// Relative image paths are resolved against `base`.
pub fn render(model: &DocumentModel, base: Option<&Path>) -> Result<Vec<u8>, Error> {
    render_with(model, base, &CancellationToken::new())
}

pub(crate) fn render_with(
    model: &DocumentModel,
    base: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, Error> {
    let t0 = Instant::now();
    let mut pdf = Pdf::new();
    let mut next_id = 1i32;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };
    let catalog_id = alloc();
    let pages_id = alloc();

    // Phase 1: fonts
    let set = FontSet::load(&model.font_family, false);
    let registered: Vec<FontEntry> = set
        .variants()
        .enumerate()
        .map(|(i, font)| register_font(&mut pdf, font, format!("F{}", i + 1), &mut alloc))
        .collect();
    let entries: [FontEntry; 4] = registered
        .try_into()
        .map_err(|_| Error::Pdf("expected four font variants".to_string()))?;
    let fonts = Fonts { set, entries };
    let t_fonts = t0.elapsed();
    cancel.check()?;

    // Phase 2: layout
    let cache = ImageCache::new(base);
    let scene = compose(model, &fonts.set, &cache);
    let t_layout = t0.elapsed();
    cancel.check()?;

    // Phase 3: images
    let mut images = ImageTable::default();
    let background_name = scene
        .background
        .as_ref()
        .and_then(|bg| images.name_for(&bg.src, &cache, &mut pdf, &mut alloc));
    let flow_items = scene
        .all_layers()
        .flat_map(|layer| match layer {
            Layer::Box { items, .. } | Layer::Flow(items) => items.iter(),
        })
        .chain(scene.pages.iter().flatten());
    for item in flow_items {
        if let Item::Image { src, .. } = item {
            images.name_for(src, &cache, &mut pdf, &mut alloc);
        }
    }
    let background_state = match (&background_name, &scene.background) {
        (Some(_), Some(bg)) if bg.opacity < 1.0 => {
            let gs_ref = alloc();
            pdf.ext_graphics(gs_ref)
                .non_stroking_alpha(bg.opacity)
                .stroking_alpha(bg.opacity);
            Some(gs_ref)
        }
        _ => None,
    };
    let t_images = t0.elapsed();
    cancel.check()?;

    // Phase 4: page content
    let space = PageSpace::new(&scene.geometry);
    let (page_w, page_h) = scene.geometry.page_pt();
    let page_count = scene.page_count();
    let mut page_ids = Vec::with_capacity(page_count);
    for page_index in 0..page_count {
        cancel.check()?;
        let mut content = Content::new();
        if let Some(name) = &background_name {
            content.save_state();
            if background_state.is_some() {
                content.set_parameters(Name(b"GS1"));
            }
            content
                .transform([page_w, 0.0, 0.0, page_h, 0.0, 0.0])
                .x_object(Name(name.as_bytes()))
                .restore_state();
        }
        if page_index == 0 {
            for layer in &scene.layers {
                draw_layer(&mut content, layer, space, &fonts, &images.names);
            }
        }
        draw_items(
            &mut content,
            scene.content_page(page_index),
            space,
            &fonts,
            &images.names,
        );
        if page_index == 0 {
            for layer in &scene.overlays {
                draw_layer(&mut content, layer, space, &fonts, &images.names);
            }
        }

        let raw = content.finish();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 6);
        let content_id = alloc();
        pdf.stream(content_id, &compressed).filter(Filter::FlateDecode);

        let page_id = alloc();
        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, page_w, page_h))
            .parent(pages_id)
            .contents(content_id);
        {
            let mut resources = page.resources();
            {
                let mut font_dict = resources.fonts();
                for entry in &fonts.entries {
                    font_dict.pair(Name(entry.pdf_name.as_bytes()), entry.font_ref);
                }
            }
            if !images.xobjects.is_empty() {
                let mut xobjects = resources.x_objects();
                for (name, xobj_ref) in &images.xobjects {
                    xobjects.pair(Name(name.as_bytes()), *xobj_ref);
                }
            }
            if let Some(gs_ref) = background_state {
                resources.ext_g_states().pair(Name(b"GS1"), gs_ref);
            }
        }
        page_ids.push(page_id);
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(page_count as i32);
    let t_pages = t0.elapsed();

    log::info!(
        "Render phases: fonts={:.1}ms, layout={:.1}ms, images={:.1}ms, pages={:.1}ms ({} pages)",
        t_fonts.as_secs_f64() * 1000.0,
        (t_layout - t_fonts).as_secs_f64() * 1000.0,
        (t_images - t_layout).as_secs_f64() * 1000.0,
        (t_pages - t_images).as_secs_f64() * 1000.0,
        page_count,
    );

    Ok(pdf.finish())
}

/// Wraps one page-sized raster into a single-page PDF at the exact page size.
pub fn single_page_from_image(
    image: &image::RgbaImage,
    geometry: &PageGeometry,
    jpeg_quality: u8,
) -> Result<Vec<u8>, Error> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality.clamp(1, 100))
        .encode_image(&rgb)?;

    let catalog_id = Ref::new(1);
    let pages_id = Ref::new(2);
    let page_id = Ref::new(3);
    let content_id = Ref::new(4);
    let image_id = Ref::new(5);

    let (page_w, page_h) = geometry.page_pt();
    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id).kids([page_id]).count(1);

    let mut xobj = pdf.image_xobject(image_id, &jpeg);
    xobj.filter(Filter::DctDecode);
    xobj.width(rgb.width() as i32);
    xobj.height(rgb.height() as i32);
    xobj.color_space().device_rgb();
    xobj.bits_per_component(8);
    drop(xobj);

    let mut content = Content::new();
    content
        .save_state()
        .transform([page_w, 0.0, 0.0, page_h, 0.0, 0.0])
        .x_object(Name(b"Im1"))
        .restore_state();
    pdf.stream(content_id, &content.finish());

    pdf.page(page_id)
        .media_box(Rect::new(0.0, 0.0, page_w, page_h))
        .parent(pages_id)
        .contents(content_id)
        .resources()
        .x_objects()
        .pair(Name(b"Im1"), image_id);

    Ok(pdf.finish())
}
