//! A resolved document laid out once, for every output backend.
//!
//! Coordinates are CSS pixels relative to the printable box, y down. Floating
//! objects are drawn on the first page only, in insertion order, beneath the
//! flowed content; images wrapped in front of the text go above it.

use crate::assets::ImageCache;
use crate::color::Color;
use crate::flow::{Block, Paragraph, Run, RunStyle, parse_flow};
use crate::html::split_floating;
use crate::layout::{Item, TextMeasure, layout_flow, paginate, table_units};
use crate::model::{DocumentModel, ObjectKind, PageObject, RectangleObject, VAlign};
use crate::page::PageGeometry;

/// Inner padding of a rectangle's text, as in the print markup.
pub const RECT_TEXT_PADDING: f32 = 4.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Background {
    pub src: String,
    /// `0.0..=1.0`
    pub opacity: f32,
}

/// A floating object, ready to draw.
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    /// A rectangle. `items` are clipped to the box.
    Box {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Option<Color>,
        border: Option<(Color, f32)>,
        items: Vec<Item>,
    },
    /// A floating table or image.
    Flow(Vec<Item>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scene {
    pub geometry: PageGeometry,
    pub font_family: String,
    pub background: Option<Background>,
    /// Floating objects beneath the flowed content.
    pub layers: Vec<Layer>,
    /// Floating objects above the flowed content.
    pub overlays: Vec<Layer>,
    /// Flowed content, one entry per page it needs.
    pub pages: Vec<Vec<Item>>,
    pub total_pages: u32,
}

impl Scene {
    /// Content overflow adds pages beyond the configured count; it never removes any.
    pub fn page_count(&self) -> usize {
        self.pages.len().max(self.total_pages.max(1) as usize)
    }

    pub fn content_page(&self, index: usize) -> &[Item] {
        self.pages.get(index).map_or(&[], Vec::as_slice)
    }

    /// Every floating layer, back to front.
    pub fn all_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().chain(&self.overlays)
    }
}

fn rectangle_layer(
    object: &PageObject,
    rect: &RectangleObject,
    measure: &dyn TextMeasure,
    font_size: f32,
) -> Layer {
    let fill = Color::parse(&rect.bg_color).filter(|c| !c.is_transparent());
    let border = if rect.border_width > 0.0 {
        Color::parse(&rect.border_color)
            .filter(|c| !c.is_transparent())
            .map(|c| (c, rect.border_width))
    } else {
        None
    };

    let inset = rect.border_width.max(0.0) + RECT_TEXT_PADDING;
    let inner_width = (rect.width - 2.0 * inset).max(1.0);
    let inner_height = (rect.height - 2.0 * inset).max(0.0);
    let mut items = Vec::new();
    if !rect.text.is_empty() {
        let paragraph = Block::Paragraph(Paragraph {
            runs: vec![Run {
                text: rect.text.clone(),
                style: RunStyle::default(),
            }],
            align: rect.text_align,
            scale: 1.0,
            space_after: 0.0,
            indent: 0.0,
        });
        let units = layout_flow(&[paragraph], measure, inner_width, font_size, &|_: &str| None);
        let text_height: f32 = units.iter().map(|u| u.height).sum();
        let mut y = object.y
            + inset
            + match rect.text_v_align {
                VAlign::Top => 0.0,
                VAlign::Middle => (inner_height - text_height) / 2.0,
                VAlign::Bottom => inner_height - text_height,
            };
        for unit in units {
            items.extend(
                unit.items
                    .into_iter()
                    .map(|item| item.offset(object.x + inset, y)),
            );
            y += unit.height;
        }
    }

    Layer::Box {
        x: object.x,
        y: object.y,
        width: rect.width,
        height: rect.height,
        fill,
        border,
        items,
    }
}

fn floating_layer(
    object: &PageObject,
    node: &str,
    measure: &dyn TextMeasure,
    width: f32,
    font_size: f32,
    natural_size: &dyn Fn(&str) -> Option<(u32, u32)>,
) -> Option<Layer> {
    let block = parse_flow(node).into_iter().next()?;
    let items = match (&object.kind, block) {
        (ObjectKind::Image(image), Block::Image(block)) => vec![Item::Image {
            x: object.x,
            y: object.y,
            width: image.width,
            height: image.height(),
            src: block.src,
        }],
        (ObjectKind::Table(_), Block::Table(rows)) => {
            let mut y = object.y;
            let mut items = Vec::new();
            for unit in table_units(&rows, measure, width, font_size, natural_size) {
                items.extend(unit.items.into_iter().map(|item| item.offset(object.x, y)));
                y += unit.height;
            }
            items
        }
        _ => return None,
    };
    Some(Layer::Flow(items))
}

/// Lays out a resolved model. Images are only loaded to learn their size.
pub fn compose(model: &DocumentModel, measure: &dyn TextMeasure, images: &ImageCache) -> Scene {
    let geometry = model.geometry();
    let printable = geometry.printable_px();
    let (content, floating) = split_floating(model);

    let natural_size = |src: &str| images.dimensions(src);

    let mut floating = floating.into_iter().peekable();
    let mut layers = Vec::new();
    let mut overlays = Vec::new();
    for (index, object) in model.objects.iter().enumerate() {
        let layer = match &object.kind {
            ObjectKind::Rectangle(rect) => Some(rectangle_layer(object, rect, measure, model.font_size)),
            _ => floating
                .next_if(|(i, _)| *i == index)
                .and_then(|(_, node)| {
                    floating_layer(
                        object,
                        &node,
                        measure,
                        printable.width,
                        model.font_size,
                        &natural_size,
                    )
                }),
        };
        if object.is_in_front() {
            overlays.extend(layer);
        } else {
            layers.extend(layer);
        }
    }

    let blocks = parse_flow(&content);
    let units = layout_flow(&blocks, measure, printable.width, model.font_size, &natural_size);
    let pages = paginate(units, printable.height);

    let background = model
        .background_image
        .as_deref()
        .filter(|src| !src.is_empty())
        .map(|src| Background {
            src: src.to_string(),
            opacity: f32::from(model.background_opacity_percent.min(100)) / 100.0,
        });

    Scene {
        geometry,
        font_family: model.font_family.clone(),
        background,
        layers,
        overlays,
        pages,
        total_pages: model.total_pages,
    }
}
