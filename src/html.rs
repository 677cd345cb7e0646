//! Standalone print markup for a resolved document.
//!
//! The page box is sized in millimetres with no page-level margin; the
//! configured margin is inner padding. Layers, back to front: background,
//! floating objects in insertion order, flowed content, then the floating
//! images wrapped in front of the text. The output is well-formed XHTML so it
//! can be written into any print surface.

use std::fmt::Write as _;

use crate::markup::{self, escape_attr, escape_html};
use crate::model::{
    DocumentModel, HAlign, ObjectKind, PageObject, RectangleObject, TextWrap, VAlign,
};
use crate::page::PageGeometry;
use crate::store::format_px;

/// Z-index of the first floating object; later objects stack above it.
pub const OBJECT_LAYER_Z: u32 = 10;
pub const CONTENT_LAYER_Z: u32 = 1000;
/// Layer holding the floating images wrapped in front of the text.
pub const FRONT_LAYER_Z: u32 = 2000;

/// An ordered list of CSS declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleDecl(Vec<(&'static str, String)>);

impl StyleDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: &'static str, value: impl Into<String>) -> Self {
        self.set(property, value);
        self
    }

    /// Replaces an existing declaration in place.
    pub fn set(&mut self, property: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(p, _)| *p == property) {
            Some(slot) => slot.1 = value,
            None => self.0.push((property, value)),
        }
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| v.as_str())
    }

    pub fn declarations(&self) -> &[(&'static str, String)] {
        &self.0
    }

    pub fn to_css(&self) -> String {
        let mut css = String::new();
        for (property, value) in &self.0 {
            let _ = write!(css, "{property}:{value};");
        }
        css
    }
}

/// Declarative description of a rectangle's overlay node.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayNode {
    pub id: String,
    pub style: StyleDecl,
    pub text: String,
    pub text_style: StyleDecl,
}

fn px(value: f32) -> String {
    format!("{}px", format_px(value))
}

fn flex_justify(align: HAlign) -> &'static str {
    match align {
        HAlign::Left => "flex-start",
        HAlign::Center => "center",
        HAlign::Right => "flex-end",
    }
}

fn flex_align(align: VAlign) -> &'static str {
    match align {
        VAlign::Top => "flex-start",
        VAlign::Middle => "center",
        VAlign::Bottom => "flex-end",
    }
}

fn rectangle_style(object: &PageObject, rect: &RectangleObject) -> StyleDecl {
    let border = if rect.border_width > 0.0 {
        format!("{} solid {}", px(rect.border_width), rect.border_color)
    } else {
        "none".to_string()
    };
    StyleDecl::new()
        .with("position", "absolute")
        .with("left", px(object.x))
        .with("top", px(object.y))
        .with("width", px(rect.width))
        .with("height", px(rect.height))
        .with("box-sizing", "border-box")
        .with("background-color", rect.bg_color.clone())
        .with("border", border)
        .with("display", "flex")
        .with("justify-content", flex_justify(rect.text_align))
        .with("align-items", flex_align(rect.text_v_align))
        .with("overflow", "hidden")
}

/// Overlay for a rectangle; `None` for other variants.
pub fn rectangle_overlay(object: &PageObject) -> Option<OverlayNode> {
    let ObjectKind::Rectangle(rect) = &object.kind else {
        return None;
    };
    Some(OverlayNode {
        id: object.id.clone(),
        style: rectangle_style(object, rect),
        text: rect.text.clone(),
        text_style: StyleDecl::new()
            .with("text-align", rect.text_align.as_css())
            .with("white-space", "pre-wrap")
            .with("padding", "4px"),
    })
}

/// Absolute positioning for a floating table or image node; `None` when inline.
pub fn floating_node_style(object: &PageObject) -> Option<StyleDecl> {
    if !object.is_floating() || !object.variant().owns_content_node() {
        return None;
    }
    let mut style = StyleDecl::new()
        .with("position", "absolute")
        .with("left", px(object.x))
        .with("top", px(object.y))
        .with("margin", "0");
    if let ObjectKind::Image(image) = &object.kind {
        style.set("width", px(image.width));
        style.set("height", px(image.height()));
    }
    Some(style)
}

/// Style for an inline image: its size and block alignment. Square and tight
/// wrapping float the image to its aligned side so text flows around it.
fn inline_image_style(object: &PageObject) -> Option<StyleDecl> {
    let ObjectKind::Image(image) = &object.kind else {
        return None;
    };
    if object.is_floating() {
        return None;
    }
    let style = StyleDecl::new()
        .with("width", px(image.width))
        .with("height", px(image.height()));
    let gap = match image.text_wrap {
        TextWrap::Square => Some(12.0),
        TextWrap::Tight => Some(4.0),
        TextWrap::Inline | TextWrap::Behind | TextWrap::Front => None,
    };
    if let Some(gap) = gap {
        let (side, margin) = match image.alignment {
            HAlign::Right => ("right", format!("0 0 {gap}px {gap}px")),
            HAlign::Left | HAlign::Center => ("left", format!("0 {gap}px {gap}px 0")),
        };
        return Some(style.with("float", side).with("margin", margin));
    }
    Some(match image.alignment {
        HAlign::Left => style,
        HAlign::Center => style.with("display", "block").with("margin", "0 auto"),
        HAlign::Right => style.with("display", "block").with("margin-left", "auto"),
    })
}

/// Merges `extra` into the node's existing `style` attribute.
fn restyle(node_markup: &str, open_len: usize, extra: &StyleDecl) -> String {
    let open = &node_markup[..open_len];
    let existing = markup::attribute(open, "style").unwrap_or_default();
    let mut css = existing.trim().trim_end_matches(';').to_string();
    if !css.is_empty() {
        css.push(';');
    }
    css.push_str(&extra.to_css());
    let open = markup::set_attribute_in_tag(open, "style", Some(&css));
    format!("{open}{}", &node_markup[open_len..])
}

/// Splits the flowed content into the content layer and the floating nodes
/// pulled out of it, in object order.
pub fn split_floating(model: &DocumentModel) -> (String, Vec<(usize, String)>) {
    let mut content = model.content.clone();
    let mut floating = Vec::new();
    for (index, object) in model.objects.iter().enumerate() {
        if !object.variant().owns_content_node() {
            continue;
        }
        let Some(span) = markup::find_element(&content, &object.id) else {
            log::warn!("No content node for {} '{}'", object.variant().as_str(), object.id);
            continue;
        };
        let node = content[span.start..span.end].to_string();
        let open_len = span.open_end - span.start;
        if let Some(style) = floating_node_style(object) {
            content.replace_range(span.start..span.end, "");
            floating.push((index, restyle(&node, open_len, &style)));
        } else if let Some(style) = inline_image_style(object) {
            content.replace_range(span.start..span.end, &restyle(&node, open_len, &style));
        }
    }
    (content, floating)
}

fn css_url(src: &str) -> String {
    format!("url(\"{}\")", src.replace('\\', "\\\\").replace('"', "\\\""))
}

fn page_css(model: &DocumentModel, geometry: &PageGeometry) -> String {
    let page = geometry.page_mm();
    let margin = geometry.margin_mm;
    let family = model.font_family.replace(['"', '<', '>', ';'], "");
    format!(
        "@page {{ size: {w}mm {h}mm; margin: 0; }}\n\
         html, body {{ margin: 0; padding: 0; }}\n\
         body {{ -webkit-print-color-adjust: exact; print-color-adjust: exact; }}\n\
         .page {{ position: relative; box-sizing: border-box; overflow: hidden; \
         width: {w}mm; height: {h}mm; padding: {margin}mm; \
         font-family: \"{family}\", sans-serif; font-size: {size}px; \
         break-after: page; }}\n\
         .page:last-child {{ break-after: auto; }}\n\
         .page-background {{ position: absolute; left: 0; top: 0; width: 100%; height: 100%; \
         background-size: 100% 100%; background-repeat: no-repeat; z-index: 0; }}\n\
         .page-objects {{ position: absolute; left: {margin}mm; top: {margin}mm; \
         width: {pw}mm; height: {ph}mm; z-index: {OBJECT_LAYER_Z}; }}\n\
         .page-content {{ position: relative; z-index: {CONTENT_LAYER_Z}; }}\n\
         .page-front {{ position: absolute; left: {margin}mm; top: {margin}mm; \
         width: {pw}mm; height: {ph}mm; z-index: {FRONT_LAYER_Z}; }}\n\
         .page-content table {{ border-collapse: collapse; }}\n",
        w = page.width,
        h = page.height,
        pw = geometry.printable_mm().width,
        ph = geometry.printable_mm().height,
        size = format_px(model.font_size),
    )
}

fn write_background(out: &mut String, model: &DocumentModel) {
    let Some(src) = model.background_image.as_deref().filter(|s| !s.is_empty()) else {
        return;
    };
    let style = StyleDecl::new()
        .with("background-image", css_url(src))
        .with(
            "opacity",
            format!("{}", f32::from(model.background_opacity_percent.min(100)) / 100.0),
        );
    let _ = writeln!(
        out,
        r#"<div class="page-background" style="{}"></div>"#,
        escape_attr(&style.to_css())
    );
}

fn write_overlay(out: &mut String, overlay: &OverlayNode, z: usize) {
    let mut style = overlay.style.clone();
    style.set("z-index", z.to_string());
    let _ = writeln!(
        out,
        r#"<div id="{}" class="page-rectangle" style="{}"><div style="{}">{}</div></div>"#,
        escape_attr(&overlay.id),
        escape_attr(&style.to_css()),
        escape_attr(&overlay.text_style.to_css()),
        escape_html(&overlay.text).replace('\n', "<br/>")
    );
}

/// The print document for a resolved model.
pub fn render_document(model: &DocumentModel) -> String {
    let geometry = model.geometry();
    let (content, floating) = split_floating(model);

    let mut out = String::with_capacity(model.content.len() + 4096);
    out.push_str("<!DOCTYPE html>\n");
    out.push_str("<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"pt-BR\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\"/>\n");
    let _ = writeln!(out, "<title>{}</title>", escape_html(&model.title));
    let _ = writeln!(out, "<style>\n{}</style>", page_css(model, &geometry));
    out.push_str("</head>\n<body>\n");

    let page = geometry.page_mm();
    let page_style = StyleDecl::new()
        .with("width", format!("{}mm", page.width))
        .with("height", format!("{}mm", page.height))
        .with("padding", format!("{}mm", geometry.margin_mm));

    for page_index in 0..model.total_pages.max(1) {
        let _ = writeln!(
            out,
            r#"<div class="page" data-page="{}" style="{}">"#,
            page_index + 1,
            page_style.to_css()
        );
        write_background(&mut out, model);
        if page_index == 0 {
            out.push_str("<div class=\"page-objects\">\n");
            write_objects(&mut out, model, &floating, false);
            out.push_str("</div>\n");
            let _ = writeln!(out, "<div class=\"page-content\">{content}</div>");
            if model.objects.iter().any(PageObject::is_in_front) {
                let _ = writeln!(
                    out,
                    r#"<div class="page-front" style="z-index:{FRONT_LAYER_Z};">"#
                );
                write_objects(&mut out, model, &floating, true);
                out.push_str("</div>\n");
            }
        }
        out.push_str("</div>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Writes the objects on one side of the flowed content, stacked in insertion order.
fn write_objects(out: &mut String, model: &DocumentModel, floating: &[(usize, String)], front: bool) {
    let mut floating = floating.iter().peekable();
    for (index, object) in model.objects.iter().enumerate() {
        let z = OBJECT_LAYER_Z as usize + index;
        let node = floating.next_if(|(i, _)| *i == index);
        if object.is_in_front() != front {
            continue;
        }
        if let Some(overlay) = rectangle_overlay(object) {
            write_overlay(out, &overlay, z);
        } else if let Some((_, node)) = node {
            let node = restyle(node, open_tag_len(node), &StyleDecl::new().with("z-index", z.to_string()));
            out.push_str(&node);
            out.push('\n');
        }
    }
}

fn open_tag_len(node: &str) -> usize {
    markup::open_tag_end(node).unwrap_or(node.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_set_replaces_in_place() {
        let mut style = StyleDecl::new().with("left", "1px").with("top", "2px");
        style.set("left", "5px");
        assert_eq!(style.to_css(), "left:5px;top:2px;");
    }

    #[test]
    fn restyle_appends_to_existing_style() {
        let node = r#"<table id="t" style="width:100%"><tr/></table>"#;
        let out = restyle(node, open_tag_len(node), &StyleDecl::new().with("left", "3px"));
        assert!(out.starts_with(r#"<table id="t" style="width:100%;left:3px;">"#));
    }
}
