//! Flowed content markup -> blocks for the PDF writer and the rasterizer.
//!
//! Only what the editing surface produces is understood: paragraphs and
//! headings, inline bold/italic/underline, line breaks, lists, tables and
//! images. Unknown tags are transparent.

use html5ever::tendril::TendrilSink;
use html5ever::{Attribute, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use crate::model::HAlign;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Paragraph {
    pub runs: Vec<Run>,
    pub align: HAlign,
    /// Font size relative to the document size (headings).
    pub scale: f32,
    /// Space after the block, in ems.
    pub space_after: f32,
    pub indent: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageBlock {
    pub src: String,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub align: HAlign,
}

/// One table cell, laid out like a small flow of its own.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
    pub blocks: Vec<Block>,
}

impl Cell {
    /// Plain text of the cell's paragraphs.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Paragraph(p) => Some(runs_text(&p.runs)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageBlock> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Image(image) => Some(image),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Paragraph(Paragraph),
    /// Rows of cells.
    Table(Vec<Vec<Cell>>),
    Image(ImageBlock),
}

/// Attribute lookup on a parsed element. Names are already lowercase.
#[derive(Clone, Copy)]
struct Attrs<'a>(&'a [Attribute]);

impl Attrs<'_> {
    fn get(&self, name: &str) -> Option<String> {
        self.0.iter().find_map(|attr| {
            let key: &str = &attr.name.local;
            let value: &str = &attr.value;
            (key == name).then(|| value.to_string())
        })
    }

    fn style(&self, property: &str) -> Option<String> {
        let style = self.get("style")?;
        style.split(';').find_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case(property)
                .then(|| value.trim().to_ascii_lowercase())
        })
    }
}

fn parse_align(value: &str) -> Option<HAlign> {
    match value.trim() {
        "left" | "start" | "justify" => Some(HAlign::Left),
        "center" => Some(HAlign::Center),
        "right" | "end" => Some(HAlign::Right),
        _ => None,
    }
}

fn block_align(attrs: Attrs) -> Option<HAlign> {
    attrs
        .style("text-align")
        .or_else(|| attrs.get("align"))
        .and_then(|v| parse_align(&v.to_ascii_lowercase()))
}

fn px_value(value: &str) -> Option<f32> {
    value
        .trim()
        .trim_end_matches("px")
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Block alignment of an image from its margins or float side.
fn image_align(attrs: Attrs) -> HAlign {
    let margin = attrs.style("margin").unwrap_or_default();
    let margin_left = attrs.style("margin-left").unwrap_or_default();
    if attrs.style("float").is_some_and(|side| side == "right") {
        HAlign::Right
    } else if margin.ends_with("auto") && margin.split_whitespace().count() >= 2 {
        HAlign::Center
    } else if margin_left == "auto" {
        HAlign::Right
    } else {
        HAlign::Left
    }
}

fn image_block(attrs: Attrs) -> Option<ImageBlock> {
    let src = attrs.get("src").filter(|s| !s.is_empty())?;
    let dimension = |name: &str| {
        attrs
            .style(name)
            .and_then(|v| px_value(&v))
            .or_else(|| attrs.get(name).and_then(|v| px_value(&v)))
    };
    Some(ImageBlock {
        src,
        width: dimension("width"),
        height: dimension("height"),
        align: image_align(attrs),
    })
}

fn heading_scale(tag: &str) -> Option<f32> {
    match tag {
        "h1" => Some(2.0),
        "h2" => Some(1.5),
        "h3" => Some(1.17),
        "h4" => Some(1.0),
        "h5" => Some(0.83),
        "h6" => Some(0.67),
        _ => None,
    }
}

fn inline_style(tag: &str, attrs: Attrs, inherited: RunStyle) -> RunStyle {
    let mut style = inherited;
    match tag {
        "b" | "strong" => style.bold = true,
        "i" | "em" => style.italic = true,
        "u" | "ins" => style.underline = true,
        _ => {}
    }
    if let Some(weight) = attrs.style("font-weight") {
        style.bold = weight == "bold" || weight.parse::<u32>().is_ok_and(|w| w >= 600);
    }
    if attrs.style("font-style").is_some_and(|s| s == "italic") {
        style.italic = true;
    }
    if attrs.style("text-decoration").is_some_and(|s| s.contains("underline")) {
        style.underline = true;
    }
    style
}

fn tag_name(node: &Node) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(&*name.local),
        _ => None,
    }
}

const LIST_INDENT_PX: f32 = 40.0;

/// Walks the parsed tree and collects blocks.
struct FlowBuilder {
    blocks: Vec<Block>,
    current: Paragraph,
    style: RunStyle,
    lists: Vec<Option<u32>>,
}

impl FlowBuilder {
    fn new(style: RunStyle) -> Self {
        Self {
            blocks: Vec::new(),
            current: empty_paragraph(),
            style,
            lists: Vec::new(),
        }
    }

    fn flush(&mut self) {
        let paragraph = std::mem::replace(&mut self.current, empty_paragraph());
        let has_text = paragraph.runs.iter().any(|r| !r.text.trim().is_empty());
        if has_text {
            self.blocks.push(Block::Paragraph(paragraph));
        } else if let Some(Block::Paragraph(last)) = self.blocks.last_mut() {
            last.space_after = last.space_after.max(paragraph.space_after);
        }
    }

    fn start_block(&mut self, align: Option<HAlign>, scale: f32, space_after: f32) {
        self.flush();
        self.current.align = align.unwrap_or_default();
        self.current.scale = scale;
        self.current.space_after = space_after;
        self.current.indent = self.lists.len() as f32 * LIST_INDENT_PX;
    }

    fn push_text(&mut self, text: &str) {
        self.current.runs.push(Run {
            text: text.to_string(),
            style: self.style,
        });
    }

    fn visit_children(&mut self, node: &Handle) {
        for child in node.children.borrow().iter() {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: &Handle) {
        match &node.data {
            NodeData::Text { contents } => {
                let text = collapse_whitespace(&contents.borrow());
                if !text.is_empty() {
                    self.push_text(&text);
                }
            }
            NodeData::Element { name, attrs, .. } => {
                let attrs = attrs.borrow();
                self.visit_element(&name.local, Attrs(&attrs), node);
            }
            NodeData::Comment { .. } | NodeData::ProcessingInstruction { .. } => {}
            _ => self.visit_children(node),
        }
    }

    fn visit_element(&mut self, tag: &str, attrs: Attrs, node: &Handle) {
        match tag {
            "head" | "style" | "script" | "template" | "title" => {}
            "p" => {
                self.start_block(block_align(attrs), 1.0, 1.0);
                self.visit_children(node);
                self.flush();
            }
            "div" | "blockquote" | "section" | "article" | "center" => {
                let align = if tag == "center" {
                    Some(HAlign::Center)
                } else {
                    block_align(attrs)
                };
                self.start_block(align, 1.0, 0.0);
                self.visit_children(node);
                self.flush();
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let scale = heading_scale(tag).unwrap_or(1.0);
                self.start_block(block_align(attrs), scale, 0.67);
                let saved = self.style;
                self.style = inline_style("strong", attrs, saved);
                self.visit_children(node);
                self.style = saved;
                self.flush();
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.push((tag == "ol").then_some(0));
                self.visit_children(node);
                self.flush();
                self.lists.pop();
            }
            "li" => {
                self.start_block(block_align(attrs), 1.0, 0.0);
                self.current.indent = self.lists.len().max(1) as f32 * LIST_INDENT_PX;
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        *n += 1;
                        format!("{n}. ")
                    }
                    _ => "• ".to_string(),
                };
                self.push_text(&marker);
                self.visit_children(node);
                self.flush();
            }
            "br" => self.push_text("\n"),
            "hr" => self.start_block(None, 1.0, 0.5),
            "table" => {
                self.flush();
                let rows = table_rows(node, self.style);
                if !rows.is_empty() {
                    self.blocks.push(Block::Table(rows));
                }
            }
            "img" => {
                let Some(image) = image_block(attrs) else {
                    return;
                };
                // Text around the image keeps its paragraph's settings.
                let (align, scale, indent) = (self.current.align, self.current.scale, self.current.indent);
                self.flush();
                self.blocks.push(Block::Image(image));
                self.current.align = align;
                self.current.scale = scale;
                self.current.indent = indent;
            }
            _ => {
                let saved = self.style;
                self.style = inline_style(tag, attrs, saved);
                self.visit_children(node);
                self.style = saved;
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

/// Rows of a table element, through any `thead`/`tbody`/`tfoot`. Header
/// cells are bold. A nested table stays inside its cell.
fn table_rows(table: &Handle, style: RunStyle) -> Vec<Vec<Cell>> {
    let mut rows = Vec::new();
    collect_rows(table, style, &mut rows);
    rows.retain(|row| !row.is_empty());
    rows
}

fn collect_rows(node: &Handle, style: RunStyle, rows: &mut Vec<Vec<Cell>>) {
    for child in node.children.borrow().iter() {
        match tag_name(child) {
            Some("thead" | "tbody" | "tfoot") => collect_rows(child, style, rows),
            Some("tr") => {
                let cells = child
                    .children
                    .borrow()
                    .iter()
                    .filter_map(|cell| {
                        let tag = tag_name(cell)?;
                        let cell_style = match tag {
                            "td" => style,
                            "th" => inline_style("strong", Attrs(&[]), style),
                            _ => return None,
                        };
                        let mut builder = FlowBuilder::new(cell_style);
                        builder.visit_children(cell);
                        Some(Cell {
                            blocks: builder.finish(),
                        })
                    })
                    .collect();
                rows.push(cells);
            }
            _ => {}
        }
    }
}

fn empty_paragraph() -> Paragraph {
    Paragraph {
        runs: Vec::new(),
        align: HAlign::Left,
        scale: 1.0,
        space_after: 0.0,
        indent: 0.0,
    }
}

/// Collapses whitespace the way HTML renders it; `\n` from `<br>` survives.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Parses content markup the way a browser would and collects its blocks.
pub fn parse_flow(markup: &str) -> Vec<Block> {
    let dom = parse_document(RcDom::default(), Default::default()).one(markup);
    let mut builder = FlowBuilder::new(RunStyle::default());
    builder.visit(&dom.document);
    builder.finish()
}

/// Plain text of a list of runs.
pub fn runs_text(runs: &[Run]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}
