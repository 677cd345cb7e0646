//! Line breaking and pagination of flowed blocks.
//!
//! Everything is in CSS pixels relative to the printable box. Blocks are laid
//! out into units (a line, a table row, an image) that are never split across
//! pages.

use crate::flow::{Block, Cell, ImageBlock, Paragraph, Run, RunStyle};
use crate::model::HAlign;

/// CSS `line-height: normal`, close enough for the fonts templates use.
pub const LINE_HEIGHT: f32 = 1.2;
pub const CELL_PADDING: f32 = 4.0;
pub const CELL_BORDER: f32 = 1.0;

pub trait TextMeasure {
    /// Advance width of `text` in px at `size` px.
    fn text_width(&self, text: &str, size: f32, style: RunStyle) -> f32;

    /// Ascender height as a fraction of the font size.
    fn ascent_ratio(&self, _style: RunStyle) -> f32 {
        0.8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Text {
        x: f32,
        baseline: f32,
        text: String,
        size: f32,
        style: RunStyle,
        width: f32,
    },
    /// A filled black box: table borders and underlines.
    Rule {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        src: String,
    },
}

impl Item {
    pub fn offset(self, dx: f32, dy: f32) -> Self {
        match self {
            Item::Text {
                x,
                baseline,
                text,
                size,
                style,
                width,
            } => Item::Text {
                x: x + dx,
                baseline: baseline + dy,
                text,
                size,
                style,
                width,
            },
            Item::Rule {
                x,
                y,
                width,
                height,
            } => Item::Rule {
                x: x + dx,
                y: y + dy,
                width,
                height,
            },
            Item::Image {
                x,
                y,
                width,
                height,
                src,
            } => Item::Image {
                x: x + dx,
                y: y + dy,
                width,
                height,
                src,
            },
        }
    }
}

/// An unbreakable slice of the flow; items are relative to its top edge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unit {
    pub height: f32,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
struct Segment {
    text: String,
    style: RunStyle,
    width: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Line {
    segments: Vec<Segment>,
    width: f32,
}

struct LineBreaker<'a> {
    measure: &'a dyn TextMeasure,
    size: f32,
    max_width: f32,
    lines: Vec<Line>,
    line: Line,
}

impl<'a> LineBreaker<'a> {
    fn new(measure: &'a dyn TextMeasure, size: f32, max_width: f32) -> Self {
        Self {
            measure,
            size,
            max_width: max_width.max(1.0),
            lines: Vec::new(),
            line: Line::default(),
        }
    }

    fn width(&self, text: &str, style: RunStyle) -> f32 {
        self.measure.text_width(text, self.size, style)
    }

    fn break_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        self.lines.push(line);
    }

    fn append(&mut self, text: &str, style: RunStyle) {
        match self.line.segments.last_mut() {
            Some(last) if last.style == style => {
                last.text.push_str(text);
                last.width = self.measure.text_width(&last.text, self.size, style);
            }
            _ => {
                let width = self.width(text, style);
                self.line.segments.push(Segment {
                    text: text.to_string(),
                    style,
                    width,
                });
            }
        }
        self.line.width = self.line.segments.iter().map(|s| s.width).sum();
    }

    fn push_word(&mut self, word: &str, style: RunStyle, space_before: bool) {
        let space = space_before && !self.line.segments.is_empty();
        let piece = if space { format!(" {word}") } else { word.to_string() };
        let piece_width = self.width(&piece, style);
        if self.line.width + piece_width <= self.max_width + 0.01 {
            self.append(&piece, style);
            return;
        }
        if !self.line.segments.is_empty() {
            self.break_line();
        }
        if self.width(word, style) <= self.max_width {
            self.append(word, style);
            return;
        }
        // Longer than a whole line: break between characters.
        let mut chunk = String::new();
        for c in word.chars() {
            chunk.push(c);
            if self.width(&chunk, style) > self.max_width && chunk.chars().count() > 1 {
                chunk.pop();
                self.append(&chunk, style);
                self.break_line();
                chunk.clear();
                chunk.push(c);
            }
        }
        if !chunk.is_empty() {
            self.append(&chunk, style);
        }
    }

    fn push_run(&mut self, run: &Run, pending_space: &mut bool) {
        for (i, part) in run.text.split('\n').enumerate() {
            if i > 0 {
                self.break_line();
                *pending_space = false;
            }
            let mut words = part.split(' ').peekable();
            while let Some(word) = words.next() {
                if word.is_empty() {
                    *pending_space = true;
                    continue;
                }
                self.push_word(word, run.style, *pending_space);
                *pending_space = words.peek().is_some();
            }
        }
    }

    fn finish(mut self) -> Vec<Line> {
        if !self.line.segments.is_empty() {
            self.break_line();
        }
        self.lines
    }
}

fn wrap(runs: &[Run], measure: &dyn TextMeasure, size: f32, max_width: f32) -> Vec<Line> {
    let mut breaker = LineBreaker::new(measure, size, max_width);
    let mut pending_space = false;
    for run in runs {
        breaker.push_run(run, &mut pending_space);
    }
    breaker.finish()
}

/// Lines of text as units, each `size * LINE_HEIGHT` tall.
fn line_units(
    lines: Vec<Line>,
    measure: &dyn TextMeasure,
    size: f32,
    left: f32,
    available: f32,
    align: HAlign,
) -> Vec<Unit> {
    let height = size * LINE_HEIGHT;
    lines
        .into_iter()
        .map(|line| {
            let mut x = left
                + match align {
                    HAlign::Left => 0.0,
                    HAlign::Center => ((available - line.width) / 2.0).max(0.0),
                    HAlign::Right => (available - line.width).max(0.0),
                };
            let mut items = Vec::new();
            for segment in line.segments {
                let baseline =
                    size * (LINE_HEIGHT - 1.0) / 2.0 + size * measure.ascent_ratio(segment.style);
                if segment.style.underline {
                    items.push(Item::Rule {
                        x,
                        y: baseline + size * 0.1,
                        width: segment.width,
                        height: (size / 16.0).max(0.5),
                    });
                }
                items.push(Item::Text {
                    x,
                    baseline,
                    text: segment.text,
                    size,
                    style: segment.style,
                    width: segment.width,
                });
                x += segment.width;
            }
            Unit { height, items }
        })
        .collect()
}

fn paragraph_units(
    paragraph: &Paragraph,
    measure: &dyn TextMeasure,
    width: f32,
    font_size: f32,
) -> Vec<Unit> {
    let size = font_size * paragraph.scale;
    let left = paragraph.indent.min(width * 0.5);
    let available = width - left;
    let lines = wrap(&paragraph.runs, measure, size, available);
    let mut units = line_units(lines, measure, size, left, available, paragraph.align);
    if paragraph.space_after > 0.0 {
        units.push(Unit {
            height: paragraph.space_after * size,
            items: Vec::new(),
        });
    }
    units
}

/// One unit per table row. Columns share the width equally; each cell is laid
/// out as a flow of its own, images included.
pub fn table_units(
    rows: &[Vec<Cell>],
    measure: &dyn TextMeasure,
    width: f32,
    font_size: f32,
    natural_size: &dyn Fn(&str) -> Option<(u32, u32)>,
) -> Vec<Unit> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return Vec::new();
    }
    let column_width = width / columns as f32;
    let inner = (column_width - 2.0 * CELL_PADDING).max(1.0);
    let line_height = font_size * LINE_HEIGHT;

    rows.iter()
        .enumerate()
        .map(|(row_index, row)| {
            let cells: Vec<Vec<Unit>> = (0..columns)
                .map(|c| {
                    row.get(c)
                        .map(|cell| layout_flow(&cell.blocks, measure, inner, font_size, natural_size))
                        .unwrap_or_default()
                })
                .collect();
            let content_height = cells
                .iter()
                .map(|units| units.iter().map(|u| u.height).sum::<f32>())
                .fold(line_height, f32::max);
            let height = content_height + 2.0 * CELL_PADDING;

            let mut items = Vec::new();
            for (c, units) in cells.into_iter().enumerate() {
                let cell_x = c as f32 * column_width;
                let mut dy = CELL_PADDING;
                for unit in units {
                    items.extend(
                        unit.items
                            .into_iter()
                            .map(|item| item.offset(cell_x + CELL_PADDING, dy)),
                    );
                    dy += unit.height;
                }
                items.push(Item::Rule {
                    x: cell_x,
                    y: 0.0,
                    width: CELL_BORDER,
                    height,
                });
            }
            items.push(Item::Rule {
                x: width - CELL_BORDER,
                y: 0.0,
                width: CELL_BORDER,
                height,
            });
            if row_index == 0 {
                items.push(Item::Rule {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height: CELL_BORDER,
                });
            }
            items.push(Item::Rule {
                x: 0.0,
                y: height - CELL_BORDER,
                width,
                height: CELL_BORDER,
            });
            Unit { height, items }
        })
        .collect()
}

fn image_unit(
    image: &ImageBlock,
    width: f32,
    natural: Option<(u32, u32)>,
) -> Option<Unit> {
    let aspect = natural
        .filter(|(w, h)| *w > 0 && *h > 0)
        .map(|(w, h)| w as f32 / h as f32);
    let natural_width = natural.map(|(w, _)| w as f32);
    let mut w = image.width.or(natural_width)?;
    let mut h = match (image.height, aspect) {
        (Some(h), _) => h,
        (None, Some(aspect)) => w / aspect,
        (None, None) => w,
    };
    if w > width {
        h *= width / w;
        w = width;
    }
    let x = match image.align {
        HAlign::Left => 0.0,
        HAlign::Center => (width - w) / 2.0,
        HAlign::Right => width - w,
    };
    Some(Unit {
        height: h,
        items: vec![Item::Image {
            x,
            y: 0.0,
            width: w,
            height: h,
            src: image.src.clone(),
        }],
    })
}

/// Lays blocks out top to bottom within `width`.
/// `natural_size` reports an image's pixel size, when it can be loaded.
pub fn layout_flow(
    blocks: &[Block],
    measure: &dyn TextMeasure,
    width: f32,
    font_size: f32,
    natural_size: &dyn Fn(&str) -> Option<(u32, u32)>,
) -> Vec<Unit> {
    let mut units = Vec::new();
    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => {
                units.extend(paragraph_units(paragraph, measure, width, font_size));
            }
            Block::Table(rows) => {
                units.extend(table_units(rows, measure, width, font_size, natural_size));
            }
            Block::Image(image) => match image_unit(image, width, natural_size(&image.src)) {
                Some(unit) => units.push(unit),
                None => log::warn!("Skipping image with unknown size"),
            },
        }
    }
    units
}

/// Stacks units into pages of `page_height`. A unit that does not fit on the
/// current page starts the next one; there is always at least one page.
pub fn paginate(units: Vec<Unit>, page_height: f32) -> Vec<Vec<Item>> {
    let mut pages: Vec<Vec<Item>> = vec![Vec::new()];
    let mut y = 0.0f32;
    for unit in units {
        if y > 0.0 && y + unit.height > page_height + 0.01 {
            if unit.items.is_empty() {
                continue;
            }
            pages.push(Vec::new());
            y = 0.0;
        }
        if let Some(page) = pages.last_mut() {
            page.extend(unit.items.into_iter().map(|item| item.offset(0.0, y)));
        }
        y += unit.height;
    }
    pages
}

/// Fixed-advance measure: every char is half an em wide.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonospaceMeasure;

impl TextMeasure for MonospaceMeasure {
    fn text_width(&self, text: &str, size: f32, _style: RunStyle) -> f32 {
        text.chars().count() as f32 * size * 0.5
    }
}
