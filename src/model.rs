use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::page::{DEFAULT_MARGIN_MM, Orientation, PageGeometry, clamp_margin};

pub const MODEL_VERSION: u32 = 1;
pub const DEFAULT_FONT_FAMILY: &str = "Arial";
pub const DEFAULT_FONT_SIZE: f32 = 14.0;
pub const DEFAULT_OPACITY_PERCENT: u8 = 100;

pub const IMAGE_MIN_WIDTH: f32 = 50.0;
pub const IMAGE_MAX_WIDTH: f32 = 800.0;
pub const RECT_MIN_SIZE: f32 = 20.0;
pub const RECT_MAX_SIZE: f32 = 800.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectMode {
    #[default]
    Inline,
    Floating,
}

impl ObjectMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectMode::Inline => "inline",
            ObjectMode::Floating => "floating",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(ObjectMode::Inline),
            "floating" => Some(ObjectMode::Floating),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextWrap {
    #[default]
    Inline,
    Square,
    Tight,
    Behind,
    Front,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl HAlign {
    pub fn as_css(self) -> &'static str {
        match self {
            HAlign::Left => "left",
            HAlign::Center => "center",
            HAlign::Right => "right",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    #[default]
    Middle,
    Bottom,
}

/// Tables keep rows and columns in the flowed content; the record only
/// carries placement, keyed by the same id as the `<table>` node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableObject {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageObject {
    pub width: f32,
    /// Natural width / natural height of the source image.
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f32,
    #[serde(default)]
    pub text_wrap: TextWrap,
    #[serde(default)]
    pub alignment: HAlign,
}

fn default_aspect_ratio() -> f32 {
    1.0
}

impl ImageObject {
    pub fn new(width: f32, aspect_ratio: f32) -> Self {
        let mut image = Self {
            width: IMAGE_MIN_WIDTH,
            aspect_ratio: sanitize_aspect(aspect_ratio),
            text_wrap: TextWrap::default(),
            alignment: HAlign::default(),
        };
        image.set_width(width);
        image
    }

    pub fn height(&self) -> f32 {
        (self.width / sanitize_aspect(self.aspect_ratio)).round()
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = clamp_image_width(width);
    }
}

/// NaN maps to the minimum; infinities clamp like any other value.
pub fn clamp_image_width(width: f32) -> f32 {
    if width.is_nan() {
        return IMAGE_MIN_WIDTH;
    }
    width.round().clamp(IMAGE_MIN_WIDTH, IMAGE_MAX_WIDTH)
}

pub fn clamp_rect_size(size: f32) -> f32 {
    if size.is_nan() {
        return RECT_MIN_SIZE;
    }
    size.round().clamp(RECT_MIN_SIZE, RECT_MAX_SIZE)
}

fn sanitize_aspect(aspect: f32) -> f32 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectangleObject {
    pub width: f32,
    pub height: f32,
    /// CSS colour or `"transparent"`.
    pub bg_color: String,
    pub border_color: String,
    /// 0 means no border.
    pub border_width: f32,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_rect_align")]
    pub text_align: HAlign,
    #[serde(default)]
    pub text_v_align: VAlign,
}

fn default_rect_align() -> HAlign {
    HAlign::Center
}

impl Default for RectangleObject {
    fn default() -> Self {
        Self {
            width: 200.0,
            height: 100.0,
            bg_color: "#e5e7eb".to_string(),
            border_color: "#9ca3af".to_string(),
            border_width: 1.0,
            text: String::new(),
            text_align: HAlign::Center,
            text_v_align: VAlign::Middle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectKind {
    Table(TableObject),
    Image(ImageObject),
    Rectangle(RectangleObject),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectVariant {
    Table,
    Image,
    Rectangle,
}

impl ObjectVariant {
    pub fn id_prefix(self) -> &'static str {
        match self {
            ObjectVariant::Table => "table",
            ObjectVariant::Image => "image",
            ObjectVariant::Rectangle => "rect",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectVariant::Table => "Tabela",
            ObjectVariant::Image => "Imagem",
            ObjectVariant::Rectangle => "Retângulo",
        }
    }

    /// Tables and images live in the flowed content; rectangles only exist as records.
    pub fn owns_content_node(self) -> bool {
        matches!(self, ObjectVariant::Table | ObjectVariant::Image)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "table" => Some(ObjectVariant::Table),
            "image" => Some(ObjectVariant::Image),
            "rectangle" => Some(ObjectVariant::Rectangle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectVariant::Table => "table",
            ObjectVariant::Image => "image",
            ObjectVariant::Rectangle => "rectangle",
        }
    }
}

impl ObjectKind {
    pub fn variant(&self) -> ObjectVariant {
        match self {
            ObjectKind::Table(_) => ObjectVariant::Table,
            ObjectKind::Image(_) => ObjectVariant::Image,
            ObjectKind::Rectangle(_) => ObjectVariant::Rectangle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mode: ObjectMode,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(flatten)]
    pub kind: ObjectKind,
}

impl PageObject {
    pub fn variant(&self) -> ObjectVariant {
        self.kind.variant()
    }

    pub fn is_floating(&self) -> bool {
        self.mode == ObjectMode::Floating
    }

    /// Floating images wrapped `front` sit above the flowed content; every
    /// other floating object sits beneath it.
    pub fn is_in_front(&self) -> bool {
        self.is_floating()
            && matches!(&self.kind, ObjectKind::Image(image) if image.text_wrap == TextWrap::Front)
    }

    /// Width and height in pixels; tables size themselves from their markup.
    pub fn size(&self) -> Option<(f32, f32)> {
        match &self.kind {
            ObjectKind::Table(_) => None,
            ObjectKind::Image(image) => Some((image.width, image.height())),
            ObjectKind::Rectangle(rect) => Some((rect.width, rect.height)),
        }
    }
}

/// Per-variant id counters, persisted so ids stay unique across sessions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectCounters {
    pub table: u32,
    pub image: u32,
    pub rectangle: u32,
}

impl ObjectCounters {
    pub fn next(&mut self, variant: ObjectVariant) -> u32 {
        let counter = self.slot(variant);
        *counter += 1;
        *counter
    }

    pub fn raise_to(&mut self, variant: ObjectVariant, value: u32) {
        let counter = self.slot(variant);
        *counter = (*counter).max(value);
    }

    pub fn get(&self, variant: ObjectVariant) -> u32 {
        match variant {
            ObjectVariant::Table => self.table,
            ObjectVariant::Image => self.image,
            ObjectVariant::Rectangle => self.rectangle,
        }
    }

    fn slot(&mut self, variant: ObjectVariant) -> &mut u32 {
        match variant {
            ObjectVariant::Table => &mut self.table,
            ObjectVariant::Image => &mut self.image,
            ObjectVariant::Rectangle => &mut self.rectangle,
        }
    }
}

/// Page-level settings of a live document.
#[derive(Clone, Debug, PartialEq)]
pub struct PageSettings {
    pub title: String,
    pub orientation: Orientation,
    pub font_family: String,
    pub font_size: f32,
    pub margin_mm: f32,
    /// Data URL, file path or remote URL.
    pub background_image: Option<String>,
    pub background_opacity_percent: u8,
    pub total_pages: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PageSettings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            title: String::new(),
            orientation: Orientation::Portrait,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            margin_mm: DEFAULT_MARGIN_MM,
            background_image: None,
            background_opacity_percent: DEFAULT_OPACITY_PERCENT,
            total_pages: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

impl PageSettings {
    pub fn geometry(&self) -> PageGeometry {
        PageGeometry::new(self.orientation, self.margin_mm)
    }

    pub fn set_margin_mm(&mut self, margin_mm: f32) {
        self.margin_mm = clamp_margin(margin_mm);
    }

    pub fn set_background_opacity(&mut self, percent: i64) {
        self.background_opacity_percent = clamp_opacity(percent);
    }

    pub fn set_total_pages(&mut self, pages: u32) {
        self.total_pages = pages.max(1);
    }
}

pub fn clamp_opacity(percent: i64) -> u8 {
    percent.clamp(0, 100) as u8
}

/// The versioned, portable form of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentModel {
    pub version: u32,
    pub title: String,
    pub page_orientation: Orientation,
    pub font_family: String,
    pub font_size: f32,
    #[serde(alias = "pageMargin")]
    pub page_margin_mm: f32,
    pub background_image: Option<String>,
    #[serde(rename = "backgroundOpacity", alias = "backgroundOpacityPercent")]
    pub background_opacity_percent: u8,
    pub content: String,
    pub objects: Vec<PageObject>,
    pub total_pages: u32,
    #[serde(default)]
    pub counters: ObjectCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DocumentModel {
    fn default() -> Self {
        Self::from_parts(
            &PageSettings::default(),
            String::new(),
            Vec::new(),
            ObjectCounters::default(),
        )
    }
}

impl DocumentModel {
    pub fn from_parts(
        settings: &PageSettings,
        content: String,
        objects: Vec<PageObject>,
        counters: ObjectCounters,
    ) -> Self {
        Self {
            version: MODEL_VERSION,
            title: settings.title.clone(),
            page_orientation: settings.orientation,
            font_family: settings.font_family.clone(),
            font_size: settings.font_size,
            page_margin_mm: clamp_margin(settings.margin_mm),
            background_image: settings.background_image.clone(),
            background_opacity_percent: settings.background_opacity_percent.min(100),
            content,
            objects,
            total_pages: settings.total_pages.max(1),
            counters,
            created_at: settings.created_at,
            updated_at: settings.updated_at,
        }
    }

    pub fn settings(&self) -> PageSettings {
        PageSettings {
            title: self.title.clone(),
            orientation: self.page_orientation,
            font_family: self.font_family.clone(),
            font_size: self.font_size,
            margin_mm: clamp_margin(self.page_margin_mm),
            background_image: self.background_image.clone(),
            background_opacity_percent: self.background_opacity_percent.min(100),
            total_pages: self.total_pages.max(1),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry::new(self.page_orientation, self.page_margin_mm)
    }

    pub fn object(&self, id: &str) -> Option<&PageObject> {
        self.objects.iter().find(|o| o.id == id)
    }
}

/// A partial style update. Fields that do not apply to the target variant are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StylePatch {
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub bg_color: Option<String>,
    pub border_color: Option<String>,
    pub border_width: Option<f32>,
    pub text: Option<String>,
    pub text_align: Option<HAlign>,
    pub text_v_align: Option<VAlign>,
    pub text_wrap: Option<TextWrap>,
    pub alignment: Option<HAlign>,
}

impl StylePatch {
    pub fn is_empty(&self) -> bool {
        *self == StylePatch::default()
    }
}
