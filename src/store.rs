//! Floating object store: the index of page objects over the flowed content.
//!
//! Insertion order is stacking order. Table and image records always have a
//! matching content node (same `id`); every mutation that touches placement
//! writes the metadata through to that node.

use chrono::Utc;

use crate::error::Error;
use crate::markup::{EditorSurface, MODE_ATTR, OBJECT_TYPE_ATTR, X_ATTR, Y_ATTR, escape_attr};
use crate::model::{
    ImageObject, ObjectCounters, ObjectKind, ObjectMode, ObjectVariant, PageObject,
    RectangleObject, StylePatch, TableObject, clamp_rect_size,
};

pub const DEFAULT_POSITION: (f32, f32) = (50.0, 50.0);
pub const DEFAULT_IMAGE_WIDTH: f32 = 300.0;
const MAX_TABLE_DIMENSION: usize = 50;

/// What to insert.
#[derive(Clone, Debug, PartialEq)]
pub enum NewObject {
    Table { rows: usize, columns: usize },
    Image { src: String, natural_width: u32, natural_height: u32 },
    Rectangle,
}

impl NewObject {
    pub fn variant(&self) -> ObjectVariant {
        match self {
            NewObject::Table { .. } => ObjectVariant::Table,
            NewObject::Image { .. } => ObjectVariant::Image,
            NewObject::Rectangle => ObjectVariant::Rectangle,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub mode: ObjectMode,
    pub x: f32,
    pub y: f32,
}

impl Placement {
    pub fn floating(x: f32, y: f32) -> Self {
        Self {
            mode: ObjectMode::Floating,
            x,
            y,
        }
    }

    pub fn inline() -> Self {
        Self {
            mode: ObjectMode::Inline,
            x: DEFAULT_POSITION.0,
            y: DEFAULT_POSITION.1,
        }
    }
}

/// Pending style edits for one object, committed with [`ObjectStore::apply_draft`].
#[derive(Clone, Debug, PartialEq)]
pub struct StyleDraft {
    pub id: String,
    pub patch: StylePatch,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectStore {
    objects: Vec<PageObject>,
    counters: ObjectCounters,
    selected: Option<String>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(objects: Vec<PageObject>, counters: ObjectCounters) -> Self {
        Self {
            objects,
            counters,
            selected: None,
        }
    }

    pub fn objects(&self) -> &[PageObject] {
        &self.objects
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn counters(&self) -> &ObjectCounters {
        &self.counters
    }

    pub fn get(&self, id: &str) -> Option<&PageObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut PageObject, Error> {
        self.objects
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))
    }

    pub fn add(
        &mut self,
        surface: &mut dyn EditorSurface,
        new: NewObject,
        placement: Placement,
    ) -> PageObject {
        let variant = new.variant();
        let (id, number) = self.allocate_id(variant);
        let name = format!("{} {}", variant.label(), number);

        let (kind, markup) = match new {
            NewObject::Table { rows, columns } => {
                let markup = table_markup(&id, rows, columns);
                (ObjectKind::Table(TableObject {}), Some(markup))
            }
            NewObject::Image {
                src,
                natural_width,
                natural_height,
            } => {
                let aspect = if natural_height > 0 {
                    natural_width as f32 / natural_height as f32
                } else {
                    1.0
                };
                let width = if natural_width > 0 {
                    (natural_width as f32).min(DEFAULT_IMAGE_WIDTH)
                } else {
                    DEFAULT_IMAGE_WIDTH
                };
                let image = ImageObject::new(width, aspect);
                let markup = format!(
                    r#"<img id="{}" src="{}" alt="" {OBJECT_TYPE_ATTR}="image" {MODE_ATTR}="inline" width="{}"/>"#,
                    escape_attr(&id),
                    escape_attr(&src),
                    image.width
                );
                (ObjectKind::Image(image), Some(markup))
            }
            NewObject::Rectangle => (ObjectKind::Rectangle(RectangleObject::default()), None),
        };

        let mode = if variant == ObjectVariant::Rectangle {
            ObjectMode::Floating
        } else {
            placement.mode
        };

        let object = PageObject {
            id: id.clone(),
            name,
            mode,
            x: clamp_coordinate(placement.x),
            y: clamp_coordinate(placement.y),
            kind,
        };

        if let Some(markup) = markup {
            surface.insert_at_caret(&markup);
            sync_node(surface, &object);
        }

        log::debug!("Added {} '{}' ({})", variant.as_str(), object.name, object.id);
        self.objects.push(object.clone());
        self.selected = Some(id);
        object
    }

    /// Per-variant counter plus a millisecond timestamp, retried until unused.
    fn allocate_id(&mut self, variant: ObjectVariant) -> (String, u32) {
        loop {
            let number = self.counters.next(variant);
            let id = format!(
                "{}-{}-{}",
                variant.id_prefix(),
                number,
                Utc::now().timestamp_millis()
            );
            if self.get(&id).is_none() {
                return (id, number);
            }
        }
    }

    /// Moves a floating object. Coordinates are clamped at zero; there is no upper bound.
    pub fn update_placement(
        &mut self,
        surface: &mut dyn EditorSurface,
        id: &str,
        x: f32,
        y: f32,
    ) -> Result<(), Error> {
        let object = self.get_mut(id)?;
        if !object.is_floating() {
            return Err(Error::NotFloating(id.to_string()));
        }
        object.x = clamp_coordinate(x);
        object.y = clamp_coordinate(y);
        let object = object.clone();
        sync_node(surface, &object);
        Ok(())
    }

    /// Merges the fields that apply to the object's variant; the rest are ignored.
    pub fn update_style(
        &mut self,
        surface: &mut dyn EditorSurface,
        id: &str,
        patch: &StylePatch,
    ) -> Result<(), Error> {
        let object = self.get_mut(id)?;
        let mut ignored: Vec<&str> = Vec::new();

        match &mut object.kind {
            ObjectKind::Image(image) => {
                if let Some(width) = patch.width {
                    image.set_width(width);
                }
                if let Some(wrap) = patch.text_wrap {
                    image.text_wrap = wrap;
                }
                if let Some(alignment) = patch.alignment {
                    image.alignment = alignment;
                }
                collect_ignored(
                    &mut ignored,
                    &[
                        ("height", patch.height.is_some()),
                        ("bgColor", patch.bg_color.is_some()),
                        ("borderColor", patch.border_color.is_some()),
                        ("borderWidth", patch.border_width.is_some()),
                        ("text", patch.text.is_some()),
                        ("textAlign", patch.text_align.is_some()),
                        ("textVAlign", patch.text_v_align.is_some()),
                    ],
                );
            }
            ObjectKind::Rectangle(rect) => {
                if let Some(width) = patch.width {
                    rect.width = clamp_rect_size(width);
                }
                if let Some(height) = patch.height {
                    rect.height = clamp_rect_size(height);
                }
                if let Some(color) = &patch.bg_color {
                    rect.bg_color = color.clone();
                }
                if let Some(color) = &patch.border_color {
                    rect.border_color = color.clone();
                }
                if let Some(width) = patch.border_width {
                    rect.border_width = if width.is_finite() { width.max(0.0) } else { 0.0 };
                }
                if let Some(text) = &patch.text {
                    rect.text = text.clone();
                }
                if let Some(align) = patch.text_align {
                    rect.text_align = align;
                }
                if let Some(align) = patch.text_v_align {
                    rect.text_v_align = align;
                }
                collect_ignored(
                    &mut ignored,
                    &[
                        ("textWrap", patch.text_wrap.is_some()),
                        ("alignment", patch.alignment.is_some()),
                    ],
                );
            }
            ObjectKind::Table(_) => {
                if !patch.is_empty() {
                    ignored.push("all");
                }
            }
        }

        if !ignored.is_empty() {
            log::debug!(
                "Ignoring style fields {:?} for {} '{}'",
                ignored,
                object.variant().as_str(),
                object.id
            );
        }
        let object = object.clone();
        sync_node(surface, &object);
        Ok(())
    }

    /// Switching to floating keeps the last known position; rectangles are always floating.
    pub fn set_mode(
        &mut self,
        surface: &mut dyn EditorSurface,
        id: &str,
        mode: ObjectMode,
    ) -> Result<(), Error> {
        let object = self.get_mut(id)?;
        if object.variant() == ObjectVariant::Rectangle && mode == ObjectMode::Inline {
            log::debug!("Rectangle '{}' cannot be inline", object.id);
            return Ok(());
        }
        object.mode = mode;
        object.x = clamp_coordinate(object.x);
        object.y = clamp_coordinate(object.y);
        let object = object.clone();
        sync_node(surface, &object);
        Ok(())
    }

    /// Deletes the record and its content node. Unknown ids are a no-op.
    pub fn remove(&mut self, surface: &mut dyn EditorSurface, id: &str) -> bool {
        let Some(index) = self.objects.iter().position(|o| o.id == id) else {
            return false;
        };
        let object = self.objects.remove(index);
        if object.variant().owns_content_node() && !surface.remove_node(id) {
            log::warn!("Content node for {} '{}' was already gone", object.variant().as_str(), id);
        }
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        true
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), Error> {
        self.get_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Selects one object, or clears the selection with `None`.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.get(id).is_some() => {
                self.selected = Some(id.to_string());
                true
            }
            Some(_) => false,
            None => {
                self.selected = None;
                true
            }
        }
    }

    pub fn selected(&self) -> Option<&PageObject> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn begin_edit(&self, id: &str) -> Result<StyleDraft, Error> {
        let object = self
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))?;
        let patch = match &object.kind {
            ObjectKind::Image(image) => StylePatch {
                width: Some(image.width),
                text_wrap: Some(image.text_wrap),
                alignment: Some(image.alignment),
                ..StylePatch::default()
            },
            ObjectKind::Rectangle(rect) => StylePatch {
                width: Some(rect.width),
                height: Some(rect.height),
                bg_color: Some(rect.bg_color.clone()),
                border_color: Some(rect.border_color.clone()),
                border_width: Some(rect.border_width),
                text: Some(rect.text.clone()),
                text_align: Some(rect.text_align),
                text_v_align: Some(rect.text_v_align),
                ..StylePatch::default()
            },
            ObjectKind::Table(_) => StylePatch::default(),
        };
        Ok(StyleDraft {
            id: id.to_string(),
            patch,
        })
    }

    pub fn apply_draft(
        &mut self,
        surface: &mut dyn EditorSurface,
        draft: StyleDraft,
    ) -> Result<(), Error> {
        self.update_style(surface, &draft.id, &draft.patch)
    }

    pub fn into_parts(self) -> (Vec<PageObject>, ObjectCounters) {
        (self.objects, self.counters)
    }
}

fn collect_ignored<'a>(ignored: &mut Vec<&'a str>, fields: &[(&'a str, bool)]) {
    ignored.extend(fields.iter().filter(|(_, set)| *set).map(|(name, _)| *name));
}

fn clamp_coordinate(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// Writes an object's placement metadata onto its content node.
pub(crate) fn sync_node(surface: &mut dyn EditorSurface, object: &PageObject) {
    if !object.variant().owns_content_node() {
        return;
    }
    let id = object.id.as_str();
    if !surface.has_node(id) {
        log::warn!("No content node for {} '{}'", object.variant().as_str(), id);
        return;
    }
    surface.set_node_attribute(id, OBJECT_TYPE_ATTR, Some(object.variant().as_str()));
    surface.set_node_attribute(id, MODE_ATTR, Some(object.mode.as_str()));
    if object.is_floating() {
        surface.set_node_attribute(id, X_ATTR, Some(&format_px(object.x)));
        surface.set_node_attribute(id, Y_ATTR, Some(&format_px(object.y)));
    } else {
        surface.set_node_attribute(id, X_ATTR, None);
        surface.set_node_attribute(id, Y_ATTR, None);
    }
    if let ObjectKind::Image(image) = &object.kind {
        surface.set_node_attribute(id, "width", Some(&format_px(image.width)));
    }
}

pub(crate) fn format_px(value: f32) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn table_markup(id: &str, rows: usize, columns: usize) -> String {
    let rows = rows.clamp(1, MAX_TABLE_DIMENSION);
    let columns = columns.clamp(1, MAX_TABLE_DIMENSION);
    let mut markup = format!(
        r#"<table id="{}" {OBJECT_TYPE_ATTR}="table" {MODE_ATTR}="inline" style="border-collapse:collapse;width:100%"><tbody>"#,
        escape_attr(id)
    );
    for _ in 0..rows {
        markup.push_str("<tr>");
        for _ in 0..columns {
            markup.push_str(r#"<td style="border:1px solid #000;padding:4px">&#160;</td>"#);
        }
        markup.push_str("</tr>");
    }
    markup.push_str("</tbody></table>");
    markup
}
