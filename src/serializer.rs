//! Live state <-> [`DocumentModel`], and the JSON payload.
//!
//! Loading repairs the link between object records and content nodes:
//! table/image records whose node is gone are dropped, tagged nodes without a
//! record are adopted, and the id counters are raised past every id in use.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::editor::EditorState;
use crate::error::Error;
use crate::markup::{self, EditorSurface, MODE_ATTR, OBJECT_TYPE_ATTR, X_ATTR, Y_ATTR};
use crate::model::{
    DEFAULT_FONT_FAMILY, DEFAULT_FONT_SIZE, DEFAULT_OPACITY_PERCENT, DocumentModel, ImageObject,
    MODEL_VERSION, ObjectCounters, ObjectKind, ObjectMode, ObjectVariant, PageObject,
    RectangleObject, TableObject, clamp_image_width, clamp_opacity, clamp_rect_size,
};
use crate::page::{DEFAULT_MARGIN_MM, Orientation, clamp_margin};
use crate::store::{DEFAULT_IMAGE_WIDTH, DEFAULT_POSITION, ObjectStore, sync_node};

/// Snapshots the live state. Always stamps the current model version.
pub fn serialize<S: EditorSurface>(state: &EditorState<S>) -> DocumentModel {
    let mut model = DocumentModel::from_parts(
        state.settings(),
        state.surface().content(),
        state.objects().objects().to_vec(),
        state.objects().counters().clone(),
    );
    model.version = MODEL_VERSION;
    model
}

/// Rebuilds live state on `surface` from a model.
pub fn deserialize<S: EditorSurface>(model: &DocumentModel, mut surface: S) -> EditorState<S> {
    if model.version > MODEL_VERSION {
        log::warn!(
            "Document model version {} is newer than supported version {}",
            model.version,
            MODEL_VERSION
        );
    }
    surface.set_content(&model.content);

    let mut counters = model.counters.clone();
    let mut seen: HashSet<String> = HashSet::new();
    let mut objects = Vec::with_capacity(model.objects.len());

    for object in &model.objects {
        if !seen.insert(object.id.clone()) {
            log::warn!("Dropping duplicate page object id '{}'", object.id);
            continue;
        }
        let mut object = object.clone();
        if object.variant() == ObjectVariant::Rectangle {
            object.mode = ObjectMode::Floating;
        }
        object.x = object.x.max(0.0);
        object.y = object.y.max(0.0);
        if object.variant().owns_content_node() {
            if !surface.has_node(&object.id) {
                log::warn!(
                    "Dropping {} '{}': no matching content node",
                    object.variant().as_str(),
                    object.id
                );
                continue;
            }
            sync_node(&mut surface, &object);
        }
        raise_counter(&mut counters, &object.id, object.variant());
        objects.push(object);
    }

    adopt_orphans(&mut surface, &mut objects, &mut counters, &seen);

    EditorState::from_parts(
        model.settings(),
        surface,
        ObjectStore::from_parts(objects, counters),
    )
}

/// Ids look like `{prefix}-{n}-{millis}`; keep counters above every `n` in use.
fn raise_counter(counters: &mut ObjectCounters, id: &str, variant: ObjectVariant) -> Option<u32> {
    let number = id
        .strip_prefix(variant.id_prefix())
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.split('-').next())
        .and_then(|n| n.parse::<u32>().ok());
    if let Some(number) = number {
        counters.raise_to(variant, number);
    }
    number
}

fn adopt_orphans(
    surface: &mut dyn EditorSurface,
    objects: &mut Vec<PageObject>,
    counters: &mut ObjectCounters,
    known: &HashSet<String>,
) {
    let content = surface.content();
    for element in markup::elements(&content) {
        let tag = &content[element.span.start..element.span.open_end];
        let Some(variant) = markup::attribute(tag, OBJECT_TYPE_ATTR)
            .and_then(|v| ObjectVariant::parse(&v))
            .filter(|v| v.owns_content_node())
        else {
            continue;
        };
        let Some(id) = element.id.clone().filter(|id| !id.is_empty()) else {
            log::warn!("Ignoring {} node without an id", variant.as_str());
            continue;
        };
        if known.contains(&id) || objects.iter().any(|o| o.id == id) {
            continue;
        }

        let mode = markup::attribute(tag, MODE_ATTR)
            .and_then(|m| ObjectMode::parse(&m))
            .unwrap_or_default();
        let coordinate = |name: &str, fallback: f32| {
            markup::attribute(tag, name)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .map_or(fallback, |v| v.max(0.0))
        };
        let kind = match variant {
            ObjectVariant::Image => {
                let dimension = |name: &str| {
                    markup::attribute(tag, name).and_then(|v| v.trim().parse::<f32>().ok())
                };
                let width = dimension("width").unwrap_or(DEFAULT_IMAGE_WIDTH);
                let aspect = match (dimension("width"), dimension("height")) {
                    (Some(w), Some(h)) if h > 0.0 => w / h,
                    _ => 1.0,
                };
                ObjectKind::Image(ImageObject::new(width, aspect))
            }
            _ => ObjectKind::Table(TableObject {}),
        };

        let number =
            raise_counter(counters, &id, variant).unwrap_or_else(|| counters.next(variant));
        let object = PageObject {
            id: id.clone(),
            name: format!("{} {}", variant.label(), number),
            mode,
            x: coordinate(X_ATTR, DEFAULT_POSITION.0),
            y: coordinate(Y_ATTR, DEFAULT_POSITION.1),
            kind,
        };
        log::warn!("Adopting {} node '{}' without an object record", variant.as_str(), id);
        sync_node(surface, &object);
        objects.push(object);
    }
}

pub fn to_json(model: &DocumentModel) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(model)?)
}

/// Lenient import: anything that is not a JSON object is an error, anything
/// else falls back field by field to the documented defaults.
pub fn from_json(text: &str) -> Result<DocumentModel, Error> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::InvalidModel(e.to_string()))?;
    from_value(&value)
}

pub fn from_value(value: &Value) -> Result<DocumentModel, Error> {
    let Value::Object(map) = value else {
        return Err(Error::InvalidModel("expected a JSON object".to_string()));
    };
    let now = Utc::now();

    let version = number(map, &["version"])
        .filter(|v| *v >= 1.0)
        .map_or(MODEL_VERSION, |v| v as u32);

    let page_orientation = match text(map, &["pageOrientation", "orientation"]) {
        Some(value) => value.parse::<Orientation>().unwrap_or_else(|e| {
            log::warn!("{e}; using portrait");
            Orientation::Portrait
        }),
        None => Orientation::Portrait,
    };

    let objects = match field(map, &["objects"]) {
        Some(Value::Array(items)) => items.iter().filter_map(object_from_value).collect(),
        Some(_) => {
            log::warn!("Field 'objects' is not an array; ignoring it");
            Vec::new()
        }
        None => Vec::new(),
    };

    Ok(DocumentModel {
        version,
        title: text(map, &["title"]).unwrap_or_default().to_string(),
        page_orientation,
        font_family: text(map, &["fontFamily"])
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_FONT_FAMILY)
            .to_string(),
        font_size: number(map, &["fontSize"])
            .filter(|s| *s > 0.0)
            .map_or(DEFAULT_FONT_SIZE, |s| s as f32),
        page_margin_mm: number(map, &["pageMarginMm", "pageMargin"])
            .map_or(DEFAULT_MARGIN_MM, |m| clamp_margin(m as f32)),
        background_image: text(map, &["backgroundImage"])
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        background_opacity_percent: number(map, &["backgroundOpacity", "backgroundOpacityPercent"])
            .map_or(DEFAULT_OPACITY_PERCENT, |o| clamp_opacity(o.round() as i64)),
        content: text(map, &["content"]).unwrap_or_default().to_string(),
        objects,
        total_pages: number(map, &["totalPages"]).map_or(1, |p| (p as u32).max(1)),
        counters: typed(map, &["counters"]).unwrap_or_default(),
        created_at: timestamp(map, "createdAt").unwrap_or(now),
        updated_at: timestamp(map, "updatedAt").unwrap_or(now),
    })
}

fn object_from_value(value: &Value) -> Option<PageObject> {
    let Value::Object(map) = value else {
        log::warn!("Dropping page object that is not a JSON object");
        return None;
    };
    let Some(id) = text(map, &["id"]).filter(|id| !id.is_empty()) else {
        log::warn!("Dropping page object without an id");
        return None;
    };
    let Some(variant) = text(map, &["type"]).and_then(ObjectVariant::parse) else {
        log::warn!("Dropping page object '{id}' with unknown type");
        return None;
    };

    let mode = match variant {
        ObjectVariant::Rectangle => ObjectMode::Floating,
        _ => text(map, &["mode"])
            .and_then(ObjectMode::parse)
            .unwrap_or_default(),
    };
    let (default_x, default_y) = if mode == ObjectMode::Floating {
        DEFAULT_POSITION
    } else {
        (0.0, 0.0)
    };

    let kind = match variant {
        ObjectVariant::Table => ObjectKind::Table(TableObject {}),
        ObjectVariant::Image => {
            let mut image = ImageObject::new(
                number(map, &["width"]).map_or(DEFAULT_IMAGE_WIDTH, |w| w as f32),
                number(map, &["aspectRatio"]).map_or(1.0, |a| a as f32),
            );
            if let Some(wrap) = typed(map, &["textWrap"]) {
                image.text_wrap = wrap;
            }
            if let Some(alignment) = typed(map, &["alignment"]) {
                image.alignment = alignment;
            }
            ObjectKind::Image(image)
        }
        ObjectVariant::Rectangle => {
            let defaults = RectangleObject::default();
            ObjectKind::Rectangle(RectangleObject {
                width: number(map, &["width"]).map_or(defaults.width, |w| clamp_rect_size(w as f32)),
                height: number(map, &["height"])
                    .map_or(defaults.height, |h| clamp_rect_size(h as f32)),
                bg_color: text(map, &["bgColor"]).map_or(defaults.bg_color, str::to_string),
                border_color: text(map, &["borderColor"])
                    .map_or(defaults.border_color, str::to_string),
                border_width: number(map, &["borderWidth"])
                    .map_or(defaults.border_width, |w| w.clamp(0.0, f64::from(f32::MAX)) as f32),
                text: text(map, &["text"]).map_or(defaults.text, str::to_string),
                text_align: typed(map, &["textAlign"]).unwrap_or(defaults.text_align),
                text_v_align: typed(map, &["textVAlign"]).unwrap_or(defaults.text_v_align),
            })
        }
    };

    let image_width = match &kind {
        ObjectKind::Image(image) => Some(image.width),
        _ => None,
    };
    if let (Some(raw), Some(width)) = (number(map, &["width"]), image_width)
        && clamp_image_width(raw as f32) != width
    {
        log::warn!("Image '{id}' width {raw} adjusted to {width}");
    }

    Some(PageObject {
        id: id.to_string(),
        name: text(map, &["name"])
            .map_or_else(|| variant.label().to_string(), str::to_string),
        mode,
        x: number(map, &["x"]).map_or(default_x, |x| (x as f32).max(0.0)),
        y: number(map, &["y"]).map_or(default_y, |y| (y as f32).max(0.0)),
        kind,
    })
}

/// First present, non-null value among `keys`.
fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
}

fn text<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    let value = field(map, keys)?;
    let text = value.as_str();
    if text.is_none() {
        log::warn!("Field '{}' is not a string; using default", keys[0]);
    }
    text
}

/// Numbers, or numeric strings as older payloads wrote them.
fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    let value = field(map, keys)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite());
    if number.is_none() {
        log::warn!("Field '{}' is not a number; using default", keys[0]);
    }
    number
}

fn typed<T: DeserializeOwned>(map: &Map<String, Value>, keys: &[&str]) -> Option<T> {
    let value = field(map, keys)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!("Field '{}' is invalid ({e}); using default", keys[0]);
            None
        }
    }
}

fn timestamp(map: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    text(map, &[key]).and_then(|s| s.parse::<DateTime<Utc>>().ok())
}
