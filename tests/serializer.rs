use std::io::Cursor;

use template_pdf::model::{ObjectVariant, StylePatch};
use template_pdf::serializer::{self, deserialize, from_json, serialize, to_json};
use template_pdf::store::Placement;
use template_pdf::{
    DocumentModel, EditorState, EditorSurface, Error, MarkupSurface, ObjectKind, ObjectMode,
    Orientation,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn sample_editor() -> EditorState<MarkupSurface> {
    let mut ed = EditorState::new(MarkupSurface::default());
    ed.set_title("Receituário");
    ed.set_orientation("landscape").unwrap();
    ed.set_margin_mm(15.0);
    ed.set_background_opacity(40);
    ed.insert_variable("paciente");
    ed.insert_table(2, 2, Placement::inline());
    ed.insert_image(png(120, 60), Placement::floating(40.0, 70.0))
        .unwrap();
    let rect = ed.insert_rectangle(300.0, 20.0);
    let patch = StylePatch {
        text: Some("Dr. {{medico}}".to_string()),
        bg_color: Some("transparent".to_string()),
        ..StylePatch::default()
    };
    ed.update_style(&rect.id, &patch).unwrap();
    ed
}

#[test]
fn snapshot_survives_json_and_reload() {
    let ed = sample_editor();
    let model = serialize(&ed);
    assert_eq!(model.version, template_pdf::model::MODEL_VERSION);
    assert_eq!(model.objects.len(), 3);

    let json = to_json(&model).unwrap();
    let parsed = from_json(&json).unwrap();
    assert_eq!(parsed, model);

    let reloaded = deserialize(&parsed, MarkupSurface::default());
    assert_eq!(serialize(&reloaded), model);
    assert_eq!(reloaded.surface().content(), ed.surface().content());
}

#[test]
fn json_uses_the_documented_field_names() {
    let model = serialize(&sample_editor());
    let value: serde_json::Value = serde_json::from_str(&to_json(&model).unwrap()).unwrap();
    assert_eq!(value["pageOrientation"], "landscape");
    assert_eq!(value["backgroundOpacity"], 40);
    assert_eq!(value["pageMarginMm"], 15.0);
    assert_eq!(value["objects"][2]["type"], "rectangle");
    assert_eq!(value["objects"][2]["bgColor"], "transparent");
    assert!(value["createdAt"].is_string());
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let model = from_json(r#"{"content": "<p>Olá</p>"}"#).unwrap();
    assert_eq!(model.page_orientation, Orientation::Portrait);
    assert_eq!(model.font_family, "Arial");
    assert_eq!(model.font_size, 14.0);
    assert_eq!(model.page_margin_mm, 20.0);
    assert_eq!(model.background_opacity_percent, 100);
    assert_eq!(model.total_pages, 1);
    assert_eq!(model.background_image, None);
    assert_eq!(model.content, "<p>Olá</p>");
}

#[test]
fn bad_field_values_are_repaired() {
    let model = from_json(
        r#"{
            "pageOrientation": "diagonal",
            "pageMargin": "12",
            "backgroundOpacity": 250,
            "totalPages": 0,
            "fontSize": -3,
            "objects": [
                {"id": "rect-1-1", "type": "rectangle", "mode": "inline", "x": -40, "width": 5},
                {"id": "star-1-1", "type": "star"},
                {"type": "table"}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(model.page_orientation, Orientation::Portrait);
    assert_eq!(model.page_margin_mm, 12.0);
    assert_eq!(model.background_opacity_percent, 100);
    assert_eq!(model.total_pages, 1);
    assert_eq!(model.font_size, 14.0);

    assert_eq!(model.objects.len(), 1);
    let rect = &model.objects[0];
    assert_eq!(rect.mode, ObjectMode::Floating);
    assert_eq!(rect.x, 0.0);
    assert_eq!(rect.size(), Some((20.0, 100.0)));
}

#[test]
fn oversized_dimensions_clamp_to_the_maximum() {
    let model = from_json(
        r#"{"objects": [
            {"id": "image-1-1", "type": "image", "width": 1e40, "aspectRatio": 2},
            {"id": "rect-1-1", "type": "rectangle", "width": 1e40, "height": 1e300, "borderWidth": 1e40}
        ]}"#,
    )
    .unwrap();
    let ObjectKind::Image(image) = &model.objects[0].kind else {
        panic!("expected an image");
    };
    assert_eq!(image.width, 800.0);
    assert_eq!(image.height(), 400.0);
    assert_eq!(model.objects[1].size(), Some((800.0, 800.0)));
    let ObjectKind::Rectangle(rect) = &model.objects[1].kind else {
        panic!("expected a rectangle");
    };
    assert!(rect.border_width.is_finite());
}

#[test]
fn non_objects_are_rejected() {
    for input in ["", "not json", "[1, 2]", "\"text\"", "42"] {
        let err = from_json(input).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)), "{input:?}: {err}");
    }
}

#[test]
fn loading_repairs_records_and_nodes() {
    let model = DocumentModel {
        content: concat!(
            r#"<p>Texto</p>"#,
            r#"<table id="table-7-1700000000000" data-object-type="table" data-mode="inline">"#,
            r#"<tr><td>a</td></tr></table>"#,
        )
        .to_string(),
        objects: from_json(
            r#"{"objects": [
                {"id": "image-2-1", "type": "image", "mode": "inline", "width": 200},
                {"id": "rect-4-1", "type": "rectangle", "x": 10, "y": 10}
            ]}"#,
        )
        .unwrap()
        .objects,
        ..DocumentModel::default()
    };

    let mut ed = deserialize(&model, MarkupSurface::default());

    // The image record has no node and is dropped; the table node is adopted.
    assert!(ed.objects().get("image-2-1").is_none());
    let table = ed.objects().get("table-7-1700000000000").unwrap();
    assert_eq!(table.variant(), ObjectVariant::Table);
    assert_eq!(table.name, "Tabela 7");
    assert!(ed.objects().get("rect-4-1").is_some());

    // New ids continue past the highest number in use.
    assert_eq!(ed.objects().counters().table, 7);
    assert_eq!(ed.objects().counters().rectangle, 4);
    let next = ed.insert_table(1, 1, Placement::inline());
    assert!(next.id.starts_with("table-8-"), "{}", next.id);
    let rect = ed.insert_rectangle(0.0, 0.0);
    assert!(rect.id.starts_with("rect-5-"), "{}", rect.id);
}

#[test]
fn duplicate_ids_keep_the_first_record() {
    let mut model = DocumentModel::default();
    model.objects = from_json(
        r#"{"objects": [
            {"id": "rect-1-1", "type": "rectangle", "width": 300},
            {"id": "rect-1-1", "type": "rectangle", "width": 400}
        ]}"#,
    )
    .unwrap()
    .objects;
    let ed = deserialize(&model, MarkupSurface::default());
    assert_eq!(ed.objects().len(), 1);
    let ObjectKind::Rectangle(rect) = &ed.objects().objects()[0].kind else {
        panic!("expected a rectangle");
    };
    assert_eq!(rect.width, 300.0);
}

#[test]
fn serializer_module_reexports_value_parsing() {
    let value = serde_json::json!({"title": "Atestado", "version": 1});
    let model = serializer::from_value(&value).unwrap();
    assert_eq!(model.title, "Atestado");
}
