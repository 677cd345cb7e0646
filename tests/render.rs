use std::io::Cursor;

use roxmltree::{Document, Node};
use template_pdf::html::{CONTENT_LAYER_Z, FRONT_LAYER_Z};
use template_pdf::model::{HAlign, StylePatch, TextWrap};
use template_pdf::store::Placement;
use template_pdf::{EditorState, MarkupSurface, ValueMap};

fn editor() -> EditorState<MarkupSurface> {
    EditorState::new(MarkupSurface::default())
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 128, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn parse(html: &str) -> Document<'_> {
    let body = html
        .strip_prefix("<!DOCTYPE html>\n")
        .expect("print document starts with a doctype");
    Document::parse(body).unwrap()
}

fn has_class(node: &Node, class: &str) -> bool {
    node.attribute("class")
        .is_some_and(|c| c.split_whitespace().any(|c| c == class))
}

fn pages<'a, 'input>(doc: &'a Document<'input>) -> Vec<Node<'a, 'input>> {
    doc.descendants()
        .filter(|n| n.has_tag_name("div") && has_class(n, "page"))
        .collect()
}

fn z_index(node: &Node) -> u32 {
    let style = node.attribute("style").unwrap_or_default();
    style
        .split(';')
        .find_map(|decl| decl.trim().strip_prefix("z-index:"))
        .and_then(|z| z.trim().parse().ok())
        .unwrap_or_else(|| panic!("no z-index in {style:?}"))
}

#[test]
fn landscape_pages_use_millimetre_boxes() {
    let mut ed = editor();
    ed.set_orientation("landscape").unwrap();
    ed.set_margin_mm(20.0);
    ed.set_total_pages(2);

    let html = ed.render_html(&ValueMap::new());
    assert!(html.contains("size: 297mm 210mm"));

    let doc = parse(&html);
    let pages = pages(&doc);
    assert_eq!(pages.len(), 2);
    for (index, page) in pages.iter().enumerate() {
        let style = page.attribute("style").unwrap();
        assert!(style.contains("width:297mm;"), "{style}");
        assert!(style.contains("height:210mm;"), "{style}");
        assert!(style.contains("padding:20mm;"), "{style}");
        assert_eq!(page.attribute("data-page"), Some((index + 1).to_string().as_str()));
    }
    // Objects and content are only laid on the first page.
    assert!(pages[1].children().all(|n| !has_class(&n, "page-content")));
}

#[test]
fn layers_are_background_objects_then_content() {
    let mut ed = editor();
    ed.set_background(Some("fundo.png"));
    ed.set_background_opacity(40);
    ed.insert_rectangle(10.0, 10.0);

    let html = ed.render_html(&ValueMap::new());
    let doc = parse(&html);
    let page = pages(&doc)[0];
    let layers: Vec<&str> = page
        .children()
        .filter(|n| n.is_element())
        .filter_map(|n| n.attribute("class"))
        .collect();
    assert_eq!(layers, ["page-background", "page-objects", "page-content"]);

    let background = page.first_element_child().unwrap();
    let style = background.attribute("style").unwrap();
    assert!(style.contains("fundo.png"), "{style}");
    assert!(style.contains("opacity:0.4;"), "{style}");
}

#[test]
fn objects_stack_in_insertion_order() {
    let mut ed = editor();
    let first = ed.insert_rectangle(0.0, 0.0);
    let image = ed
        .insert_image(png(100, 50), Placement::floating(20.0, 30.0))
        .unwrap();
    ed.insert_table(1, 2, Placement::inline());
    let last = ed.insert_rectangle(40.0, 40.0);

    let html = ed.render_html(&ValueMap::new());
    let doc = parse(&html);
    let page = pages(&doc)[0];
    let objects = page
        .children()
        .find(|n| has_class(n, "page-objects"))
        .unwrap();
    let stacked: Vec<Node> = objects.children().filter(|n| n.is_element()).collect();
    let ids: Vec<&str> = stacked.iter().filter_map(|n| n.attribute("id")).collect();
    assert_eq!(ids, [first.id.as_str(), image.id.as_str(), last.id.as_str()]);

    let z: Vec<u32> = stacked.iter().map(z_index).collect();
    assert!(z.windows(2).all(|w| w[0] < w[1]), "{z:?}");

    let img_style = stacked[1].attribute("style").unwrap();
    assert!(img_style.contains("position:absolute;"));
    assert!(img_style.contains("left:20px;"));
    assert!(img_style.contains("top:30px;"));

    // The floating image left the content layer; the inline table stayed.
    let content = page
        .children()
        .find(|n| has_class(n, "page-content"))
        .unwrap();
    assert!(content.descendants().all(|n| !n.has_tag_name("img")));
    assert!(content.descendants().any(|n| n.has_tag_name("table")));
}

#[test]
fn rectangle_text_is_escaped_and_keeps_line_breaks() {
    let mut ed = editor();
    let rect = ed.insert_rectangle(0.0, 0.0);
    let patch = StylePatch {
        text: Some("a < b\n{{medico}}".to_string()),
        ..StylePatch::default()
    };
    ed.update_style(&rect.id, &patch).unwrap();

    let values = ValueMap::from([("medico".to_string(), "Dr. <Souza>".to_string())]);
    let html = ed.render_html(&values);
    let doc = parse(&html);
    let node = doc
        .descendants()
        .find(|n| n.attribute("id") == Some(rect.id.as_str()))
        .unwrap();
    let text_box = node.first_element_child().unwrap();
    let texts: Vec<&str> = text_box.children().filter_map(|n| n.text()).collect();
    assert_eq!(texts, ["a < b", "Dr. <Souza>"]);
    assert!(text_box.children().any(|n| n.has_tag_name("br")));
}

#[test]
fn values_are_substituted_into_the_content() {
    let mut ed = editor();
    ed.insert_variable("paciente");
    ed.insert_variable("cpf");

    let values = ValueMap::from([("{{paciente}}".to_string(), "Ana & Bia ".to_string())]);
    let html = ed.render_html(&values);
    let doc = parse(&html);
    let content = doc
        .descendants()
        .find(|n| has_class(n, "page-content"))
        .unwrap();
    assert_eq!(content.text(), Some("Ana & Bia {{cpf}}"));

    // Rendering does not touch the live document.
    assert!(ed.snapshot().content.contains("{{paciente}}"));
}

fn wrap(ed: &mut EditorState<MarkupSurface>, id: &str, text_wrap: TextWrap) {
    let patch = StylePatch {
        text_wrap: Some(text_wrap),
        ..StylePatch::default()
    };
    ed.update_style(id, &patch).unwrap();
}

#[test]
fn front_images_stack_above_the_content() {
    let mut ed = editor();
    ed.insert_variable("paciente");
    let behind = ed
        .insert_image(png(100, 50), Placement::floating(0.0, 0.0))
        .unwrap();
    let front = ed
        .insert_image(png(100, 50), Placement::floating(50.0, 0.0))
        .unwrap();
    wrap(&mut ed, &behind.id, TextWrap::Behind);
    wrap(&mut ed, &front.id, TextWrap::Front);

    let html = ed.render_html(&ValueMap::new());
    let doc = parse(&html);
    let page = pages(&doc)[0];
    let layers: Vec<Node> = page.children().filter(|n| n.is_element()).collect();
    let classes: Vec<&str> = layers.iter().filter_map(|n| n.attribute("class")).collect();
    assert_eq!(classes, ["page-objects", "page-content", "page-front"]);

    let ids = |layer: &Node| -> Vec<String> {
        layer
            .children()
            .filter_map(|n| n.attribute("id"))
            .map(str::to_string)
            .collect()
    };
    assert_eq!(ids(&layers[0]), [behind.id.clone()]);
    assert_eq!(ids(&layers[2]), [front.id.clone()]);
    assert!(z_index(&layers[2]) > CONTENT_LAYER_Z);
    assert_eq!(z_index(&layers[2]), FRONT_LAYER_Z);

    // Switching the wrap back moves the image beneath the text again.
    wrap(&mut ed, &front.id, TextWrap::Behind);
    let html = ed.render_html(&ValueMap::new());
    assert!(!html.contains("class=\"page-front\""));
}

#[test]
fn square_wrap_floats_inline_images() {
    let mut ed = editor();
    let image = ed.insert_image(png(100, 50), Placement::inline()).unwrap();
    let patch = StylePatch {
        text_wrap: Some(TextWrap::Square),
        alignment: Some(HAlign::Right),
        ..StylePatch::default()
    };
    ed.update_style(&image.id, &patch).unwrap();

    let html = ed.render_html(&ValueMap::new());
    let doc = parse(&html);
    let img = doc
        .descendants()
        .find(|n| n.attribute("id") == Some(image.id.as_str()))
        .unwrap();
    let style = img.attribute("style").unwrap();
    assert!(style.contains("float:right;"), "{style}");
    assert!(img.ancestors().any(|n| has_class(&n, "page-content")));
}
