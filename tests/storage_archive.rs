use std::io::{Cursor, Read};

use template_pdf::archive::{self, DOCUMENT_ENTRY, FileFormat};
use template_pdf::storage::{DirectoryStore, KeyValueStore, MemoryStore, TemplateLibrary};
use template_pdf::{DocumentModel, EditorState, Error, MarkupSurface};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([250, 240, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn model_titled(title: &str) -> DocumentModel {
    let mut ed = EditorState::new(MarkupSurface::default());
    ed.set_title(title);
    ed.insert_variable("paciente");
    ed.insert_rectangle(10.0, 10.0);
    ed.snapshot()
}

#[test]
fn library_saves_lists_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let mut library = TemplateLibrary::new(DirectoryStore::open(dir.path().join("templates")).unwrap());

    let receita = model_titled("Receita");
    library.save("Receita simples", &receita).unwrap();
    library.save("atestado/2024", &model_titled("Atestado")).unwrap();

    assert_eq!(library.list().unwrap(), ["Receita simples", "atestado/2024"]);
    assert_eq!(library.load("Receita simples").unwrap(), Some(receita));
    assert_eq!(library.load("missing").unwrap(), None);

    let summaries = library.summaries().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[1].title, "Atestado");
    assert_eq!(summaries[1].objects, 1);

    assert!(library.delete("atestado/2024").unwrap());
    assert!(!library.delete("atestado/2024").unwrap());
    assert_eq!(library.list().unwrap(), ["Receita simples"]);
}

#[test]
fn empty_names_are_rejected() {
    let mut library = TemplateLibrary::new(MemoryStore::new());
    let err = library.save("   ", &DocumentModel::default()).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(matches!(library.load(""), Err(Error::Storage(_))));
}

#[test]
fn broken_entries_are_skipped_in_summaries() {
    let mut store = MemoryStore::new();
    store.put("quebrado", "{not json").unwrap();
    let mut library = TemplateLibrary::new(store);
    library.save("ok", &model_titled("Ok")).unwrap();

    let summaries = library.summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "ok");
    assert!(matches!(library.load("quebrado"), Err(Error::InvalidModel(_))));
}

#[test]
fn zip_bundle_carries_the_background_as_an_entry() {
    let mut ed = EditorState::new(MarkupSurface::default());
    ed.set_title("Timbrado");
    ed.set_background_bytes(png(8, 12)).unwrap();
    let model = ed.snapshot();
    assert!(model.background_image.as_deref().unwrap().starts_with("data:image/png;base64,"));

    let bytes = archive::export_bytes(&model, FileFormat::Zip).unwrap();
    assert_eq!(FileFormat::sniff(&bytes), FileFormat::Zip);

    let mut zip = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
    let mut json = String::new();
    zip.by_name(DOCUMENT_ENTRY)
        .unwrap()
        .read_to_string(&mut json)
        .unwrap();
    let stored: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(stored["backgroundImage"], "assets/background.png");
    assert!(zip.by_name("assets/background.png").is_ok());

    let imported = archive::import_bytes(&bytes).unwrap();
    assert_eq!(imported, model);
}

#[test]
fn bundle_without_document_is_invalid() {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("other.txt", zip::write::SimpleFileOptions::default())
        .unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    assert!(matches!(archive::import_bytes(&bytes), Err(Error::InvalidModel(_))));
}

#[test]
fn files_follow_their_extension() {
    let dir = tempfile::tempdir().unwrap();
    let model = model_titled("Laudo");

    let json_path = dir.path().join("laudo.json");
    archive::export_file(&model, &json_path, None).unwrap();
    let text = std::fs::read_to_string(&json_path).unwrap();
    assert!(text.trim_start().starts_with('{'));
    assert_eq!(archive::import_file(&json_path).unwrap(), model);

    let zip_path = dir.path().join("laudo.zip");
    archive::export_file(&model, &zip_path, None).unwrap();
    assert!(std::fs::read(&zip_path).unwrap().starts_with(b"PK"));
    assert_eq!(archive::import_file(&zip_path).unwrap(), model);

    // Only the two finished files; no temporaries are left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn failed_export_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing-dir").join("out.json");
    assert!(archive::export_file(&model_titled("x"), &target, None).is_err());
    assert!(!target.exists());
}
