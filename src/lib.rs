pub mod archive;
pub mod assets;
pub mod cancel;
pub mod color;
pub mod editor;
mod error;
pub mod export;
pub mod flow;
mod fonts;
pub mod html;
pub mod interaction;
pub mod layout;
pub mod markup;
pub mod model;
pub mod page;
pub mod pdf;
pub mod raster;
pub mod scene;
pub mod serializer;
pub mod storage;
pub mod store;
pub mod variables;

pub use cancel::CancellationToken;
pub use editor::EditorState;
pub use error::Error;
pub use export::{ExportStrategy, Exporter, RenderOptions};
pub use markup::{EditorSurface, MarkupSurface};
pub use model::{DocumentModel, ObjectKind, ObjectMode, PageObject};
pub use page::{Orientation, PageGeometry};
pub use variables::ValueMap;

use std::path::Path;

/// Loads a `.json` or `.zip` document, fills in `values` and writes a PDF.
/// Relative image paths are resolved next to `input`.
pub fn render_pdf_file(
    input: &Path,
    values: &ValueMap,
    strategy: ExportStrategy,
    output: &Path,
) -> Result<(), Error> {
    let model = archive::import_file(input)?;
    let base = input.parent().filter(|p| !p.as_os_str().is_empty());
    export::export_pdf_file(&model, values, strategy, base, output)
}

/// Reads a JSON object of `{"token": "value"}` pairs. Keys may be written
/// with or without braces.
pub fn read_values(path: &Path) -> Result<ValueMap, Error> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let serde_json::Value::Object(entries) = value else {
        return Err(Error::InvalidModel(format!(
            "{}: expected a JSON object of values",
            path.display()
        )));
    };
    Ok(entries
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (variables::token(&key), value)
        })
        .collect())
}
