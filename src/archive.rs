//! Standalone document files: plain `.json`, or a `.zip` bundle holding
//! `document.json` plus the background image as its own entry.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::assets::{self, ImageAsset};
use crate::error::Error;
use crate::model::DocumentModel;
use crate::serializer;
use crate::storage::write_atomic;

pub const DOCUMENT_ENTRY: &str = "document.json";
const ASSET_PREFIX: &str = "assets/";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Zip,
}

impl FileFormat {
    /// `.zip` is a bundle; anything else is plain JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => FileFormat::Zip,
            _ => FileFormat::Json,
        }
    }

    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(ZIP_MAGIC) {
            FileFormat::Zip
        } else {
            FileFormat::Json
        }
    }
}

pub fn export_bytes(model: &DocumentModel, format: FileFormat) -> Result<Vec<u8>, Error> {
    match format {
        FileFormat::Json => Ok(serializer::to_json(model)?.into_bytes()),
        FileFormat::Zip => export_bundle(model),
    }
}

fn export_bundle(model: &DocumentModel) -> Result<Vec<u8>, Error> {
    let mut document = model.clone();
    let asset = model
        .background_image
        .as_deref()
        .and_then(assets::decode_data_url);
    let asset_entry = asset
        .as_ref()
        .map(|a| format!("{ASSET_PREFIX}background.{}", a.extension()));
    if let Some(entry) = &asset_entry {
        document.background_image = Some(entry.clone());
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(DOCUMENT_ENTRY, options)?;
    zip.write_all(serializer::to_json(&document)?.as_bytes())?;
    if let (Some(asset), Some(entry)) = (&asset, &asset_entry) {
        // Already compressed image data.
        zip.start_file(
            entry.as_str(),
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        zip.write_all(&asset.data)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Writes the model to `path`. The format follows the extension unless given.
/// Nothing is left at `path` if any step fails.
pub fn export_file(
    model: &DocumentModel,
    path: &Path,
    format: Option<FileFormat>,
) -> Result<(), Error> {
    let format = format.unwrap_or_else(|| FileFormat::from_path(path));
    let bytes = export_bytes(model, format)?;
    write_atomic(path, &bytes)?;
    log::debug!("Exported {:?} document to {}", format, path.display());
    Ok(())
}

/// Reads either format, detected from the content.
pub fn import_bytes(bytes: &[u8]) -> Result<DocumentModel, Error> {
    match FileFormat::sniff(bytes) {
        FileFormat::Json => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidModel(format!("not UTF-8: {e}")))?;
            serializer::from_json(text)
        }
        FileFormat::Zip => import_bundle(bytes),
    }
}

fn import_bundle(bytes: &[u8]) -> Result<DocumentModel, Error> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))?;
    let mut json = String::new();
    {
        let Ok(mut entry) = zip.by_name(DOCUMENT_ENTRY) else {
            return Err(Error::InvalidModel(format!("bundle has no {DOCUMENT_ENTRY}")));
        };
        entry
            .read_to_string(&mut json)
            .map_err(|e| Error::InvalidModel(format!("{DOCUMENT_ENTRY}: {e}")))?;
    }
    let mut model = serializer::from_json(&json)?;

    if let Some(entry) = model
        .background_image
        .clone()
        .filter(|src| src.starts_with(ASSET_PREFIX))
    {
        match zip.by_name(&entry) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                model.background_image = Some(ImageAsset::from_bytes(data)?.to_data_url());
            }
            Err(_) => {
                log::warn!("Bundle references missing asset '{entry}'; dropping background");
                model.background_image = None;
            }
        }
    }
    Ok(model)
}

pub fn import_file(path: &Path) -> Result<DocumentModel, Error> {
    let bytes = std::fs::read(path)?;
    import_bytes(&bytes)
}
