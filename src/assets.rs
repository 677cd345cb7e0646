//! Image sources: data URLs and local files.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::Error;

/// Bytes of an image source plus its MIME type.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageAsset {
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageAsset {
    /// Sniffs the format from the bytes; unknown formats are rejected.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Error> {
        let format = image::guess_format(&data)?;
        Ok(Self {
            mime: format.to_mime_type().to_string(),
            data,
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.data))
    }

    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/bmp" => "bmp",
            _ => "png",
        }
    }

    pub fn dimensions(&self) -> Result<(u32, u32), Error> {
        let reader = image::ImageReader::new(Cursor::new(&self.data)).with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }

    pub fn decode(&self) -> Result<image::RgbaImage, Error> {
        Ok(image::load_from_memory(&self.data)?.to_rgba8())
    }
}

pub fn is_data_url(src: &str) -> bool {
    src.starts_with("data:")
}

pub fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Decodes a base64 `data:` URL. Returns `None` for anything else.
pub fn decode_data_url(src: &str) -> Option<ImageAsset> {
    let rest = src.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let data = BASE64.decode(payload.trim()).ok()?;
    let mime = if mime.is_empty() {
        image::guess_format(&data)
            .map(|f| f.to_mime_type().to_string())
            .ok()?
    } else {
        mime.to_string()
    };
    Some(ImageAsset { mime, data })
}

/// Resolves an image source to bytes. Relative paths are taken from `base`.
/// Remote URLs are not fetched.
pub fn load(src: &str, base: Option<&Path>) -> Result<ImageAsset, Error> {
    if is_data_url(src) {
        return decode_data_url(src)
            .ok_or_else(|| Error::InvalidModel("malformed image data URL".to_string()));
    }
    if is_remote(src) {
        return Err(Error::Host(format!("remote image '{src}' is not available offline")));
    }
    let path = Path::new(src);
    let path = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    ImageAsset::from_bytes(std::fs::read(path)?)
}

/// Loads each image source at most once per render. Failures are logged once
/// and remembered, so a broken source is simply left out.
pub struct ImageCache {
    base: Option<PathBuf>,
    entries: RefCell<HashMap<String, Option<Rc<ImageAsset>>>>,
}

impl ImageCache {
    pub fn new(base: Option<&Path>) -> Self {
        Self {
            base: base.map(Path::to_path_buf),
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, src: &str) -> Option<Rc<ImageAsset>> {
        if let Some(entry) = self.entries.borrow().get(src) {
            return entry.clone();
        }
        let loaded = match load(src, self.base.as_deref()) {
            Ok(asset) => Some(Rc::new(asset)),
            Err(e) => {
                log::warn!("Skipping image {}: {e}", short_src(src));
                None
            }
        };
        self.entries
            .borrow_mut()
            .insert(src.to_string(), loaded.clone());
        loaded
    }

    pub fn dimensions(&self, src: &str) -> Option<(u32, u32)> {
        let asset = self.get(src)?;
        match asset.dimensions() {
            Ok(dims) => Some(dims),
            Err(e) => {
                log::warn!("Unreadable image {}: {e}", short_src(src));
                None
            }
        }
    }
}

/// Data URLs are truncated for log lines.
fn short_src(src: &str) -> &str {
    match src.char_indices().nth(48) {
        Some((i, _)) if is_data_url(src) => &src[..i],
        _ => src,
    }
}
