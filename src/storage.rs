//! Named template storage over a keyed string store.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::model::DocumentModel;
use crate::serializer;

/// A keyed string store. Calls succeed or fail synchronously.
pub trait KeyValueStore {
    fn put(&mut self, key: &str, value: &str) -> Result<(), Error>;

    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>, Error>;

    /// Returns whether the key existed.
    fn delete(&mut self, key: &str) -> Result<bool, Error>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn delete(&mut self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// One `<key>.json` file per entry. Keys are percent-encoded into file names.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

const ENTRY_EXTENSION: &str = "json";

impl DirectoryStore {
    /// Creates the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)))
    }
}

impl KeyValueStore for DirectoryStore {
    fn put(&mut self, key: &str, value: &str) -> Result<(), Error> {
        write_atomic(&self.path_for(key), value.as_bytes())
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) => keys.push(key),
                None => log::warn!("Skipping unrecognised file {}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&mut self, key: &str) -> Result<bool, Error> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b' ')
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Writes through a temp file in the target directory, then renames over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Listing entry for a saved template.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateSummary {
    pub name: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub objects: usize,
}

/// Save/load documents by name.
#[derive(Debug)]
pub struct TemplateLibrary<K: KeyValueStore> {
    store: K,
}

impl<K: KeyValueStore> TemplateLibrary<K> {
    pub fn new(store: K) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> K {
        self.store
    }

    pub fn save(&mut self, name: &str, model: &DocumentModel) -> Result<(), Error> {
        let name = validate_name(name)?;
        let json = serializer::to_json(model)?;
        self.store.put(name, &json)?;
        log::debug!("Saved template '{name}' ({} bytes)", json.len());
        Ok(())
    }

    /// `Ok(None)` when no template has that name.
    pub fn load(&self, name: &str) -> Result<Option<DocumentModel>, Error> {
        let name = validate_name(name)?;
        self.store
            .get(name)?
            .map(|json| serializer::from_json(&json))
            .transpose()
    }

    pub fn list(&self) -> Result<Vec<String>, Error> {
        self.store.keys()
    }

    /// Templates that fail to parse are skipped with an error log.
    pub fn summaries(&self) -> Result<Vec<TemplateSummary>, Error> {
        let mut summaries = Vec::new();
        for name in self.store.keys()? {
            match self.load(&name) {
                Ok(Some(model)) => summaries.push(TemplateSummary {
                    title: model.title,
                    updated_at: model.updated_at,
                    objects: model.objects.len(),
                    name,
                }),
                Ok(None) => {}
                Err(e) => log::error!("Failed to load template '{name}': {e}"),
            }
        }
        Ok(summaries)
    }

    pub fn delete(&mut self, name: &str) -> Result<bool, Error> {
        let name = validate_name(name)?;
        self.store.delete(name)
    }
}

fn validate_name(name: &str) -> Result<&str, Error> {
    let name = name.trim();
    if name.is_empty() {
        Err(Error::Storage("template name is empty".to_string()))
    } else {
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_survive_file_name_encoding() {
        for key in ["Receita simples", "atestado/2024", "ção", "a%b"] {
            assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        }
        assert!(!encode_key("../x").contains('/'));
    }
}
