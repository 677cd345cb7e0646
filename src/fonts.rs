use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use pdf_writer::{Name, Pdf, Rect, Ref};
use ttf_parser::Face;

use crate::flow::RunStyle;
use crate::layout::TextMeasure;

/// (lowercase family name, bold, italic) -> (file path, face index within TTC)
type FontLookup = HashMap<(String, bool, bool), (PathBuf, u32)>;

static FONT_INDEX: OnceLock<FontLookup> = OnceLock::new();

/// Families tried, in order, when the rasterizer needs outlines and the
/// document's family is not installed.
const RASTER_FALLBACKS: &[&str] = &[
    "arial",
    "liberation sans",
    "arimo",
    "helvetica",
    "dejavu sans",
    "noto sans",
    "freesans",
];

fn font_family_name(face: &Face) -> Option<String> {
    // Name ID 1 (Family): "Arial" and "Arial Narrow" stay distinct.
    for name in face.names() {
        if name.name_id == ttf_parser::name_id::FAMILY
            && name.is_unicode()
            && let Some(s) = name.to_string()
        {
            return Some(s);
        }
    }
    None
}

fn read_font_style(data: &[u8], face_index: u32) -> Option<(String, bool, bool)> {
    let face = Face::parse(data, face_index).ok()?;
    let family = font_family_name(&face)?;
    Some((family, face.is_bold(), face.is_italic()))
}

fn font_directories() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    // 1. User-configured directories via TEMPLATE_PDF_FONTS env var
    if let Ok(val) = std::env::var("TEMPLATE_PDF_FONTS") {
        let sep = if cfg!(windows) { ';' } else { ':' };
        for part in val.split(sep) {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                dirs.push(PathBuf::from(trimmed));
            }
        }
    }

    // 2. Platform-specific system font directories
    #[cfg(target_os = "macos")]
    {
        dirs.extend([
            "/Library/Fonts".into(),
            "/System/Library/Fonts".into(),
            "/System/Library/Fonts/Supplemental".into(),
        ]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.extend([
            "/usr/share/fonts".into(),
            "/usr/local/share/fonts".into(),
        ]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".local/share/fonts"));
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        } else {
            dirs.push("C:\\Windows\\Fonts".into());
        }
    }

    dirs
}

fn scan_font_dirs() -> FontLookup {
    let t0 = std::time::Instant::now();
    let mut index = FontLookup::new();

    // Directories earlier in the list win, so walk them in order.
    for root in font_directories() {
        let mut stack: Vec<PathBuf> = vec![root];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_collection = match path.extension().and_then(|e| e.to_str()) {
                    Some("ttf" | "otf" | "TTF" | "OTF") => false,
                    Some("ttc" | "TTC") => true,
                    _ => continue,
                };
                let Ok(data) = std::fs::read(&path) else {
                    continue;
                };
                let face_count = if is_collection {
                    ttf_parser::fonts_in_collection(&data).unwrap_or(1)
                } else {
                    1
                };
                for face_idx in 0..face_count {
                    if let Some((family, bold, italic)) = read_font_style(&data, face_idx) {
                        index
                            .entry((family.to_lowercase(), bold, italic))
                            .or_insert((path.clone(), face_idx));
                    }
                }
            }
        }
    }
    log::info!(
        "Indexed {} font faces in {:.1}ms",
        index.len(),
        t0.elapsed().as_secs_f64() * 1000.0
    );
    index
}

fn get_font_index() -> &'static FontLookup {
    FONT_INDEX.get_or_init(scan_font_dirs)
}

/// Look up a font file by family name and style.
/// Falls back to the regular variant if the requested bold/italic is not available.
fn find_font_file(font_name: &str, bold: bool, italic: bool) -> Option<(PathBuf, u32)> {
    let index = get_font_index();
    let key = font_name.to_lowercase();
    index
        .get(&(key.clone(), bold, italic))
        .or_else(|| {
            if bold || italic {
                index.get(&(key, false, false))
            } else {
                None
            }
        })
        .cloned()
}

fn find_raster_fallback(bold: bool, italic: bool) -> Option<(String, PathBuf, u32)> {
    RASTER_FALLBACKS
        .iter()
        .find_map(|family| {
            find_font_file(family, bold, italic).map(|(p, i)| (family.to_string(), p, i))
        })
        .or_else(|| {
            let index = get_font_index();
            let mut keys: Vec<&(String, bool, bool)> =
                index.keys().filter(|(_, b, i)| !*b && !*i).collect();
            keys.sort();
            keys.first().and_then(|key| {
                index
                    .get(*key)
                    .map(|(p, i)| (key.0.clone(), p.clone(), *i))
            })
        })
}

/// Windows-1252 (WinAnsi) byte to Unicode char mapping.
/// Bytes 0x80-0x9F are remapped; all others map directly to their Unicode codepoint.
pub(crate) fn winansi_to_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}', // bullet
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        _ => byte as char,
    }
}

/// Convert a UTF-8 string to WinAnsi (Windows-1252) bytes for PDF Str encoding.
/// Characters outside the code page are dropped; non-breaking spaces become spaces.
pub(crate) fn to_winansi_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .filter_map(|c| match c as u32 {
            0x00A0 => Some(b' '),
            0x0020..=0x007E => Some(c as u8),
            0x00A1..=0x00FF => Some(c as u8), // Latin-1 supplement maps directly
            0x20AC => Some(0x80),
            0x201A => Some(0x82),
            0x0192 => Some(0x83),
            0x201E => Some(0x84),
            0x2026 => Some(0x85),
            0x2020 => Some(0x86),
            0x2021 => Some(0x87),
            0x02C6 => Some(0x88),
            0x2030 => Some(0x89),
            0x0160 => Some(0x8A),
            0x2039 => Some(0x8B),
            0x0152 => Some(0x8C),
            0x017D => Some(0x8E),
            0x2018 => Some(0x91),
            0x2019 => Some(0x92),
            0x201C => Some(0x93),
            0x201D => Some(0x94),
            0x2022 => Some(0x95), // bullet
            0x2013 => Some(0x96),
            0x2014 => Some(0x97),
            0x02DC => Some(0x98),
            0x2122 => Some(0x99),
            0x0161 => Some(0x9A),
            0x203A => Some(0x9B),
            0x0153 => Some(0x9C),
            0x017E => Some(0x9E),
            0x0178 => Some(0x9F),
            _ => None,
        })
        .collect()
}

/// Approximate Helvetica widths at 1000 units/em for WinAnsi chars 32..=255.
fn helvetica_widths(bold: bool) -> Vec<f32> {
    let scale = if bold { 1.05 } else { 1.0 };
    (32u8..=255u8)
        .map(|b| match b {
            32 => 278.0,                          // space
            33..=47 => 333.0,                     // punctuation
            48..=57 => 556.0,                     // digits
            58..=64 => 333.0,                     // more punctuation
            73 | 74 => 278.0,                     // I J (narrow uppercase)
            77 => 833.0,                          // M (wide)
            65..=90 => 667.0,                     // uppercase A-Z (average)
            91..=96 => 333.0,                     // brackets etc.
            102 | 105 | 106 | 108 | 116 => 278.0, // narrow lowercase: f i j l t
            109 | 119 => 833.0,                   // m w (wide)
            97..=122 => 556.0,                    // lowercase a-z (average)
            _ => 556.0,
        })
        .map(|w| w * scale)
        .collect()
}

fn helvetica_base_name(bold: bool, italic: bool) -> &'static [u8] {
    match (bold, italic) {
        (false, false) => b"Helvetica",
        (true, false) => b"Helvetica-Bold",
        (false, true) => b"Helvetica-Oblique",
        (true, true) => b"Helvetica-BoldOblique",
    }
}

/// One resolved face: its file bytes when found, and WinAnsi advance widths.
pub(crate) struct LoadedFont {
    pub(crate) family: String,
    pub(crate) bold: bool,
    pub(crate) italic: bool,
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) face_index: u32,
    pub(crate) widths_1000: Vec<f32>,
    pub(crate) ascender_ratio: f32,
}

impl LoadedFont {
    fn load(family: &str, bold: bool, italic: bool, raster_fallback: bool) -> Self {
        let found = find_font_file(family, bold, italic)
            .map(|(path, index)| (family.to_string(), path, index))
            .or_else(|| {
                if raster_fallback {
                    find_raster_fallback(bold, italic)
                } else {
                    None
                }
            });

        if let Some((resolved, path, face_index)) = found {
            match std::fs::read(&path) {
                Ok(data) => {
                    if let Some((widths_1000, ascender_ratio)) = face_metrics(&data, face_index) {
                        return Self {
                            family: resolved,
                            bold,
                            italic,
                            data: Some(data),
                            face_index,
                            widths_1000,
                            ascender_ratio,
                        };
                    }
                }
                Err(e) => log::warn!("Failed to read font {}: {e}", path.display()),
            }
        }

        log::warn!("Font not found: {family} bold={bold} italic={italic}, using Helvetica");
        Self {
            family: "Helvetica".to_string(),
            bold,
            italic,
            data: None,
            face_index: 0,
            widths_1000: helvetica_widths(bold),
            ascender_ratio: 0.718,
        }
    }

    pub(crate) fn face(&self) -> Option<Face<'_>> {
        Face::parse(self.data.as_deref()?, self.face_index).ok()
    }

    pub(crate) fn width_1000(&self, text: &str) -> f32 {
        to_winansi_bytes(text)
            .into_iter()
            .filter(|b| *b >= 32)
            .map(|b| self.widths_1000[(b - 32) as usize])
            .sum()
    }
}

fn face_metrics(data: &[u8], face_index: u32) -> Option<(Vec<f32>, f32)> {
    let face = Face::parse(data, face_index).ok()?;
    let units = face.units_per_em() as f32;
    let widths = (32u8..=255u8)
        .map(|byte| {
            face.glyph_index(winansi_to_char(byte))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| adv as f32 / units * 1000.0)
                .unwrap_or(0.0)
        })
        .collect();
    Some((widths, face.ascender() as f32 / units))
}

/// The four style variants of the document's font family.
pub(crate) struct FontSet {
    variants: [LoadedFont; 4],
}

fn variant_index(bold: bool, italic: bool) -> usize {
    usize::from(bold) * 2 + usize::from(italic)
}

pub(crate) fn primary_font_name(name: &str) -> &str {
    name.split([',', ';'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_matches(['"', '\''])
}

impl FontSet {
    /// With `raster_fallback`, a missing family resolves to any installed sans face
    /// so glyph outlines are available.
    pub(crate) fn load(family: &str, raster_fallback: bool) -> Self {
        let family = primary_font_name(family);
        let load = |bold, italic| LoadedFont::load(family, bold, italic, raster_fallback);
        Self {
            variants: [
                load(false, false),
                load(false, true),
                load(true, false),
                load(true, true),
            ],
        }
    }

    pub(crate) fn variant(&self, style: RunStyle) -> &LoadedFont {
        &self.variants[variant_index(style.bold, style.italic)]
    }

    pub(crate) fn variants(&self) -> impl Iterator<Item = &LoadedFont> {
        self.variants.iter()
    }
}

impl TextMeasure for FontSet {
    fn text_width(&self, text: &str, size: f32, style: RunStyle) -> f32 {
        self.variant(style).width_1000(text) / 1000.0 * size
    }

    fn ascent_ratio(&self, style: RunStyle) -> f32 {
        self.variant(style).ascender_ratio
    }
}

/// A font registered in a PDF under `/F{n}`.
pub(crate) struct FontEntry {
    pub(crate) pdf_name: String,
    pub(crate) font_ref: Ref,
}

/// Embed a TrueType/OpenType font (raw bytes) into the PDF.
fn embed_truetype(
    pdf: &mut Pdf,
    font_ref: Ref,
    descriptor_ref: Ref,
    data_ref: Ref,
    font: &LoadedFont,
    font_data: &[u8],
) -> Option<()> {
    let face = Face::parse(font_data, font.face_index).ok()?;

    let units = face.units_per_em() as f32;
    let ascent = face.ascender() as f32 / units * 1000.0;
    let descent = face.descender() as f32 / units * 1000.0;
    let cap_height = face
        .capital_height()
        .map(|h| h as f32 / units * 1000.0)
        .unwrap_or(700.0);

    let bb = face.global_bounding_box();
    let bbox = Rect::new(
        bb.x_min as f32 / units * 1000.0,
        bb.y_min as f32 / units * 1000.0,
        bb.x_max as f32 / units * 1000.0,
        bb.y_max as f32 / units * 1000.0,
    );

    let data_len = i32::try_from(font_data.len()).ok()?;
    pdf.stream(data_ref, font_data)
        .pair(Name(b"Length1"), data_len);

    let mut ps_name = font.family.replace(' ', "");
    match (font.bold, font.italic) {
        (true, true) => ps_name.push_str(",BoldItalic"),
        (true, false) => ps_name.push_str(",Bold"),
        (false, true) => ps_name.push_str(",Italic"),
        (false, false) => {}
    }

    let mut flags = pdf_writer::types::FontFlags::NON_SYMBOLIC;
    if font.italic {
        flags |= pdf_writer::types::FontFlags::ITALIC;
    }
    pdf.font_descriptor(descriptor_ref)
        .name(Name(ps_name.as_bytes()))
        .flags(flags)
        .bbox(bbox)
        .italic_angle(if font.italic { -12.0 } else { 0.0 })
        .ascent(ascent)
        .descent(descent)
        .cap_height(cap_height)
        .stem_v(if font.bold { 120.0 } else { 80.0 })
        .font_file2(data_ref);

    {
        let mut d = pdf.indirect(font_ref).dict();
        d.pair(Name(b"Type"), Name(b"Font"));
        d.pair(Name(b"Subtype"), Name(b"TrueType"));
        d.pair(Name(b"BaseFont"), Name(ps_name.as_bytes()));
        d.pair(Name(b"Encoding"), Name(b"WinAnsiEncoding"));
        d.pair(Name(b"FirstChar"), 32i32);
        d.pair(Name(b"LastChar"), 255i32);
        d.pair(Name(b"FontDescriptor"), descriptor_ref);
        d.insert(Name(b"Widths"))
            .array()
            .items(font.widths_1000.iter().copied());
    }

    Some(())
}

pub(crate) fn register_font(
    pdf: &mut Pdf,
    font: &LoadedFont,
    pdf_name: String,
    alloc: &mut impl FnMut() -> Ref,
) -> FontEntry {
    let font_ref = alloc();

    let embedded = font.data.as_deref().and_then(|data| {
        let descriptor_ref = alloc();
        let data_ref = alloc();
        embed_truetype(pdf, font_ref, descriptor_ref, data_ref, font, data)
    });

    if embedded.is_none() {
        pdf.type1_font(font_ref)
            .base_font(Name(helvetica_base_name(font.bold, font.italic)))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
    }

    FontEntry { pdf_name, font_ref }
}
