pub mod builtin;
pub mod embed;
pub mod resolver;
pub mod truetype;

pub use resolver::{FontChoice, FontProgram, FontResolver, ResolvedFont};
pub use truetype::TrueTypeFont;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use lopdf::{Dictionary, Document, Object, ObjectId};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{dict_get, name_str, page_resources, resolve, resolve_dict, PdfDocument};
use crate::error::FontError;
use crate::logging::FONTS;

/// Name fragments of fonts known to carry Turkish glyphs, most wanted first.
const PREFERRED_FONT_NAMES: &[&str] = &[
    "DejaVuSans",
    "NotoSans",
    "FreeSans",
    "LiberationSans",
    "Arial",
    "Tahoma",
    "Verdana",
    "Calibri",
    "TimesNewRoman",
    "SegoeUI",
    "Roboto",
    "OpenSans",
    "SourceSansPro",
    "Ubuntu",
    "Cantarell",
    "PTSans",
];

/// Embedded programs smaller than this are almost always subsets.
const SUBSET_BYTES: usize = 20_000;

/// What the caller wants a value drawn with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontSelection {
    /// The bundled default.
    #[default]
    Default,
    File(PathBuf),
    Embedded(ObjectId),
    /// Reuse the embedded font of the text each placeholder was found in,
    /// when it is a complete TrueType/OpenType program.
    MatchSource,
}

impl fmt::Display for FontSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSelection::Default => f.write_str("default"),
            FontSelection::File(path) => write!(f, "{}", path.display()),
            FontSelection::Embedded((num, gen)) => write!(f, "{num} {gen} R"),
            FontSelection::MatchSource => f.write_str("match-source"),
        }
    }
}

impl FromStr for FontSelection {
    type Err = String;

    /// `default`, `auto`, `<num> <gen> R`, a bare object number, or a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty font selection".to_string());
        }
        match s.to_ascii_lowercase().as_str() {
            "default" => return Ok(FontSelection::Default),
            "auto" | "match" | "match-source" => return Ok(FontSelection::MatchSource),
            _ => {}
        }
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [num] => {
                if let Ok(n) = num.parse::<u32>() {
                    return Ok(FontSelection::Embedded((n, 0)));
                }
            }
            [num, gen, "R"] => {
                if let (Ok(n), Ok(g)) = (num.parse::<u32>(), gen.parse::<u16>()) {
                    return Ok(FontSelection::Embedded((n, g)));
                }
            }
            _ => {}
        }
        Ok(FontSelection::File(PathBuf::from(s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSource {
    Builtin,
    Filesystem,
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFormat {
    TrueType,
    OpenType,
    Cff,
    Type1,
    None,
}

impl FontFormat {
    /// Formats the fill compositor can parse and re-embed.
    pub fn is_drawable(self) -> bool {
        matches!(self, FontFormat::TrueType | FontFormat::OpenType)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FontDescriptor {
    pub source: FontSource,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    pub display_name: String,
    pub base_name: String,
    pub embedded: bool,
    pub byte_size: usize,
    pub format: FontFormat,
    pub subset_like: bool,
    #[serde(skip)]
    program: Option<Arc<Vec<u8>>>,
    #[serde(skip)]
    coverage: OnceCell<BTreeSet<u32>>,
}

impl FontDescriptor {
    /// Unicode code points the font can draw. Parsed on first use.
    pub fn glyph_coverage(&self) -> &BTreeSet<u32> {
        self.coverage.get_or_init(|| {
            if let Some(bytes) = self.program.as_ref().filter(|_| self.format.is_drawable()) {
                match TrueTypeFont::parse(bytes.to_vec()) {
                    Ok(font) => return font.coverage(),
                    Err(e) => {
                        debug!(target: FONTS, font = %self.display_name, error = %e, "coverage parse failed")
                    }
                }
            }
            if !self.embedded && builtin::BuiltinFamily::from_base_name(&self.display_name).is_some() {
                // Unembedded standard fonts draw through WinAnsiEncoding.
                return (0x20u32..=0x7E).chain(0xA0..=0xFF).collect();
            }
            BTreeSet::new()
        })
    }

    pub fn covers(&self, text: &str) -> bool {
        let coverage = self.glyph_coverage();
        text.chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .all(|c| coverage.contains(&(c as u32)))
    }

    /// Preference score for using this font to fill Turkish text.
    pub fn score(&self) -> i32 {
        let mut score = score_font_name(&self.display_name);
        if self.embedded && self.format.is_drawable() {
            score += 10;
        }
        if self.subset_like {
            score -= 15;
        }
        score
    }
}

/// Strips the standard `ABCDEF+` subset tag.
pub fn strip_subset(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if (5..=7).contains(&tag.len()) => rest,
        _ => name,
    }
}

pub fn looks_subset(name: &str) -> bool {
    match name.split_once('+') {
        Some((tag, _)) => {
            (5..=7).contains(&tag.len()) && tag.chars().all(|c| c.is_ascii_uppercase())
        }
        None => false,
    }
}

/// Canonical family name for metrics lookup: subset tag and PostScript
/// suffixes removed, common aliases mapped onto the standard 14.
pub fn sanitize_font_name(raw_name: &str) -> String {
    let name = strip_subset(raw_name);
    let family = name.split([',', '-']).next().unwrap_or(name);
    let family = family
        .strip_suffix("PSMT")
        .or_else(|| family.strip_suffix("MT"))
        .or_else(|| family.strip_suffix("PS"))
        .unwrap_or(family);

    if let Some(style) = family.strip_prefix("TimesNewRoman") {
        return match style {
            "Bold" => "Times-Bold",
            "Italic" => "Times-Italic",
            "BoldItalic" => "Times-BoldItalic",
            _ => "Times-Roman",
        }
        .to_string();
    }

    match family {
        "Arial" | "ArialBold" => "Helvetica".to_string(),
        "CourierNew" => "Courier".to_string(),
        _ if family.is_empty() => name.to_string(),
        _ => family.to_string(),
    }
}

/// Filename/name score: preferred families up, regular weights up, symbol,
/// emoji and monospaced fonts down.
pub fn score_font_name(name: &str) -> i32 {
    let squashed: String = name
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .to_lowercase();
    let mut score = 0;
    for pref in PREFERRED_FONT_NAMES {
        if squashed.contains(&pref.to_lowercase()) {
            score += 20;
        }
    }
    if ["regular", "book", "normal"].iter().any(|t| squashed.contains(t)) {
        score += 5;
    }
    if squashed.contains("emoji") || squashed.contains("symbol") {
        score -= 10;
    }
    if squashed.contains("mono") {
        score -= 3;
    }
    score
}

/// Font resources of a page: resource name, object id when the font is
/// an indirect object, and the font dictionary.
pub(crate) fn page_fonts(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Option<ObjectId>, &Dictionary)> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Some(fonts) = dict_get(doc, resources, b"Font").and_then(|o| o.as_dict().ok()) else {
        return Vec::new();
    };
    fonts
        .iter()
        .filter_map(|(name, value)| {
            let id = value.as_reference().ok();
            let dict = resolve_dict(doc, value)?;
            Some((name.clone(), id, dict))
        })
        .collect()
}

/// The `/FontDescriptor` of a font, looking through Type0 descendants.
pub(crate) fn font_descriptor<'a>(doc: &'a Document, font: &'a Dictionary) -> Option<&'a Dictionary> {
    if let Some(fd) = dict_get(doc, font, b"FontDescriptor").and_then(|o| o.as_dict().ok()) {
        return Some(fd);
    }
    let descendants = dict_get(doc, font, b"DescendantFonts")?.as_array().ok()?;
    let first = resolve_dict(doc, descendants.first()?)?;
    dict_get(doc, first, b"FontDescriptor").and_then(|o| o.as_dict().ok())
}

fn stream_bytes(doc: &Document, obj: &Object) -> Option<Vec<u8>> {
    let stream = resolve(doc, obj).as_stream().ok()?;
    Some(
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone()),
    )
}

/// The font program embedded for a font dictionary, if any.
pub(crate) fn font_program(doc: &Document, font: &Dictionary) -> (FontFormat, Option<Vec<u8>>) {
    let Some(fd) = font_descriptor(doc, font) else {
        return (FontFormat::None, None);
    };
    if let Ok(obj) = fd.get(b"FontFile2") {
        return (FontFormat::TrueType, stream_bytes(doc, obj));
    }
    if let Ok(obj) = fd.get(b"FontFile3") {
        let subtype = resolve(doc, obj)
            .as_stream()
            .ok()
            .and_then(|s| s.dict.get(b"Subtype").ok())
            .and_then(name_str);
        let format = match subtype.as_deref() {
            Some("OpenType") => FontFormat::OpenType,
            _ => FontFormat::Cff,
        };
        return (format, stream_bytes(doc, obj));
    }
    if let Ok(obj) = fd.get(b"FontFile") {
        return (FontFormat::Type1, stream_bytes(doc, obj));
    }
    (FontFormat::None, None)
}

/// Raw bytes of an embedded font, for the resolver.
pub(crate) fn extract_font(doc: &Document, id: ObjectId) -> Result<(FontFormat, Vec<u8>), FontError> {
    let font = doc
        .get_dictionary(id)
        .map_err(|_| FontError::MissingObject(id.0, id.1))?;
    match font_program(doc, font) {
        (format, Some(bytes)) if format.is_drawable() => Ok((format, bytes)),
        (FontFormat::None, _) | (_, None) => Err(FontError::NotEmbedded(base_font_name(font))),
        (format, Some(_)) => Err(FontError::Unsupported(format!("{format:?} program"))),
    }
}

pub(crate) fn base_font_name(font: &Dictionary) -> String {
    font.get(b"BaseFont")
        .ok()
        .and_then(name_str)
        .unwrap_or_default()
}

fn describe(doc: &Document, id: ObjectId, font: &Dictionary) -> FontDescriptor {
    let base_name = base_font_name(font);
    let (format, program) = font_program(doc, font);
    let byte_size = program.as_ref().map_or(0, Vec::len);
    let embedded = program.is_some();
    let display_name = strip_subset(&base_name).to_string();
    let subset_like = looks_subset(&base_name) || (embedded && byte_size < SUBSET_BYTES);

    FontDescriptor {
        source: FontSource::Embedded,
        identifier: format!("{} {} R", id.0, id.1),
        object_id: Some(id),
        display_name,
        base_name,
        embedded,
        byte_size,
        format,
        subset_like,
        program: program.map(Arc::new),
        coverage: OnceCell::new(),
    }
}

/// Every distinct font dictionary referenced from a page, largest program
/// first.
pub fn list_fonts(doc: &PdfDocument) -> Vec<FontDescriptor> {
    let lopdf = doc.lopdf();
    let mut seen = HashSet::new();
    let mut fonts = Vec::new();

    for page in doc.pages() {
        for (_, id, dict) in page_fonts(lopdf, page.id) {
            let Some(id) = id else { continue };
            if seen.insert(id) {
                fonts.push(describe(lopdf, id, dict));
            }
        }
    }

    fonts.sort_by(|a, b| {
        b.byte_size
            .cmp(&a.byte_size)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    debug!(target: FONTS, count = fonts.len(), "listed fonts");
    fonts
}

/// Best embedded font to reuse for filling, if any is usable at all.
pub fn suggest_font(fonts: &[FontDescriptor]) -> Option<&FontDescriptor> {
    fonts
        .iter()
        .filter(|f| f.embedded && f.format.is_drawable() && !f.subset_like)
        .max_by_key(|f| f.score())
}
