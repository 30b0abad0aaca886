use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::ObjectId;
use tracing::{debug, info, warn};

use super::builtin::{turkish_helvetica_code, turkish_helvetica_coverage, turkish_helvetica_width};
use super::{extract_font, score_font_name, FontSelection, FontSource, TrueTypeFont};
use crate::config::FontConfig;
use crate::document::PdfDocument;
use crate::error::{Error, FontError, Result};
use crate::logging::FONTS;
use crate::model::FontFallback;

/// Characters a bundled font must have to be accepted as the Turkish default.
const TURKISH_PROBE: &str = "ğĞıİşŞçÇöÖüÜ";

const BUILTIN_NAME: &str = "Helvetica";

#[derive(Debug, Clone)]
pub enum FontProgram {
    TrueType(Arc<TrueTypeFont>),
    /// Standard Helvetica with a `/Differences` encoding for the Turkish
    /// letters WinAnsi lacks. Never embedded.
    TurkishHelvetica,
}

/// A font ready to measure and draw with.
#[derive(Debug, Clone)]
pub struct ResolvedFont {
    pub display_name: String,
    pub source: FontSource,
    pub program: FontProgram,
}

impl ResolvedFont {
    pub fn builtin() -> Self {
        ResolvedFont {
            display_name: BUILTIN_NAME.to_string(),
            source: FontSource::Builtin,
            program: FontProgram::TurkishHelvetica,
        }
    }

    fn truetype(font: TrueTypeFont, source: FontSource) -> Self {
        ResolvedFont {
            display_name: font.postscript_name.clone(),
            source,
            program: FontProgram::TrueType(Arc::new(font)),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.program, FontProgram::TrueType(_))
    }

    pub fn has_char(&self, ch: char) -> bool {
        match &self.program {
            FontProgram::TrueType(font) => font.has_glyph(ch),
            FontProgram::TurkishHelvetica => turkish_helvetica_code(ch).is_some(),
        }
    }

    /// Drawable characters of `text` the font lacks, deduplicated.
    pub fn missing_chars(&self, text: &str) -> Vec<char> {
        let mut missing = BTreeSet::new();
        for ch in text.chars() {
            if ch.is_whitespace() || ch.is_control() {
                continue;
            }
            if !self.has_char(ch) {
                missing.insert(ch);
            }
        }
        missing.into_iter().collect()
    }

    pub fn coverage(&self) -> BTreeSet<u32> {
        match &self.program {
            FontProgram::TrueType(font) => font.coverage(),
            FontProgram::TurkishHelvetica => turkish_helvetica_coverage().map(|c| c as u32).collect(),
        }
    }

    /// Advance in thousandths of an em.
    pub fn char_width(&self, ch: char) -> f32 {
        match &self.program {
            FontProgram::TrueType(font) => font.char_width(ch),
            FontProgram::TurkishHelvetica => {
                if turkish_helvetica_code(ch).is_some() {
                    turkish_helvetica_width(ch)
                } else {
                    // drawn as '?'
                    turkish_helvetica_width('?')
                }
            }
        }
    }

    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c)).sum::<f32>() * size / 1000.0
    }

    /// Ascent as a fraction of the font size.
    pub fn ascent(&self) -> f32 {
        match &self.program {
            FontProgram::TrueType(font) => font.ascent() / 1000.0,
            FontProgram::TurkishHelvetica => 0.718,
        }
    }

    /// Descent as a (negative) fraction of the font size.
    pub fn descent(&self) -> f32 {
        match &self.program {
            FontProgram::TrueType(font) => font.descent() / 1000.0,
            FontProgram::TurkishHelvetica => -0.207,
        }
    }

    /// Bytes for a text-showing operator once the font is installed.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match &self.program {
            FontProgram::TrueType(font) => text
                .chars()
                .flat_map(|c| font.glyph_id(c).unwrap_or(0).to_be_bytes())
                .collect(),
            FontProgram::TurkishHelvetica => text
                .chars()
                .map(|c| turkish_helvetica_code(c).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Identity for de-duplicating installs within one document.
    pub(crate) fn cache_key(&self) -> String {
        match &self.program {
            FontProgram::TrueType(font) => format!(
                "ttf:{}:{}",
                font.postscript_name,
                font.data().len()
            ),
            FontProgram::TurkishHelvetica => "builtin:helvetica-tr".to_string(),
        }
    }
}

/// Resolves font selections against the startup font configuration.
/// The bundled default is loaded once and shared read-only.
#[derive(Debug, Clone)]
pub struct FontResolver {
    bundled: std::result::Result<Option<ResolvedFont>, String>,
    verbose: bool,
}

/// Result of resolving the font for one fill value.
#[derive(Debug, Clone)]
pub struct FontChoice {
    pub font: ResolvedFont,
    pub fallback: Option<FontFallback>,
    /// Characters not even the default can draw.
    pub uncovered: Vec<char>,
}

impl FontResolver {
    pub fn new(config: &FontConfig) -> Self {
        let bundled = match &config.bundled_font {
            Some(path) => load_file(path)
                .map(|font| Some(ResolvedFont::truetype(font, FontSource::Filesystem)))
                .map_err(|e| format!("{}: {e}", path.display())),
            None => Ok(discover(&config.search_dirs, config.verbose_diagnostics)
                .map(|font| ResolvedFont::truetype(font, FontSource::Filesystem))),
        };

        match &bundled {
            Ok(Some(font)) => info!(target: FONTS, font = %font.display_name, "bundled default font loaded"),
            Ok(None) => info!(target: FONTS, "no bundled font found, using builtin {}", BUILTIN_NAME),
            Err(e) => warn!(target: FONTS, error = %e, "configured bundled font is unusable"),
        }

        FontResolver {
            bundled,
            verbose: config.verbose_diagnostics,
        }
    }

    /// Uses `font` (or the builtin Helvetica for `None`) as the default.
    pub fn with_default(font: Option<TrueTypeFont>) -> Self {
        FontResolver {
            bundled: Ok(font.map(|f| ResolvedFont::truetype(f, FontSource::Filesystem))),
            verbose: false,
        }
    }

    pub fn default_font(&self) -> Result<ResolvedFont> {
        match &self.bundled {
            Ok(Some(font)) => Ok(font.clone()),
            Ok(None) => Ok(ResolvedFont::builtin()),
            Err(reason) => Err(Error::FontUnresolvable {
                selection: "default".to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Resolves a selection without any fallback. `MatchSource` resolves
    /// against `source_font`, the font the placeholder was drawn with.
    pub fn resolve(
        &self,
        doc: &PdfDocument,
        selection: &FontSelection,
        source_font: Option<ObjectId>,
    ) -> std::result::Result<ResolvedFont, FontError> {
        match selection {
            FontSelection::Default => self
                .default_font()
                .map_err(|e| FontError::NotEmbedded(e.to_string())),
            FontSelection::File(path) => Ok(ResolvedFont::truetype(load_file(path)?, FontSource::Filesystem)),
            FontSelection::Embedded(id) => embedded(doc, *id),
            FontSelection::MatchSource => match source_font {
                Some(id) => {
                    let font = embedded(doc, id)?;
                    match &font.program {
                        FontProgram::TrueType(ttf) if ttf.data().len() < super::SUBSET_BYTES => Err(
                            FontError::Unsupported(format!("{} looks like a subset", font.display_name)),
                        ),
                        _ => Ok(font),
                    }
                }
                None => Err(FontError::NotEmbedded("placeholder has no source font".to_string())),
            },
        }
    }

    /// Picks the font for one value: the selection when it resolves and
    /// covers every character, otherwise the bundled default with the
    /// reason recorded. Only a broken default is fatal.
    pub fn choose(
        &self,
        doc: &PdfDocument,
        selection: &FontSelection,
        source_font: Option<ObjectId>,
        key_norm: &str,
        value: &str,
    ) -> Result<FontChoice> {
        let fallback = |reason: String| FontFallback {
            key_norm: key_norm.to_string(),
            requested: selection.to_string(),
            reason,
        };

        let (font, fallback) = if *selection == FontSelection::Default {
            (self.default_font()?, None)
        } else {
            match self.resolve(doc, selection, source_font) {
                Ok(font) => {
                    let missing = font.missing_chars(value);
                    if missing.is_empty() {
                        (font, None)
                    } else {
                        let reason = format!(
                            "{} lacks glyphs for {}",
                            font.display_name,
                            missing.iter().collect::<String>()
                        );
                        debug!(target: FONTS, key = key_norm, %reason, "glyph coverage gap");
                        (self.default_font()?, Some(fallback(reason)))
                    }
                }
                Err(e) => {
                    debug!(target: FONTS, key = key_norm, selection = %selection, error = %e, "font selection failed");
                    (self.default_font()?, Some(fallback(e.to_string())))
                }
            }
        };

        let uncovered = font.missing_chars(value);
        if self.verbose {
            debug!(
                target: FONTS,
                key = key_norm,
                font = %font.display_name,
                embedded = font.is_embedded(),
                uncovered = uncovered.len(),
                "font chosen"
            );
        }

        Ok(FontChoice {
            font,
            fallback,
            uncovered,
        })
    }
}

fn embedded(doc: &PdfDocument, id: ObjectId) -> std::result::Result<ResolvedFont, FontError> {
    let (_, bytes) = extract_font(doc.lopdf(), id)?;
    let font = TrueTypeFont::parse(bytes)?;
    Ok(ResolvedFont::truetype(font, FontSource::Embedded))
}

fn load_file(path: &Path) -> std::result::Result<TrueTypeFont, FontError> {
    let bytes = std::fs::read(path)?;
    TrueTypeFont::parse(bytes)
}

fn collect_font_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                collect_font_files(&path, depth - 1, out);
            }
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"))
        {
            out.push(path);
        }
    }
}

/// Best-scoring font under the search dirs that can draw Turkish.
fn discover(dirs: &[PathBuf], verbose: bool) -> Option<TrueTypeFont> {
    let mut paths = Vec::new();
    for dir in dirs {
        collect_font_files(dir, 3, &mut paths);
    }

    let file_name = |p: &PathBuf| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    paths.sort_by(|a, b| {
        score_font_name(&file_name(b))
            .cmp(&score_font_name(&file_name(a)))
            .then_with(|| a.cmp(b))
    });
    paths.dedup();

    for path in paths {
        if verbose {
            debug!(target: FONTS, path = %path.display(), score = score_font_name(&file_name(&path)), "bundled font candidate");
        }
        match load_file(&path) {
            Ok(font) if TURKISH_PROBE.chars().all(|c| font.has_glyph(c)) => return Some(font),
            Ok(_) => debug!(target: FONTS, path = %path.display(), "candidate lacks Turkish glyphs"),
            Err(e) => debug!(target: FONTS, path = %path.display(), error = %e, "candidate unreadable"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_turkish() {
        let font = ResolvedFont::builtin();
        assert!(font.missing_chars("Ayşe Yılmaz, İĞÜŞÖÇ").is_empty());
        assert_eq!(font.missing_chars("漢字 ok"), vec!['字', '漢']);
        assert!(!font.is_embedded());
    }

    #[test]
    fn builtin_measures_with_helvetica_widths() {
        let font = ResolvedFont::builtin();
        // "Ab" = 667 + 556
        assert!((font.text_width("Ab", 10.0) - 12.23).abs() < 1e-3);
        assert_eq!(font.encode("aı?"), vec![b'a', 27, b'?']);
    }
}
