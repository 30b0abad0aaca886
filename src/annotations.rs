//! Placeholders in annotation contents.

use lopdf::{Dictionary, Document, ObjectId};
use tracing::debug;

use crate::config::DetectionConfig;
use crate::document::{dict_get, name_str, rect_array, resolve_dict, text_string, PageInfo, PdfDocument};
use crate::geo::Rect;
use crate::logging::ANNOTATIONS;
use crate::model::{PlaceholderCandidate, Source};
use crate::normalize::{clean_text, find_placeholders_in_clean, PlaceholderMatch};

/// Markup subtypes whose `/Contents` is scanned.
const SCANNED_SUBTYPES: &[&str] = &[
    "FreeText",
    "Text",
    "Square",
    "Circle",
    "Highlight",
    "Underline",
    "StrikeOut",
    "Squiggly",
    "Stamp",
    "Caret",
];

/// One entry of a page's `/Annots`.
pub(crate) struct PageAnnotation<'a> {
    pub id: Option<ObjectId>,
    pub dict: &'a Dictionary,
    pub subtype: String,
}

pub(crate) fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<PageAnnotation<'_>> {
    let Some(annots) = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| dict_get(doc, page, b"Annots"))
        .and_then(|o| o.as_array().ok())
    else {
        return Vec::new();
    };

    annots
        .iter()
        .filter_map(|entry| {
            let dict = resolve_dict(doc, entry)?;
            let subtype = dict.get(b"Subtype").ok().and_then(name_str).unwrap_or_default();
            Some(PageAnnotation {
                id: entry.as_reference().ok(),
                dict,
                subtype,
            })
        })
        .collect()
}

/// An annotation's `/Rect` in page space, clamped to the page.
pub(crate) fn annotation_rect(doc: &Document, page: &PageInfo, dict: &Dictionary) -> Option<Rect> {
    let raw = dict.get(b"Rect").ok().and_then(|o| rect_array(doc, o))?;
    let rect = page.geometry.rect_from_user(raw).clamp_to(&page.geometry.page_rect());
    (!rect.is_degenerate()).then_some(rect)
}

/// The share of the annotation box a token takes, with the contents laid
/// out line by line across the full width. `text` is the cleaned contents
/// with `\n` line breaks.
fn token_rect(rect: &Rect, text: &str, m: &PlaceholderMatch) -> Rect {
    let lines = text.split('\n').count().max(1) as f32;
    let first_line = text[..m.start].matches('\n').count() as f32;
    let last_line = first_line + m.raw.matches('\n').count() as f32;
    let band = rect.height() / lines;
    let y0 = rect.y0 + band * first_line;
    let y1 = rect.y0 + band * (last_line + 1.0);

    if last_line > first_line {
        return Rect::new(rect.x0, y0, rect.x1, y1);
    }
    let line_start = text[..m.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[m.end..].find('\n').map_or(text.len(), |i| m.end + i);
    let line_chars = text[line_start..line_end].chars().count().max(1) as f32;
    let before = text[line_start..m.start].chars().count() as f32;
    let token = m.raw.chars().count() as f32;
    let w = rect.width() / line_chars;
    Rect::new(rect.x0 + w * before, y0, rect.x0 + w * (before + token), y1)
}

pub fn extract(doc: &PdfDocument, config: &DetectionConfig) -> Vec<PlaceholderCandidate> {
    let lopdf = doc.lopdf();
    let mut out = Vec::new();

    for (page_index, page) in doc.pages().iter().enumerate() {
        for annot in page_annotations(lopdf, page.id) {
            if !SCANNED_SUBTYPES.contains(&annot.subtype.as_str()) {
                continue;
            }
            let Some(contents) = annot.dict.get(b"Contents").ok().and_then(|o| text_string(lopdf, o)) else {
                continue;
            };
            let text = clean_text(&contents, false).replace("\r\n", "\n").replace('\r', "\n");
            let matches = find_placeholders_in_clean(&text);
            if matches.is_empty() {
                continue;
            }
            let Some(rect) = annotation_rect(lopdf, page, annot.dict) else {
                debug!(target: ANNOTATIONS, page = page_index, "annotation without usable /Rect");
                continue;
            };

            for m in matches {
                let rect = token_rect(&rect, &text, &m)
                    .pad_x(config.rect_padding)
                    .clamp_to(&page.geometry.page_rect());
                let mut candidate = PlaceholderCandidate::new(&m.raw, page_index, rect, Source::Annotation);
                candidate.object_id = annot.id;
                debug!(target: ANNOTATIONS, page = page_index, key = %candidate.key_norm, subtype = %annot.subtype, "annotation placeholder");
                out.push(candidate);
            }
        }
    }
    out
}
