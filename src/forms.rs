//! Interactive form widgets as placeholders.

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use crate::annotations::{annotation_rect, page_annotations};
use crate::document::{dict_get, name_str, text_string, PdfDocument};
use crate::logging::FORMS;
use crate::model::{PlaceholderCandidate, Source};
use crate::normalize::find_placeholders;

const MAX_FIELD_DEPTH: usize = 32;

/// A field attribute, inherited through `/Parent`.
fn inherited_field<'a>(doc: &'a Document, field: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut dict = field;
    for _ in 0..MAX_FIELD_DEPTH {
        if let Some(value) = dict_get(doc, dict, key) {
            return Some(value);
        }
        dict = dict_get(doc, dict, b"Parent")?.as_dict().ok()?;
    }
    None
}

/// Fully qualified field name: the `/T` of the field and its ancestors,
/// outermost first, joined with `.`.
pub(crate) fn field_name(doc: &Document, widget: &Dictionary) -> Option<String> {
    let mut parts = Vec::new();
    let mut dict = Some(widget);
    for _ in 0..MAX_FIELD_DEPTH {
        let Some(current) = dict else { break };
        if let Some(name) = current.get(b"T").ok().and_then(|o| text_string(doc, o)) {
            parts.push(name);
        }
        dict = dict_get(doc, current, b"Parent").and_then(|o| o.as_dict().ok());
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("."))
}

/// Font resource and size from a default-appearance string such as
/// `/Helv 12 Tf 0 g`.
pub(crate) fn parse_da(da: &str) -> (Option<String>, Option<f32>) {
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let Some(tf) = tokens.iter().rposition(|t| *t == "Tf") else {
        return (None, None);
    };
    if tf < 2 {
        return (None, None);
    }
    let name = tokens[tf - 2].strip_prefix('/').map(str::to_string);
    let size = tokens[tf - 1].parse::<f32>().ok().filter(|s| *s > 0.0);
    (name, size)
}

pub fn extract(doc: &PdfDocument) -> Vec<PlaceholderCandidate> {
    let lopdf = doc.lopdf();
    let mut out = Vec::new();

    for (page_index, page) in doc.pages().iter().enumerate() {
        for annot in page_annotations(lopdf, page.id) {
            if annot.subtype != "Widget" {
                continue;
            }
            let field_type = inherited_field(lopdf, annot.dict, b"FT").and_then(name_str);
            if matches!(field_type.as_deref(), Some("Btn") | Some("Sig")) {
                continue;
            }

            let value = inherited_field(lopdf, annot.dict, b"V").and_then(|o| text_string(lopdf, o));
            let from_value = value
                .as_deref()
                .and_then(|v| find_placeholders(v, false).into_iter().next())
                .map(|m| m.raw);
            let Some(key) = from_value.or_else(|| field_name(lopdf, annot.dict)) else {
                debug!(target: FORMS, page = page_index, "widget without a field name");
                continue;
            };
            let Some(rect) = annotation_rect(lopdf, page, annot.dict) else {
                debug!(target: FORMS, page = page_index, %key, "widget without usable /Rect");
                continue;
            };

            let mut candidate = PlaceholderCandidate::new(&key, page_index, rect, Source::Form);
            if candidate.key_norm.is_empty() {
                continue;
            }
            candidate.object_id = annot.id;
            if let Some(da) = inherited_field(lopdf, annot.dict, b"DA").and_then(|o| text_string(lopdf, o)) {
                let (font, size) = parse_da(&da);
                candidate.font_name = font;
                candidate.font_size = size;
            }
            debug!(target: FORMS, page = page_index, key = %candidate.key_norm, "form field");
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_appearance() {
        assert_eq!(parse_da("/Helv 12 Tf 0 g"), (Some("Helv".to_string()), Some(12.0)));
        assert_eq!(parse_da("0 g /F1 0 Tf"), (Some("F1".to_string()), None));
        assert_eq!(parse_da("0 g"), (None, None));
    }
}
