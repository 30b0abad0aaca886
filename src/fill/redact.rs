//! Destructive removal of placeholder marks before new text is drawn.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, trace};

use crate::document::{encode_text_string, name_str, text_string, PageGeometry};
use crate::geo::Rect;
use crate::logging::REDACT;
use crate::normalize::{clean_text, find_placeholders_in_clean, normalize_key};
use crate::parse::{ContentSink, GlyphEvent, PageInterpreter};

#[derive(Debug, Clone)]
struct GlyphRecord {
    element: usize,
    code: Range<usize>,
    remove: bool,
    width_units: f32,
    spacing: f32,
    font_size: f32,
}

#[derive(Default)]
struct RedactionSink<'r> {
    rects: &'r [Rect],
    glyphs: HashMap<usize, Vec<GlyphRecord>>,
    dropped: BTreeSet<usize>,
}

impl RedactionSink<'_> {
    fn covers_center(&self, rect: &Rect) -> bool {
        let (cx, cy) = rect.center();
        self.rects.iter().any(|r| r.contains_point(cx, cy))
    }
}

impl ContentSink for RedactionSink<'_> {
    fn glyph(&mut self, glyph: &GlyphEvent<'_>) {
        let remove = self.covers_center(&glyph.rect);
        self.glyphs.entry(glyph.op_index).or_default().push(GlyphRecord {
            element: glyph.element,
            code: glyph.code.clone(),
            remove,
            width_units: glyph.width_units,
            spacing: glyph.spacing,
            font_size: glyph.font_size,
        });
    }

    fn path(&mut self, ops: Range<usize>, bbox: Option<Rect>, clip: bool) {
        let Some(bbox) = bbox else { return };
        if !clip && self.rects.iter().any(|r| r.contains(&bbox)) {
            self.dropped.extend(ops);
        }
    }

    fn image(&mut self, op_index: usize, bbox: Rect) {
        if self.rects.iter().any(|r| r.contains(&bbox)) {
            self.dropped.insert(op_index);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RedactStats {
    pub glyphs: usize,
    pub operators: usize,
}

/// TJ displacement that stands in for a removed glyph.
fn compensation(record: &GlyphRecord) -> f32 {
    let spacing = if record.font_size != 0.0 {
        record.spacing * 1000.0 / record.font_size
    } else {
        0.0
    };
    -(record.width_units + spacing)
}

fn string_format(obj: &Object) -> StringFormat {
    match obj {
        Object::String(_, format) => format.clone(),
        _ => StringFormat::Literal,
    }
}

/// Rebuilds one string operand as TJ items, leaving out removed codes.
fn rewrite_string(bytes: &[u8], format: StringFormat, records: &[&GlyphRecord], out: &mut Vec<Object>) {
    let mut pending: Vec<u8> = Vec::new();
    for record in records {
        if record.remove {
            if !pending.is_empty() {
                out.push(Object::String(std::mem::take(&mut pending), format.clone()));
            }
            out.push(Object::Real(compensation(record)));
        } else if let Some(code) = bytes.get(record.code.clone()) {
            pending.extend_from_slice(code);
        }
    }
    if !pending.is_empty() {
        out.push(Object::String(pending, format));
    }
}

fn rewrite_show(op: &Operation, records: &[GlyphRecord]) -> Vec<Operation> {
    let for_element = |element: usize| -> Vec<&GlyphRecord> {
        records.iter().filter(|r| r.element == element).collect()
    };

    let mut array = Vec::new();
    let mut prefix = Vec::new();
    match op.operator.as_str() {
        "TJ" => {
            if let Some(Object::Array(items)) = op.operands.first() {
                for (element, item) in items.iter().enumerate() {
                    match item {
                        Object::String(bytes, format) => {
                            rewrite_string(bytes, format.clone(), &for_element(element), &mut array)
                        }
                        other => array.push(other.clone()),
                    }
                }
            }
        }
        "Tj" | "'" | "\"" => {
            let element = if op.operator == "\"" { 2 } else { 0 };
            if op.operator == "\"" {
                prefix.push(Operation::new("Tw", vec![op.operands.first().cloned().unwrap_or(Object::Integer(0))]));
                prefix.push(Operation::new("Tc", vec![op.operands.get(1).cloned().unwrap_or(Object::Integer(0))]));
            }
            if op.operator != "Tj" {
                prefix.push(Operation::new("T*", vec![]));
            }
            if let Some(obj @ Object::String(bytes, _)) = op.operands.get(element) {
                rewrite_string(bytes, string_format(obj), &for_element(element), &mut array);
            }
        }
        _ => return vec![op.clone()],
    }

    prefix.push(Operation::new("TJ", vec![Object::Array(array)]));
    prefix
}

/// Removes text, paths and images inside `rects` from one page's content.
/// The page ends up with a single rewritten content stream.
pub(crate) fn redact_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    geometry: PageGeometry,
    rects: &[Rect],
) -> Result<RedactStats, lopdf::Error> {
    if rects.is_empty() {
        return Ok(RedactStats::default());
    }
    let content = doc.get_and_decode_page_content(page_id)?;

    let mut sink = RedactionSink {
        rects,
        ..Default::default()
    };
    PageInterpreter::new(doc, page_id, geometry).run(&content.operations, &mut sink);

    let mut stats = RedactStats::default();
    let mut operations = Vec::with_capacity(content.operations.len());
    for (index, op) in content.operations.into_iter().enumerate() {
        if sink.dropped.contains(&index) {
            stats.operators += 1;
            continue;
        }
        match sink.glyphs.get(&index) {
            Some(records) if records.iter().any(|r| r.remove) => {
                stats.glyphs += records.iter().filter(|r| r.remove).count();
                stats.operators += 1;
                trace!(target: REDACT, op = index, operator = %op.operator, "rewriting text operator");
                operations.extend(rewrite_show(&op, records));
            }
            _ => operations.push(op),
        }
    }

    if stats == RedactStats::default() {
        debug!(target: REDACT, ?page_id, "nothing to redact");
        return Ok(stats);
    }

    let encoded = Content { operations }.encode()?;
    let stream_id = doc.add_object(Stream::new(dictionary! {}, encoded));
    doc.get_dictionary_mut(page_id)?.set("Contents", stream_id);
    debug!(target: REDACT, ?page_id, glyphs = stats.glyphs, operators = stats.operators, "page redacted");
    Ok(stats)
}

/// Drops `ids` from the array stored under `key` in `holder`, whether the
/// array is inline or referenced.
fn retain_refs_in(doc: &mut Document, holder: ObjectId, key: &[u8], ids: &HashSet<ObjectId>) -> usize {
    let array_ref = match doc.get_dictionary(holder).ok().and_then(|d| d.get(key).ok()) {
        Some(Object::Reference(id)) => Some(*id),
        Some(Object::Array(_)) => None,
        _ => return 0,
    };
    let array = match array_ref {
        Some(id) => doc.get_object_mut(id).and_then(Object::as_array_mut),
        None => doc
            .get_dictionary_mut(holder)
            .and_then(|d| d.get_mut(key))
            .and_then(Object::as_array_mut),
    };
    let Ok(array) = array else { return 0 };
    let before = array.len();
    array.retain(|item| !item.as_reference().is_ok_and(|id| ids.contains(&id)));
    before - array.len()
}

/// What erasing a page's widgets and markups did.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AnnotationErasure {
    pub removed: usize,
    pub rewritten: usize,
    /// Keys left behind in markups that were only partly filled.
    pub unfilled: Vec<String>,
}

/// `contents` without the placeholders whose keys are in `filled`, plus the
/// keys of the ones that stay.
fn strip_placeholders(contents: &str, filled: &HashSet<String>) -> (String, Vec<String>) {
    let cleaned = clean_text(contents, false);
    let mut out = String::with_capacity(cleaned.len());
    let mut unfilled = Vec::new();
    let mut last = 0;
    for m in find_placeholders_in_clean(&cleaned) {
        let key = normalize_key(&m.raw);
        if filled.contains(&key) {
            out.push_str(&cleaned[last..m.start]);
            last = m.end;
        } else {
            unfilled.push(key);
        }
    }
    out.push_str(&cleaned[last..]);
    (out, unfilled)
}

/// Erases filled placeholders from the page's annotations. `filled` maps
/// each touched annotation to the keys filled from it. Widgets are removed
/// outright. A markup loses only the filled tokens from its `/Contents`
/// and is removed once nothing but whitespace is left; otherwise its
/// appearance stream is dropped so viewers rebuild it from the new text.
pub(crate) fn erase_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    filled: &HashMap<ObjectId, HashSet<String>>,
) -> AnnotationErasure {
    let mut erasure = AnnotationErasure::default();
    let mut remove = HashSet::new();

    for (&id, keys) in filled {
        let Ok(dict) = doc.get_dictionary(id) else { continue };
        let is_widget = dict.get(b"Subtype").ok().and_then(name_str).as_deref() == Some("Widget");
        let contents = dict.get(b"Contents").ok().and_then(|o| text_string(doc, o));

        let (remaining, unfilled) = match contents {
            Some(contents) if !is_widget => strip_placeholders(&contents, keys),
            _ => {
                remove.insert(id);
                continue;
            }
        };
        if remaining.trim().is_empty() {
            remove.insert(id);
            continue;
        }
        if let Ok(dict) = doc.get_dictionary_mut(id) {
            dict.set("Contents", encode_text_string(&remaining));
            dict.remove(b"AP");
            erasure.rewritten += 1;
            debug!(target: REDACT, ?id, left = unfilled.len(), "annotation contents rewritten");
        }
        erasure.unfilled.extend(unfilled);
    }

    erasure.removed = remove_annotations(doc, page_id, &remove);
    erasure
}

/// Removes annotations (and the form fields they belong to, when listed
/// directly in the AcroForm) from a page.
fn remove_annotations(doc: &mut Document, page_id: ObjectId, ids: &HashSet<ObjectId>) -> usize {
    if ids.is_empty() {
        return 0;
    }
    let removed = retain_refs_in(doc, page_id, b"Annots", ids);

    let acroform = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .ok()
        .and_then(|root| {
            let catalog = doc.get_dictionary(root).ok()?;
            match catalog.get(b"AcroForm").ok()? {
                Object::Reference(id) => Some(*id),
                _ => None,
            }
        });
    if let Some(acroform) = acroform {
        let fields = retain_refs_in(doc, acroform, b"Fields", ids);
        debug!(target: REDACT, fields, "form fields removed");
    }

    debug!(target: REDACT, ?page_id, removed, "annotations removed");
    removed
}
