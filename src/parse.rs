use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use tracing::{trace, warn};

use crate::document::{dict_get, name_str, number, page_resources, resolve, resolve_dict, PageGeometry, PdfDocument};
use crate::fonts::builtin::BuiltinFamily;
use crate::fonts::{font_descriptor, page_fonts, sanitize_font_name, strip_subset};
use crate::geo::Rect;
use crate::logging::TEXT_LAYER;

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// A font resource as the interpreter needs it: decoding, widths, and
/// vertical metrics, all in thousandths of an em.
pub struct LoadedFont<'a> {
    pub object_id: Option<ObjectId>,
    /// `/BaseFont` with any subset tag removed.
    pub name: String,
    encoding: Option<Encoding<'a>>,
    two_byte: bool,
    first_char: u32,
    widths: Vec<f32>,
    cid_widths: HashMap<u32, f32>,
    default_width: f32,
    missing_width: Option<f32>,
    builtin: Option<BuiltinFamily>,
    ascent: f32,
    descent: f32,
}

impl fmt::Debug for LoadedFont<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFont")
            .field("name", &self.name)
            .field("object_id", &self.object_id)
            .field("two_byte", &self.two_byte)
            .finish()
    }
}

fn numbers(doc: &Document, obj: &Object) -> Vec<Option<f32>> {
    resolve(doc, obj)
        .as_array()
        .map(|arr| arr.iter().map(|o| number(resolve(doc, o))).collect())
        .unwrap_or_default()
}

/// Parses a CIDFont `/W` array: `c [w1 w2 ...]` and `c_first c_last w`.
fn parse_cid_widths(doc: &Document, obj: &Object) -> HashMap<u32, f32> {
    let mut out = HashMap::new();
    let Ok(items) = resolve(doc, obj).as_array() else {
        return out;
    };
    let mut i = 0;
    while i < items.len() {
        let Some(first) = number(resolve(doc, &items[i])) else {
            break;
        };
        match items.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(ws)) => {
                for (k, w) in ws.iter().enumerate() {
                    if let Some(w) = number(resolve(doc, w)) {
                        out.insert(first as u32 + k as u32, w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (number(last), items.get(i + 2).and_then(|o| number(resolve(doc, o)))) else {
                    break;
                };
                for c in first as u32..=last as u32 {
                    out.insert(c, w);
                }
                i += 3;
            }
            None => break,
        }
    }
    out
}

impl<'a> LoadedFont<'a> {
    pub fn load(doc: &'a Document, object_id: Option<ObjectId>, dict: &'a Dictionary) -> Self {
        let base = dict
            .get(b"BaseFont")
            .ok()
            .and_then(name_str)
            .unwrap_or_default();
        let subtype = dict.get(b"Subtype").ok().and_then(name_str).unwrap_or_default();
        let two_byte = subtype == "Type0";
        let builtin = BuiltinFamily::from_base_name(&sanitize_font_name(&base));

        let encoding = match dict.get_font_encoding(doc) {
            Ok(enc) => Some(enc),
            Err(e) => {
                warn!(target: TEXT_LAYER, font = %base, error = %e, "font encoding unreadable, using Latin-1");
                None
            }
        };

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|o| number(resolve(doc, o)))
            .unwrap_or(0.0) as u32;
        let widths = dict
            .get(b"Widths")
            .map(|o| numbers(doc, o).into_iter().map(|w| w.unwrap_or(0.0)).collect())
            .unwrap_or_default();

        let mut cid_widths = HashMap::new();
        let mut default_width = 1000.0;
        if two_byte {
            if let Some(descendant) = dict_get(doc, dict, b"DescendantFonts")
                .and_then(|o| o.as_array().ok())
                .and_then(|arr| arr.first())
                .and_then(|o| resolve_dict(doc, o))
            {
                if let Ok(w) = descendant.get(b"W") {
                    cid_widths = parse_cid_widths(doc, w);
                }
                if let Some(dw) = dict_get(doc, descendant, b"DW").and_then(number) {
                    default_width = dw;
                }
            }
        }

        let descriptor = font_descriptor(doc, dict);
        let metric = |key: &[u8]| {
            descriptor
                .and_then(|fd| dict_get(doc, fd, key))
                .and_then(number)
                .filter(|v| *v != 0.0)
        };
        let ascent = metric(b"Ascent")
            .or_else(|| builtin.map(|b| b.ascent()))
            .unwrap_or(750.0);
        let descent = metric(b"Descent")
            .map(|d| -d.abs())
            .or_else(|| builtin.map(|b| b.descent()))
            .unwrap_or(-250.0);
        let missing_width = metric(b"MissingWidth");

        LoadedFont {
            object_id,
            name: strip_subset(&base).to_string(),
            encoding,
            two_byte,
            first_char,
            widths,
            cid_widths,
            default_width,
            missing_width,
            builtin,
            ascent,
            descent,
        }
    }

    /// Code boundaries within a string operand.
    fn codes(&self, bytes: &[u8]) -> Vec<Range<usize>> {
        let step = if self.two_byte { 2 } else { 1 };
        (0..bytes.len())
            .step_by(step)
            .map(|start| start..(start + step).min(bytes.len()))
            .collect()
    }

    fn code_value(code: &[u8]) -> u32 {
        code.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }

    fn decode(&self, code: &[u8]) -> String {
        if let Some(encoding) = &self.encoding {
            if let Ok(text) = Document::decode_text(encoding, code) {
                if !text.is_empty() {
                    return text;
                }
            }
        }
        if self.two_byte {
            char::from_u32(Self::code_value(code))
                .filter(|c| !c.is_control())
                .unwrap_or('\u{FFFD}')
                .to_string()
        } else {
            code.iter().map(|&b| b as char).collect()
        }
    }

    /// Glyph advance in thousandths of an em.
    fn width(&self, code: &[u8], text: &str) -> f32 {
        let value = Self::code_value(code);
        if self.two_byte {
            return self.cid_widths.get(&value).copied().unwrap_or(self.default_width);
        }
        if value >= self.first_char {
            if let Some(w) = self.widths.get((value - self.first_char) as usize) {
                if *w > 0.0 {
                    return *w;
                }
            }
        }
        if let Some(w) = self.missing_width.filter(|_| !self.widths.is_empty()) {
            return w;
        }
        let builtin = self.builtin.unwrap_or(BuiltinFamily::Helvetica);
        text.chars()
            .next()
            .and_then(|c| builtin.width(c))
            .unwrap_or(500.0)
    }
}

/// One glyph shown by a text operator.
#[derive(Debug)]
pub struct GlyphEvent<'e> {
    pub op_index: usize,
    /// Index of the string among the operator's strings (TJ array slot,
    /// or the operand index for Tj, ' and ").
    pub element: usize,
    pub code: Range<usize>,
    pub text: &'e str,
    /// Page-space box of the glyph.
    pub rect: Rect,
    /// Page-space y of the baseline at the glyph origin.
    pub baseline: f32,
    /// Advance in thousandths of an em, before spacing.
    pub width_units: f32,
    /// Character plus word spacing applied after the glyph, unscaled.
    pub spacing: f32,
    /// Tf size operand.
    pub font_size: f32,
    /// Size after the text and CTM transforms.
    pub effective_size: f32,
    pub font_name: &'e str,
    pub font_object: Option<ObjectId>,
    pub color: [f32; 3],
}

/// Receives what the interpreter sees. Defaults ignore everything.
pub trait ContentSink {
    fn glyph(&mut self, _glyph: &GlyphEvent<'_>) {}

    /// A painted path: its operator range (construction through painting),
    /// page-space bounds, and whether it was also used as a clip.
    fn path(&mut self, _ops: Range<usize>, _bbox: Option<Rect>, _clip: bool) {}

    /// An image drawn by `Do` or an inline image.
    fn image(&mut self, _op_index: usize, _bbox: Rect) {}
}

#[derive(Clone, Debug)]
struct GraphicsState {
    ctm: [f32; 6],
    fill: [f32; 3],
    font: Option<usize>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    /// Tz as a fraction, 1.0 = 100%.
    horizontal_scaling: f32,
    leading: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: IDENTITY,
            fill: [0.0, 0.0, 0.0],
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

#[derive(Default)]
struct PathState {
    start: Option<usize>,
    points: Vec<(f32, f32)>,
    clip: bool,
}

/// Content-stream interpreter for one page.
pub struct PageInterpreter<'a> {
    geometry: PageGeometry,
    fonts: Vec<LoadedFont<'a>>,
    font_index: HashMap<Vec<u8>, usize>,
    images: HashMap<Vec<u8>, bool>,
}

impl<'a> PageInterpreter<'a> {
    pub fn new(doc: &'a Document, page_id: ObjectId, geometry: PageGeometry) -> Self {
        let mut fonts = Vec::new();
        let mut font_index = HashMap::new();
        for (name, id, dict) in page_fonts(doc, page_id) {
            font_index.insert(name, fonts.len());
            fonts.push(LoadedFont::load(doc, id, dict));
        }

        let images = page_resources(doc, page_id)
            .and_then(|res| dict_get(doc, res, b"XObject"))
            .and_then(|o| o.as_dict().ok())
            .map(|xobjects| {
                xobjects
                    .iter()
                    .map(|(name, obj)| {
                        let is_image = resolve(doc, obj)
                            .as_stream()
                            .ok()
                            .and_then(|s| s.dict.get(b"Subtype").ok())
                            .and_then(name_str)
                            .is_some_and(|s| s == "Image");
                        (name.clone(), is_image)
                    })
                    .collect()
            })
            .unwrap_or_default();

        PageInterpreter {
            geometry,
            fonts,
            font_index,
            images,
        }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    pub fn run<S: ContentSink>(&self, operations: &[Operation], sink: &mut S) {
        let mut gs_stack = vec![GraphicsState::default()];
        let mut text_matrix = IDENTITY;
        let mut line_matrix = IDENTITY;
        let mut path = PathState::default();

        for (index, op) in operations.iter().enumerate() {
            let operands = &op.operands;
            let num = |i: usize| operands.get(i).and_then(number).unwrap_or(0.0);
            let Some(gs) = gs_stack.last_mut() else {
                break;
            };

            match op.operator.as_str() {
                "q" => {
                    let top = gs.clone();
                    gs_stack.push(top);
                }
                "Q" => {
                    if gs_stack.len() > 1 {
                        gs_stack.pop();
                    }
                }
                "cm" => {
                    let m = matrix_from_operands(operands);
                    gs.ctm = multiply_matrices(&m, &gs.ctm);
                }
                "g" => gs.fill = [num(0); 3],
                "rg" => gs.fill = [num(0), num(1), num(2)],
                "k" => gs.fill = cmyk_to_rgb(num(0), num(1), num(2), num(3)),
                "sc" | "scn" => {
                    let values: Vec<f32> = operands.iter().filter_map(number).collect();
                    match values.as_slice() {
                        [g] => gs.fill = [*g; 3],
                        [r, g, b] => gs.fill = [*r, *g, *b],
                        [c, m, y, k] => gs.fill = cmyk_to_rgb(*c, *m, *y, *k),
                        _ => {}
                    }
                }
                "BT" => {
                    text_matrix = IDENTITY;
                    line_matrix = IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    gs.font = operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .and_then(|name| self.font_index.get(name).copied());
                    gs.font_size = num(1);
                    if gs.font.is_none() {
                        trace!(target: TEXT_LAYER, op = index, "Tf names an unknown font");
                    }
                }
                "Tc" => gs.char_spacing = num(0),
                "Tw" => gs.word_spacing = num(0),
                "Tz" => gs.horizontal_scaling = num(0) / 100.0,
                "TL" => gs.leading = num(0),
                "Ts" => gs.rise = num(0),
                "Tm" => {
                    text_matrix = matrix_from_operands(operands);
                    line_matrix = text_matrix;
                }
                "Td" => {
                    line_matrix = multiply_matrices(&translate_matrix(num(0), num(1)), &line_matrix);
                    text_matrix = line_matrix;
                }
                "TD" => {
                    gs.leading = -num(1);
                    line_matrix = multiply_matrices(&translate_matrix(num(0), num(1)), &line_matrix);
                    text_matrix = line_matrix;
                }
                "T*" => {
                    line_matrix = multiply_matrices(&translate_matrix(0.0, -gs.leading), &line_matrix);
                    text_matrix = line_matrix;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_string(index, 0, bytes, gs, &mut text_matrix, sink);
                    }
                }
                "'" => {
                    line_matrix = multiply_matrices(&translate_matrix(0.0, -gs.leading), &line_matrix);
                    text_matrix = line_matrix;
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_string(index, 0, bytes, gs, &mut text_matrix, sink);
                    }
                }
                "\"" => {
                    gs.word_spacing = num(0);
                    gs.char_spacing = num(1);
                    line_matrix = multiply_matrices(&translate_matrix(0.0, -gs.leading), &line_matrix);
                    text_matrix = line_matrix;
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        self.show_string(index, 2, bytes, gs, &mut text_matrix, sink);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        for (element, item) in items.iter().enumerate() {
                            match item {
                                Object::String(bytes, _) => {
                                    self.show_string(index, element, bytes, gs, &mut text_matrix, sink)
                                }
                                other => {
                                    if let Some(n) = number(other) {
                                        let tx = -n / 1000.0 * gs.font_size * gs.horizontal_scaling;
                                        text_matrix = multiply_matrices(&translate_matrix(tx, 0.0), &text_matrix);
                                    }
                                }
                            }
                        }
                    }
                }
                "m" | "l" => {
                    path.start.get_or_insert(index);
                    path.points.push(self.user_to_page(&gs.ctm, num(0), num(1)));
                }
                "c" => {
                    path.start.get_or_insert(index);
                    for i in (0..6).step_by(2) {
                        path.points.push(self.user_to_page(&gs.ctm, num(i), num(i + 1)));
                    }
                }
                "v" | "y" => {
                    path.start.get_or_insert(index);
                    for i in (0..4).step_by(2) {
                        path.points.push(self.user_to_page(&gs.ctm, num(i), num(i + 1)));
                    }
                }
                "re" => {
                    path.start.get_or_insert(index);
                    let (x, y, w, h) = (num(0), num(1), num(2), num(3));
                    for (px, py) in [(x, y), (x + w, y), (x, y + h), (x + w, y + h)] {
                        path.points.push(self.user_to_page(&gs.ctm, px, py));
                    }
                }
                "h" => {}
                "W" | "W*" => path.clip = true,
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "n" => {
                    if let Some(start) = path.start.take() {
                        let bbox = Rect::from_points(path.points.drain(..));
                        sink.path(start..index + 1, bbox, path.clip);
                    }
                    path = PathState::default();
                }
                "Do" => {
                    let is_image = operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .and_then(|name| self.images.get(name))
                        .copied()
                        .unwrap_or(false);
                    if is_image {
                        sink.image(index, self.unit_square(&gs.ctm));
                    }
                }
                "BI" | "EI" => sink.image(index, self.unit_square(&gs.ctm)),
                _ => {}
            }
        }
    }

    fn user_to_page(&self, ctm: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
        let (ux, uy) = transform_point(ctm, x, y);
        self.geometry.to_page(ux, uy)
    }

    fn unit_square(&self, ctm: &[f32; 6]) -> Rect {
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        Rect::from_points(corners.iter().map(|(x, y)| self.user_to_page(ctm, *x, *y))).unwrap_or_default()
    }

    fn show_string<S: ContentSink>(
        &self,
        op_index: usize,
        element: usize,
        bytes: &[u8],
        gs: &GraphicsState,
        text_matrix: &mut [f32; 6],
        sink: &mut S,
    ) {
        let Some(font) = gs.font.and_then(|i| self.fonts.get(i)) else {
            return;
        };
        let size = gs.font_size;
        let th = gs.horizontal_scaling;

        for code in font.codes(bytes) {
            let raw = &bytes[code.clone()];
            let text = font.decode(raw);
            let width_units = font.width(raw, &text);

            let render = multiply_matrices(text_matrix, &gs.ctm);
            let advance = width_units / 1000.0 * size * th;
            let y_low = gs.rise + font.descent / 1000.0 * size;
            let y_high = gs.rise + font.ascent / 1000.0 * size;
            let corners = [(0.0, y_low), (advance, y_low), (0.0, y_high), (advance, y_high)];
            let rect = Rect::from_points(corners.iter().map(|&(x, y)| {
                let (ux, uy) = transform_point(&render, x, y);
                self.geometry.to_page(ux, uy)
            }))
            .unwrap_or_default();
            let (_, baseline) = {
                let (ux, uy) = transform_point(&render, 0.0, gs.rise);
                self.geometry.to_page(ux, uy)
            };

            let word_spacing = if !font.two_byte && raw == b" " {
                gs.word_spacing
            } else {
                0.0
            };
            let spacing = gs.char_spacing + word_spacing;

            sink.glyph(&GlyphEvent {
                op_index,
                element,
                code,
                text: &text,
                rect,
                baseline,
                width_units,
                spacing,
                font_size: size,
                effective_size: size * (render[2] * render[2] + render[3] * render[3]).sqrt(),
                font_name: &font.name,
                font_object: font.object_id,
                color: gs.fill,
            });

            let tx = (width_units / 1000.0 * size + spacing) * th;
            *text_matrix = multiply_matrices(&translate_matrix(tx, 0.0), text_matrix);
        }
    }
}

/// Per-character box of a text span.
#[derive(Debug, Clone, PartialEq)]
pub struct CharBox {
    pub ch: char,
    pub rect: Rect,
}

/// The glyphs of one text-showing operator, in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// One entry per `char` of `text`.
    pub chars: Vec<CharBox>,
    pub bbox: Rect,
    pub baseline: f32,
    pub font_size: f32,
    pub font_name: String,
    pub font_object: Option<ObjectId>,
    pub color: [f32; 3],
    pub page: usize,
}

impl fmt::Display for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" {} {}pt {}",
            self.text, self.bbox, self.font_size, self.font_name
        )
    }
}

struct SpanCollector {
    page: usize,
    current_op: Option<usize>,
    current: Option<TextSpan>,
    spans: Vec<TextSpan>,
}

impl SpanCollector {
    fn flush(&mut self) {
        if let Some(span) = self.current.take() {
            if !span.chars.is_empty() {
                self.spans.push(span);
            }
        }
    }
}

impl ContentSink for SpanCollector {
    fn glyph(&mut self, glyph: &GlyphEvent<'_>) {
        if self.current_op != Some(glyph.op_index) {
            self.flush();
            self.current_op = Some(glyph.op_index);
        }
        let span = self.current.get_or_insert_with(|| TextSpan {
            text: String::new(),
            chars: Vec::new(),
            bbox: glyph.rect,
            baseline: glyph.baseline,
            font_size: glyph.effective_size,
            font_name: glyph.font_name.to_string(),
            font_object: glyph.font_object,
            color: glyph.color,
            page: self.page,
        });

        // Ligatures and multi-char mappings share the glyph box evenly.
        let count = glyph.text.chars().count().max(1) as f32;
        let step = glyph.rect.width() / count;
        for (i, ch) in glyph.text.chars().enumerate() {
            let rect = Rect {
                x0: glyph.rect.x0 + step * i as f32,
                x1: glyph.rect.x0 + step * (i + 1) as f32,
                ..glyph.rect
            };
            span.text.push(ch);
            span.chars.push(CharBox { ch, rect });
        }
        span.bbox = span.bbox.union(&glyph.rect);
    }
}

/// Positioned text spans of one page, in content-stream order.
pub fn page_spans(doc: &PdfDocument, page_index: usize) -> Result<Vec<TextSpan>, lopdf::Error> {
    let Some(page) = doc.page(page_index) else {
        return Ok(Vec::new());
    };
    let lopdf = doc.lopdf();
    let content = lopdf.get_and_decode_page_content(page.id)?;
    let interpreter = PageInterpreter::new(lopdf, page.id, page.geometry);

    let mut collector = SpanCollector {
        page: page_index,
        current_op: None,
        current: None,
        spans: Vec::new(),
    };
    interpreter.run(&content.operations, &mut collector);
    collector.flush();

    trace!(target: TEXT_LAYER, page = page_index, spans = collector.spans.len(), "page spans");
    Ok(collector.spans)
}

fn matrix_from_operands(operands: &[Object]) -> [f32; 6] {
    if operands.len() < 6 {
        return IDENTITY;
    }
    let mut m = IDENTITY;
    for (slot, obj) in m.iter_mut().zip(operands) {
        *slot = number(obj).unwrap_or(0.0);
    }
    m
}

fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> [f32; 3] {
    [(1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k)]
}

pub fn transform_point(m: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

/// `a × b` for PDF row-vector matrices: applying the result is applying
/// `a` then `b`.
pub fn multiply_matrices(a: &[f32; 6], b: &[f32; 6]) -> [f32; 6] {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

pub fn translate_matrix(x: f32, y: f32) -> [f32; 6] {
    [1.0, 0.0, 0.0, 1.0, x, y]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_then_scale() {
        let t = translate_matrix(10.0, 20.0);
        let s = [2.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        // translate first, then scale
        let m = multiply_matrices(&t, &s);
        assert_eq!(transform_point(&m, 1.0, 1.0), (22.0, 42.0));
    }

    #[test]
    fn short_matrix_operands_are_identity() {
        assert_eq!(matrix_from_operands(&[Object::Integer(2)]), IDENTITY);
    }

    #[test]
    fn cmyk_black() {
        assert_eq!(cmyk_to_rgb(0.0, 0.0, 0.0, 1.0), [0.0, 0.0, 0.0]);
        assert_eq!(cmyk_to_rgb(0.0, 0.0, 0.0, 0.0), [1.0, 1.0, 1.0]);
    }
}
