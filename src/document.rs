use std::sync::Arc;

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::Rect;
use crate::logging::DETECT;

/// Maps between PDF user space (bottom-left origin) and page space
/// (top-left origin, offset removed). Rotation is not applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl PageGeometry {
    pub fn from_media_box(raw: [f32; 4]) -> Self {
        PageGeometry {
            left: raw[0].min(raw[2]),
            bottom: raw[1].min(raw[3]),
            right: raw[0].max(raw[2]),
            top: raw[1].max(raw[3]),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    pub fn page_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width(), self.height())
    }

    pub fn to_page(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.left, self.top - y)
    }

    pub fn to_user(&self, x: f32, y: f32) -> (f32, f32) {
        (x + self.left, self.top - y)
    }

    /// User-space `[llx, lly, urx, ury]` of a page-space rect.
    pub fn rect_to_user(&self, r: &Rect) -> [f32; 4] {
        let (x0, y_top) = self.to_user(r.x0, r.y0);
        let (x1, y_bottom) = self.to_user(r.x1, r.y1);
        [x0, y_bottom, x1, y_top]
    }

    /// Page-space rect of a user-space `[x0 y0 x1 y1]` array in any corner order.
    pub fn rect_from_user(&self, raw: [f32; 4]) -> Rect {
        Rect::from_corners(self.to_page(raw[0], raw[1]), self.to_page(raw[2], raw[3]))
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        // US Letter, the PDF default when MediaBox is missing everywhere.
        PageGeometry::from_media_box([0.0, 0.0, 612.0, 792.0])
    }
}

#[derive(Debug, Clone)]
pub struct PageInfo {
    pub id: ObjectId,
    pub geometry: PageGeometry,
}

/// A decoded document owned by a single request.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub(crate) inner: Document,
    source: Arc<Vec<u8>>,
    pages: Vec<PageInfo>,
}

impl PdfDocument {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        Self::load_with_limit(bytes, usize::MAX)
    }

    pub fn load_with_limit(bytes: &[u8], limit: usize) -> Result<Self> {
        if bytes.len() > limit {
            return Err(Error::DocumentTooLarge {
                size: bytes.len(),
                limit,
            });
        }
        let inner = Document::load_mem(bytes).map_err(Error::MalformedDocument)?;
        Self::from_document(inner, Arc::new(bytes.to_vec()))
    }

    fn from_document(inner: Document, source: Arc<Vec<u8>>) -> Result<Self> {
        let pages: Vec<PageInfo> = inner
            .get_pages()
            .into_values()
            .map(|id| PageInfo {
                id,
                geometry: media_box(&inner, id)
                    .map(PageGeometry::from_media_box)
                    .unwrap_or_default(),
            })
            .collect();

        if pages.is_empty() {
            return Err(Error::NoPages);
        }
        debug!(target: DETECT, pages = pages.len(), bytes = source.len(), "loaded document");

        Ok(PdfDocument {
            inner,
            source,
            pages,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&PageInfo> {
        self.pages.get(index)
    }

    pub fn lopdf(&self) -> &Document {
        &self.inner
    }

    pub(crate) fn lopdf_mut(&mut self) -> &mut Document {
        &mut self.inner
    }

    /// Bytes the document was loaded from, shared with the rasterizer.
    pub fn source_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.source)
    }

    pub fn to_bytes(mut self) -> Result<Vec<u8>> {
        self.inner.compress();
        let mut out = Vec::new();
        self.inner.save_to(&mut out).map_err(|e| Error::Serialize(e.into()))?;
        Ok(out)
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f32; 4]> {
    ["MediaBox", "CropBox"]
        .iter()
        .find_map(|key| inherited(doc, page_id, key.as_bytes()).and_then(|o| rect_array(doc, o)))
}

/// A page attribute, following `/Parent` for inheritable keys.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match doc.dereference(obj) {
        Ok((_, o)) => o,
        Err(_) => obj,
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).as_dict().ok()
}

pub(crate) fn dict_get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().map(|o| resolve(doc, o))
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

pub(crate) fn rect_array(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let arr = resolve(doc, obj).as_array().ok()?;
    if arr.len() < 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(arr.iter()) {
        *slot = number(resolve(doc, item))?;
    }
    Some(out)
}

pub(crate) fn name_str(obj: &Object) -> Option<String> {
    obj.as_name()
        .ok()
        .map(|n| String::from_utf8_lossy(n).into_owned())
}

pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    inherited(doc, page_id, b"Resources").and_then(|o| o.as_dict().ok())
}

/// Decodes a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, else
/// PDFDocEncoding (treated as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if bytes.len() >= 3 && bytes[..3] == [0xEF, 0xBB, 0xBF] {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Encodes a PDF text string: ASCII as a literal, anything else as
/// UTF-16BE with a BOM.
pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn text_string(doc: &Document, obj: &Object) -> Option<String> {
    match resolve(doc, obj) {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_round_trip() {
        let g = PageGeometry::from_media_box([0.0, 0.0, 595.0, 842.0]);
        assert_eq!(g.to_page(100.0, 642.0), (100.0, 200.0));
        assert_eq!(g.to_user(100.0, 200.0), (100.0, 642.0));
        let r = Rect::new(100.0, 200.0, 300.0, 220.0);
        assert_eq!(g.rect_to_user(&r), [100.0, 622.0, 300.0, 642.0]);
        assert_eq!(g.rect_from_user([300.0, 642.0, 100.0, 622.0]), r);
    }

    #[test]
    fn offset_media_box() {
        let g = PageGeometry::from_media_box([10.0, 20.0, 110.0, 220.0]);
        assert_eq!(g.width(), 100.0);
        assert_eq!(g.to_page(10.0, 220.0), (0.0, 0.0));
    }

    #[test]
    fn text_strings() {
        assert_eq!(decode_text_string(b"ad_soyad"), "ad_soyad");
        assert_eq!(
            decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x01, 0x5F]),
            "Aş"
        );
        assert_eq!(decode_text_string(&[0xE7]), "ç");

        assert_eq!(encode_text_string("Imza:"), Object::string_literal("Imza:"));
        let Object::String(bytes, _) = encode_text_string("İmza: {{b}}") else {
            panic!("expected a string");
        };
        assert_eq!(decode_text_string(&bytes), "İmza: {{b}}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            PdfDocument::load(b"not a pdf"),
            Err(Error::MalformedDocument(_))
        ));
        assert!(matches!(
            PdfDocument::load_with_limit(b"%PDF-1.4", 3),
            Err(Error::DocumentTooLarge { size: 8, limit: 3 })
        ));
    }
}
