//! Appends fill text (and opaque covers) to page content.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::document::{page_resources, resolve, PageGeometry};
use crate::geo::Rect;

/// One run of text to draw.
#[derive(Debug, Clone)]
pub(crate) struct TextDraw {
    pub font: ObjectId,
    pub bytes: Vec<u8>,
    pub size: f32,
    pub color: [f32; 3],
    /// Baseline start in page space.
    pub origin: (f32, f32),
}

#[derive(Debug, Default, Clone)]
pub(crate) struct PageDrawing {
    pub covers: Vec<Rect>,
    pub texts: Vec<TextDraw>,
}

impl PageDrawing {
    pub fn is_empty(&self) -> bool {
        self.covers.is_empty() && self.texts.is_empty()
    }
}

fn reals(values: &[f32]) -> Vec<Object> {
    values.iter().map(|v| Object::Real(*v)).collect()
}

/// Makes the page own an inline copy of its resources (inherited or
/// referenced ones included) with every font in `fonts` registered.
/// Returns the resource name of each font, in order.
fn register_fonts(doc: &mut Document, page_id: ObjectId, fonts: &[ObjectId]) -> Result<Vec<Vec<u8>>, lopdf::Error> {
    let mut resources: Dictionary = page_resources(doc, page_id).cloned().unwrap_or_default();
    let mut font_dict: Dictionary = resources
        .get(b"Font")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut names = Vec::with_capacity(fonts.len());
    let mut counter = 1usize;
    for &font in fonts {
        if let Some((name, _)) = font_dict
            .iter()
            .find(|(_, v)| v.as_reference().is_ok_and(|id| id == font))
        {
            names.push(name.clone());
            continue;
        }
        let name = loop {
            let candidate = format!("StnF{counter}").into_bytes();
            counter += 1;
            if !font_dict.has(&candidate) {
                break candidate;
            }
        };
        font_dict.set(name.clone(), font);
        names.push(name);
    }

    resources.set("Font", font_dict);
    doc.get_dictionary_mut(page_id)?.set("Resources", resources);
    Ok(names)
}

/// Current `/Contents` of a page as a list of stream references.
fn content_refs(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(reference @ Object::Reference(_)) => match resolve(doc, reference) {
            Object::Array(items) => items.clone(),
            _ => vec![reference.clone()],
        },
        _ => Vec::new(),
    }
}

/// Wraps the existing content in `q … Q` and appends a stream drawing
/// `drawing`.
pub(crate) fn append_page_drawing(
    doc: &mut Document,
    page_id: ObjectId,
    geometry: PageGeometry,
    drawing: &PageDrawing,
    cover_color: [f32; 3],
) -> Result<(), lopdf::Error> {
    if drawing.is_empty() {
        return Ok(());
    }

    let mut fonts: Vec<ObjectId> = Vec::new();
    for text in &drawing.texts {
        if !fonts.contains(&text.font) {
            fonts.push(text.font);
        }
    }
    let names = register_fonts(doc, page_id, &fonts)?;

    let mut ops = vec![Operation::new("Q", vec![])];
    if !drawing.covers.is_empty() {
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("rg", reals(&cover_color)));
        for rect in &drawing.covers {
            let [llx, lly, urx, ury] = geometry.rect_to_user(rect);
            ops.push(Operation::new("re", reals(&[llx, lly, urx - llx, ury - lly])));
        }
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    for text in &drawing.texts {
        let Some(index) = fonts.iter().position(|f| *f == text.font) else {
            continue;
        };
        let (x, y) = geometry.to_user(text.origin.0, text.origin.1);
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![Object::Name(names[index].clone()), Object::Real(text.size)],
        ));
        ops.push(Operation::new("rg", reals(&text.color)));
        ops.push(Operation::new("Td", reals(&[x, y])));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(text.bytes.clone(), StringFormat::Hexadecimal)],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    let open = Content {
        operations: vec![Operation::new("q", vec![])],
    }
    .encode()?;
    let close = Content { operations: ops }.encode()?;
    let open_id = doc.add_object(Stream::new(dictionary! {}, open));
    let close_id = doc.add_object(Stream::new(dictionary! {}, close));

    let mut contents = vec![Object::Reference(open_id)];
    contents.extend(content_refs(doc, page_id));
    contents.push(Object::Reference(close_id));
    doc.get_dictionary_mut(page_id)?.set("Contents", contents);
    Ok(())
}
