#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::dictionary;
use lopdf::{Document, Object, ObjectId, Stream};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;

/// A `Tj` run placed with `Td`, in PDF user space.
#[derive(Debug, Clone)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// A text form field with one widget.
#[derive(Debug, Clone)]
pub struct Widget {
    pub name: String,
    pub value: Option<String>,
    pub field_type: String,
    /// `[llx, lly, urx, ury]` in user space.
    pub rect: [f32; 4],
}

/// A markup annotation with a `/Contents` string.
#[derive(Debug, Clone)]
pub struct Markup {
    pub subtype: String,
    pub contents: String,
    pub rect: [f32; 4],
}

#[derive(Debug, Clone, Default)]
pub struct PageSpec {
    pub runs: Vec<TextRun>,
    pub widgets: Vec<Widget>,
    pub markups: Vec<Markup>,
    /// Raw operations appended after the text runs.
    pub extra_ops: Vec<Operation>,
}

pub struct PdfConfig {
    pub font_name: String,
    pub pages: Vec<PageSpec>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        PdfConfig {
            font_name: "Helvetica".to_string(),
            pages: vec![PageSpec {
                runs: vec![
                    run("Ad Soyad:", 50.0, 630.0, 12.0),
                    run("{{ad_soyad}}", 120.0, 630.0, 12.0),
                    run("Tarih: {{tarih}}", 50.0, 600.0, 12.0),
                ],
                ..Default::default()
            }],
        }
    }
}

pub fn run(text: &str, x: f32, y: f32, size: f32) -> TextRun {
    TextRun {
        text: text.to_string(),
        x,
        y,
        size,
    }
}

pub fn widget(name: &str, rect: [f32; 4]) -> Widget {
    Widget {
        name: name.to_string(),
        value: None,
        field_type: "Tx".to_string(),
        rect,
    }
}

pub fn free_text(contents: &str, rect: [f32; 4]) -> Markup {
    Markup {
        subtype: "FreeText".to_string(),
        contents: contents.to_string(),
        rect,
    }
}

/// Helvetica advance widths for the characters the fixtures use, in
/// thousandths of an em.
pub fn helvetica_width(text: &str, size: f32) -> f32 {
    let units: f32 = text
        .chars()
        .map(|c| match c {
            '{' | '}' => 334.0,
            'i' | 'l' | 'j' => 222.0,
            't' | 'f' | ' ' | ':' => 278.0,
            'r' => 333.0,
            '_' | 'a' | 'd' | 'o' | 'n' | 'h' | 'e' => 556.0,
            'y' | 's' => 500.0,
            'A' | 'S' => 667.0,
            'T' => 611.0,
            _ => 556.0,
        })
        .sum();
    units * size / 1000.0
}

pub fn create_test_pdf_with_config(config: PdfConfig) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => config.font_name.clone(),
    });

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids = Vec::new();
    let mut fields: Vec<Object> = Vec::new();

    for page in &config.pages {
        let mut operations = vec![];
        for text in &page.runs {
            operations.extend(vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), text.size.into()]),
                Operation::new("Td", vec![text.x.into(), text.y.into()]),
                Operation::new("Tj", vec![Object::string_literal(text.text.clone())]),
                Operation::new("ET", vec![]),
            ]);
        }
        operations.extend(page.extra_ops.iter().cloned());

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let page_id = doc.new_object_id();
        let mut annots: Vec<Object> = Vec::new();
        for w in &page.widgets {
            let mut dict = dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "FT" => w.field_type.as_str(),
                "T" => Object::string_literal(w.name.clone()),
                "Rect" => rect_object(w.rect),
                "DA" => Object::string_literal("/Helv 10 Tf 0 g"),
                "P" => page_id,
            };
            if let Some(value) = &w.value {
                dict.set("V", Object::string_literal(value.clone()));
            }
            let id = doc.add_object(dict);
            annots.push(id.into());
            fields.push(id.into());
        }
        for m in &page.markups {
            let id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => m.subtype.as_str(),
                "Contents" => Object::string_literal(m.contents.clone()),
                "Rect" => rect_object(m.rect),
            });
            annots.push(id.into());
        }

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        if !annots.is_empty() {
            page_dict.set("Annots", annots);
        }
        doc.objects.insert(page_id, Object::Dictionary(page_dict));
        kids.push(Object::from(page_id));
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if !fields.is_empty() {
        let acroform_id = doc.add_object(dictionary! {
            "Fields" => fields,
            "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
        });
        catalog.set("AcroForm", acroform_id);
    }
    let catalog_id = doc.add_object(catalog);

    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn rect_object(rect: [f32; 4]) -> Object {
    Object::Array(rect.iter().map(|v| Object::Real(*v)).collect())
}

pub fn create_test_pdf() -> Vec<u8> {
    create_test_pdf_with_config(PdfConfig::default())
}

pub fn single_page(page: PageSpec) -> Vec<u8> {
    create_test_pdf_with_config(PdfConfig {
        pages: vec![page],
        ..Default::default()
    })
}

/// Object ids of every annotation on the first page.
pub fn first_page_annots(doc: &Document) -> Vec<ObjectId> {
    let pages = doc.get_pages();
    let Some(page_id) = pages.values().next() else {
        return Vec::new();
    };
    doc.get_dictionary(*page_id)
        .ok()
        .and_then(|page| page.get(b"Annots").ok())
        .and_then(|annots| annots.as_array().ok())
        .map(|arr| arr.iter().filter_map(|o| o.as_reference().ok()).collect())
        .unwrap_or_default()
}

/// Characters the fixture fonts cover unless told otherwise.
pub const TURKISH_LATIN: &str =
    " .,:/0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyzÇçĞğİıÖöŞşÜü";

fn be16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn be32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// A TrueType font without outlines: `head`, `hhea`, `maxp`, `hmtx`, a
/// format 12 `cmap` and a `name` table. Glyph 0 is `.notdef`, then one glyph
/// per character of `chars` in code point order. Space advances 250 units,
/// everything else 500, on a 1000-unit em.
pub fn truetype_font(postscript_name: &str, chars: &str) -> Vec<u8> {
    let mut chars: Vec<char> = chars.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    let num_glyphs = chars.len() as u16 + 1;

    let mut head = Vec::new();
    be32(&mut head, 0x0001_0000);
    be32(&mut head, 0x0001_0000);
    be32(&mut head, 0);
    be32(&mut head, 0x5F0F_3CF5);
    be16(&mut head, 0);
    be16(&mut head, 1000);
    head.extend_from_slice(&[0; 16]);
    for v in [0i16, -200, 1000, 800] {
        head.extend_from_slice(&v.to_be_bytes());
    }
    be16(&mut head, 0);
    be16(&mut head, 8);
    be16(&mut head, 2);
    be16(&mut head, 0);
    be16(&mut head, 0);

    let mut hhea = Vec::new();
    be32(&mut hhea, 0x0001_0000);
    for v in [800i16, -200, 0] {
        hhea.extend_from_slice(&v.to_be_bytes());
    }
    be16(&mut hhea, 500);
    for v in [0i16, 0, 500, 1, 0, 0, 0, 0, 0, 0, 0] {
        hhea.extend_from_slice(&v.to_be_bytes());
    }
    be16(&mut hhea, num_glyphs);

    let mut maxp = Vec::new();
    be32(&mut maxp, 0x0000_5000);
    be16(&mut maxp, num_glyphs);

    let mut hmtx = Vec::new();
    be16(&mut hmtx, 500);
    be16(&mut hmtx, 0);
    for c in &chars {
        be16(&mut hmtx, if *c == ' ' { 250 } else { 500 });
        be16(&mut hmtx, 0);
    }

    let mut cmap = Vec::new();
    be16(&mut cmap, 0);
    be16(&mut cmap, 1);
    be16(&mut cmap, 3);
    be16(&mut cmap, 10);
    be32(&mut cmap, 12);
    be16(&mut cmap, 12);
    be16(&mut cmap, 0);
    be32(&mut cmap, 16 + 12 * chars.len() as u32);
    be32(&mut cmap, 0);
    be32(&mut cmap, chars.len() as u32);
    for (i, c) in chars.iter().enumerate() {
        be32(&mut cmap, *c as u32);
        be32(&mut cmap, *c as u32);
        be32(&mut cmap, i as u32 + 1);
    }

    let family = postscript_name.split('-').next().unwrap_or(postscript_name);
    let names = [(1u16, family), (4, postscript_name), (6, postscript_name)];
    let mut name = Vec::new();
    let mut strings = Vec::new();
    be16(&mut name, 0);
    be16(&mut name, names.len() as u16);
    be16(&mut name, 6 + 12 * names.len() as u16);
    for (id, text) in names {
        let encoded: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
        for v in [3u16, 1, 0x0409, id, encoded.len() as u16, strings.len() as u16] {
            be16(&mut name, v);
        }
        strings.extend(encoded);
    }
    name.extend(strings);

    let tables: [(&[u8; 4], Vec<u8>); 6] = [
        (b"cmap", cmap),
        (b"head", head),
        (b"hhea", hhea),
        (b"hmtx", hmtx),
        (b"maxp", maxp),
        (b"name", name),
    ];

    let mut out = Vec::new();
    be32(&mut out, 0x0001_0000);
    be16(&mut out, tables.len() as u16);
    be16(&mut out, 64);
    be16(&mut out, 2);
    be16(&mut out, tables.len() as u16 * 16 - 64);

    let mut offset = 12 + 16 * tables.len() as u32;
    let mut body = Vec::new();
    for (tag, data) in &tables {
        out.extend_from_slice(*tag);
        be32(&mut out, 0);
        be32(&mut out, offset);
        be32(&mut out, data.len() as u32);
        body.extend_from_slice(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
        offset = 12 + 16 * tables.len() as u32 + body.len() as u32;
    }
    out.extend(body);
    out
}

#[test]
fn test_create_test_pdf() {
    let bytes = create_test_pdf();
    assert!(bytes.starts_with(b"%PDF-1.5"));
    assert!(Document::load_mem(&bytes).is_ok());
}
