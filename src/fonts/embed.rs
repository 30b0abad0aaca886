//! Writes resolved fonts into a document as font resources.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::builtin::TURKISH_DIFFERENCES;
use super::resolver::{FontProgram, ResolvedFont};
use super::TrueTypeFont;

/// Adds the font dictionary (and its descendants) to `doc`. `used` are the
/// characters that will be drawn; they bound the `/W` and `/ToUnicode`
/// tables.
pub(crate) fn install_font(doc: &mut Document, font: &ResolvedFont, used: &BTreeSet<char>) -> ObjectId {
    match &font.program {
        FontProgram::TurkishHelvetica => install_turkish_helvetica(doc),
        FontProgram::TrueType(ttf) => install_type0(doc, ttf, used),
    }
}

fn install_turkish_helvetica(doc: &mut Document) -> ObjectId {
    let mut differences = Vec::with_capacity(TURKISH_DIFFERENCES.len() + 1);
    if let Some((_, first, _, _)) = TURKISH_DIFFERENCES.first() {
        differences.push(Object::Integer(i64::from(*first)));
    }
    for (_, _, glyph, _) in TURKISH_DIFFERENCES {
        differences.push(Object::Name(glyph.as_bytes().to_vec()));
    }

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => dictionary! {
            "Type" => "Encoding",
            "BaseEncoding" => "WinAnsiEncoding",
            "Differences" => differences,
        },
    })
}

fn pdf_font_name(raw: &str) -> String {
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if name.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        name
    }
}

fn install_type0(doc: &mut Document, ttf: &TrueTypeFont, used: &BTreeSet<char>) -> ObjectId {
    let base_font = pdf_font_name(&ttf.postscript_name);

    let glyphs: BTreeMap<u16, char> = used
        .iter()
        .filter_map(|&c| ttf.glyph_id(c).map(|gid| (gid, c)))
        .collect();

    let file_key = if ttf.is_cff() { "FontFile3" } else { "FontFile2" };
    let file_dict = if ttf.is_cff() {
        dictionary! { "Subtype" => "OpenType" }
    } else {
        dictionary! { "Length1" => ttf.data().len() as i64 }
    };
    let file_id = doc.add_object(Stream::new(file_dict, ttf.data().to_vec()));

    let [x0, y0, x1, y1] = ttf.bbox();
    let mut descriptor = dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(base_font.clone().into_bytes()),
        "Flags" => 32,
        "FontBBox" => vec![x0.into(), y0.into(), x1.into(), y1.into()],
        "ItalicAngle" => 0,
        "Ascent" => ttf.ascent(),
        "Descent" => ttf.descent(),
        "CapHeight" => ttf.cap_height(),
        "StemV" => 80,
    };
    descriptor.set(file_key, file_id);
    let descriptor_id = doc.add_object(descriptor);

    let mut widths = Vec::with_capacity(glyphs.len() * 2);
    for gid in glyphs.keys() {
        widths.push(Object::Integer(i64::from(*gid)));
        widths.push(Object::Array(vec![Object::Real(ttf.advance(*gid))]));
    }

    let cid_subtype = if ttf.is_cff() { "CIDFontType0" } else { "CIDFontType2" };
    let mut cid_font = dictionary! {
        "Type" => "Font",
        "Subtype" => cid_subtype,
        "BaseFont" => Object::Name(base_font.clone().into_bytes()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
        "W" => widths,
    };
    if !ttf.is_cff() {
        cid_font.set("CIDToGIDMap", "Identity");
    }
    let cid_font_id = doc.add_object(cid_font);

    let to_unicode_id = doc.add_object(Stream::new(
        dictionary! {},
        to_unicode_cmap(&glyphs).into_bytes(),
    ));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => Object::Name(base_font.into_bytes()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => to_unicode_id,
    })
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );

    let entries: Vec<(&u16, &char)> = glyphs.iter().collect();
    // at most 100 entries per bfchar block
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            cmap.push_str(&format!("<{gid:04X}> <{hex}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmap_maps_glyphs_to_utf16() {
        let glyphs: BTreeMap<u16, char> = [(3, 'ş'), (36, 'A')].into_iter().collect();
        let cmap = to_unicode_cmap(&glyphs);
        assert!(cmap.contains("2 beginbfchar"));
        assert!(cmap.contains("<0003> <015F>"));
        assert!(cmap.contains("<0024> <0041>"));
    }

    #[test]
    fn builtin_helvetica_gets_turkish_differences() {
        let mut doc = Document::with_version("1.5");
        let id = install_font(&mut doc, &ResolvedFont::builtin(), &BTreeSet::new());
        let font = doc.get_dictionary(id).unwrap();
        let encoding = font.get(b"Encoding").unwrap().as_dict().unwrap();
        let differences = encoding.get(b"Differences").unwrap().as_array().unwrap();
        assert_eq!(differences[0], Object::Integer(24));
        assert_eq!(differences[4], Object::Name(b"dotlessi".to_vec()));
    }

    #[test]
    fn font_names_are_pdf_safe() {
        assert_eq!(pdf_font_name("DejaVu Sans (Book)"), "DejaVuSansBook");
        assert_eq!(pdf_font_name("()"), "EmbeddedFont");
    }
}
