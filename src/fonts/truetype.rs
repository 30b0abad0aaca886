use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::FontError;

/// A parsed TrueType/OpenType program with the tables needed to measure,
/// encode and embed text. Glyph lookups are precomputed so the font can be
/// shared across threads without re-parsing.
#[derive(Debug, Clone)]
pub struct TrueTypeFont {
    data: Arc<Vec<u8>>,
    pub postscript_name: String,
    pub family_name: Option<String>,
    units_per_em: f32,
    ascender: i16,
    descender: i16,
    cap_height: i16,
    bbox: [i16; 4],
    cff: bool,
    cmap: BTreeMap<char, u16>,
    advances: Vec<u16>,
}

impl TrueTypeFont {
    pub fn parse(data: Vec<u8>) -> Result<Self, FontError> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|e| FontError::Parse(e.to_string()))?;

        let name = |id: u16| {
            face.names()
                .into_iter()
                .filter(|n| n.name_id == id)
                .find_map(|n| n.to_string())
        };
        let postscript_name = name(ttf_parser::name_id::POST_SCRIPT_NAME)
            .or_else(|| name(ttf_parser::name_id::FULL_NAME))
            .unwrap_or_else(|| "EmbeddedFont".to_string());
        let family_name = name(ttf_parser::name_id::FAMILY);

        let mut cmap = BTreeMap::new();
        if let Some(table) = face.tables().cmap {
            for subtable in table.subtables.into_iter().filter(|s| s.is_unicode()) {
                subtable.codepoints(|cp| {
                    if let (Some(ch), Some(gid)) = (char::from_u32(cp), subtable.glyph_index(cp)) {
                        cmap.entry(ch).or_insert(gid.0);
                    }
                });
            }
        }

        let advances = (0..face.number_of_glyphs())
            .map(|gid| face.glyph_hor_advance(ttf_parser::GlyphId(gid)).unwrap_or(0))
            .collect();

        let bb = face.global_bounding_box();
        let units_per_em = f32::from(face.units_per_em().max(1));
        let (ascender, descender) = (face.ascender(), face.descender());
        let cap_height = face.capital_height().unwrap_or(ascender);
        let cff = face.tables().cff.is_some();

        Ok(TrueTypeFont {
            data: Arc::new(data),
            postscript_name,
            family_name,
            units_per_em,
            ascender,
            descender,
            cap_height,
            bbox: [bb.x_min, bb.y_min, bb.x_max, bb.y_max],
            cff,
            cmap,
            advances,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// CFF outlines (`OTTO`) need `/FontFile3 /OpenType` and a CIDFontType0.
    pub fn is_cff(&self) -> bool {
        self.cff
    }

    pub fn glyph_id(&self, ch: char) -> Option<u16> {
        self.cmap.get(&ch).copied()
    }

    pub fn has_glyph(&self, ch: char) -> bool {
        self.glyph_id(ch).is_some_and(|gid| gid != 0)
    }

    /// Advance of a glyph in thousandths of an em.
    pub fn advance(&self, gid: u16) -> f32 {
        let raw = self.advances.get(gid as usize).copied().unwrap_or(0);
        f32::from(raw) * 1000.0 / self.units_per_em
    }

    pub fn char_width(&self, ch: char) -> f32 {
        self.advance(self.glyph_id(ch).unwrap_or(0))
    }

    pub fn ascent(&self) -> f32 {
        f32::from(self.ascender) * 1000.0 / self.units_per_em
    }

    pub fn descent(&self) -> f32 {
        f32::from(self.descender) * 1000.0 / self.units_per_em
    }

    pub fn cap_height(&self) -> f32 {
        f32::from(self.cap_height) * 1000.0 / self.units_per_em
    }

    pub fn bbox(&self) -> [f32; 4] {
        let s = 1000.0 / self.units_per_em;
        [
            f32::from(self.bbox[0]) * s,
            f32::from(self.bbox[1]) * s,
            f32::from(self.bbox[2]) * s,
            f32::from(self.bbox[3]) * s,
        ]
    }

    pub fn coverage(&self) -> BTreeSet<u32> {
        self.cmap
            .iter()
            .filter(|(_, gid)| **gid != 0)
            .map(|(ch, _)| *ch as u32)
            .collect()
    }
}
