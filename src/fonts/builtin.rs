//! Standard-14 metrics for the families that show up unembedded in the wild,
//! plus the Turkish-capable Helvetica used as the last-resort fill font.

/// Helvetica advance widths for U+0020..=U+007E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :;<=>?@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [\]^_`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {|}~
];

/// Helvetica advance widths for U+00A0..=U+00FF.
const HELVETICA_LATIN1: [u16; 96] = [
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333, // A0-AF
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611, // B0-BF
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278, // C0-CF
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611, // D0-DF
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278, // E0-EF
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500, // F0-FF
];

/// Times-Roman advance widths for U+0020..=U+007E.
const TIMES_ASCII: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278, // space../
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, // 0-9
    278, 278, 564, 564, 564, 444, 921, // :;<=>?@
    722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, // A-M
    722, 722, 556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, // N-Z
    333, 278, 333, 469, 500, 333, // [\]^_`
    444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, // a-m
    500, 500, 500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, // n-z
    480, 200, 480, 541, // {|}~
];

/// Characters outside Latin-1 that WinAnsiEncoding places in 0x80..0x9F,
/// with their Helvetica widths.
const WIN_ANSI_EXTRAS: &[(char, u8, u16)] = &[
    ('€', 0x80, 556),
    ('‚', 0x82, 222),
    ('„', 0x84, 333),
    ('…', 0x85, 1000),
    ('‘', 0x91, 222),
    ('’', 0x92, 222),
    ('“', 0x93, 333),
    ('”', 0x94, 333),
    ('•', 0x95, 350),
    ('–', 0x96, 556),
    ('—', 0x97, 1000),
    ('™', 0x99, 1000),
];

/// Turkish letters missing from WinAnsiEncoding. They are remapped onto
/// the unused control codes 24..=29 through `/Differences`.
pub const TURKISH_DIFFERENCES: &[(char, u8, &str, u16)] = &[
    ('Ğ', 24, "Gbreve", 778),
    ('ğ', 25, "gbreve", 556),
    ('İ', 26, "Idotaccent", 278),
    ('ı', 27, "dotlessi", 278),
    ('Ş', 28, "Scedilla", 667),
    ('ş', 29, "scedilla", 500),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFamily {
    Helvetica,
    Courier,
    Times,
}

impl BuiltinFamily {
    /// Recognizes a standard font (or a common alias) from its sanitized
    /// base name.
    pub fn from_base_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("courier") {
            Some(BuiltinFamily::Courier)
        } else if lower.starts_with("times") {
            Some(BuiltinFamily::Times)
        } else if lower.starts_with("helvetica") || lower.starts_with("arial") {
            Some(BuiltinFamily::Helvetica)
        } else {
            None
        }
    }

    /// Ascent in thousandths of an em.
    pub fn ascent(self) -> f32 {
        match self {
            BuiltinFamily::Helvetica => 718.0,
            BuiltinFamily::Courier => 629.0,
            BuiltinFamily::Times => 683.0,
        }
    }

    pub fn descent(self) -> f32 {
        match self {
            BuiltinFamily::Helvetica => -207.0,
            BuiltinFamily::Courier => -157.0,
            BuiltinFamily::Times => -217.0,
        }
    }

    /// Advance width of a character in thousandths of an em.
    pub fn width(self, ch: char) -> Option<f32> {
        match self {
            BuiltinFamily::Courier => Some(600.0),
            BuiltinFamily::Helvetica => helvetica_width(ch).map(f32::from),
            BuiltinFamily::Times => times_width(ch).map(f32::from),
        }
    }
}

fn helvetica_width(ch: char) -> Option<u16> {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E => Some(HELVETICA_ASCII[(cp - 0x20) as usize]),
        0xA0..=0xFF => Some(HELVETICA_LATIN1[(cp - 0xA0) as usize]),
        _ => WIN_ANSI_EXTRAS
            .iter()
            .find(|(c, _, _)| *c == ch)
            .map(|(_, _, w)| *w)
            .or_else(|| {
                TURKISH_DIFFERENCES
                    .iter()
                    .find(|(c, _, _, _)| *c == ch)
                    .map(|(_, _, _, w)| *w)
            }),
    }
}

fn times_width(ch: char) -> Option<u16> {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E => Some(TIMES_ASCII[(cp - 0x20) as usize]),
        _ => match ch {
            'Ğ' | 'Ş' => Some(722),
            'ğ' => Some(500),
            'İ' => Some(333),
            'ı' => Some(278),
            'ş' => Some(389),
            _ => None,
        },
    }
}

/// Single-byte code for a character in the Turkish Helvetica encoding.
pub fn turkish_helvetica_code(ch: char) -> Option<u8> {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E | 0xA0..=0xFF => Some(cp as u8),
        _ => WIN_ANSI_EXTRAS
            .iter()
            .find(|(c, _, _)| *c == ch)
            .map(|(_, code, _)| *code)
            .or_else(|| {
                TURKISH_DIFFERENCES
                    .iter()
                    .find(|(c, _, _, _)| *c == ch)
                    .map(|(_, code, _, _)| *code)
            }),
    }
}

/// Every character the Turkish Helvetica can draw.
pub fn turkish_helvetica_coverage() -> impl Iterator<Item = char> {
    (0x20u32..=0x7E)
        .chain(0xA0..=0xFF)
        .filter_map(char::from_u32)
        .chain(WIN_ANSI_EXTRAS.iter().map(|(c, _, _)| *c))
        .chain(TURKISH_DIFFERENCES.iter().map(|(c, _, _, _)| *c))
}

pub fn turkish_helvetica_width(ch: char) -> f32 {
    helvetica_width(ch).map(f32::from).unwrap_or(556.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_spot_checks() {
        let h = BuiltinFamily::Helvetica;
        assert_eq!(h.width(' '), Some(278.0));
        assert_eq!(h.width('W'), Some(944.0));
        assert_eq!(h.width('{'), Some(334.0));
        assert_eq!(h.width('~'), Some(584.0));
        assert_eq!(h.width('ç'), Some(500.0));
        assert_eq!(h.width('ş'), Some(500.0));
        assert_eq!(h.width('Ø'), Some(778.0));
    }

    #[test]
    fn courier_is_monospaced() {
        assert_eq!(BuiltinFamily::Courier.width('i'), Some(600.0));
        assert_eq!(BuiltinFamily::Courier.width('Ğ'), Some(600.0));
    }

    #[test]
    fn family_aliases() {
        assert_eq!(BuiltinFamily::from_base_name("Arial"), Some(BuiltinFamily::Helvetica));
        assert_eq!(BuiltinFamily::from_base_name("Times-Roman"), Some(BuiltinFamily::Times));
        assert_eq!(BuiltinFamily::from_base_name("DejaVuSans"), None);
    }

    #[test]
    fn turkish_encoding_covers_alphabet() {
        for ch in "AaBbCcÇçDdEeFfGgĞğHhIıİiJjKkLlMmNnOoÖöPpRrSsŞşTtUuÜüVvYyZz".chars() {
            assert!(turkish_helvetica_code(ch).is_some(), "{ch} not encodable");
        }
        assert_eq!(turkish_helvetica_code('ı'), Some(27));
        assert_eq!(turkish_helvetica_code('€'), Some(0x80));
        assert_eq!(turkish_helvetica_code('中'), None);
    }
}
