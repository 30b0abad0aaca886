//! Key normalization and the placeholder pattern.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// `{{key}}`, tolerating whitespace between and inside the braces
/// (`{ { key } }` is how OCR tends to read it). The body may not contain
/// braces, so `{{a {{b}}` resolves to `{{b}}`.
pub static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*\{\s*([^{}]+?)\s*\}\s*\}").expect("placeholder regex is valid")
});

fn brace_variant(c: char) -> Option<char> {
    match c {
        '\u{FF5B}' | '\u{FE5B}' | '\u{2774}' | '\u{FE37}' => Some('{'),
        '\u{FF5D}' | '\u{FE5C}' | '\u{2775}' | '\u{FE38}' => Some('}'),
        _ => None,
    }
}

/// Brackets OCR confuses with braces.
fn bracket_variant(c: char) -> Option<char> {
    match c {
        '(' | '[' | '\u{FF08}' | '\u{FF3B}' => Some('{'),
        ')' | ']' | '\u{FF09}' | '\u{FF3D}' => Some('}'),
        _ => None,
    }
}

/// Unicode `Cf` characters that show up in PDF text plus NBSP.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}'
            | '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}

/// One-to-one character clean-up used before matching: invisibles become
/// spaces and brace look-alikes become ASCII braces. Never changes the
/// number of characters, so offsets into the input stay valid.
pub fn clean_char(c: char, ocr: bool) -> char {
    if is_invisible(c) {
        return ' ';
    }
    if let Some(b) = brace_variant(c) {
        return b;
    }
    if ocr {
        if let Some(b) = bracket_variant(c) {
            return b;
        }
    }
    c
}

pub fn clean_text(s: &str, ocr: bool) -> String {
    s.chars().map(|c| clean_char(c, ocr)).collect()
}

fn turkish_fold(c: char, out: &mut String) {
    match c {
        'İ' | 'I' | 'ı' => out.push('i'),
        _ => out.extend(c.to_lowercase()),
    }
}

/// Canonical comparison key for a raw placeholder string.
///
/// Strips surrounding braces, collapses whitespace, and lower-cases with
/// Turkish rules (dotted and dotless I both fold to `i`; `Ğ Ü Ş Ö Ç` keep
/// their diacritics). Total and idempotent.
pub fn normalize_key(raw: &str) -> String {
    let cleaned: String = raw.nfc().map(|c| clean_char(c, false)).collect();

    let mut s = cleaned.trim();
    loop {
        let stripped = s
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim();
        if stripped.len() == s.len() {
            break;
        }
        s = stripped;
    }

    let mut folded = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !folded.is_empty() {
            folded.push(' ');
        }
        for c in word.chars() {
            turkish_fold(c, &mut folded);
        }
    }

    // Folding can leave decomposed sequences behind; recompose.
    folded.nfc().collect()
}

/// A placeholder found inside a string.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderMatch {
    /// The full token as written, braces included.
    pub raw: String,
    /// The inner key, surrounding whitespace trimmed.
    pub key: String,
    /// Byte range of the full token in the searched string.
    pub start: usize,
    pub end: usize,
}

/// All placeholders in `text`, after clean-up. Byte offsets refer to the
/// cleaned string, which has the same characters as `text`.
pub fn find_placeholders(text: &str, ocr: bool) -> Vec<PlaceholderMatch> {
    let cleaned = clean_text(text, ocr);
    find_placeholders_in_clean(&cleaned)
}

pub(crate) fn find_placeholders_in_clean(cleaned: &str) -> Vec<PlaceholderMatch> {
    PLACEHOLDER_RE
        .captures_iter(cleaned)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?;
            let key = key.as_str().trim();
            if key.is_empty() {
                return None;
            }
            Some(PlaceholderMatch {
                raw: whole.as_str().to_string(),
                key: key.to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(normalize_key("  Ad_Soyad "), normalize_key("ad_soyad"));
        assert_eq!(normalize_key("{{ Ad   Soyad }}"), "ad soyad");
    }

    #[test]
    fn turkish_i_variants_fold_together() {
        assert_eq!(normalize_key("İMZA"), "imza");
        assert_eq!(normalize_key("IMZA"), "imza");
        assert_eq!(normalize_key("ımza"), "imza");
    }

    #[test]
    fn turkish_letters_keep_diacritics() {
        assert_eq!(normalize_key("ĞÜŞÖÇ"), "ğüşöç");
        assert_eq!(normalize_key("Doğum_Tarihi"), "doğum_tarihi");
    }

    #[test]
    fn brace_lookalikes_and_invisibles() {
        assert_eq!(normalize_key("\u{FF5B}\u{FF5B}tarih\u{FF5D}\u{FF5D}"), "tarih");
        assert_eq!(normalize_key("ad\u{200B}soyad"), "ad soyad");
        assert_eq!(normalize_key("ad\u{00A0}\u{00A0}soyad"), "ad soyad");
    }

    #[test]
    fn nested_delimiters_are_stripped() {
        assert_eq!(normalize_key("{ { {key} } }"), "key");
        assert_eq!(normalize_key("{{}}"), "");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn decomposed_input_is_composed() {
        // "Ş" as S + combining cedilla
        assert_eq!(normalize_key("S\u{0327}ehir"), "şehir");
    }

    #[test]
    fn finds_tight_and_spaced_placeholders() {
        let found = find_placeholders("Sayın {{ad_soyad}}, tarih: { { tarih } }", false);
        let keys: Vec<_> = found.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["ad_soyad", "tarih"]);
        assert_eq!(found[0].raw, "{{ad_soyad}}");
    }

    #[test]
    fn innermost_open_brace_wins() {
        let found = find_placeholders("{{a {{b}}", false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "b");
        assert_eq!(found[0].start, 4);
    }

    #[test]
    fn brackets_only_count_for_ocr() {
        assert!(find_placeholders("((tarih))", false).is_empty());
        assert_eq!(find_placeholders("((tarih))", true)[0].key, "tarih");
    }

    #[test]
    fn clean_text_preserves_char_count() {
        let s = "a\u{200B}\u{FF5B}b";
        assert_eq!(clean_text(s, true).chars().count(), s.chars().count());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize_key(&s);
            prop_assert_eq!(normalize_key(&once), once.clone());
        }

        #[test]
        fn normalization_of_turkish_text_is_idempotent(s in "[ \\{\\}İIıĞğÜüŞşÖöÇça-zA-Z_0-9\u{200B}\u{00A0}]{0,30}") {
            let once = normalize_key(&s);
            prop_assert_eq!(normalize_key(&once), once);
        }
    }
}
