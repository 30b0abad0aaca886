//! Rebuilds placeholders that OCR split over several words.

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::trace;

use super::{LineKey, OcrWord};
use crate::geo::Rect;
use crate::logging::OCR;
use crate::model::{PlaceholderCandidate, Source};
use crate::normalize::{clean_text, find_placeholders_in_clean};

/// A stretch of the accumulation taken from one word: the characters of
/// `word.text` from `skip` on.
struct Piece {
    word: usize,
    skip: usize,
    /// Char range inside the accumulation.
    chars: Range<usize>,
}

struct Accumulator<'w> {
    words: &'w [&'w OcrWord],
    text: String,
    pieces: Vec<Piece>,
}

impl<'w> Accumulator<'w> {
    fn new(words: &'w [&'w OcrWord]) -> Self {
        Accumulator {
            words,
            text: String::new(),
            pieces: Vec::new(),
        }
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn push(&mut self, word: usize, skip: usize) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        let start = self.char_len();
        self.text.extend(self.words[word].text.chars().skip(skip));
        let end = self.char_len();
        self.pieces.push(Piece {
            word,
            skip,
            chars: start..end,
        });
    }

    fn clear(&mut self) {
        self.text.clear();
        self.pieces.clear();
    }

    /// Union of the word boxes behind a char range, with words the range
    /// only partly covers trimmed in proportion to their characters.
    fn rect_for(&self, range: &Range<usize>) -> Option<Rect> {
        let rects: Vec<Rect> = self
            .pieces
            .iter()
            .filter_map(|piece| {
                let start = range.start.max(piece.chars.start);
                let end = range.end.min(piece.chars.end);
                if start >= end {
                    return None;
                }
                let word = self.words[piece.word];
                let total = word.text.chars().count().max(1) as f32;
                let a = (start - piece.chars.start + piece.skip) as f32;
                let b = (end - piece.chars.start + piece.skip) as f32;
                let w = word.rect.width();
                Some(Rect {
                    x0: word.rect.x0 + w * a / total,
                    x1: word.rect.x0 + w * b / total,
                    ..word.rect
                })
            })
            .collect();
        Rect::union_all(rects.iter())
    }

    /// Keeps only what follows char `end`, which lies in the last piece.
    fn restart_after(&mut self, end: usize) {
        let Some(last) = self.pieces.last() else {
            self.clear();
            return;
        };
        let (word, skip) = if end >= last.chars.start {
            (last.word, last.skip + (end - last.chars.start))
        } else {
            (last.word, last.skip)
        };
        self.clear();
        if skip < self.words[word].text.chars().count() {
            self.push(word, skip);
        }
    }
}

/// Placeholders from page-space OCR words. Words are grouped by their
/// tesseract line and read left to right; the running text is searched
/// after every word.
pub fn reconstruct(words: &[OcrWord], page: usize, page_rect: &Rect) -> Vec<PlaceholderCandidate> {
    let mut lines: BTreeMap<LineKey, Vec<&OcrWord>> = BTreeMap::new();
    for word in words {
        lines.entry(word.line).or_default().push(word);
    }

    let mut out = Vec::new();
    for line_words in lines.values_mut() {
        line_words.sort_by(|a, b| a.rect.x0.partial_cmp(&b.rect.x0).unwrap_or(std::cmp::Ordering::Equal));
        let mut acc = Accumulator::new(line_words);

        for index in 0..line_words.len() {
            acc.push(index, 0);
            let cleaned = clean_text(&acc.text, true);
            let matches = find_placeholders_in_clean(&cleaned);

            if let Some(last) = matches.last() {
                for m in &matches {
                    let start = cleaned[..m.start].chars().count();
                    let end = start + cleaned[m.start..m.end].chars().count();
                    let Some(rect) = acc.rect_for(&(start..end)) else {
                        continue;
                    };
                    let rect = rect.clamp_to(page_rect);
                    if rect.is_degenerate() {
                        continue;
                    }
                    trace!(target: OCR, page, raw = %m.raw, "ocr placeholder");
                    out.push(PlaceholderCandidate::new(&m.raw, page, rect, Source::Ocr));
                }
                let end = cleaned[..last.end].chars().count();
                acc.restart_after(end);
            }

            if !clean_text(&acc.text, true).contains('{') {
                acc.clear();
            }
        }
    }
    out
}
