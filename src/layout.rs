use std::cmp::Ordering;
use std::ops::Range;

use crate::geo::Rect;
use crate::parse::TextSpan;

/// Fraction of the font size a horizontal gap must exceed before a space
/// is inserted between two spans.
const SPACE_GAP_EM: f32 = 0.15;

/// Where a character of a line's text came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharOrigin {
    pub byte_offset: usize,
    pub span: usize,
    /// Index into the span's `chars`; `None` for spaces inserted between
    /// spans.
    pub glyph: Option<usize>,
}

/// A run of spans sharing a baseline, read left to right.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub page: usize,
    pub text: String,
    pub spans: Vec<TextSpan>,
    pub offsets: Vec<CharOrigin>,
    pub bbox: Rect,
    pub baseline: f32,
}

impl LogicalLine {
    pub fn from_spans(page: usize, mut spans: Vec<TextSpan>) -> Self {
        spans.sort_by(|a, b| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(Ordering::Equal));

        let mut text = String::new();
        let mut offsets = Vec::new();
        let mut prev: Option<&TextSpan> = None;

        for (span_index, span) in spans.iter().enumerate() {
            if let Some(prev) = prev {
                let gap = span.bbox.x0 - prev.bbox.x1;
                let size = prev.font_size.max(span.font_size).max(1.0);
                let joined_by_space =
                    text.ends_with(char::is_whitespace) || span.text.starts_with(char::is_whitespace);
                if gap > SPACE_GAP_EM * size && !joined_by_space {
                    offsets.push(CharOrigin {
                        byte_offset: text.len(),
                        span: span_index,
                        glyph: None,
                    });
                    text.push(' ');
                }
            }
            for (glyph, cb) in span.chars.iter().enumerate() {
                offsets.push(CharOrigin {
                    byte_offset: text.len(),
                    span: span_index,
                    glyph: Some(glyph),
                });
                text.push(cb.ch);
            }
            prev = Some(span);
        }

        let bbox = Rect::union_all(spans.iter().map(|s| &s.bbox)).unwrap_or_default();
        let baseline = spans.first().map(|s| s.baseline).unwrap_or(bbox.y1);

        LogicalLine {
            page,
            text,
            spans,
            offsets,
            bbox,
            baseline,
        }
    }

    /// Union of the glyph boxes behind a range of character indices of
    /// `text`. Inserted spaces have no box and are skipped.
    pub fn rect_for_chars(&self, chars: Range<usize>) -> Option<Rect> {
        let rects: Vec<Rect> = self
            .offsets
            .get(chars)
            .unwrap_or_default()
            .iter()
            .filter_map(|o| self.glyph_rect(o))
            .collect();
        Rect::union_all(rects.iter())
    }

    fn glyph_rect(&self, origin: &CharOrigin) -> Option<Rect> {
        let glyph = origin.glyph?;
        self.spans.get(origin.span)?.chars.get(glyph).map(|c| c.rect)
    }

    /// The span covering most of `rect`.
    pub fn dominant_span(&self, rect: &Rect) -> Option<&TextSpan> {
        self.spans
            .iter()
            .map(|s| (s.bbox.intersection_area(rect), s))
            .filter(|(area, _)| *area > 0.0)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
            .map(|(_, s)| s)
    }

    /// Character index of a byte offset into `text`.
    pub fn char_index(&self, byte_offset: usize) -> usize {
        self.offsets.partition_point(|o| o.byte_offset < byte_offset)
    }
}

/// Groups the spans of one page into lines: spans whose baselines lie
/// within `line_tolerance` points share a line, and a line is split
/// wherever the horizontal gap exceeds `max_gap_em` times the font size.
/// Lines are returned top to bottom.
pub fn group_spans_into_lines(
    page: usize,
    spans: Vec<TextSpan>,
    line_tolerance: f32,
    max_gap_em: f32,
) -> Vec<LogicalLine> {
    let mut spans = spans;
    spans.sort_by(|a, b| {
        a.baseline
            .partial_cmp(&b.baseline)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(Ordering::Equal))
    });

    let mut rows: Vec<Vec<TextSpan>> = Vec::new();
    let mut current: Vec<TextSpan> = Vec::new();
    let mut row_baseline = f32::MIN;

    for span in spans {
        if current.is_empty() || (span.baseline - row_baseline).abs() <= line_tolerance {
            if current.is_empty() {
                row_baseline = span.baseline;
            }
            current.push(span);
        } else {
            rows.push(std::mem::take(&mut current));
            row_baseline = span.baseline;
            current.push(span);
        }
    }
    if !current.is_empty() {
        rows.push(current);
    }

    let mut lines = Vec::new();
    for mut row in rows {
        row.sort_by(|a, b| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(Ordering::Equal));

        let mut segment: Vec<TextSpan> = Vec::new();
        let mut right_edge = f32::MIN;
        for span in row {
            let size = span.font_size.max(1.0);
            if !segment.is_empty() && span.bbox.x0 - right_edge > max_gap_em * size {
                lines.push(LogicalLine::from_spans(page, std::mem::take(&mut segment)));
                right_edge = f32::MIN;
            }
            right_edge = right_edge.max(span.bbox.x1);
            segment.push(span);
        }
        if !segment.is_empty() {
            lines.push(LogicalLine::from_spans(page, segment));
        }
    }

    tracing::trace!(target: crate::logging::TEXT_LAYER, page, lines = lines.len(), "grouped lines");
    lines
}
