//! Placeholders in the selectable text layer.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::document::PdfDocument;
use crate::geo::Rect;
use crate::layout::{group_spans_into_lines, LogicalLine};
use crate::logging::TEXT_LAYER;
use crate::model::{PlaceholderCandidate, Source};
use crate::normalize::{clean_text, find_placeholders_in_clean};
use crate::parse::page_spans;

/// Result of one pass over the text layer.
#[derive(Debug, Default)]
pub struct TextLayerScan {
    pub candidates: Vec<PlaceholderCandidate>,
    /// Whether any page showed a non-blank glyph.
    pub has_text: bool,
}

/// Logical lines of one page. A page whose content cannot be decoded
/// yields no lines.
pub fn page_lines(doc: &PdfDocument, page_index: usize, config: &DetectionConfig) -> Vec<LogicalLine> {
    match page_spans(doc, page_index) {
        Ok(spans) => group_spans_into_lines(page_index, spans, config.line_tolerance, config.max_gap_em),
        Err(e) => {
            warn!(target: TEXT_LAYER, page = page_index, error = %e, "page content unreadable, skipping");
            Vec::new()
        }
    }
}

pub fn scan(doc: &PdfDocument, config: &DetectionConfig) -> TextLayerScan {
    let mut scan = TextLayerScan::default();
    for page_index in 0..doc.page_count() {
        let lines = page_lines(doc, page_index, config);
        if lines.iter().any(|l| !l.text.trim().is_empty()) {
            scan.has_text = true;
        }
        let page_rect = doc
            .page(page_index)
            .map(|p| p.geometry.page_rect())
            .unwrap_or_default();

        let found: Vec<PlaceholderCandidate> = lines
            .par_iter()
            .flat_map_iter(|line| match_line(line, &page_rect, config.rect_padding))
            .collect();
        debug!(target: TEXT_LAYER, page = page_index, lines = lines.len(), found = found.len(), "text layer page");
        scan.candidates.extend(found);
    }
    scan
}

pub fn extract(doc: &PdfDocument, config: &DetectionConfig) -> Vec<PlaceholderCandidate> {
    scan(doc, config).candidates
}

pub fn has_text_layer(doc: &PdfDocument) -> bool {
    let config = DetectionConfig::default();
    (0..doc.page_count()).any(|page| {
        page_lines(doc, page, &config)
            .iter()
            .any(|l| !l.text.trim().is_empty())
    })
}

/// Placeholders of one logical line, each with the union of its glyph
/// boxes.
pub fn match_line(line: &LogicalLine, page_rect: &Rect, padding: f32) -> Vec<PlaceholderCandidate> {
    let cleaned = clean_text(&line.text, false);
    find_placeholders_in_clean(&cleaned)
        .into_iter()
        .filter_map(|m| {
            // clean-up maps characters one to one, so char indices line up
            let start = cleaned[..m.start].chars().count();
            let end = start + cleaned[m.start..m.end].chars().count();
            let rect = line
                .rect_for_chars(start..end)?
                .pad_x(padding)
                .clamp_to(page_rect);
            if rect.is_degenerate() {
                debug!(target: TEXT_LAYER, key = %m.key, "match box degenerate after clamping");
                return None;
            }

            let mut candidate = PlaceholderCandidate::new(&m.raw, line.page, rect, Source::TextLayer);
            if let Some(span) = line.dominant_span(&rect) {
                candidate.font_name = Some(span.font_name.clone());
                candidate.font_size = Some(span.font_size);
                candidate.font_object = span.font_object;
                candidate.color = Some(span.color);
            }
            Some(candidate)
        })
        .collect()
}
