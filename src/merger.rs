//! Runs the extractors under a provider policy and merges what they find.

use std::collections::HashMap;

use indexmap::IndexSet;
use ordered_float::OrderedFloat;
use rstar::{RTree, RTreeObject, AABB};
use tracing::{debug, info, warn};

use crate::annotations;
use crate::config::DetectionConfig;
use crate::document::PdfDocument;
use crate::forms;
use crate::geo::Rect;
use crate::logging::MERGE;
use crate::model::{DetectionResult, PlaceholderCandidate, ProviderPolicy, ProviderUsed, Source};
use crate::ocr::OcrExtractor;
use crate::text_layer;

/// Candidates on the same line sort left to right when their tops differ
/// by at most this much.
const ROW_TOLERANCE: f32 = 1.0;

/// Output of the text-layer, form and annotation extractors.
#[derive(Debug, Default)]
pub struct LocalPass {
    pub candidates: Vec<PlaceholderCandidate>,
    pub has_text: bool,
}

pub fn local_pass(doc: &PdfDocument, config: &DetectionConfig) -> LocalPass {
    let scan = text_layer::scan(doc, config);
    let mut candidates = forms::extract(doc);
    candidates.extend(scan.candidates);
    candidates.extend(annotations::extract(doc, config));
    debug!(target: MERGE, found = candidates.len(), has_text = scan.has_text, "local pass");
    LocalPass {
        candidates,
        has_text: scan.has_text,
    }
}

/// Entry in the per-page index of accepted candidates.
struct Accepted {
    aabb: AABB<[f32; 2]>,
    index: usize,
}

impl RTreeObject for Accepted {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn envelope(rect: &Rect) -> AABB<[f32; 2]> {
    AABB::from_corners([rect.x0, rect.y0], [rect.x1, rect.y1])
}

fn is_duplicate(kept: &PlaceholderCandidate, new: &PlaceholderCandidate, config: &DetectionConfig) -> bool {
    if kept.key_norm == new.key_norm && kept.rect.iou(&new.rect) > config.iou_threshold {
        return true;
    }
    let either_ocr = kept.source == Source::Ocr || new.source == Source::Ocr;
    either_ocr && kept.rect.overlap_ratio(&new.rect) >= config.overlap_threshold
}

/// Collapses candidates describing the same placeholder. Higher
/// confidence wins; ties go to the earlier one in reading order. The
/// losers are kept on the winner as [`MergedMark`](crate::model::MergedMark)s.
pub fn dedup(mut candidates: Vec<PlaceholderCandidate>, config: &DetectionConfig) -> Vec<PlaceholderCandidate> {
    candidates.sort_by_key(|c| {
        (
            std::cmp::Reverse(c.confidence),
            c.page,
            OrderedFloat(c.rect.y0),
            OrderedFloat(c.rect.x0),
        )
    });

    let mut kept: Vec<PlaceholderCandidate> = Vec::new();
    let mut trees: HashMap<usize, RTree<Accepted>> = HashMap::new();

    for candidate in candidates {
        let tree = trees.entry(candidate.page).or_default();
        let duplicate_of = tree
            .locate_in_envelope_intersecting(&envelope(&candidate.rect))
            .map(|a| a.index)
            .find(|&i| is_duplicate(&kept[i], &candidate, config));

        if let Some(i) = duplicate_of {
            debug!(
                target: MERGE,
                page = candidate.page,
                dropped = %candidate.key_norm,
                dropped_source = %candidate.source,
                kept = %kept[i].key_norm,
                kept_source = %kept[i].source,
                "duplicate placeholder"
            );
            let mark = candidate.mark();
            let survivor = &mut kept[i];
            survivor.merged.push(mark);
            survivor.merged.extend(candidate.merged);
            continue;
        }
        tree.insert(Accepted {
            aabb: envelope(&candidate.rect),
            index: kept.len(),
        });
        kept.push(candidate);
    }
    kept
}

/// Page, then top to bottom, then left to right.
pub fn reading_order(candidates: &mut [PlaceholderCandidate]) {
    candidates.sort_by_key(|c| (c.page, OrderedFloat(c.rect.y0), OrderedFloat(c.rect.x0)));

    let mut rows = Vec::with_capacity(candidates.len());
    let mut row = 0usize;
    let mut anchor: Option<(usize, f32)> = None;
    for c in candidates.iter() {
        match anchor {
            Some((page, y)) if page == c.page && c.rect.y0 - y <= ROW_TOLERANCE => {}
            Some(_) => {
                row += 1;
                anchor = Some((c.page, c.rect.y0));
            }
            None => anchor = Some((c.page, c.rect.y0)),
        }
        rows.push(row);
    }

    let mut keyed: Vec<(usize, PlaceholderCandidate)> = rows.into_iter().zip(candidates.iter().cloned()).collect();
    keyed.sort_by_key(|(row, c)| (*row, OrderedFloat(c.rect.x0)));
    for (slot, (_, c)) in candidates.iter_mut().zip(keyed) {
        *slot = c;
    }
}

fn unique_keys(candidates: &[PlaceholderCandidate]) -> IndexSet<String> {
    candidates.iter().map(|c| c.key_norm.clone()).collect()
}

fn ocr_warning(reason: &str) -> String {
    format!("OCR unavailable ({reason}); local-only results")
}

fn failed_pages_warning(pages: &[usize]) -> String {
    let list = pages.iter().map(|p| (p + 1).to_string()).collect::<Vec<_>>().join(", ");
    if pages.len() == 1 {
        format!("OCR failed on page {list}")
    } else {
        format!("OCR failed on pages {list}")
    }
}

/// `detect` for one document.
pub fn detect(
    doc: &PdfDocument,
    policy: ProviderPolicy,
    config: &DetectionConfig,
    ocr: Option<&OcrExtractor>,
) -> DetectionResult {
    let run_ocr = || match ocr {
        Some(extractor) => extractor.extract(doc).map_err(|e| e.to_string()),
        None => Err("no OCR engine configured".to_string()),
    };

    let mut warning = None;
    let (local, ocr_pass) = match policy {
        ProviderPolicy::Local => (local_pass(doc, config), None),
        ProviderPolicy::Ocr => match run_ocr() {
            Ok(found) => (LocalPass::default(), Some(found)),
            Err(reason) => {
                warn!(target: MERGE, %reason, "ocr provider failed, falling back to local");
                warning = Some(ocr_warning(&reason));
                (local_pass(doc, config), None)
            }
        },
        ProviderPolicy::Auto => {
            let local = local_pass(doc, config);
            let keys = unique_keys(&local.candidates).len();
            if keys < config.auto_ocr_min_keys {
                info!(target: MERGE, keys, has_text = local.has_text, "few local keys, running ocr");
                match run_ocr() {
                    Ok(found) => (local, Some(found)),
                    Err(reason) => {
                        warn!(target: MERGE, %reason, "ocr unavailable");
                        warning = Some(ocr_warning(&reason));
                        (local, None)
                    }
                }
            } else {
                (local, None)
            }
        }
    };

    let local_count = local.candidates.len();
    let ocr_ran = ocr_pass.is_some();
    let mut all = local.candidates;
    if let Some(pass) = ocr_pass {
        if !pass.failed_pages.is_empty() {
            warning = Some(failed_pages_warning(&pass.failed_pages));
        }
        all.extend(pass.candidates);
    }

    let mut candidates = dedup(all, config);
    reading_order(&mut candidates);

    let ocr_contributed = candidates.iter().any(|c| c.source == Source::Ocr);
    let provider_used = match (ocr_contributed, local_count > 0) {
        (true, true) => ProviderUsed::LocalAndOcr,
        (true, false) => ProviderUsed::Ocr,
        (false, _) if ocr_ran && policy == ProviderPolicy::Ocr => ProviderUsed::Ocr,
        (false, _) => ProviderUsed::Local,
    };

    let unique_keys = unique_keys(&candidates);
    info!(
        target: MERGE,
        candidates = candidates.len(),
        keys = unique_keys.len(),
        provider = %provider_used,
        "detection done"
    );
    DetectionResult {
        candidates,
        unique_keys,
        provider_used,
        warning,
        has_text_layer: local.has_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cand(key: &str, source: Source, rect: Rect) -> PlaceholderCandidate {
        PlaceholderCandidate::new(key, 0, rect, source)
    }

    #[test]
    fn form_beats_text_layer() {
        let text = cand("{{ad_soyad}}", Source::TextLayer, Rect::new(100.0, 200.0, 300.0, 220.0));
        let form = cand("ad_soyad", Source::Form, Rect::new(98.0, 198.0, 302.0, 222.0));
        let merged = dedup(vec![text.clone(), form], &DetectionConfig::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, Source::Form);
        assert_eq!(merged[0].merged, vec![text.mark()]);
    }

    #[test]
    fn same_key_far_apart_is_kept_twice() {
        let a = cand("{{x}}", Source::TextLayer, Rect::new(10.0, 10.0, 40.0, 20.0));
        let b = cand("{{x}}", Source::TextLayer, Rect::new(10.0, 100.0, 40.0, 110.0));
        assert_eq!(dedup(vec![a, b], &DetectionConfig::default()).len(), 2);
    }

    #[test]
    fn misread_ocr_key_is_absorbed() {
        let text = cand("{{tarih}}", Source::TextLayer, Rect::new(10.0, 10.0, 60.0, 20.0));
        let ocr = cand("{{tanh}}", Source::Ocr, Rect::new(11.0, 10.5, 58.0, 19.5));
        let merged = dedup(vec![ocr, text], &DetectionConfig::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].key_norm, "tarih");
    }

    #[test]
    fn different_keys_from_local_sources_both_survive() {
        let a = cand("{{a}}", Source::TextLayer, Rect::new(10.0, 10.0, 60.0, 20.0));
        let b = cand("b", Source::Form, Rect::new(10.0, 10.0, 60.0, 20.0));
        assert_eq!(dedup(vec![a, b], &DetectionConfig::default()).len(), 2);
    }

    #[test]
    fn failed_pages_are_one_based() {
        assert_eq!(failed_pages_warning(&[1]), "OCR failed on page 2");
        assert_eq!(failed_pages_warning(&[1, 4]), "OCR failed on pages 2, 5");
    }

    #[test]
    fn rows_read_left_to_right() {
        let mut list = vec![
            cand("{{c}}", Source::TextLayer, Rect::new(10.0, 50.0, 20.0, 60.0)),
            cand("{{b}}", Source::TextLayer, Rect::new(200.0, 10.0, 220.0, 20.0)),
            cand("{{a}}", Source::TextLayer, Rect::new(10.0, 10.6, 20.0, 20.0)),
        ];
        reading_order(&mut list);
        let keys: Vec<&str> = list.iter().map(|c| c.key_norm.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
