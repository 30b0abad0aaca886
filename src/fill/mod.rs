//! Fill compositor: sizes, places and draws replacement text over detected
//! placeholders, erasing the originals first.

pub mod draw;
pub mod redact;
pub mod sizing;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use lopdf::ObjectId;
use tracing::{debug, info, warn};

use crate::config::FillConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::fonts::embed::install_font;
use crate::fonts::{FontResolver, ResolvedFont};
use crate::geo::Rect;
use crate::logging::FILL;
use crate::model::{
    DetectionResult, EraseMode, FillDiagnostics, FillFieldSpec, FillOutcome, FillReport, FillStatus, MergedMark,
    Placement, PlaceholderCandidate, SizeMode, Source,
};
use crate::normalize::normalize_key;

use self::draw::{append_page_drawing, PageDrawing, TextDraw};
use self::redact::{erase_annotations, redact_page_content};
use self::sizing::{fit_font_size, fixed_size, place, SizeBounds};

/// Everything to erase on one page.
#[derive(Debug, Default)]
struct PageErasure {
    text: Vec<Rect>,
    /// Widgets and markups, with the keys filled from each.
    annotations: HashMap<ObjectId, HashSet<String>>,
    covers: Vec<Rect>,
}

impl PageErasure {
    fn add(&mut self, mark: &MergedMark, key_norm: &str) {
        match mark.source {
            Source::TextLayer => self.text.push(mark.rect),
            Source::Form | Source::Annotation => match mark.object_id {
                Some(id) => {
                    self.annotations.entry(id).or_default().insert(key_norm.to_string());
                }
                None => self.covers.push(mark.rect),
            },
            Source::Ocr => self.covers.push(mark.rect),
        }
    }
}

/// Text waiting for its font to be installed.
#[derive(Debug)]
struct PendingText {
    page: usize,
    font_key: String,
    text: String,
    size: f32,
    color: [f32; 3],
    origin: (f32, f32),
}

#[derive(Default)]
struct Plan {
    erasures: BTreeMap<usize, PageErasure>,
    texts: Vec<PendingText>,
    /// Fonts by cache key, in first-use order, with the characters drawn.
    fonts: IndexMap<String, (ResolvedFont, BTreeSet<char>)>,
}

impl Plan {
    /// Erases the candidate and every duplicate merged into it. OCR
    /// duplicates read the same ink as a local mark, so they add nothing.
    fn erase(&mut self, candidate: &PlaceholderCandidate) {
        let page = self.erasures.entry(candidate.page).or_default();
        page.add(&candidate.mark(), &candidate.key_norm);
        for merged in candidate.merged.iter().filter(|m| m.source != Source::Ocr) {
            page.add(merged, &candidate.key_norm);
        }
    }
}

fn dedup_specs<'s>(specs: &'s [FillFieldSpec], diagnostics: &mut FillDiagnostics) -> IndexMap<String, &'s FillFieldSpec> {
    let mut by_key: IndexMap<String, &FillFieldSpec> = IndexMap::new();
    for spec in specs {
        let key = normalize_key(&spec.key_norm);
        if by_key.contains_key(&key) {
            warn!(target: FILL, %key, "duplicate fill spec ignored");
            diagnostics.warnings.push(format!("duplicate fill spec for '{key}' ignored"));
            continue;
        }
        by_key.insert(key, spec);
    }
    by_key
}

/// Fills `doc` and serializes the result. Per-key problems end up in the
/// outcomes and diagnostics; only an unusable default font or a
/// serialization failure is an error.
pub fn fill(
    mut doc: PdfDocument,
    detection: &DetectionResult,
    specs: &[FillFieldSpec],
    resolver: &FontResolver,
    config: &FillConfig,
) -> Result<FillReport> {
    let mut diagnostics = FillDiagnostics::default();
    let mut outcomes = Vec::new();
    let mut plan = Plan::default();

    for (key, spec) in dedup_specs(specs, &mut diagnostics) {
        let targets: Vec<_> = detection.candidates_for(&key).collect();
        if targets.is_empty() {
            debug!(target: FILL, %key, "key not detected");
            diagnostics.missing_keys.insert(key.clone());
            outcomes.push(FillOutcome {
                key_norm: key,
                status: FillStatus::Skipped,
                placements: Vec::new(),
                font: None,
            });
            continue;
        }

        let source_font = targets.iter().find_map(|c| c.font_object);
        let choice = resolver.choose(&doc, &spec.font, source_font, &key, &spec.value)?;
        if let Some(fallback) = choice.fallback {
            diagnostics.warnings.push(format!("font fallback for '{key}': {}", fallback.reason));
            diagnostics.font_fallbacks.push(fallback);
        }
        if !choice.uncovered.is_empty() {
            let chars: String = choice.uncovered.iter().collect();
            warn!(target: FILL, %key, %chars, "glyph coverage gap");
            diagnostics
                .warnings
                .push(format!("glyph coverage gap for '{key}': {} cannot draw {chars}", choice.font.display_name));
        }
        let font = choice.font;
        let font_key = font.cache_key();

        let mut placements = Vec::new();
        let mut overflow = false;
        for candidate in &targets {
            if spec.erase_mode == EraseMode::Redact {
                plan.erase(candidate);
            }
            let inner = candidate.rect.inset(config.inset);
            if inner.is_degenerate() {
                debug!(target: FILL, %key, rect = %candidate.rect, "target too small after inset");
                continue;
            }

            let fit = match spec.size_mode {
                SizeMode::Auto => fit_font_size(
                    &font,
                    &spec.value,
                    &inner,
                    &SizeBounds {
                        min: spec.min_font_size,
                        max: spec.max_font_size,
                        source: candidate.font_size,
                        source_factor: config.source_size_factor,
                        width_tolerance: config.width_tolerance,
                    },
                ),
                SizeMode::Fixed => fixed_size(
                    &font,
                    &spec.value,
                    &inner,
                    spec.fixed_font_size.unwrap_or(spec.max_font_size),
                    config.width_tolerance,
                ),
            };
            let origin = place(&font, &fit, &inner, spec.align);
            overflow |= fit.overflow;

            if !spec.value.is_empty() {
                plan.fonts
                    .entry(font_key.clone())
                    .or_insert_with(|| (font.clone(), BTreeSet::new()))
                    .1
                    .extend(spec.value.chars());
                plan.texts.push(PendingText {
                    page: candidate.page,
                    font_key: font_key.clone(),
                    text: spec.value.clone(),
                    size: fit.size,
                    color: spec.text_color.or(candidate.color).unwrap_or([0.0, 0.0, 0.0]),
                    origin,
                });
            }
            placements.push(Placement {
                page: candidate.page,
                rect: candidate.rect,
                font_size: fit.size,
                origin,
                text_width: fit.width,
                overflow: fit.overflow,
            });
        }

        let status = if placements.is_empty() {
            FillStatus::Failed {
                reason: "every target rectangle is degenerate after the inset".to_string(),
            }
        } else {
            FillStatus::Rendered
        };
        if overflow {
            diagnostics.overflowed_keys.push(key.clone());
            diagnostics
                .warnings
                .push(format!("'{key}' overflows its box at the minimum font size"));
        }
        debug!(target: FILL, %key, targets = targets.len(), placed = placements.len(), font = %font.display_name, "fill planned");
        outcomes.push(FillOutcome {
            key_norm: key,
            status,
            placements,
            font: Some(font.display_name.clone()),
        });
    }

    apply(&mut doc, plan, config, &mut diagnostics)?;
    let bytes = doc.to_bytes()?;

    info!(
        target: FILL,
        rendered = outcomes.iter().filter(|o| o.status == FillStatus::Rendered).count(),
        missing = diagnostics.missing_keys.len(),
        bytes = bytes.len(),
        "fill done"
    );
    Ok(FillReport {
        bytes,
        outcomes,
        diagnostics,
    })
}

fn apply(doc: &mut PdfDocument, plan: Plan, config: &FillConfig, diagnostics: &mut FillDiagnostics) -> Result<()> {
    let pages = doc.pages().to_vec();
    let Plan {
        erasures,
        texts,
        fonts,
    } = plan;

    let mut drawings: BTreeMap<usize, PageDrawing> = BTreeMap::new();
    for (page_index, erasure) in erasures {
        let Some(page) = pages.get(page_index) else { continue };
        let lopdf = doc.lopdf_mut();
        if let Err(e) = redact_page_content(lopdf, page.id, page.geometry, &erasure.text) {
            warn!(target: FILL, page = page_index, error = %e, "page content could not be redacted");
            diagnostics
                .warnings
                .push(format!("page {} could not be redacted: {e}", page_index + 1));
            drawings.entry(page_index).or_default().covers.extend(erasure.text.iter().copied());
        }
        let annotations = erase_annotations(lopdf, page.id, &erasure.annotations);
        if !annotations.unfilled.is_empty() {
            let keys = annotations.unfilled.join(", ");
            warn!(target: FILL, page = page_index, %keys, "annotation keeps unfilled placeholders");
            diagnostics
                .warnings
                .push(format!("annotation on page {} still holds unfilled {keys}", page_index + 1));
        }
        drawings.entry(page_index).or_default().covers.extend(erasure.covers);
    }

    let mut installed: HashMap<String, ObjectId> = HashMap::new();
    for (key, (font, used)) in &fonts {
        let id = install_font(doc.lopdf_mut(), font, used);
        installed.insert(key.clone(), id);
        diagnostics.font_used.push(font.display_name.clone());
    }
    diagnostics.font_embedded = !fonts.is_empty() && fonts.values().all(|(f, _)| f.is_embedded());

    for pending in texts {
        let (Some(&font_id), Some((font, _))) = (installed.get(&pending.font_key), fonts.get(&pending.font_key)) else {
            continue;
        };
        drawings.entry(pending.page).or_default().texts.push(TextDraw {
            font: font_id,
            bytes: font.encode(&pending.text),
            size: pending.size,
            color: pending.color,
            origin: pending.origin,
        });
    }

    for (page_index, drawing) in &drawings {
        let Some(page) = pages.get(*page_index) else { continue };
        append_page_drawing(doc.lopdf_mut(), page.id, page.geometry, drawing, config.redact_fill)
            .map_err(Error::Serialize)?;
    }
    Ok(())
}
