//! Font size search and anchor placement inside a placeholder box.

use crate::fonts::ResolvedFont;
use crate::geo::Rect;
use crate::model::{Alignment, HAlign, VAlign};

const SEARCH_STEPS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit {
    pub size: f32,
    pub width: f32,
    /// The text does not fit even at the minimum size.
    pub overflow: bool,
}

/// Bounds for the auto-size search.
#[derive(Debug, Clone, Copy)]
pub struct SizeBounds {
    pub min: f32,
    pub max: f32,
    /// Size of the text being replaced, when known.
    pub source: Option<f32>,
    pub source_factor: f32,
    pub width_tolerance: f32,
}

impl SizeBounds {
    /// `min` and the effective upper bound, never inverted.
    fn range(&self) -> (f32, f32) {
        let min = self.min.max(0.1);
        let mut max = self.max.max(min);
        if let Some(source) = self.source.filter(|s| *s > 0.0) {
            max = max.min((source * self.source_factor).max(min));
        }
        (min, max)
    }
}

fn fits(font: &ResolvedFont, text: &str, inner: &Rect, size: f32, tolerance: f32) -> bool {
    let line_height = (font.ascent() - font.descent()) * size;
    font.text_width(text, size) <= inner.width() + tolerance && line_height <= inner.height()
}

/// Largest size in the bounds at which `text` fits `inner`. Falls back to
/// the minimum, flagged as overflow, when nothing fits.
pub fn fit_font_size(font: &ResolvedFont, text: &str, inner: &Rect, bounds: &SizeBounds) -> Fit {
    let (min, max) = bounds.range();
    let tol = bounds.width_tolerance;
    let fit = |size: f32, overflow: bool| Fit {
        size,
        width: font.text_width(text, size),
        overflow,
    };

    if fits(font, text, inner, max, tol) {
        return fit(max, false);
    }
    if !fits(font, text, inner, min, tol) {
        return fit(min, true);
    }

    let (mut lo, mut hi) = (min, max);
    for _ in 0..SEARCH_STEPS {
        let mid = (lo + hi) / 2.0;
        if fits(font, text, inner, mid, tol) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    fit(lo, false)
}

/// Size used unconditionally in fixed mode; overflow is still reported.
pub fn fixed_size(font: &ResolvedFont, text: &str, inner: &Rect, size: f32, tolerance: f32) -> Fit {
    let size = size.max(0.1);
    Fit {
        size,
        width: font.text_width(text, size),
        overflow: !fits(font, text, inner, size, tolerance),
    }
}

/// Baseline start point, in page space, for text of `width` at `size`.
pub fn place(font: &ResolvedFont, fit: &Fit, inner: &Rect, align: Alignment) -> (f32, f32) {
    let x = match align.horizontal {
        HAlign::Start => inner.x0,
        HAlign::Center => inner.x0 + (inner.width() - fit.width) / 2.0,
        HAlign::End => inner.x1 - fit.width,
    };
    let ascent = font.ascent() * fit.size;
    let descent = font.descent() * fit.size;
    let y = match align.vertical {
        VAlign::Top => inner.y0 + ascent,
        VAlign::Middle => inner.y0 + (inner.height() - (ascent - descent)) / 2.0 + ascent,
        VAlign::Baseline => inner.y1 + descent,
    };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds(min: f32, max: f32) -> SizeBounds {
        SizeBounds {
            min,
            max,
            source: None,
            source_factor: 1.05,
            width_tolerance: 0.5,
        }
    }

    #[test]
    fn short_text_gets_max_size() {
        let font = ResolvedFont::builtin();
        let inner = Rect::new(100.0, 200.0, 300.0, 230.0);
        let fit = fit_font_size(&font, "Ali", &inner, &bounds(6.0, 14.0));
        assert_eq!(fit.size, 14.0);
        assert!(!fit.overflow);
    }

    #[test]
    fn source_size_caps_growth() {
        let font = ResolvedFont::builtin();
        let inner = Rect::new(100.0, 200.0, 300.0, 230.0);
        let mut b = bounds(6.0, 14.0);
        b.source = Some(10.0);
        let fit = fit_font_size(&font, "Ali", &inner, &b);
        assert!((fit.size - 10.5).abs() < 1e-4);
    }

    #[test]
    fn long_text_shrinks_to_width() {
        let font = ResolvedFont::builtin();
        let inner = Rect::new(100.5, 200.5, 299.5, 219.5);
        let text = "Ayşe Yılmaz Karadeniz Ereğli Belediyesi";
        let fit = fit_font_size(&font, text, &inner, &bounds(6.0, 14.0));
        assert!(fit.size < 14.0 && fit.size >= 6.0);
        assert!(fit.width <= inner.width() + 0.5);
    }

    #[test]
    fn impossible_text_overflows_at_min() {
        let font = ResolvedFont::builtin();
        let inner = Rect::new(0.0, 0.0, 10.0, 20.0);
        let fit = fit_font_size(&font, "much too long for the box", &inner, &bounds(6.0, 14.0));
        assert_eq!(fit.size, 6.0);
        assert!(fit.overflow);
    }

    #[test]
    fn vertical_anchors() {
        let font = ResolvedFont::builtin();
        let inner = Rect::new(0.0, 0.0, 100.0, 20.0);
        let fit = Fit {
            size: 10.0,
            width: 40.0,
            overflow: false,
        };
        let at = |h, v| {
            place(
                &font,
                &fit,
                &inner,
                Alignment {
                    horizontal: h,
                    vertical: v,
                },
            )
        };
        let (x, y) = at(HAlign::Start, VAlign::Top);
        assert_eq!(x, 0.0);
        assert!((y - 7.18).abs() < 1e-4);
        let (x, y) = at(HAlign::End, VAlign::Baseline);
        assert_eq!(x, 60.0);
        assert!((y - (20.0 - 2.07)).abs() < 1e-4);
        let (x, y) = at(HAlign::Center, VAlign::Middle);
        assert_eq!(x, 30.0);
        assert!((y - ((20.0 - 9.25) / 2.0 + 7.18)).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn size_stays_in_bounds(
            text in "[a-zA-ZğüşöçİıĞÜŞÖÇ ]{0,40}",
            w in 1.0f32..400.0,
            h in 1.0f32..60.0,
            min in 1.0f32..10.0,
            span in 0.0f32..20.0,
        ) {
            let font = ResolvedFont::builtin();
            let inner = Rect::new(0.0, 0.0, w, h);
            let b = bounds(min, min + span);
            let fit = fit_font_size(&font, &text, &inner, &b);
            prop_assert!(fit.size >= min - 1e-4);
            prop_assert!(fit.size <= min + span + 1e-4);
            if !fit.overflow {
                prop_assert!(fit.width <= w + 0.5 + 1e-3);
            }
        }
    }
}
