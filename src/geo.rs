use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned rectangle in page space: points, origin at the top-left
/// corner of the media box, y growing downwards. `x0`/`y0` is the top-left
/// corner, `x1`/`y1` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Rect { x0, y0, x1, y1 }
    }

    /// Bounding box of two arbitrary corners.
    pub fn from_corners(a: (f32, f32), b: (f32, f32)) -> Self {
        Rect {
            x0: a.0.min(b.0),
            y0: a.1.min(b.1),
            x1: a.0.max(b.0),
            y1: a.1.max(b.1),
        }
    }

    pub fn from_points<I: IntoIterator<Item = (f32, f32)>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut rect = Rect::from_corners(first, first);
        for (x, y) in iter {
            rect.x0 = rect.x0.min(x);
            rect.y0 = rect.y0.min(y);
            rect.x1 = rect.x1.max(x);
            rect.y1 = rect.y1.max(y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn union_all<'a, I: IntoIterator<Item = &'a Rect>>(rects: I) -> Option<Rect> {
        rects
            .into_iter()
            .fold(None, |acc: Option<Rect>, r| Some(acc.map_or(*r, |a| a.union(r))))
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        if r.is_degenerate() {
            None
        } else {
            Some(r)
        }
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        self.intersection(other).map_or(0.0, |r| r.area())
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Intersection relative to the smaller of the two areas.
    pub fn overlap_ratio(&self, other: &Rect) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            0.0
        } else {
            self.intersection_area(other) / smaller
        }
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 && other.y0 >= self.y0 && other.y1 <= self.y1
    }

    /// Shrinks by `d` on every side (negative `d` grows).
    pub fn inset(&self, d: f32) -> Rect {
        Rect {
            x0: self.x0 + d,
            y0: self.y0 + d,
            x1: self.x1 - d,
            y1: self.y1 - d,
        }
    }

    pub fn pad_x(&self, d: f32) -> Rect {
        Rect {
            x0: self.x0 - d,
            x1: self.x1 + d,
            ..*self
        }
    }

    pub fn clamp_to(&self, bounds: &Rect) -> Rect {
        Rect {
            x0: self.x0.clamp(bounds.x0, bounds.x1),
            y0: self.y0.clamp(bounds.y0, bounds.y1),
            x1: self.x1.clamp(bounds.x0, bounds.x1),
            y1: self.y1.clamp(bounds.y0, bounds.y1),
        }
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Rect {
        Rect {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            x1: self.x1 * sx,
            y1: self.y1 * sy,
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}, {:.1})",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_rects_is_one() {
        let r = Rect::new(10.0, 10.0, 20.0, 30.0);
        assert!((r.iou(&r) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_rects_is_zero() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 0.0, 30.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn overlap_ratio_uses_smaller_area() {
        let big = Rect::new(0.0, 0.0, 100.0, 20.0);
        let small = Rect::new(10.0, 5.0, 30.0, 15.0);
        assert!((big.overlap_ratio(&small) - 1.0).abs() < 1e-6);
        assert!(big.iou(&small) < 0.2);
    }

    #[test]
    fn clamp_and_degenerate() {
        let page = Rect::new(0.0, 0.0, 595.0, 842.0);
        let off = Rect::new(600.0, 10.0, 700.0, 20.0).clamp_to(&page);
        assert!(off.is_degenerate());
        let partly = Rect::new(-5.0, 10.0, 20.0, 20.0).clamp_to(&page);
        assert_eq!(partly.x0, 0.0);
        assert!(!partly.is_degenerate());
    }

    #[test]
    fn union_all_of_nothing() {
        assert!(Rect::union_all(&[]).is_none());
        let u = Rect::union_all(&[Rect::new(0.0, 0.0, 1.0, 1.0), Rect::new(2.0, -1.0, 3.0, 0.5)]);
        assert_eq!(u, Some(Rect::new(0.0, -1.0, 3.0, 1.0)));
    }
}
