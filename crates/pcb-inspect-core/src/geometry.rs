use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle `(x, y, w, h)`, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Tightest box around a set of integer points (inclusive pixel extents).
    pub fn enclosing(points: &[Point2<i32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let min_x = min_x.max(0);
        let min_y = min_y.max(0);
        if max_x < min_x || max_y < min_y {
            return None;
        }
        Some(Self {
            x: min_x as u32,
            y: min_y as u32,
            w: (max_x - min_x + 1) as u32,
            h: (max_y - min_y + 1) as u32,
        })
    }

    #[inline]
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Center using integer division, matching how region centers are reported.
    #[inline]
    pub fn center(&self) -> Point2<f32> {
        Point2::new((self.x + self.w / 2) as f32, (self.y + self.h / 2) as f32)
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        if self.h == 0 {
            0.0
        } else {
            self.w as f32 / self.h as f32
        }
    }

    /// True if `other` lies completely inside `self`.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }

    /// Clip to a `width × height` image. Returns `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.w.min(width - self.x);
        let h = self.h.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(BoundingBox::new(self.x, self.y, w, h))
    }
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point2<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0_f64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        acc += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
    }
    0.5 * acc.abs()
}

/// Length of a closed polyline.
pub fn closed_perimeter(points: &[Point2<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0_f64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        let dx = (q.x - p.x) as f64;
        let dy = (q.y - p.y) as f64;
        len += (dx * dx + dy * dy).sqrt();
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point2<i32>> {
        vec![
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }

    #[test]
    fn shoelace_is_orientation_independent() {
        let mut pts = rect(10, 10, 110, 60);
        assert_relative_eq!(polygon_area(&pts), 5000.0);
        pts.reverse();
        assert_relative_eq!(polygon_area(&pts), 5000.0);
        assert_relative_eq!(closed_perimeter(&pts), 300.0);
    }

    #[test]
    fn enclosing_box_is_inclusive() {
        let bbox = BoundingBox::enclosing(&rect(5, 7, 14, 9)).expect("bbox");
        assert_eq!(bbox, BoundingBox::new(5, 7, 10, 3));
        assert_eq!(bbox.center(), Point2::new(10.0, 8.0));
    }

    #[test]
    fn clamp_drops_boxes_outside_the_image() {
        let b = BoundingBox::new(90, 90, 20, 20);
        assert_eq!(b.clamp_to(100, 100), Some(BoundingBox::new(90, 90, 10, 10)));
        assert_eq!(b.clamp_to(50, 50), None);
    }
}
