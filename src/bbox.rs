use serde_derive::{Deserialize, Serialize};

use crate::geometry::Point;

/// Which rectangle corner stands for the vehicle's contact point with the road.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BottomCorner {
    BottomRight,
    BottomLeft,
}

impl Default for BottomCorner {
    fn default() -> Self {
        BottomCorner::BottomRight
    }
}

/// Left-top-right-bottom pixel rectangle, serialized as `[x1, y1, x2, y2]`
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl From<[i32; 4]> for Rect {
    fn from(v: [i32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl Rect {
    #[inline]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    #[inline(always)]
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> f32 {
        (self.width().max(0) as f32) * (self.height().max(0) as f32)
    }

    #[inline]
    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    #[inline]
    pub fn bottom(&self, corner: BottomCorner) -> Point {
        match corner {
            BottomCorner::BottomRight => Point::new(self.x2, self.y2),
            BottomCorner::BottomLeft => Point::new(self.x1, self.y2),
        }
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );

        if r.x2 > r.x1 && r.y2 > r.y1 {
            Some(r)
        } else {
            None
        }
    }

    /// Intersection area over the area of `other`. Asymmetric on purpose: it
    /// answers "how much of `other` lies inside `self`".
    pub fn overlap_ratio(&self, other: &Rect) -> f32 {
        let other_area = other.area();
        if other_area <= 0.0 {
            return 0.0;
        }

        match self.intersection(other) {
            Some(i) => (i.area() / other_area).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection(other).map(|r| r.area()).unwrap_or(0.0);
        let union = self.area() + other.area() - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_corner_follows_orientation() {
        let r = Rect::new(10, 20, 110, 80);
        assert_eq!(r.bottom(BottomCorner::BottomRight), Point::new(110, 80));
        assert_eq!(r.bottom(BottomCorner::BottomLeft), Point::new(10, 80));
    }

    #[test]
    fn overlap_ratio_is_relative_to_second_rect() {
        let vehicle = Rect::new(0, 0, 100, 100);
        let axle = Rect::new(90, 50, 110, 70);

        assert!((vehicle.overlap_ratio(&axle) - 0.5).abs() < 1e-6);
        assert!((vehicle.overlap_ratio(&Rect::new(10, 10, 20, 20)) - 1.0).abs() < 1e-6);
        assert_eq!(vehicle.overlap_ratio(&Rect::new(200, 200, 210, 210)), 0.0);
    }

    #[test]
    fn serializes_as_corner_array() {
        let r: Rect = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(r, Rect::new(1, 2, 3, 4));
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1,2,3,4]");
    }
}
