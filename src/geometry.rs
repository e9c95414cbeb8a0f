use nalgebra as na;

use crate::bbox::Rect;

/// Integer pixel coordinate.
pub type Point = na::Point2<i32>;

#[inline]
pub fn to_f32(p: Point) -> na::Point2<f32> {
    na::Point2::new(p.x as f32, p.y as f32)
}

#[inline]
pub fn distance(a: Point, b: Point) -> f32 {
    na::distance(&to_f32(a), &to_f32(b))
}

/// Heading of the segment `a -> b` in degrees, image coordinates (y down).
#[inline]
pub fn heading_deg(a: Point, b: Point) -> f32 {
    ((b.y - a.y) as f32).atan2((b.x - a.x) as f32).to_degrees()
}

/// Rotates `point` into the ellipse frame and evaluates the quadratic form.
///
/// `angle` is in degrees, semi-axes in pixels.
pub fn ellipse_form(
    center: na::Point2<f32>,
    semi_major: f32,
    semi_minor: f32,
    angle: f32,
    point: na::Point2<f32>,
) -> f32 {
    let (sina, cosa) = angle.to_radians().sin_cos();
    let (dx, dy) = (point.x - center.x, point.y - center.y);

    let n1 = (cosa * dx + sina * dy).powi(2);
    let n2 = (sina * dx - cosa * dy).powi(2);

    n1 / (semi_major * semi_major) + n2 / (semi_minor * semi_minor)
}

#[inline]
pub fn point_in_ellipse(
    center: na::Point2<f32>,
    semi_major: f32,
    semi_minor: f32,
    angle: f32,
    point: na::Point2<f32>,
) -> bool {
    ellipse_form(center, semi_major, semi_minor, angle, point) <= 1.0
}

/// Intersection of segments `a1-a2` and `b1-b2`.
///
/// Returns `None` for parallel segments or when the crossing lies outside
/// either segment. Callers pick their own fallback construction.
pub fn line_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let (ax1, ay1, ax2, ay2) = (a1.x as f64, a1.y as f64, a2.x as f64, a2.y as f64);
    let (bx1, by1, bx2, by2) = (b1.x as f64, b1.y as f64, b2.x as f64, b2.y as f64);

    let d = (by2 - by1) * (ax2 - ax1) - (bx2 - bx1) * (ay2 - ay1);
    if d == 0.0 {
        return None;
    }

    let ua = ((bx2 - bx1) * (ay1 - by1) - (by2 - by1) * (ax1 - bx1)) / d;
    let ub = ((ax2 - ax1) * (ay1 - by1) - (ay2 - ay1) * (ax1 - bx1)) / d;

    if !(0.0..=1.0).contains(&ua) || !(0.0..=1.0).contains(&ub) {
        return None;
    }

    let x = ax1 + ua * (ax2 - ax1);
    let y = ay1 + ua * (ay2 - ay1);

    Some(Point::new(x as i32, y as i32))
}

/// Intersection area over the area of `axle` (asymmetric IoU).
#[inline]
pub fn rect_overlap_ratio(vehicle: &Rect, axle: &Rect) -> f32 {
    vehicle.overlap_ratio(axle)
}

/// Even-odd ray casting test.
pub fn in_polygon(p: Point, poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let p = to_f32(p);
    let mut inside = false;
    let mut p1 = to_f32(poly[0]);
    let mut xints = 0.0;

    for i in 1..=n {
        let p2 = to_f32(poly[i % n]);

        if p.y > f32::min(p1.y, p2.y) && p.y <= f32::max(p1.y, p2.y) && p.x <= f32::max(p1.x, p2.x)
        {
            if (p1.y - p2.y).abs() > f32::EPSILON {
                xints = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            }

            if (p1.x - p2.x).abs() < f32::EPSILON || p.x <= xints {
                inside = !inside;
            }
        }

        p1 = p2;
    }

    inside
}
