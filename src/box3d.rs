//! Perspective box around a vehicle, for display only.
//!
//! Works in a frame where the vanishing point lies right of the vehicle;
//! inputs on the other side are mirrored in and the result mirrored back.

use crate::bbox::Rect;
use crate::camera::Box3dParams;
use crate::class::VehicleClass;
use crate::geometry::{line_intersect, Point};

#[derive(Debug, Clone, PartialEq)]
pub struct Box3d {
    /// Top front, top back, side and ground corners in drawing order.
    pub corners: [Point; 7],
    /// Estimated road contact point under the vehicle.
    pub ground: Point,
}

impl Box3d {
    /// Edges between `corners` indices.
    pub const EDGES: [(usize, usize); 8] = [
        (0, 1),
        (1, 2),
        (2, 3),
        (3, 0),
        (3, 4),
        (4, 5),
        (5, 2),
        (4, 6),
    ];
}

struct Shape {
    height_ratio: f32,
    width_ratio: f32,
    /// Extra slope of the front edge.
    front_slope: f32,
    /// Extra slope of the ground edge.
    ground_slope: f32,
    /// Bottom extension relative to the box height when no axle is known.
    extend: f32,
}

fn shape(class: VehicleClass) -> Shape {
    match class {
        VehicleClass::TwoWheeler => Shape {
            height_ratio: 0.05,
            width_ratio: 0.4,
            front_slope: 2.0,
            ground_slope: 1.2,
            extend: 0.08,
        },
        c if !c.is_heavy() => Shape {
            height_ratio: 0.05,
            width_ratio: 0.4,
            front_slope: 5.0,
            ground_slope: 1.2,
            extend: 0.08,
        },
        _ => Shape {
            height_ratio: 0.08,
            width_ratio: 0.3,
            front_slope: 1.0,
            ground_slope: 1.5,
            extend: 0.1,
        },
    }
}

fn mirror_point(p: Point) -> Point {
    Point::new(-p.x, p.y)
}

fn mirror_rect(r: &Rect) -> Rect {
    Rect::new(-r.x2, r.y1, -r.x1, r.y2)
}

/// `p` pushed away from `vp` by `scale` times their distance.
fn ray(vp: Point, p: Point, scale: f32) -> Point {
    Point::new(
        vp.x + ((p.x - vp.x) as f32 * scale) as i32,
        vp.y + ((p.y - vp.y) as f32 * scale) as i32,
    )
}

/// Point on the line through `p` with slope `slope` at height `y`.
fn at_height(p: Point, slope: f32, y: i32) -> Option<Point> {
    if slope == 0.0 || !slope.is_finite() {
        return None;
    }

    Some(Point::new(p.x + ((y - p.y) as f32 / slope) as i32, y))
}

fn slope(a: Point, b: Point) -> f32 {
    (a.y - b.y) as f32 / (a.x - b.x) as f32
}

/// Builds the box from the vehicle rectangle. `axles` are the vehicle's axle
/// boxes in lane order; the first one anchors the rear ground corner.
///
/// Returns `None` when a required intersection does not exist even after
/// the fallback constructions.
pub fn reconstruct(rect: &Rect, class: VehicleClass, axles: &[Rect], params: &Box3dParams) -> Option<Box3d> {
    let mirrored = params.vanishing_point.x < rect.centroid().x;

    let (rect, vp, axle) = if mirrored {
        (
            mirror_rect(rect),
            mirror_point(params.vanishing_point),
            axles.first().map(mirror_rect),
        )
    } else {
        (*rect, params.vanishing_point, axles.first().copied())
    };

    let s = shape(class);
    let scale = params.ray_scale;
    let h = rect.height();
    let w = rect.width();

    let mut bottom = rect.y2;
    if !class.is_heavy() || axle.is_none() {
        bottom += (h as f32 * s.extend) as i32;
    }

    let left_edge = (Point::new(rect.x1, rect.y1), Point::new(rect.x1, bottom));
    let bottom_edge = (Point::new(rect.x1, bottom), Point::new(rect.x2, bottom));

    let pt1 = Point::new(rect.x2, rect.y1 + (h as f32 * s.height_ratio) as i32);
    let pt2 = Point::new(rect.x2 - (w as f32 * s.width_ratio) as i32, rect.y1);

    let pt3 = line_intersect(pt2, ray(vp, pt2, scale), left_edge.0, left_edge.1)?;

    let far1 = ray(vp, pt1, scale);
    let pt4_dir = line_intersect(pt1, far1, left_edge.0, left_edge.1)
        .or_else(|| line_intersect(pt1, far1, bottom_edge.0, bottom_edge.1))?;

    let front = at_height(pt3, slope(pt1, pt2) * s.front_slope, params.frame_height)?;
    let pt4 = line_intersect(pt1, pt4_dir, pt3, front)?;
    let drop = Point::new(pt4.x, pt4.y + 2 * h);

    let pt5 = axle
        .and_then(|ax| {
            let mid = Point::new((ax.x1 + ax.x2) / 2, ax.y2);
            line_intersect(pt4, drop, mid, ray(vp, mid, scale))
        })
        .or_else(|| line_intersect(pt4, drop, bottom_edge.0, bottom_edge.1))?;

    let back = at_height(pt5, slope(pt3, pt4) * s.ground_slope, 0)?;
    let pt6 = line_intersect(pt5, back, Point::new(rect.x1, rect.y1), Point::new(rect.x1, bottom + h))?;
    let pt7 = line_intersect(pt5, vp, Point::new(rect.x2, rect.y1), Point::new(rect.x2, bottom))?;

    let ground = Point::new((pt5.x + pt6.x) / 2, (pt5.y + pt6.y) / 2);

    let mut corners = [pt1, pt2, pt3, pt4, pt5, pt6, pt7];
    let ground = if mirrored {
        corners.iter_mut().for_each(|p| *p = mirror_point(*p));
        mirror_point(ground)
    } else {
        ground
    };

    Some(Box3d { corners, ground })
}
