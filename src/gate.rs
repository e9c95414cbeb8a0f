use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::camera::{CameraProfile, LaneId};
use crate::class::VehicleClass;
use crate::geometry::{self, Point};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GateMode {
    Matched,
    Lost,
}

/// Gate size as a function of the last step length `d`:
/// `a = max(major_scale * d, min_major)`, `b = max(a / minor_div, min_minor)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GateSizing {
    pub major_scale: f32,
    pub min_major: f32,
    pub heavy_minor_div: f32,
    pub heavy_min_minor: f32,
    pub light_minor_div: f32,
    pub light_min_minor: f32,
}

impl GateSizing {
    fn axes(&self, step: f32, heavy: bool) -> (f32, f32) {
        let a = (self.major_scale * step).floor().max(self.min_major);
        let b = if heavy {
            (a / self.heavy_minor_div).floor().max(self.heavy_min_minor)
        } else {
            (a / self.light_minor_div).floor().max(self.light_min_minor)
        };

        (a, b)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GateParams {
    pub matched: GateSizing,
    pub lost: GateSizing,
    /// Semi-minor divisors applied to the class's initial semi-major axis.
    pub initial_heavy_minor_div: f32,
    pub initial_light_minor_div: f32,
    /// A matched gate is centred this many steps ahead of the last point.
    pub extrapolation: f32,
    /// Path length needed before the heading is trusted.
    pub min_path_points: usize,
    pub min_path_points_heavy_far: usize,
    /// Allowed relative deviation of the latest step from the lane's default
    /// heading.
    pub heading_band: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            matched: GateSizing {
                major_scale: 2.25,
                min_major: 30.0,
                heavy_minor_div: 2.5,
                heavy_min_minor: 20.0,
                light_minor_div: 4.0,
                light_min_minor: 15.0,
            },
            lost: GateSizing {
                major_scale: 2.2,
                min_major: 30.0,
                heavy_minor_div: 2.0,
                heavy_min_minor: 25.0,
                light_minor_div: 3.0,
                light_min_minor: 22.0,
            },
            initial_heavy_minor_div: 2.0,
            initial_light_minor_div: 3.0,
            extrapolation: 1.0,
            min_path_points: 3,
            min_path_points_heavy_far: 5,
            heading_band: 0.5,
        }
    }
}

impl GateParams {
    pub fn min_points(&self, class: VehicleClass, lane: LaneId, far_lane: LaneId) -> usize {
        if class.is_heavy() && lane == far_lane {
            self.min_path_points_heavy_far.max(self.min_path_points)
        } else {
            self.min_path_points
        }
    }
}

/// Oriented elliptical search region of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct EllipseGate {
    pub center: Point,
    pub semi_major: f32,
    pub semi_minor: f32,
    /// Degrees.
    pub angle: f32,
    pub last_step: f32,
}

/// Mean of two headings, robust to the +-180 wrap.
fn mean_heading(h1: f32, h2: f32) -> f32 {
    let (s1, c1) = h1.to_radians().sin_cos();
    let (s2, c2) = h2.to_radians().sin_cos();

    (s1 + s2).atan2(c1 + c2).to_degrees()
}

/// Angle between two ellipse axes; an axis and its reverse are the same.
fn axis_deviation(a: f32, b: f32) -> f32 {
    ((a - b + 90.0).rem_euclid(180.0) - 90.0).abs()
}

impl EllipseGate {
    pub fn initial(
        bottom: Point,
        class: VehicleClass,
        lane: LaneId,
        profile: &CameraProfile,
        params: &GateParams,
    ) -> Self {
        let semi_major = profile.initial_semi_major(class);
        let div = if class.is_heavy() {
            params.initial_heavy_minor_div
        } else {
            params.initial_light_minor_div
        };

        Self {
            center: bottom,
            semi_major,
            semi_minor: (semi_major / div).floor(),
            angle: profile.initial_heading(lane),
            last_step: 0.0,
        }
    }

    #[inline]
    pub fn contains(&self, p: Point) -> bool {
        geometry::point_in_ellipse(
            geometry::to_f32(self.center),
            self.semi_major,
            self.semi_minor,
            self.angle,
            geometry::to_f32(p),
        )
    }

    /// Re-derives the gate from the track path.
    ///
    /// Until the path is long enough only the centre follows the last point.
    pub fn update(
        &mut self,
        path: &[Point],
        class: VehicleClass,
        lane: LaneId,
        mode: GateMode,
        profile: &CameraProfile,
        params: &GateParams,
    ) {
        let Some(&last) = path.last() else {
            return;
        };
        self.center = last;

        if path.len() < params.min_points(class, lane, profile.far_lane).max(3) {
            return;
        }

        let n = path.len();
        let (p1, p2) = (path[n - 2], path[n - 1]);
        let p0 = path[n - 3];

        // the latest step decides, the smoothed heading is what gets used
        let step = geometry::heading_deg(p1, p2);
        let default = profile.initial_heading(lane);

        self.angle = if axis_deviation(step, default) <= params.heading_band * default.abs() {
            mean_heading(step, geometry::heading_deg(p0, p1))
        } else {
            default
        };

        self.last_step = geometry::distance(p1, p2);

        let sizing = match mode {
            GateMode::Matched => &params.matched,
            GateMode::Lost => &params.lost,
        };
        let (a, b) = sizing.axes(self.last_step, class.is_heavy());
        self.semi_major = a;
        self.semi_minor = b;

        if mode == GateMode::Matched && self.last_step > 0.0 {
            let (p1, p2) = (geometry::to_f32(p1), geometry::to_f32(p2));
            let c: na::Point2<f32> = p2 + (p2 - p1) * params.extrapolation;

            self.center = Point::new(c.x.round() as i32, c.y.round() as i32);
        }
    }
}
