use chrono::NaiveDateTime;
use nalgebra as na;

use crate::axle::AxleConfig;
use crate::bbox::Rect;
use crate::camera::LaneId;
use crate::class::VehicleClass;
use crate::detection::Detection;
use crate::gate::EllipseGate;
use crate::geometry::{self, Point};
use crate::kalman::KalmanFilter;

pub type TrackId = u64;

/// One physical vehicle followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub rect: Rect,
    pub bottom: Point,
    pub lane: LaneId,
    /// `true` while the vehicle moves with the traffic of its lane.
    pub direction: bool,
    pub path: Vec<Point>,
    pub absent_count: u32,
    pub class: VehicleClass,
    pub confidence: f32,

    /// Axle boxes matched in the current frame, sorted along the lane.
    pub axles: Vec<Rect>,
    /// Largest axle set seen so far.
    pub best_axles: Vec<Rect>,
    pub axle_history: Vec<Vec<Rect>>,
    pub axle_config: Option<AxleConfig>,

    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    /// Set once the vehicle has been written to the vehicle log.
    pub logged: bool,

    pub gate: EllipseGate,
    pub kalman: Option<KalmanFilter<f32>>,
}

impl Track {
    pub fn new(id: TrackId, det: &Detection, gate: EllipseGate, with_kalman: bool) -> Self {
        Self {
            id,
            rect: det.rect,
            bottom: det.bottom,
            lane: det.lane,
            direction: true,
            path: vec![det.bottom],
            absent_count: 0,
            class: det.class,
            confidence: det.confidence,
            axles: Vec::new(),
            best_axles: Vec::new(),
            axle_history: Vec::new(),
            axle_config: None,
            start_time: None,
            end_time: None,
            logged: false,
            gate,
            kalman: with_kalman.then(|| KalmanFilter::new(geometry::to_f32(det.bottom))),
        }
    }

    /// Position used for counting and corridor checks: the filtered one when
    /// a Kalman filter runs on this track, the raw bottom point otherwise.
    pub fn reference_point(&self) -> Point {
        match &self.kalman {
            Some(kf) => {
                let p: na::Point2<f32> = kf.position();
                Point::new(p.x.round() as i32, p.y.round() as i32)
            }
            None => self.bottom,
        }
    }

    /// Points recorded for this track in the track-path log.
    ///
    /// Axled vehicles are traced by the bottom right corner of their trailing
    /// axle, other vehicles by their bottom point.
    pub fn trace(&self) -> Vec<Point> {
        if self.class.is_axled() {
            self.axle_history
                .iter()
                .filter_map(|set| set.last())
                .map(|r| Point::new(r.x2, r.y2))
                .collect()
        } else {
            self.path.clone()
        }
    }

    /// Enough history to be worth writing to the track-path log.
    #[inline]
    pub fn has_useful_trace(&self) -> bool {
        if self.class.is_axled() {
            self.axle_history.iter().filter(|s| !s.is_empty()).count() >= 2
        } else {
            self.path.len() >= 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraProfile;
    use crate::gate::GateParams;

    fn det(class: VehicleClass) -> Detection {
        let rect = Rect::new(100, 100, 200, 180);
        Detection::new(rect, Point::new(200, 180), class, 0.9, LaneId(1))
    }

    fn track(class: VehicleClass, kalman: bool) -> Track {
        let d = det(class);
        let gate = EllipseGate::initial(d.bottom, class, d.lane, &CameraProfile::datlcam1(), &GateParams::default());
        Track::new(7, &d, gate, kalman)
    }

    #[test]
    fn new_track_is_seeded_from_detection() {
        let t = track(VehicleClass::Car, false);

        assert_eq!(t.path, vec![Point::new(200, 180)]);
        assert!(t.direction);
        assert_eq!(t.absent_count, 0);
        assert!(t.start_time.is_none() && t.end_time.is_none());
        assert_eq!(t.reference_point(), t.bottom);
    }

    #[test]
    fn kalman_reference_starts_at_bottom() {
        let t = track(VehicleClass::Car, true);
        assert_eq!(t.reference_point(), Point::new(200, 180));
    }

    #[test]
    fn axled_trace_follows_trailing_axle() {
        let mut t = track(VehicleClass::Truck3, false);
        assert!(!t.has_useful_trace());

        t.axle_history.push(vec![Rect::new(110, 160, 130, 180), Rect::new(170, 160, 190, 180)]);
        t.axle_history.push(vec![Rect::new(120, 160, 140, 180), Rect::new(180, 160, 200, 180)]);

        assert!(t.has_useful_trace());
        assert_eq!(t.trace(), vec![Point::new(190, 180), Point::new(200, 180)]);
    }
}
