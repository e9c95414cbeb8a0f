use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bbox::Rect;
use crate::camera::AxleOrder;
use crate::error::Error;
use crate::geometry;
use crate::track::Track;

/// Minimum share of an axle box that must lie inside the vehicle rectangle.
pub const AXLE_OVERLAP_THRESHOLD: f32 = 0.9;

/// Axle grouping along the vehicle, front to back. `Tandem12` reads "12":
/// a single front axle followed by a tandem.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AxleConfig {
    #[serde(rename = "11")]
    Single11,
    #[serde(rename = "12")]
    Tandem12,
    #[serde(rename = "13")]
    Tridem13,
    #[serde(rename = "112")]
    Tandem112,
    #[serde(rename = "113")]
    Tridem113,
    #[serde(rename = "122")]
    Tandem122,
    #[serde(rename = "123")]
    Tridem123,
}

impl AxleConfig {
    pub const ALL: [AxleConfig; 7] = [
        AxleConfig::Single11,
        AxleConfig::Tandem12,
        AxleConfig::Tridem13,
        AxleConfig::Tandem112,
        AxleConfig::Tridem113,
        AxleConfig::Tandem122,
        AxleConfig::Tridem123,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            AxleConfig::Single11 => "11",
            AxleConfig::Tandem12 => "12",
            AxleConfig::Tridem13 => "13",
            AxleConfig::Tandem112 => "112",
            AxleConfig::Tridem113 => "113",
            AxleConfig::Tandem122 => "122",
            AxleConfig::Tridem123 => "123",
        }
    }

    /// Infers the grouping from the gaps between consecutive axle boxes.
    pub fn infer(axles: &[Rect]) -> Self {
        let gaps: Vec<f32> = axles.windows(2).map(|w| rect_distance(&w[0], &w[1])).collect();

        match axles.len() {
            3 => AxleConfig::Tandem12,
            4 if gaps[0] > gaps[1] && gaps[0] > gaps[2] => AxleConfig::Tridem13,
            4 => AxleConfig::Tandem112,
            5 if gaps[1] > gaps[3] => AxleConfig::Tridem113,
            5 => AxleConfig::Tandem122,
            6 => AxleConfig::Tridem123,
            _ => AxleConfig::Single11,
        }
    }
}

impl fmt::Display for AxleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for AxleConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxleConfig::ALL
            .iter()
            .copied()
            .find(|c| c.code() == s)
            .ok_or_else(|| Error::parse(s, "unknown axle configuration"))
    }
}

/// Euclidean distance between two boxes taken as points in `(x1, y1, x2, y2)`.
fn rect_distance(a: &Rect, b: &Rect) -> f32 {
    let d = [a.x1 - b.x1, a.y1 - b.y1, a.x2 - b.x2, a.y2 - b.y2];
    d.iter().map(|&v| (v as f32) * (v as f32)).sum::<f32>().sqrt()
}

pub struct AxleAssigner {
    order: AxleOrder,
}

impl AxleAssigner {
    pub fn new(order: AxleOrder) -> Self {
        Self { order }
    }

    fn sort(&self, axles: &mut [Rect]) {
        match self.order {
            AxleOrder::Ascending => axles.sort_by_key(|r| r.x1),
            AxleOrder::Descending => axles.sort_by_key(|r| std::cmp::Reverse(r.x1)),
        }
    }

    /// Hands the frame's axle boxes to the axled tracks. Each box goes to at
    /// most one vehicle; bigger trucks pick first, ties in table order.
    pub fn assign(&self, tracks: &mut [Track], axles: &[Rect]) {
        let mut pool: Vec<Rect> = axles.to_vec();

        let mut order: Vec<usize> = (0..tracks.len())
            .filter(|&i| tracks[i].class.is_axled())
            .collect();
        order.sort_by_key(|&i| tracks[i].class.axle_priority());

        for i in order {
            if pool.is_empty() {
                break;
            }

            let track = &mut tracks[i];
            let (mut mine, rest): (Vec<Rect>, Vec<Rect>) = pool
                .into_iter()
                .partition(|ax| geometry::rect_overlap_ratio(&track.rect, ax) > AXLE_OVERLAP_THRESHOLD);
            pool = rest;

            self.sort(&mut mine);
            track.axles = mine.clone();

            if mine.is_empty() {
                continue;
            }

            if let Some(expected) = track.class.canonical_axles() {
                if mine.len() > track.best_axles.len() {
                    track.best_axles = mine.clone();
                }

                if track.axle_config.is_none() && track.best_axles.len() == expected {
                    track.axle_config = Some(AxleConfig::infer(&track.best_axles));
                }
            }

            track.axle_history.push(mine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraProfile, LaneId};
    use crate::class::VehicleClass;
    use crate::detection::Detection;
    use crate::gate::{EllipseGate, GateParams};
    use crate::geometry::Point;

    fn truck(id: u64, class: VehicleClass, rect: Rect) -> Track {
        let det = Detection::new(rect, Point::new(rect.x2, rect.y2), class, 0.9, LaneId(1));
        let gate = EllipseGate::initial(det.bottom, class, det.lane, &CameraProfile::datlcam1(), &GateParams::default());
        Track::new(id, &det, gate, false)
    }

    fn axles_at(xs: &[i32]) -> Vec<Rect> {
        xs.iter().map(|&x| Rect::new(x, 170, x + 20, 190)).collect()
    }

    #[test]
    fn infer_configurations() {
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 50])), AxleConfig::Single11);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 100, 130])), AxleConfig::Tandem12);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 200, 230, 260])), AxleConfig::Tridem13);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 100, 250, 280])), AxleConfig::Tandem112);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 60, 200, 230, 260])), AxleConfig::Tridem113);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 100, 130, 250, 280])), AxleConfig::Tandem122);
        assert_eq!(AxleConfig::infer(&axles_at(&[0, 1, 2, 3, 4, 5])), AxleConfig::Tridem123);
        assert_eq!(AxleConfig::Tandem122.to_string(), "122");
    }

    #[test]
    fn axle_box_goes_to_one_vehicle() {
        let rect = Rect::new(100, 100, 400, 200);
        let mut tracks = vec![
            truck(1, VehicleClass::Lgv, rect),
            truck(2, VehicleClass::Truck6, rect),
            truck(3, VehicleClass::Car, rect),
        ];

        AxleAssigner::new(AxleOrder::Ascending).assign(&mut tracks, &axles_at(&[300, 120]));

        assert!(tracks[0].axles.is_empty());
        assert_eq!(tracks[1].axles, axles_at(&[120, 300]));
        assert!(tracks[2].axle_history.is_empty());
    }

    #[test]
    fn descending_order_for_mirrored_camera() {
        let mut tracks = vec![truck(1, VehicleClass::Truck2, Rect::new(100, 100, 400, 200))];
        AxleAssigner::new(AxleOrder::Descending).assign(&mut tracks, &axles_at(&[120, 300]));

        assert_eq!(tracks[0].axles, axles_at(&[300, 120]));
        assert!(tracks[0].axle_config.is_none());
    }

    #[test]
    fn configuration_is_set_once() {
        let assigner = AxleAssigner::new(AxleOrder::Ascending);
        let mut tracks = vec![truck(1, VehicleClass::Truck4, Rect::new(0, 100, 600, 200))];

        assigner.assign(&mut tracks, &axles_at(&[0, 100]));
        assert!(tracks[0].axle_config.is_none());

        assigner.assign(&mut tracks, &axles_at(&[0, 200, 230, 260]));
        assert_eq!(tracks[0].axle_config, Some(AxleConfig::Tridem13));

        assigner.assign(&mut tracks, &axles_at(&[0, 100, 250, 280]));
        assigner.assign(&mut tracks, &axles_at(&[0, 100, 250, 280, 400]));

        assert_eq!(tracks[0].axle_config, Some(AxleConfig::Tridem13));
        assert_eq!(tracks[0].best_axles.len(), 5);
        assert_eq!(tracks[0].axle_history.len(), 4);
    }
}
