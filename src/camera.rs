use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::bbox::BottomCorner;
use crate::class::{ClassTable, VehicleClass};
use crate::error::Error;
use crate::geometry::{self, Point};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LaneId(pub u8);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Horizontal order in which a vehicle's axle boxes are listed.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AxleOrder {
    Ascending,
    Descending,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaneSpec {
    pub id: LaneId,
    pub polygon: Vec<Point>,
    /// Vehicles moving the right way get closer to this point.
    pub reference: Point,
    /// Gate heading for freshly registered tracks, degrees.
    pub initial_heading: f32,
}

/// Restricted wrong-direction rule: tracks of `classes` in `lane` are flagged
/// as soon as they move against traffic, without waiting for interval exit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WrongWayRule {
    pub classes: Vec<VehicleClass>,
    pub lane: LaneId,
}

/// Parameters of the perspective box drawn around vehicles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Box3dParams {
    pub vanishing_point: Point,
    /// Rays towards the vanishing point are extended by this factor.
    pub ray_scale: f32,
    pub frame_height: i32,
}

/// Static calibration of one camera.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraProfile {
    pub id: String,
    pub bottom_corner: BottomCorner,
    pub axle_order: AxleOrder,
    pub lanes: Vec<LaneSpec>,
    pub count_intervals: ClassTable<[i32; 2]>,
    /// Heavy vehicles enter their interval this far past its start.
    pub heavy_entry_margin: i32,
    pub initial_max_distances: ClassTable<f32>,
    /// Tracks outside every lane and left of this x have left the corridor.
    pub corridor_exit_x: i32,
    /// Lane where heavy vehicles need a longer path before steering the gate.
    pub far_lane: LaneId,
    #[serde(default)]
    pub wrong_way_rule: Option<WrongWayRule>,
    #[serde(default)]
    pub box3d: Option<Box3dParams>,
}

const FALLBACK_SEMI_MAJOR: f32 = 150.0;

impl CameraProfile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let profile: CameraProfile = serde_json::from_reader(std::io::BufReader::new(file))?;
        profile.validate()?;

        Ok(profile)
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "datlcam1" => Some(Self::datlcam1()),
            "datlcam2" => Some(Self::datlcam2()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.lanes.is_empty() {
            return Err(Error::InvalidConfig(format!("camera `{}` has no lanes", self.id)));
        }

        for lane in &self.lanes {
            if lane.polygon.len() < 3 {
                return Err(Error::InvalidConfig(format!(
                    "camera `{}`: lane {} polygon needs at least 3 points",
                    self.id, lane.id
                )));
            }
        }

        self.count_intervals.validate("count_intervals")?;
        self.initial_max_distances.validate("initial_max_distances")?;

        Ok(())
    }

    #[inline]
    pub fn lane(&self, id: LaneId) -> Option<&LaneSpec> {
        self.lanes.iter().find(|l| l.id == id)
    }

    /// `None` means the point lies outside every monitored lane.
    pub fn lane_of(&self, p: Point) -> Option<LaneId> {
        self.lanes
            .iter()
            .find(|l| geometry::in_polygon(p, &l.polygon))
            .map(|l| l.id)
    }

    /// True when the move `prev -> curr` approaches the lane's reference point.
    pub fn direction_of(&self, lane: LaneId, prev: Point, curr: Point) -> bool {
        match self.lane(lane) {
            Some(lane) => {
                geometry::distance(prev, lane.reference) > geometry::distance(curr, lane.reference)
            }
            None => true,
        }
    }

    /// Adaptive count interval `[ref1, ref2]` of `class`.
    pub fn count_interval(&self, class: VehicleClass) -> (i32, i32) {
        let [ref1, ref2] = self.count_intervals.get(class).copied().unwrap_or([0, 0]);

        if class.is_heavy() {
            (ref1 + self.heavy_entry_margin, ref2)
        } else {
            (ref1, ref2)
        }
    }

    pub fn within_count_interval(&self, p: Point, class: VehicleClass) -> bool {
        let (ref1, ref2) = self.count_interval(class);
        ref1 < p.x && p.x < ref2
    }

    pub fn initial_heading(&self, lane: LaneId) -> f32 {
        self.lane(lane).map(|l| l.initial_heading).unwrap_or(0.0)
    }

    pub fn initial_semi_major(&self, class: VehicleClass) -> f32 {
        self.initial_max_distances
            .get(class)
            .copied()
            .unwrap_or(FALLBACK_SEMI_MAJOR)
    }

    /// Has a track at `p` driven out of the monitored corridor?
    pub fn left_corridor(&self, p: Point) -> bool {
        self.lane_of(p).is_none() && p.x < self.corridor_exit_x
    }

    pub fn datlcam1() -> Self {
        let pts = |v: &[(i32, i32)]| v.iter().map(|&(x, y)| Point::new(x, y)).collect();

        Self {
            id: "datlcam1".to_string(),
            bottom_corner: BottomCorner::BottomRight,
            axle_order: AxleOrder::Ascending,
            lanes: vec![
                LaneSpec {
                    id: LaneId(1),
                    polygon: pts(&[(872, 472), (950, 316), (223, 110), (129, 165)]),
                    reference: Point::new(924, 467),
                    initial_heading: 10.0,
                },
                LaneSpec {
                    id: LaneId(2),
                    polygon: pts(&[(200, 520), (703, 521), (72, 197), (10, 228), (10, 330)]),
                    reference: Point::new(731, 535),
                    initial_heading: 18.0,
                },
                LaneSpec {
                    id: LaneId(3),
                    polygon: pts(&[(703, 521), (872, 472), (129, 165), (72, 197)]),
                    reference: Point::new(924, 467),
                    initial_heading: 10.0,
                },
            ],
            count_intervals: default_count_intervals(),
            heavy_entry_margin: 100,
            initial_max_distances: default_max_distances(),
            corridor_exit_x: 275,
            far_lane: LaneId(2),
            wrong_way_rule: Some(default_wrong_way_rule()),
            box3d: Some(Box3dParams {
                vanishing_point: Point::new(-411, -54),
                ray_scale: 3.8,
                frame_height: 540,
            }),
        }
    }

    pub fn datlcam2() -> Self {
        let pts = |v: &[(i32, i32)]| v.iter().map(|&(x, y)| Point::new(x, y)).collect();

        Self {
            id: "datlcam2".to_string(),
            bottom_corner: BottomCorner::BottomLeft,
            axle_order: AxleOrder::Descending,
            lanes: vec![
                LaneSpec {
                    id: LaneId(1),
                    polygon: pts(&[(20, 509), (20, 525), (462, 525), (934, 187), (806, 158)]),
                    reference: Point::new(5, 535),
                    initial_heading: 10.0,
                },
                LaneSpec {
                    id: LaneId(2),
                    polygon: pts(&[(20, 185), (20, 335), (690, 134), (505, 91)]),
                    reference: Point::new(5, 300),
                    initial_heading: 18.0,
                },
                LaneSpec {
                    id: LaneId(3),
                    polygon: pts(&[(20, 335), (20, 509), (806, 158), (690, 134)]),
                    reference: Point::new(5, 535),
                    initial_heading: 10.0,
                },
            ],
            count_intervals: default_count_intervals(),
            heavy_entry_margin: 100,
            initial_max_distances: default_max_distances(),
            corridor_exit_x: 275,
            far_lane: LaneId(2),
            wrong_way_rule: Some(default_wrong_way_rule()),
            box3d: Some(Box3dParams {
                vanishing_point: Point::new(1227, -35),
                ray_scale: 3.8,
                frame_height: 540,
            }),
        }
    }
}

fn default_count_intervals() -> ClassTable<[i32; 2]> {
    use VehicleClass::*;

    ClassTable::new()
        .with(
            &[Truck3, Truck4, Truck5, Truck6, Lgv, Tractor, Truck2, Bus, MiniBus],
            [300, 675],
        )
        .with(&[MiniLgv, Car, Auto], [275, 650])
        .with(&[TwoWheeler], [275, 550])
}

fn default_max_distances() -> ClassTable<f32> {
    use VehicleClass::*;

    ClassTable::new()
        .with(&[Truck4, Truck5, Truck6, Tractor, Bus, MiniBus], 120.0)
        .with(&[MiniLgv, Auto, Truck2, Truck3, Lgv], 140.0)
        .with(&[TwoWheeler, Car], 150.0)
}

fn default_wrong_way_rule() -> WrongWayRule {
    WrongWayRule {
        classes: vec![VehicleClass::TwoWheeler, VehicleClass::Car, VehicleClass::Auto],
        lane: LaneId(2),
    }
}
