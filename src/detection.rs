use serde_derive::{Deserialize, Serialize};

use crate::bbox::Rect;
use crate::camera::LaneId;
use crate::class::VehicleClass;
use crate::geometry::Point;

/// One vehicle as reported by the detector, already lane-classified.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub rect: Rect,
    /// Road contact point, a rectangle corner chosen per camera.
    pub bottom: Point,
    #[serde(rename = "c")]
    pub class: VehicleClass,
    #[serde(rename = "p")]
    pub confidence: f32,
    pub lane: LaneId,
    /// Axle boxes lying inside `rect`, ordered by x.
    #[serde(default)]
    pub axles: Vec<Rect>,
}

impl Detection {
    pub fn new(
        rect: Rect,
        bottom: Point,
        class: VehicleClass,
        confidence: f32,
        lane: LaneId,
    ) -> Self {
        Self {
            rect,
            bottom,
            class,
            confidence,
            lane,
            axles: Vec::new(),
        }
    }
}

/// Everything the detector extracts from one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DetectorOutput {
    pub detections: Vec<Detection>,
    pub axles: Vec<Rect>,
}
