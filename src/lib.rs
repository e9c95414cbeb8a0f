pub mod aggregator;
pub mod axle;
pub mod bbox;
pub mod box3d;
pub mod camera;
pub mod class;
pub mod config;
pub mod counting;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod gate;
pub mod geometry;
pub mod housekeeping;
pub mod kalman;
pub mod logfmt;
pub mod outputs;
pub mod overlay;
pub mod pipeline;
pub mod rotation;
pub mod store;
pub mod tracker;
#[cfg(feature = "opencv")]
pub mod video;

mod circular_queue;
mod track;

pub use aggregator::Aggregator;
pub use bbox::Rect;
pub use camera::{CameraProfile, LaneId};
pub use circular_queue::CircularQueue;
pub use class::VehicleClass;
pub use config::PipelineConfig;
pub use counting::{CountingLedger, VehicleRecord};
pub use detection::{Detection, DetectorOutput};
pub use error::Error;
pub use frame::Frame;
pub use pipeline::{PipelineCoordinator, StopReason, StopToken};
pub use track::{Track, TrackId};
pub use tracker::Tracker;
