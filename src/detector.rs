use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::bbox::Rect;
use crate::camera::CameraProfile;
use crate::class::VehicleClass;
use crate::detection::{Detection, DetectorOutput};
use crate::error::Error;
use crate::frame::Frame;
use crate::geometry;

/// The object detector. Runs on a worker thread, one instance per camera.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput, Error>;
}

/// A box as it leaves the network, before lane classification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub rect: Rect,
    #[serde(rename = "c")]
    pub class: VehicleClass,
    #[serde(rename = "p")]
    pub confidence: f32,
}

/// Network output of one frame: vehicle boxes and loose axle boxes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    #[serde(default)]
    pub boxes: Vec<RawDetection>,
    #[serde(default)]
    pub axles: Vec<Rect>,
}

/// The neural network. Inference runtimes live outside this crate.
pub trait Model: Send {
    fn infer(&mut self, frame: &Frame) -> Result<RawOutput, Error>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PostprocessConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub axle_overlap: f32,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            iou_threshold: 0.6,
            axle_overlap: crate::axle::AXLE_OVERLAP_THRESHOLD,
        }
    }
}

/// Turns raw network output into tracker input: drops weak and duplicate
/// boxes, picks the road contact corner, classifies the lane and attaches
/// axle boxes.
pub struct Postprocessor {
    profile: CameraProfile,
    config: PostprocessConfig,
}

impl Postprocessor {
    pub fn new(profile: CameraProfile, config: PostprocessConfig) -> Self {
        Self { profile, config }
    }

    pub fn process(&self, raw: Vec<RawDetection>, axles: Vec<Rect>) -> DetectorOutput {
        let mut dets: Vec<Detection> = raw
            .into_iter()
            .filter(|r| r.confidence > self.config.confidence_threshold)
            .filter_map(|r| {
                let bottom = r.rect.bottom(self.profile.bottom_corner);
                let lane = self.profile.lane_of(bottom)?;

                Some(Detection::new(r.rect, bottom, r.class, r.confidence, lane))
            })
            .collect();

        let keep = self.non_maximum_supression(&mut dets);
        let mut dets: Vec<Detection> = dets
            .into_iter()
            .enumerate()
            .filter_map(|(idx, d)| if keep[idx] { Some(d) } else { None })
            .collect();

        let mut pool = axles.clone();
        for det in dets.iter_mut() {
            if pool.is_empty() {
                break;
            }

            if det.class == VehicleClass::TwoWheeler {
                continue;
            }

            let (mut mine, rest): (Vec<Rect>, Vec<Rect>) = pool
                .into_iter()
                .partition(|ax| geometry::rect_overlap_ratio(&det.rect, ax) > self.config.axle_overlap);
            pool = rest;

            mine.sort_by_key(|r| r.x1);
            det.axles = mine;
        }

        DetectorOutput {
            detections: dets,
            axles,
        }
    }

    /// Class agnostic suppression, strongest box first.
    fn non_maximum_supression(&self, dets: &mut [Detection]) -> Vec<bool> {
        dets.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep = vec![true; dets.len()];
        for idx in 0..dets.len() {
            if !keep[idx] {
                continue;
            }

            for other in idx + 1..dets.len() {
                if keep[other] && dets[idx].rect.iou(&dets[other].rect) > self.config.iou_threshold {
                    keep[other] = false;
                }
            }
        }

        keep
    }
}

/// A model followed by postprocessing.
pub struct ModelDetector<M> {
    model: M,
    postprocessor: Postprocessor,
}

impl<M: Model> ModelDetector<M> {
    pub fn new(model: M, postprocessor: Postprocessor) -> Self {
        Self { model, postprocessor }
    }
}

impl<M: Model> Detector for ModelDetector<M> {
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput, Error> {
        let raw = self.model.infer(frame)?;
        let boxes = raw.boxes.len();
        let out = self.postprocessor.process(raw.boxes, raw.axles);
        debug!("frame {}: kept {} of {} boxes", frame.index, out.detections.len(), boxes);

        Ok(out)
    }
}

/// Replays per-frame records dumped one frame per line as
/// `{frame_index}: {json}`. Frames without a line get an empty record.
///
/// Dumps of postprocessed detections replay as a [`Detector`], raw network
/// dumps as a [`Model`].
pub struct Replay<T> {
    frames: HashMap<u64, T>,
}

pub type ReplayDetector = Replay<DetectorOutput>;
pub type ReplayModel = Replay<RawOutput>;

impl<T: DeserializeOwned + Default> Replay<T> {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path.as_ref())?;
        let this = Self::from_reader(BufReader::new(file))?;
        info!(
            "replaying {} frames of detections from {}",
            this.frames.len(),
            path.as_ref().display()
        );

        Ok(this)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut frames = HashMap::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let (idx, json) = line
                .split_once(':')
                .ok_or_else(|| Error::parse(&line, "expected `index: json`"))?;
            let idx: u64 = idx
                .trim()
                .parse()
                .map_err(|_| Error::parse(&line, "bad frame index"))?;
            let out: T = serde_json::from_str(json.trim())?;

            frames.insert(idx, out);
        }

        Ok(Self { frames })
    }

    pub fn from_frames(frames: HashMap<u64, T>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Highest frame index with recorded detections.
    pub fn last_frame(&self) -> u64 {
        self.frames.keys().copied().max().unwrap_or(0)
    }

    fn take(&mut self, index: u64) -> T {
        self.frames.remove(&index).unwrap_or_default()
    }
}

impl Detector for Replay<DetectorOutput> {
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput, Error> {
        let out = self.take(frame.index);
        debug!("frame {}: {} detections", frame.index, out.detections.len());

        Ok(out)
    }
}

impl Model for Replay<RawOutput> {
    fn infer(&mut self, frame: &Frame) -> Result<RawOutput, Error> {
        Ok(self.take(frame.index))
    }
}
