use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CameraProfile;
use crate::detector::PostprocessConfig;
use crate::error::Error;
use crate::tracker::TrackerParams;

/// Execution mode; selects how many rows the on-screen log keeps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Debug,
    Release,
    Pretty,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Release
    }
}

impl Mode {
    pub fn display_depth(&self) -> usize {
        match self {
            Mode::Debug => 14,
            Mode::Release | Mode::Pretty => 18,
        }
    }
}

/// Everything the pipeline needs besides the collaborators it is handed.
///
/// Every field has a default, so `{}` is a valid config file.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_root: PathBuf,
    /// Built-in profile names or paths to profile JSON files; one or two.
    pub cameras: Vec<String>,
    pub tracker: TrackerParams,
    /// Used when detections come from a raw model.
    pub postprocess: PostprocessConfig,
    pub max_track_points: usize,
    pub queue_threshold_single: usize,
    pub queue_threshold_dual: usize,
    /// Idle wait of the consumers when their queue is empty, in ms.
    pub poll_interval_ms: u64,
    pub rtsp_retry_delay_ms: u64,
    pub write_video: bool,
    pub output_fps: f64,
    pub compress_video: bool,
    pub retention_days: u32,
    pub mode: Mode,
    pub draw_3d_box: bool,
    /// Name used for the process control file `pid_{name}.txt`.
    pub name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            cameras: vec!["datlcam1".to_string()],
            tracker: TrackerParams::default(),
            postprocess: PostprocessConfig::default(),
            max_track_points: 35,
            queue_threshold_single: 1500,
            queue_threshold_dual: 500,
            poll_interval_ms: 1,
            rtsp_retry_delay_ms: 1000,
            write_video: false,
            output_fps: 12.0,
            compress_video: false,
            retention_days: 4,
            mode: Mode::default(),
            draw_3d_box: false,
            name: "atcc".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cameras.is_empty() || self.cameras.len() > 2 {
            return Err(Error::InvalidConfig(format!(
                "expected one or two cameras, got {}",
                self.cameras.len()
            )));
        }

        if self.max_track_points == 0 {
            return Err(Error::InvalidConfig("max_track_points must be positive".into()));
        }

        if self.write_video && self.output_fps <= 0.0 {
            return Err(Error::InvalidConfig(format!("bad output fps {}", self.output_fps)));
        }

        Ok(())
    }

    #[inline]
    pub fn is_dual(&self) -> bool {
        self.cameras.len() == 2
    }

    /// Queue depth past which the pipeline stops.
    pub fn queue_threshold(&self) -> usize {
        if self.is_dual() {
            self.queue_threshold_dual
        } else {
            self.queue_threshold_single
        }
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn rtsp_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rtsp_retry_delay_ms)
    }

    /// Resolves the camera entries: built-in names first, then files.
    pub fn profiles(&self) -> Result<Vec<CameraProfile>, Error> {
        self.cameras
            .iter()
            .map(|c| match CameraProfile::by_name(c) {
                Some(p) => Ok(p),
                None => CameraProfile::from_file(c),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerVariant;

    #[test]
    fn empty_object_gives_defaults() {
        let c: PipelineConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(c.max_track_points, 35);
        assert_eq!(c.tracker.max_absent, 2);
        assert_eq!(c.tracker.variant, TrackerVariant::Kalman);
        assert_eq!(c.retention_days, 4);
        assert_eq!(c.postprocess.iou_threshold, 0.6);
        assert_eq!(c.queue_threshold(), 1500);
        assert_eq!(c.mode.display_depth(), 18);
        c.validate().unwrap();
    }

    #[test]
    fn dual_threshold_and_mode() {
        let c: PipelineConfig = serde_json::from_str(
            r#"{"cameras": ["datlcam1", "datlcam2"], "mode": "debug", "tracker": {"variant": "centroid"}}"#,
        )
        .unwrap();

        assert_eq!(c.queue_threshold(), 500);
        assert_eq!(c.mode.display_depth(), 14);
        assert_eq!(c.tracker.variant, TrackerVariant::Centroid);
        assert_eq!(c.profiles().unwrap()[1].id, "datlcam2");
    }

    #[test]
    fn rejects_three_cameras() {
        let c = PipelineConfig {
            cameras: vec!["datlcam1".into(); 3],
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }
}
