use atcc::camera::LaneId;
use atcc::detection::DetectorOutput;
use atcc::detector::{Detector, ModelDetector, Postprocessor, RawDetection, RawOutput, ReplayDetector, ReplayModel};
use atcc::frame::{BlankSource, Frame, FrameSource};
use atcc::geometry::Point;
use atcc::outputs::OutputLayout;
use atcc::pipeline::CameraInput;
use atcc::rotation::{ManualClock, Window};
use atcc::tracker::TrackerVariant;
use atcc::{Aggregator, Detection, Error, PipelineConfig, PipelineCoordinator, Rect, StopReason, VehicleClass};
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array3;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 14)
        .and_then(|d| d.and_hms_opt(8, 15, 0))
        .unwrap()
}

fn config(root: &Path, cameras: &[&str]) -> PipelineConfig {
    let mut c = PipelineConfig {
        output_root: root.to_path_buf(),
        cameras: cameras.iter().map(|s| s.to_string()).collect(),
        rtsp_retry_delay_ms: 10,
        ..Default::default()
    };
    c.tracker.variant = TrackerVariant::Centroid;
    c
}

fn build(config: &PipelineConfig) -> (PipelineCoordinator, Aggregator) {
    let clock = Arc::new(ManualClock::new(start()));
    let aggregator = Aggregator::new(config, config.profiles().unwrap(), clock.clone()).unwrap();
    let coordinator = PipelineCoordinator::new(config.clone(), clock).unwrap();

    (coordinator, aggregator)
}

/// A car crossing lane 1 left to right, one step per frame.
fn car_replay() -> (usize, ReplayDetector) {
    let mut frames = HashMap::new();

    for (i, x) in (200..=760).step_by(20).enumerate() {
        let det = Detection::new(
            Rect::new(x - 80, 400, x, 470),
            Point::new(x, 470),
            VehicleClass::Car,
            0.9,
            LaneId(1),
        );
        frames.insert(
            i as u64 + 1,
            DetectorOutput {
                detections: vec![det],
                axles: vec![],
            },
        );
    }

    (frames.len() + 3, ReplayDetector::from_frames(frames))
}

/// The same car as raw network boxes; lanes come from the camera geometry.
fn raw_car_replay() -> (usize, ReplayModel) {
    let mut frames = HashMap::new();

    for (i, x) in (200..=760).step_by(20).enumerate() {
        let boxes = vec![
            RawDetection {
                rect: Rect::new(x - 80, 400, x, 470),
                class: VehicleClass::Car,
                confidence: 0.9,
            },
            // weaker duplicate, suppressed
            RawDetection {
                rect: Rect::new(x - 78, 402, x, 470),
                class: VehicleClass::MiniLgv,
                confidence: 0.5,
            },
        ];
        frames.insert(i as u64 + 1, RawOutput { boxes, axles: vec![] });
    }

    (frames.len() + 3, ReplayModel::from_frames(frames))
}

fn blank(frames: usize) -> Box<dyn FrameSource> {
    Box::new(BlankSource::with_dims(frames, 96, 54))
}

struct SlowDetector(Duration);

impl Detector for SlowDetector {
    fn detect(&mut self, _: &Frame) -> Result<DetectorOutput, Error> {
        std::thread::sleep(self.0);
        Ok(DetectorOutput::default())
    }
}

struct FailsOn(u64);

impl Detector for FailsOn {
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput, Error> {
        if frame.index == self.0 {
            Err(Error::Detector("inference failed".into()))
        } else {
            Ok(DetectorOutput::default())
        }
    }
}

struct PanicsOn(u64);

impl Detector for PanicsOn {
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput, Error> {
        assert_ne!(frame.index, self.0, "model crashed");
        Ok(DetectorOutput::default())
    }
}

/// Network stream that never delivers.
struct DeadStream {
    reopened: Arc<AtomicUsize>,
}

impl FrameSource for DeadStream {
    fn read(&mut self) -> Result<Option<Array3<u8>>, Error> {
        Err(Error::Capture("connection reset".into()))
    }

    fn reopen(&mut self) -> Result<(), Error> {
        self.reopened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_network(&self) -> bool {
        true
    }
}

#[test]
fn replay_runs_to_the_end_and_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &["datlcam1"]);
    let (coordinator, aggregator) = build(&config);

    let (frames, detector) = car_replay();
    let inputs = vec![CameraInput {
        source: blank(frames),
        detector: Box::new(detector),
    }];

    let summary = coordinator.run(inputs, aggregator).unwrap();
    assert_eq!(summary.frames, frames as u64);
    assert_eq!(summary.reason, StopReason::EndOfInput);

    let layout = OutputLayout::new(dir.path(), "datlcam1");
    let w = Window::of(start());
    let log = fs::read_to_string(layout.vehicle_log(w)).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(fs::read_to_string(layout.final_counts(w)).unwrap().contains("Total : 1"));
    assert_eq!(fs::read_to_string(layout.track_paths(w)).unwrap().lines().count(), 1);

    let pid = fs::read_to_string(coordinator.pid_file()).unwrap();
    assert!(pid.starts_with("main-"));
    assert!(pid.contains("detector-0") && pid.contains("aggregator"));
}

#[test]
fn queue_overflow_stops_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), &["datlcam1"]);
    config.queue_threshold_single = 5;
    let (coordinator, aggregator) = build(&config);

    let inputs = vec![CameraInput {
        source: blank(500),
        detector: Box::new(SlowDetector(Duration::from_millis(20))),
    }];

    match coordinator.run(inputs, aggregator) {
        Err(Error::QueueOverflow { depth, threshold, .. }) => {
            assert_eq!(threshold, 5);
            assert!(depth > 5);
        }
        other => panic!("expected overflow, got {:?}", other),
    }
    assert_eq!(coordinator.stop_token().reason(), Some(StopReason::QueueOverflow));

    // files are still flushed on the way out
    let layout = OutputLayout::new(dir.path(), "datlcam1");
    assert!(layout.final_counts(Window::of(start())).exists());
}

#[test]
fn dropped_frame_desynchronizes_cameras() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &["datlcam1", "datlcam2"]);
    let (coordinator, aggregator) = build(&config);

    let inputs = vec![
        CameraInput {
            source: blank(20),
            detector: Box::new(FailsOn(0)),
        },
        CameraInput {
            source: blank(20),
            detector: Box::new(FailsOn(3)),
        },
    ];

    match coordinator.run(inputs, aggregator) {
        Err(Error::Desync { primary, secondary }) => assert_eq!((primary, secondary), (3, 4)),
        other => panic!("expected desync, got {:?}", other),
    }
    assert_eq!(coordinator.stop_token().reason(), Some(StopReason::Desync));
}

#[test]
fn dead_stream_is_retried_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &["datlcam1"]);
    let (coordinator, aggregator) = build(&config);

    let reopened = Arc::new(AtomicUsize::new(0));
    let inputs = vec![CameraInput {
        source: Box::new(DeadStream {
            reopened: reopened.clone(),
        }),
        detector: Box::new(SlowDetector(Duration::from_millis(0))),
    }];

    let stop = coordinator.stop_token();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        stop.stop(StopReason::UserInterrupt);
    });

    let summary = coordinator.run(inputs, aggregator).unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.frames, 0);
    assert_eq!(summary.reason, StopReason::UserInterrupt);
    assert!(reopened.load(Ordering::SeqCst) >= 2);
}

#[test]
fn panicking_worker_is_reported_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &["datlcam1"]);
    let (coordinator, aggregator) = build(&config);

    let inputs = vec![CameraInput {
        source: blank(10),
        detector: Box::new(PanicsOn(4)),
    }];

    match coordinator.run(inputs, aggregator) {
        Err(Error::WorkerPanicked(name)) => assert_eq!(name, "detector-0"),
        other => panic!("expected a panicked worker, got {:?}", other),
    }

    let layout = OutputLayout::new(dir.path(), "datlcam1");
    assert!(layout.final_counts(Window::of(start())).exists());
}

#[test]
fn raw_model_output_is_postprocessed_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &["datlcam1"]);
    let (coordinator, aggregator) = build(&config);

    let (frames, model) = raw_car_replay();
    let postprocessor = Postprocessor::new(config.profiles().unwrap().remove(0), config.postprocess.clone());
    let inputs = vec![CameraInput {
        source: blank(frames),
        detector: Box::new(ModelDetector::new(model, postprocessor)),
    }];

    let summary = coordinator.run(inputs, aggregator).unwrap();
    assert_eq!(summary.frames, frames as u64);

    let layout = OutputLayout::new(dir.path(), "datlcam1");
    let log = fs::read_to_string(layout.vehicle_log(Window::of(start()))).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.starts_with("1,car,"));
}
