use chrono::NaiveDateTime;
use crossbeam::channel::{unbounded, Receiver};
use log::{info, warn};
use std::sync::Arc;

use crate::axle::AxleAssigner;
use crate::camera::CameraProfile;
use crate::config::PipelineConfig;
use crate::counting::{CountingLedger, VehicleRecord};
use crate::detection::DetectorOutput;
use crate::error::Error;
use crate::housekeeping::{error_line, FfmpegCompressor, Housekeeper, VideoCompressor};
use crate::logfmt::TrackPathLine;
use crate::outputs::{day_label, hour_label, ErrorLog, HourFiles, OutputLayout};
use crate::overlay::{self, CameraView, OverlayOptions, Scene, VideoSink};
use crate::pipeline::Packet;
use crate::rotation::{Boundary, Clock, RetentionPolicy, RotationScheduler, Window};
use crate::store::CountStore;
use crate::tracker::Tracker;

#[cfg(feature = "opencv")]
fn default_video_sink(config: &PipelineConfig) -> Option<Box<dyn VideoSink>> {
    Some(Box::new(crate::video::OpenCvVideoSink::new(config.output_fps)))
}

#[cfg(not(feature = "opencv"))]
fn default_video_sink(_: &PipelineConfig) -> Option<Box<dyn VideoSink>> {
    warn!("video: built without the `opencv` feature, no video is written unless a sink is supplied");
    None
}

/// Tracking and counting state of one camera plus its open hour files.
pub struct CameraUnit {
    profile: CameraProfile,
    layout: OutputLayout,
    tracker: Tracker,
    axles: AxleAssigner,
    ledger: CountingLedger,
    files: HourFiles,
}

impl CameraUnit {
    fn new(profile: CameraProfile, config: &PipelineConfig, window: Window) -> Result<Self, Error> {
        let layout = OutputLayout::new(&config.output_root, &profile.id);
        let files = HourFiles::open(&layout, window)?;

        Ok(Self {
            tracker: Tracker::new(profile.clone(), config.tracker.clone()),
            axles: AxleAssigner::new(profile.axle_order),
            ledger: CountingLedger::new(&profile, config.mode.display_depth()),
            layout,
            files,
            profile,
        })
    }

    /// One frame: track, count, attach axles, then report finished vehicles.
    fn step(&mut self, output: &DetectorOutput, now: NaiveDateTime) -> Result<Vec<VehicleRecord>, Error> {
        for (track, why) in self.tracker.update(&output.detections) {
            log::trace!("{}: track {} removed ({:?})", self.profile.id, track.id, why);

            if let Some(line) = TrackPathLine::from_track(&track) {
                self.files.write_track(&line)?;
            }
        }

        self.ledger.observe(self.tracker.tracks_mut(), &self.profile, now);
        self.axles.assign(self.tracker.tracks_mut(), &output.axles);

        let records = self.ledger.collect(self.tracker.tracks_mut());
        for r in &records {
            self.files.write_vehicle(r)?;
        }

        Ok(records)
    }

    /// Writes the final counts of the running hour and closes its files.
    fn close_hour(&mut self) -> Result<(), Error> {
        let counts = self.ledger.flush();
        self.files.write_counts(&counts)?;
        self.files.flush()
    }

    #[inline]
    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    #[inline]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    #[inline]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[inline]
    pub fn ledger(&self) -> &CountingLedger {
        &self.ledger
    }
}

/// Owner of everything written to disk.
///
/// Consumes one packet per camera per iteration. All tracks, counters and
/// file handles live here and nowhere else. The day error file and the
/// composed video are shared by all cameras and live under the primary
/// (first) camera's directories.
pub struct Aggregator {
    units: Vec<CameraUnit>,
    clock: Arc<dyn Clock>,
    rotation: RotationScheduler,
    retention: RetentionPolicy,
    errors: ErrorLog,
    error_rx: Receiver<String>,
    housekeeper: Housekeeper,
    store: Option<Box<dyn CountStore>>,
    video: Option<Box<dyn VideoSink>>,
    compressor: Option<Arc<dyn VideoCompressor>>,
    overlay: OverlayOptions,
    output_fps: f64,
    frames: u64,
}

impl Aggregator {
    pub fn new(config: &PipelineConfig, profiles: Vec<CameraProfile>, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        if profiles.is_empty() {
            return Err(Error::InvalidConfig("aggregator needs at least one camera".into()));
        }

        let now = clock.now();
        let window = Window::of(now);

        let units = profiles
            .into_iter()
            .map(|p| CameraUnit::new(p, config, window))
            .collect::<Result<Vec<_>, Error>>()?;

        let errors = ErrorLog::open(units[0].layout.error_log(now.date()))?;
        let (tx, error_rx) = unbounded();

        let video = if config.write_video { default_video_sink(config) } else { None };

        let compressor: Option<Arc<dyn VideoCompressor>> = if config.compress_video {
            Some(Arc::new(FfmpegCompressor::default()))
        } else {
            None
        };

        Ok(Self {
            units,
            rotation: RotationScheduler::new(now),
            retention: RetentionPolicy::new(config.retention_days, now.date()),
            clock,
            errors,
            error_rx,
            housekeeper: Housekeeper::new(tx),
            store: None,
            video,
            compressor,
            overlay: OverlayOptions {
                max_track_points: config.max_track_points,
                draw_3d_box: config.draw_3d_box,
            },
            output_fps: config.output_fps,
            frames: 0,
        })
    }

    pub fn with_store(mut self, store: Box<dyn CountStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_video_sink(mut self, sink: Box<dyn VideoSink>) -> Self {
        self.video = Some(sink);
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn VideoCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    #[inline]
    pub fn units(&self) -> &[CameraUnit] {
        &self.units
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn window(&self) -> Window {
        self.rotation.current()
    }

    /// Handles one packet per camera, in camera order.
    pub fn process(&mut self, packets: &[Packet]) -> Result<(), Error> {
        if packets.len() != self.units.len() {
            return Err(Error::InvalidConfig(format!(
                "got {} packets for {} cameras",
                packets.len(),
                self.units.len()
            )));
        }

        let now = self.clock.now();
        if let Some(boundary) = self.rotation.poll(now) {
            self.rotate(boundary)?;
        }

        for (unit, packet) in self.units.iter_mut().zip(packets) {
            let records = unit.step(&packet.output, now)?;

            if let Some(store) = self.store.as_mut() {
                for r in &records {
                    if let Err(err) = store.insert(r) {
                        warn!("{}: store failed for {}: {}", unit.profile.id, r.id, err);
                        let line = format!("{},{},lane {},DB_WRITING_FAILED", r.id, r.time(), r.lane);
                        self.errors.write(&error_line("DB", &line))?;
                    }
                }
            }
        }

        if self.video.is_some() {
            self.write_video(packets)?;
        }

        self.drain_errors()?;
        self.frames += 1;

        Ok(())
    }

    fn write_video(&mut self, packets: &[Packet]) -> Result<(), Error> {
        let sink = match self.video.as_mut() {
            Some(s) => s,
            None => return Ok(()),
        };

        let ledgers: Vec<_> = self.units.iter().map(|u| &u.ledger).collect();
        let cameras = self
            .units
            .iter()
            .zip(packets)
            .map(|(unit, packet)| CameraView {
                image: packet.frame.image.view(),
                shapes: overlay::track_shapes(unit.tracker.tracks(), &unit.profile, &self.overlay),
            })
            .collect();

        let scene = Scene {
            cameras,
            log: overlay::log_lines(&ledgers),
            counts: overlay::count_lines(&ledgers),
        };

        sink.write(&self.units[0].layout.video(self.rotation.current()), &scene)
    }

    /// Closes the running video and hands it to the compressor.
    fn close_video(&mut self) -> Result<(), Error> {
        let closed = match self.video.as_mut() {
            Some(sink) => sink.close()?,
            None => None,
        };

        if let (Some(path), Some(c)) = (closed, self.compressor.as_ref()) {
            self.housekeeper.compress(c.clone(), path);
        }

        Ok(())
    }

    fn drain_errors(&mut self) -> Result<(), Error> {
        while let Ok(line) = self.error_rx.try_recv() {
            self.errors.write(&line)?;
        }

        Ok(())
    }

    fn rotate(&mut self, boundary: Boundary) -> Result<(), Error> {
        let closed = boundary.closed();
        let opened = boundary.opened();

        for unit in self.units.iter_mut() {
            unit.close_hour()?;
            self.housekeeper
                .hourly_report(unit.layout.hour_dir(closed), hour_label(closed.hour));
            unit.ledger.reset_wrong_direction();
        }

        if let Boundary::Day { .. } = boundary {
            for unit in self.units.iter_mut() {
                self.housekeeper
                    .daily_report(unit.layout.day_dir(closed.date), day_label(closed.date));

                if let Some(day) = self.retention.expired_day(opened.date) {
                    self.housekeeper.delete_videos(unit.layout.day_dir(day));
                }

                // live tracks keep their ids and logged flags
                unit.tracker.reset();
            }

            self.drain_errors()?;
            self.errors = ErrorLog::open(self.units[0].layout.error_log(opened.date))?;
        }

        for unit in self.units.iter_mut() {
            unit.files = HourFiles::open(&unit.layout, opened)?;
        }

        self.close_video()
    }

    /// Clean exit: final counts and reports for the running hour and day,
    /// video closed and compressed, background work awaited.
    pub fn finish(mut self) -> Result<(), Error> {
        let window = self.rotation.current();

        for unit in self.units.iter_mut() {
            unit.close_hour()?;
            self.housekeeper
                .hourly_report(unit.layout.hour_dir(window), hour_label(window.hour));
            self.housekeeper
                .daily_report(unit.layout.day_dir(window.date), day_label(window.date));
        }

        self.close_video()?;
        self.housekeeper.join_all();
        self.drain_errors()?;

        info!("aggregator: finished after {} frames", self.frames);
        Ok(())
    }
}
