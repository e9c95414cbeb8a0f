//! Threads and queues.
//!
//! ```text
//! producer-N --ingest-N--> detector-N --detected-N--> aggregator
//! ```
//!
//! One producer and one detection worker per camera, a single aggregator.
//! Queues are unbounded crossbeam channels; end of input is signalled by
//! dropping the sending side. A shared [`StopToken`] ends everything early.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::detection::DetectorOutput;
use crate::detector::Detector;
use crate::error::Error;
use crate::frame::{Frame, FrameSource};
use crate::rotation::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserInterrupt,
    QueueOverflow,
    Desync,
    EndOfInput,
    Failure,
}

/// Shared cancellation flag. Workers poll it between items; the first
/// reason given wins.
#[derive(Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that actually stopped the pipeline.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);

        if first {
            if let Ok(mut r) = self.reason.lock() {
                *r = Some(reason);
            }
        }

        first
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.lock().ok().and_then(|r| *r)
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Instantaneous and average frame rate of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageRate {
    pub inst: f32,
    pub avg: f32,
}

impl fmt::Display for StageRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}, {:.2}", self.inst, self.avg)
    }
}

#[derive(Debug)]
pub struct RateMeter {
    started: Instant,
    count: u64,
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
        }
    }

    /// Counts one item whose work began at `tik`.
    pub fn tick(&mut self, tik: Instant) -> StageRate {
        self.count += 1;

        let now = Instant::now();
        let inst = 1.0 / now.duration_since(tik).as_secs_f32().max(1e-6);
        let avg = self.count as f32 / now.duration_since(self.started).as_secs_f32().max(1e-6);

        StageRate { inst, avg }
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame travelling through the stages. `rates` grows by one entry per
/// stage passed.
#[derive(Debug, Clone)]
pub struct Packet {
    pub frame: Frame,
    pub output: DetectorOutput,
    pub rates: Vec<StageRate>,
}

/// Read-only view of every queue, for overflow checks and depth logging.
#[derive(Clone)]
pub struct QueueMonitor {
    queues: Vec<(String, Receiver<Packet>)>,
    threshold: usize,
}

impl QueueMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            queues: Vec::new(),
            threshold,
        }
    }

    pub fn watch(&mut self, name: &str, rx: &Receiver<Packet>) {
        self.queues.push((name.to_string(), rx.clone()));
    }

    pub fn depths(&self) -> Vec<usize> {
        self.queues.iter().map(|(_, rx)| rx.len()).collect()
    }

    /// First queue holding more than the threshold.
    pub fn check(&self) -> Result<(), Error> {
        for (name, rx) in &self.queues {
            let depth = rx.len();

            if depth > self.threshold {
                return Err(Error::QueueOverflow {
                    queue: name.clone(),
                    depth,
                    threshold: self.threshold,
                });
            }
        }

        Ok(())
    }
}

fn sleep_unless_stopped(stop: &StopToken, total: Duration) {
    let slice = Duration::from_millis(10);
    let until = Instant::now() + total;

    while !stop.is_stopped() {
        let now = Instant::now();
        if now >= until {
            break;
        }

        thread::sleep(slice.min(until - now));
    }
}

/// Reads frames until the source ends or the pipeline stops. Network sources
/// are reopened forever.
pub fn produce(
    camera: usize,
    mut source: Box<dyn FrameSource>,
    tx: Sender<Packet>,
    monitor: QueueMonitor,
    clock: Arc<dyn Clock>,
    stop: StopToken,
    retry_delay: Duration,
) -> Result<(), Error> {
    info!("producer-{}: reading {}", camera, source.name());

    let mut meter = RateMeter::new();
    let mut index = 0;

    while !stop.is_stopped() {
        let tik = Instant::now();

        let failure = match source.read() {
            Ok(Some(image)) => {
                index += 1;
                let rate = meter.tick(tik);
                let packet = Packet {
                    frame: Frame::new(index, clock.now(), image),
                    output: DetectorOutput::default(),
                    rates: vec![rate],
                };

                if tx.send(packet).is_err() {
                    break;
                }

                if let Err(err) = monitor.check() {
                    error!("producer-{}: {}", camera, err);
                    stop.stop(StopReason::QueueOverflow);
                    return Err(err);
                }

                continue;
            }
            Ok(None) => None,
            Err(err) => Some(err),
        };

        if !source.is_network() {
            match failure {
                Some(err) => warn!("producer-{}: {}, ending input", camera, err),
                None => info!("producer-{}: end of input after {} frames", camera, index),
            }
            break;
        }

        warn!(
            "producer-{}: no frame from {} ({}), reconnecting in {:?}",
            camera,
            source.name(),
            failure.map(|e| e.to_string()).unwrap_or_else(|| "empty read".into()),
            retry_delay
        );

        sleep_unless_stopped(&stop, retry_delay);
        if let Err(err) = source.reopen() {
            warn!("producer-{}: reopen failed: {}", camera, err);
        }
    }

    Ok(())
}

/// Runs the detector over every frame of one camera. A frame the detector
/// fails on is dropped.
pub fn detect(
    camera: usize,
    mut detector: Box<dyn Detector>,
    rx: Receiver<Packet>,
    tx: Sender<Packet>,
    stop: StopToken,
    poll: Duration,
) -> Result<(), Error> {
    let mut meter = RateMeter::new();

    while !stop.is_stopped() {
        let mut packet = match rx.recv_timeout(poll) {
            Ok(p) => p,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let tik = Instant::now();
        match detector.detect(&packet.frame) {
            Ok(output) => packet.output = output,
            Err(err) => {
                warn!("detector-{}: frame {} dropped: {}", camera, packet.frame.index, err);
                continue;
            }
        }

        packet.rates.push(meter.tick(tik));
        if tx.send(packet).is_err() {
            break;
        }
    }

    info!("detector-{}: done", camera);
    Ok(())
}

/// Takes one packet from every camera at a time, in lockstep, and feeds the
/// aggregator. Always finishes the aggregator, whatever ended the loop.
pub fn aggregate(
    mut aggregator: Aggregator,
    rxs: Vec<Receiver<Packet>>,
    monitor: QueueMonitor,
    stop: StopToken,
    poll: Duration,
) -> Result<u64, Error> {
    let mut meter = RateMeter::new();
    let mut slots: Vec<Option<Packet>> = vec![None; rxs.len()];

    let result = loop {
        if stop.is_stopped() {
            break Ok(());
        }

        let mut ended = false;
        for (slot, rx) in slots.iter_mut().zip(&rxs) {
            if slot.is_none() {
                match rx.try_recv() {
                    Ok(p) => *slot = Some(p),
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => ended = true,
                }
            }
        }

        if slots.iter().any(|s| s.is_none()) {
            if ended {
                stop.stop(StopReason::EndOfInput);
                break Ok(());
            }

            thread::sleep(poll);
            continue;
        }

        let mut packets: Vec<Packet> = slots.iter_mut().filter_map(|s| s.take()).collect();

        let primary = packets[0].frame.index;
        if let Some(other) = packets.iter().skip(1).find(|p| p.frame.index != primary) {
            let err = Error::Desync {
                primary,
                secondary: other.frame.index,
            };
            error!("aggregator: {}", err);
            stop.stop(StopReason::Desync);
            break Err(err);
        }

        let tik = Instant::now();
        if let Err(err) = aggregator.process(&packets) {
            error!("aggregator: {}", err);
            stop.stop(StopReason::Failure);
            break Err(err);
        }

        let rate = meter.tick(tik);
        if log::log_enabled!(log::Level::Debug) {
            let mut line = format!("{}", primary);
            for (cam, p) in packets.iter_mut().enumerate() {
                p.rates.push(rate);
                for (stage, r) in p.rates.iter().enumerate() {
                    line.push_str(&format!(" ; cam{}-stage{}-fps: {}", cam, stage, r));
                }
            }
            debug!("{} ; qsize: {:?}", line, monitor.depths());
        }
    };

    let frames = aggregator.frames();
    aggregator.finish()?;

    result.map(|_| frames)
}

/// Inputs of one camera.
pub struct CameraInput {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub reason: StopReason,
}

/// Wires the queues and threads of a run and waits for them.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    stop: StopToken,
}

impl PipelineCoordinator {
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            clock,
            stop: StopToken::new(),
        })
    }

    /// Hand this to a signal handler to stop the run from outside.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config.output_root.join(format!("pid_{}.txt", self.config.name))
    }

    fn write_pid_file(path: &Path, threads: &[String]) -> Result<(), Error> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut line = format!("main-{}", std::process::id());
        for t in threads {
            line.push_str(" ; ");
            line.push_str(t);
        }

        fs::write(path, line)?;
        Ok(())
    }

    fn spawn<F>(name: String, job: F) -> Result<JoinHandle<Result<(), Error>>, Error>
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        Ok(thread::Builder::new().name(name).spawn(job)?)
    }

    /// Runs until input ends or the stop token fires. The aggregator is
    /// finished in every case; the first fatal error is returned.
    pub fn run(&self, inputs: Vec<CameraInput>, aggregator: Aggregator) -> Result<RunSummary, Error> {
        if inputs.len() != self.config.cameras.len() {
            return Err(Error::InvalidConfig(format!(
                "{} inputs for {} configured cameras",
                inputs.len(),
                self.config.cameras.len()
            )));
        }

        let mut monitor = QueueMonitor::new(self.config.queue_threshold());
        let mut ingest = Vec::new();
        let mut detected = Vec::new();

        for cam in 0..inputs.len() {
            let (itx, irx) = unbounded();
            let (dtx, drx) = unbounded();
            monitor.watch(&format!("ingest-{}", cam), &irx);
            monitor.watch(&format!("detected-{}", cam), &drx);
            ingest.push((itx, irx));
            detected.push((dtx, drx));
        }

        let mut names = Vec::new();
        let mut workers = Vec::new();
        let mut aggregator_rxs = Vec::new();

        for (cam, ((input, (itx, irx)), (dtx, drx))) in inputs.into_iter().zip(ingest).zip(detected).enumerate() {
            let name = format!("producer-{}", cam);
            let (clock, stop, monitor) = (self.clock.clone(), self.stop.clone(), monitor.clone());
            let delay = self.config.rtsp_retry_delay();
            let source = input.source;
            workers.push(Self::spawn(name.clone(), move || {
                produce(cam, source, itx, monitor, clock, stop, delay)
            })?);
            names.push(name);

            let name = format!("detector-{}", cam);
            let (stop, poll) = (self.stop.clone(), self.config.poll_interval());
            let detector = input.detector;
            workers.push(Self::spawn(name.clone(), move || detect(cam, detector, irx, dtx, stop, poll))?);
            names.push(name);

            aggregator_rxs.push(drx);
        }

        let (stop, poll) = (self.stop.clone(), self.config.poll_interval());
        let agg_monitor = monitor.clone();
        drop(monitor);
        let aggregator = thread::Builder::new()
            .name("aggregator".into())
            .spawn(move || aggregate(aggregator, aggregator_rxs, agg_monitor, stop, poll))?;
        names.push("aggregator".into());

        let pid_file = self.pid_file();
        if let Err(err) = Self::write_pid_file(&pid_file, &names) {
            warn!("cannot write {}: {}", pid_file.display(), err);
        }
        info!("pipeline: started {}", names.join(", "));

        let aggregated = match aggregator.join() {
            Ok(res) => res,
            Err(_) => {
                self.stop.stop(StopReason::Failure);
                Err(Error::WorkerPanicked("aggregator".into()))
            }
        };

        // producers may still be blocked on a live source
        self.stop.stop(StopReason::EndOfInput);

        let mut worker_err = None;
        for (name, handle) in names.iter().zip(workers) {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(err)) => {
                    warn!("{}: {}", name, err);
                    worker_err.get_or_insert(err);
                }
                Err(_) => {
                    warn!("{}: panicked", name);
                    worker_err.get_or_insert(Error::WorkerPanicked(name.clone()));
                }
            }
        }

        let frames = aggregated?;
        if let Some(err) = worker_err {
            return Err(err);
        }

        let reason = self.stop.reason().unwrap_or(StopReason::EndOfInput);
        info!("pipeline: stopped ({:?})", reason);

        Ok(RunSummary { frames, reason })
    }
}
