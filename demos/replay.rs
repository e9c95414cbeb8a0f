//! Runs the counting pipeline over dumped detections.
//!
//! ```text
//! cargo run --example replay -- --detections cam1.dets --out output
//! cargo run --example replay -- --raw --detections cam1.raw --out output
//! ```

use anyhow::{bail, Context, Result};
use atcc::detector::{Detector, ModelDetector, Postprocessor, ReplayDetector, ReplayModel};
use atcc::frame::{BlankSource, FrameSource};
use atcc::pipeline::CameraInput;
use atcc::rotation::SystemClock;
use atcc::{Aggregator, PipelineConfig, PipelineCoordinator};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(about = "Replay dumped detections through the tracker and counter")]
struct Args {
    /// Pipeline config (JSON); defaults are used when omitted
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// One `{frame_index}: {json}` dump per camera
    #[clap(short, long, required = true)]
    detections: Vec<PathBuf>,

    /// Camera profiles, built-in names or JSON files; one per dump
    #[clap(long)]
    camera: Vec<String>,

    /// Dumps hold raw network boxes, postprocessed here
    #[clap(long)]
    raw: bool,

    /// Output root, overrides the config
    #[clap(short, long)]
    out: Option<PathBuf>,

    #[clap(short, long)]
    verbose: bool,
}

fn format_log(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> std::io::Result<()> {
    use std::io::Write;

    let location = format!("{}:{}", record.file().unwrap_or("?"), record.line().unwrap_or(0));
    writeln!(buf, "{:30}{}", location, record.args())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format(format_log)
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if !args.camera.is_empty() {
        config.cameras = args.camera.clone();
    }
    if let Some(out) = &args.out {
        config.output_root = out.clone();
    }
    if config.cameras.len() != args.detections.len() {
        bail!(
            "{} detection dumps for {} cameras",
            args.detections.len(),
            config.cameras.len()
        );
    }

    let profiles = config.profiles()?;

    let mut inputs = Vec::new();
    for (path, profile) in args.detections.iter().zip(&profiles) {
        let context = || format!("reading {}", path.display());

        let (frames, detector): (u64, Box<dyn Detector>) = if args.raw {
            let model = ReplayModel::from_file(path).with_context(context)?;
            let postprocessor = Postprocessor::new(profile.clone(), config.postprocess.clone());
            (model.last_frame(), Box::new(ModelDetector::new(model, postprocessor)))
        } else {
            let replay = ReplayDetector::from_file(path).with_context(context)?;
            (replay.last_frame(), Box::new(replay))
        };

        let source: Box<dyn FrameSource> = Box::new(BlankSource::new(frames as usize));
        inputs.push(CameraInput { source, detector });
    }

    let clock = Arc::new(SystemClock);
    let aggregator = Aggregator::new(&config, profiles, clock.clone())?;
    let coordinator = PipelineCoordinator::new(config, clock)?;

    let summary = coordinator.run(inputs, aggregator)?;
    log::info!("{} frames, stopped by {:?}", summary.frames, summary.reason);

    Ok(())
}
