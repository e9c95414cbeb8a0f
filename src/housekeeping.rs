use chrono::Local;
use crossbeam::channel::Sender;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

use crate::camera::LaneId;
use crate::class::VehicleClass;
use crate::counting::VehicleRecord;
use crate::error::Error;
use crate::logfmt::FinalCounts;
use crate::outputs::compressed_path;

/// Re-encodes a finished hour video.
pub trait VideoCompressor: Send + Sync {
    fn compress(&self, input: &Path, output: &Path) -> Result<(), Error>;
}

/// Runs the `ffmpeg` binary found in `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegCompressor {
    pub program: String,
    pub crf: u32,
}

impl Default for FfmpegCompressor {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            crf: 30,
        }
    }
}

impl VideoCompressor for FfmpegCompressor {
    fn compress(&self, input: &Path, output: &Path) -> Result<(), Error> {
        let status = Command::new(&self.program)
            .arg("-i")
            .arg(input)
            .args(["-vcodec", "libx264", "-crf"])
            .arg(self.crf.to_string())
            .arg(output)
            .args(["-hide_banner", "-loglevel", "panic", "-y"])
            .stdin(Stdio::null())
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Video(format!("{} exited with {}", self.program, status)))
        }
    }
}

fn hour_dirs(day_dir: &Path) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut dirs = Vec::new();

    for entry in fs::read_dir(day_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type()?.is_dir() && name.len() == 2 && name.chars().all(|c| c.is_ascii_digit()) {
            dirs.push((name, entry.path()));
        }
    }

    dirs.sort();
    Ok(dirs)
}

fn read_if_exists(path: &Path) -> Result<Option<String>, Error> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Tallies the hour's vehicle log by class and lane into `{HH}_vcbylane.txt`.
pub fn hourly_report(hour_dir: &Path, hour: &str) -> Result<PathBuf, Error> {
    let log = read_if_exists(&hour_dir.join(format!("{}.txt", hour)))?.unwrap_or_default();

    let mut tally: BTreeMap<VehicleClass, BTreeMap<LaneId, u64>> = BTreeMap::new();
    let mut lanes: Vec<LaneId> = Vec::new();

    for line in log.lines().filter(|l| !l.trim().is_empty()) {
        let rec: VehicleRecord = line.parse()?;
        *tally.entry(rec.class).or_default().entry(rec.lane).or_insert(0) += 1;

        if !lanes.contains(&rec.lane) {
            lanes.push(rec.lane);
        }
    }
    lanes.sort();

    let out_path = hour_dir.join(format!("{}_vcbylane.txt", hour));
    let mut out = fs::File::create(&out_path)?;

    write!(out, "Class")?;
    for lane in &lanes {
        write!(out, " : lane {}", lane)?;
    }
    writeln!(out)?;

    for (class, per_lane) in &tally {
        write!(out, "{}", class)?;
        for lane in &lanes {
            write!(out, " : {}", per_lane.get(lane).copied().unwrap_or(0))?;
        }
        writeln!(out)?;
    }

    Ok(out_path)
}

/// Merges the hour directories of a day:
///
/// * `{day}.txt`: all vehicle logs
/// * `tracks/{day}_trkpath.txt`: all track paths
/// * `{day}_finalcounts.txt`: summed final counts
/// * `{day}_hourlytotalvehicles.txt`: total per hour
pub fn daily_report(day_dir: &Path, day: &str) -> Result<FinalCounts, Error> {
    let tracks_dir = day_dir.join("tracks");
    fs::create_dir_all(&tracks_dir)?;

    let mut log = fs::File::create(day_dir.join(format!("{}.txt", day)))?;
    let mut trk = fs::File::create(tracks_dir.join(format!("{}_trkpath.txt", day)))?;
    let mut hourly = fs::File::create(day_dir.join(format!("{}_hourlytotalvehicles.txt", day)))?;
    writeln!(hourly, "Time : Total_Vehicles")?;

    let mut total = FinalCounts::new(VehicleClass::ALL.iter().map(|&c| (c, 0)).collect(), 0);

    for (hour, dir) in hour_dirs(day_dir)? {
        if let Some(text) = read_if_exists(&dir.join(format!("{}.txt", hour)))? {
            log.write_all(text.as_bytes())?;
        }

        if let Some(text) = read_if_exists(&dir.join(format!("{}_trkpath.txt", hour)))? {
            trk.write_all(text.as_bytes())?;
        }

        if let Some(text) = read_if_exists(&dir.join(format!("{}_finalcounts.txt", hour)))? {
            let counts = FinalCounts::parse_all(&text)?;
            writeln!(hourly, "{} : {}", hour, counts.total())?;
            total.merge(&counts);
        }
    }

    fs::write(day_dir.join(format!("{}_finalcounts.txt", day)), total.to_string())?;

    Ok(total)
}

/// Removes the `.avi` files of every hour of a day.
pub fn delete_videos(day_dir: &Path) -> Result<usize, Error> {
    if !day_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for (_, dir) in hour_dirs(day_dir)? {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();

            if path.extension().map_or(false, |e| e == "avi") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
    }

    Ok(removed)
}

/// Formats a line of the day error file.
pub fn error_line(kind: &str, msg: &str) -> String {
    format!("{}_Error : {} : {}", kind, Local::now().naive_local(), msg)
}

/// Fire-and-forget workers for reports, deletion and compression.
///
/// Failures are sent as error-file lines to the aggregator, which owns the
/// file.
pub struct Housekeeper {
    errors: Sender<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Housekeeper {
    pub fn new(errors: Sender<String>) -> Self {
        Self {
            errors,
            tasks: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, name: &str, kind: &'static str, job: F)
    where
        F: FnOnce() -> Result<String, Error> + Send + 'static,
    {
        let errors = self.errors.clone();
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match job() {
                Ok(done) => info!("{}", done),
                Err(err) => {
                    let line = error_line(kind, &err.to_string());
                    warn!("{}", line);
                    let _ = errors.send(line);
                }
            });

        match spawned {
            Ok(handle) => self.tasks.push(handle),
            Err(err) => {
                let _ = self.errors.send(error_line(kind, &format!("cannot spawn task: {}", err)));
            }
        }

        self.tasks.retain(|h| !h.is_finished());
    }

    pub fn hourly_report(&mut self, hour_dir: PathBuf, hour: String) {
        self.spawn("hourly-report", "HourlyReport", move || {
            let out = hourly_report(&hour_dir, &hour)?;
            Ok(format!("hourly report written to {}", out.display()))
        });
    }

    pub fn daily_report(&mut self, day_dir: PathBuf, day: String) {
        self.spawn("daily-report", "DailyFW", move || {
            let counts = daily_report(&day_dir, &day)?;
            Ok(format!("daily report for {}: {} vehicles", day, counts.total()))
        });
    }

    pub fn delete_videos(&mut self, day_dir: PathBuf) {
        self.spawn("video-deletion", "VideoDeletion", move || {
            let n = delete_videos(&day_dir)?;
            Ok(format!("deleted {} videos from {}", n, day_dir.display()))
        });
    }

    /// Compresses `video` to `{stem}_comp.avi` and removes the raw file on
    /// success.
    pub fn compress(&mut self, compressor: std::sync::Arc<dyn VideoCompressor>, video: PathBuf) {
        self.spawn("video-compression", "Compression", move || {
            let out = compressed_path(&video);
            compressor
                .compress(&video, &out)
                .map_err(|e| Error::Video(format!("Unable to compress {} ! ({})", video.display(), e)))?;
            fs::remove_file(&video)?;

            Ok(format!("compressed {}", out.display()))
        });
    }

    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|h| !h.is_finished()).count()
    }

    /// Blocks until every spawned task is done.
    pub fn join_all(&mut self) {
        for handle in self.tasks.drain(..) {
            if handle.join().is_err() {
                let _ = self.errors.send(error_line("Housekeeping", "a background task panicked"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::sync::Arc;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn daily_report_merges_hours() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("09_03_2024");

        write(&day.join("07/07.txt"), "1,car,2024:03:09,07:10:00,lane 1,_,_\n");
        write(&day.join("07/07_trkpath.txt"), "1 : car : [(1, 2), (3, 4)]\n");
        write(&day.join("07/07_finalcounts.txt"), "car : 1\nTotal : 1\nWrong direction : 0\n");
        write(&day.join("08/08.txt"), "2,bus,2024:03:09,08:00:01,lane 2,_,_\n");
        write(&day.join("08/08_finalcounts.txt"), "car : 2\nbus : 1\nTotal : 3\nWrong direction : 1\n");

        let total = daily_report(&day, "09_03_2024").unwrap();
        assert_eq!(total.total(), 4);
        assert_eq!(total.wrong_direction, 1);

        let log = fs::read_to_string(day.join("09_03_2024.txt")).unwrap();
        assert_eq!(log.lines().count(), 2);

        let hourly = fs::read_to_string(day.join("09_03_2024_hourlytotalvehicles.txt")).unwrap();
        assert_eq!(hourly, "Time : Total_Vehicles\n07 : 1\n08 : 3\n");

        let counts = fs::read_to_string(day.join("09_03_2024_finalcounts.txt")).unwrap();
        assert!(counts.contains("car : 3\n"));
        assert!(counts.ends_with("Total : 4\nWrong direction : 1\n"));

        assert!(day.join("tracks/09_03_2024_trkpath.txt").exists());
    }

    #[test]
    fn hourly_report_by_lane() {
        let dir = tempfile::tempdir().unwrap();
        let hour = dir.path().join("07");
        write(
            &hour.join("07.txt"),
            "1,car,2024:03:09,07:10:00,lane 1,_,_\n2,car,2024:03:09,07:11:00,lane 2,_,_\n3,tw,2024:03:09,07:12:00,lane 2,_,WRONG_DIRECTION\n",
        );

        let out = hourly_report(&hour, "07").unwrap();
        let text = fs::read_to_string(out).unwrap();

        assert_eq!(text, "Class : lane 1 : lane 2\ntw : 0 : 1\ncar : 1 : 1\n");
    }

    #[test]
    fn deletes_only_videos() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("01_01_2024");
        write(&day.join("00/00.avi"), "x");
        write(&day.join("00/00_comp.avi"), "x");
        write(&day.join("00/00.txt"), "x");

        assert_eq!(delete_videos(&day).unwrap(), 2);
        assert!(day.join("00/00.txt").exists());
        assert_eq!(delete_videos(&dir.path().join("missing")).unwrap(), 0);
    }

    struct FailingCompressor;

    impl VideoCompressor for FailingCompressor {
        fn compress(&self, _: &Path, _: &Path) -> Result<(), Error> {
            Err(Error::Video("no encoder".into()))
        }
    }

    #[test]
    fn failures_reach_the_error_channel() {
        let (tx, rx) = unbounded();
        let mut hk = Housekeeper::new(tx);

        hk.compress(Arc::new(FailingCompressor), PathBuf::from("/nonexistent/00.avi"));
        hk.join_all();

        let line = rx.try_recv().unwrap();
        assert!(line.starts_with("Compression_Error : "));
        assert!(line.contains("Unable to compress"));
    }

    fn ffmpeg_with_x264() -> bool {
        Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .stderr(Stdio::null())
            .output()
            .map_or(false, |out| String::from_utf8_lossy(&out.stdout).contains("libx264"))
    }

    #[test]
    fn ffmpeg_compresses_an_hour_video() {
        if !ffmpeg_with_x264() {
            eprintln!("ffmpeg with libx264 not found, skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("00").join("00.avi");
        fs::create_dir_all(video.parent().unwrap()).unwrap();

        let made = Command::new("ffmpeg")
            .args(["-f", "lavfi", "-i", "testsrc=duration=1:size=64x48:rate=12", "-vcodec", "mpeg4"])
            .args(["-hide_banner", "-loglevel", "panic", "-y"])
            .arg(&video)
            .status()
            .unwrap();
        assert!(made.success());

        let (tx, rx) = unbounded();
        let mut hk = Housekeeper::new(tx);
        hk.compress(Arc::new(FfmpegCompressor::default()), video.clone());
        hk.join_all();

        assert!(rx.try_recv().is_err());
        assert!(!video.exists());
        assert!(fs::metadata(compressed_path(&video)).unwrap().len() > 0);
    }
}
