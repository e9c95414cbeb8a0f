use chrono::NaiveDate;
use log::info;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::counting::VehicleRecord;
use crate::error::Error;
use crate::logfmt::{FinalCounts, TrackPathLine};
use crate::rotation::Window;

/// `dd_mm_YYYY`, the name of a day directory.
pub fn day_label(date: NaiveDate) -> String {
    date.format("%d_%m_%Y").to_string()
}

/// `HH`, the name of an hour directory.
pub fn hour_label(hour: u32) -> String {
    format!("{:02}", hour)
}

/// Where the files of one camera live:
///
/// ```text
/// {root}/{camera}/{dd_mm_YYYY}/{dd_mm_YYYY}_log.txt
/// {root}/{camera}/{dd_mm_YYYY}/{HH}/{HH}.txt
/// {root}/{camera}/{dd_mm_YYYY}/{HH}/{HH}_trkpath.txt
/// {root}/{camera}/{dd_mm_YYYY}/{HH}/{HH}_finalcounts.txt
/// {root}/{camera}/{dd_mm_YYYY}/{HH}/{HH}.avi
/// ```
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    camera: String,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P, camera: &str) -> Self {
        Self {
            root: root.into(),
            camera: camera.to_string(),
        }
    }

    #[inline]
    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn camera_dir(&self) -> PathBuf {
        self.root.join(&self.camera)
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.camera_dir().join(day_label(date))
    }

    pub fn hour_dir(&self, w: Window) -> PathBuf {
        self.day_dir(w.date).join(hour_label(w.hour))
    }

    pub fn error_log(&self, date: NaiveDate) -> PathBuf {
        self.day_dir(date).join(format!("{}_log.txt", day_label(date)))
    }

    pub fn vehicle_log(&self, w: Window) -> PathBuf {
        self.hour_dir(w).join(format!("{}.txt", hour_label(w.hour)))
    }

    pub fn track_paths(&self, w: Window) -> PathBuf {
        self.hour_dir(w).join(format!("{}_trkpath.txt", hour_label(w.hour)))
    }

    pub fn final_counts(&self, w: Window) -> PathBuf {
        self.hour_dir(w).join(format!("{}_finalcounts.txt", hour_label(w.hour)))
    }

    pub fn video(&self, w: Window) -> PathBuf {
        self.hour_dir(w).join(format!("{}.avi", hour_label(w.hour)))
    }
}

/// `{stem}_comp.avi` next to `video`.
pub fn compressed_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    video.with_file_name(format!("{}_comp.avi", stem))
}

fn open_append(path: &Path) -> Result<BufWriter<File>, Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Text files of one hour window.
pub struct HourFiles {
    window: Window,
    vehicle_log: BufWriter<File>,
    track_paths: BufWriter<File>,
    final_counts: BufWriter<File>,
}

impl HourFiles {
    pub fn open(layout: &OutputLayout, window: Window) -> Result<Self, Error> {
        let this = Self {
            window,
            vehicle_log: open_append(&layout.vehicle_log(window))?,
            track_paths: open_append(&layout.track_paths(window))?,
            final_counts: open_append(&layout.final_counts(window))?,
        };

        info!("{}: opened files in {}", layout.camera(), layout.hour_dir(window).display());
        Ok(this)
    }

    #[inline]
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn write_vehicle(&mut self, record: &VehicleRecord) -> Result<(), Error> {
        writeln!(self.vehicle_log, "{}", record)?;
        Ok(())
    }

    pub fn write_track(&mut self, line: &TrackPathLine) -> Result<(), Error> {
        writeln!(self.track_paths, "{}", line)?;
        Ok(())
    }

    pub fn write_counts(&mut self, counts: &FinalCounts) -> Result<(), Error> {
        write!(self.final_counts, "{}", counts)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.vehicle_log.flush()?;
        self.track_paths.flush()?;
        self.final_counts.flush()?;
        Ok(())
    }

    /// Flushes and drops the handles.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }
}

/// The per-day error file. Failures that must not stop the pipeline end up
/// here.
pub struct ErrorLog {
    path: PathBuf,
    file: BufWriter<File>,
}

impl ErrorLog {
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let file = open_append(&path)?;
        Ok(Self { path, file })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, msg: &str) -> Result<(), Error> {
        writeln!(self.file, "{}", msg)?;
        self.file.flush()?;
        Ok(())
    }
}
