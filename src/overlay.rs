use ndarray::prelude::*;
use std::path::{Path, PathBuf};

use crate::bbox::Rect;
use crate::box3d::{self, Box3d};
use crate::camera::CameraProfile;
use crate::class::VehicleClass;
use crate::counting::CountingLedger;
use crate::error::Error;
use crate::geometry::Point;
use crate::track::Track;

/// Width of the log and counts panels on each side of the camera frames.
pub const PANEL_WIDTH: usize = 412;

/// BGR
pub type Color = [u8; 3];

pub const WRONG_WAY: Color = [0, 0, 255];
pub const PANEL_BG: Color = [32, 32, 32];
pub const INK: Color = [230, 230, 230];

pub fn class_color(class: VehicleClass) -> Color {
    match class {
        VehicleClass::TwoWheeler => [255, 128, 0],
        VehicleClass::Car => [0, 255, 0],
        VehicleClass::Lgv => [255, 255, 0],
        VehicleClass::Truck2 => [0, 200, 255],
        VehicleClass::Truck3 => [0, 128, 255],
        VehicleClass::Truck4 => [128, 0, 255],
        VehicleClass::Truck5 => [255, 0, 255],
        VehicleClass::Truck6 => [128, 0, 128],
        VehicleClass::Bus => [0, 255, 255],
        VehicleClass::MiniLgv => [128, 255, 128],
        VehicleClass::Auto => [255, 0, 128],
        VehicleClass::MiniBus => [0, 128, 128],
        VehicleClass::Tractor => [128, 128, 0],
    }
}

#[inline]
pub fn track_color(t: &Track) -> Color {
    if t.direction {
        class_color(t.class)
    } else {
        WRONG_WAY
    }
}

#[derive(Debug, Clone)]
pub struct OverlayOptions {
    pub max_track_points: usize,
    pub draw_3d_box: bool,
}

/// Primitive drawn onto a camera frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect(Rect, Color),
    Line(Point, Point, Color),
}

/// Drawing list of the live tracks of one camera.
///
/// Rectangles and the last `max_track_points` path points use the class
/// colour, vehicles going the wrong way are drawn red.
pub fn track_shapes(tracks: &[Track], profile: &CameraProfile, opts: &OverlayOptions) -> Vec<Shape> {
    let mut shapes = Vec::new();

    for t in tracks {
        let color = track_color(t);

        shapes.push(Shape::Rect(t.rect, color));
        shapes.extend(t.axles.iter().map(|ax| Shape::Rect(*ax, color)));

        let skip = t.path.len().saturating_sub(opts.max_track_points);
        shapes.extend(t.path[skip..].windows(2).map(|w| Shape::Line(w[0], w[1], color)));

        if opts.draw_3d_box {
            if let Some(b) = profile
                .box3d
                .as_ref()
                .and_then(|p| box3d::reconstruct(&t.rect, t.class, &t.axles, p))
            {
                shapes.extend(box_edges(&b, color));
            }
        }
    }

    shapes
}

fn box_edges(b: &Box3d, color: Color) -> impl Iterator<Item = Shape> + '_ {
    Box3d::EDGES
        .iter()
        .map(move |&(i, j)| Shape::Line(b.corners[i], b.corners[j], color))
}

/// One row of text in a side panel.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub color: Color,
    pub text: String,
}

impl TextLine {
    fn new(color: Color, text: String) -> Self {
        Self { color, text }
    }
}

/// Recently logged vehicles of every camera, newest first.
pub fn log_lines(ledgers: &[&CountingLedger]) -> Vec<TextLine> {
    let mut lines = Vec::new();

    for ledger in ledgers {
        let rows: Vec<_> = ledger.display().iter().collect();

        lines.extend(rows.into_iter().rev().map(|r| {
            TextLine::new(
                class_color(r.class),
                format!("{:<8}{}  {}  {}", r.class.to_string(), r.time, r.lane, r.axle),
            )
        }));
    }

    lines
}

/// Per class totals of the running hour summed over cameras, then the total
/// and the wrong-direction counter.
pub fn count_lines(ledgers: &[&CountingLedger]) -> Vec<TextLine> {
    let mut lines = Vec::with_capacity(VehicleClass::ALL.len() + 2);
    let mut total = 0;

    for class in VehicleClass::ALL {
        let n: u64 = ledgers
            .iter()
            .map(|l| l.lanes().map(|lane| l.count_of(lane, class)).sum::<u64>())
            .sum();

        total += n;
        lines.push(TextLine::new(class_color(class), format!("{} : {}", class, n)));
    }

    let wrong: u64 = ledgers.iter().map(|l| l.wrong_direction()).sum();
    lines.push(TextLine::new(INK, format!("Total : {}", total)));
    lines.push(TextLine::new(WRONG_WAY, format!("Wrong direction : {}", wrong)));

    lines
}

/// Camera image and what to draw on it.
pub struct CameraView<'a> {
    pub image: ArrayView3<'a, u8>,
    pub shapes: Vec<Shape>,
}

/// Everything in one composed output frame: `[log | cameras... | counts]`.
pub struct Scene<'a> {
    pub cameras: Vec<CameraView<'a>>,
    pub log: Vec<TextLine>,
    pub counts: Vec<TextLine>,
}

impl<'a> Scene<'a> {
    /// Height of the composed frame.
    pub fn height(&self) -> usize {
        self.cameras.iter().map(|c| c.image.dim().0).max().unwrap_or(0)
    }
}

/// Destination of the composed frames, one file per hour.
pub trait VideoSink: Send {
    /// Renders `scene` and appends it to the video at `path`, opening the
    /// file on first use.
    fn write(&mut self, path: &Path, scene: &Scene<'_>) -> Result<(), Error>;

    /// Finishes the current file and returns its path, if one was open.
    fn close(&mut self) -> Result<Option<PathBuf>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::LaneId;
    use crate::detection::Detection;
    use crate::gate::{EllipseGate, GateParams};
    use chrono::NaiveDate;

    fn car(id: u64, x: i32) -> Track {
        let profile = CameraProfile::datlcam2();
        let d = Detection::new(
            Rect::new(x, 140, x + 80, 200),
            Point::new(x, 200),
            VehicleClass::Car,
            0.9,
            LaneId(1),
        );
        let gate = EllipseGate::initial(d.bottom, d.class, d.lane, &profile, &GateParams::default());
        Track::new(id, &d, gate, false)
    }

    fn opts(max_track_points: usize, draw_3d_box: bool) -> OverlayOptions {
        OverlayOptions {
            max_track_points,
            draw_3d_box,
        }
    }

    #[test]
    fn tracks_use_class_or_wrong_way_colour() {
        let profile = CameraProfile::datlcam2();
        let mut tracks = vec![car(1, 100), car(2, 300)];
        tracks[1].direction = false;

        let shapes = track_shapes(&tracks, &profile, &opts(35, false));

        assert_eq!(shapes[0], Shape::Rect(tracks[0].rect, class_color(VehicleClass::Car)));
        assert_eq!(shapes[1], Shape::Rect(tracks[1].rect, WRONG_WAY));
    }

    #[test]
    fn path_is_cut_to_the_latest_points() {
        let profile = CameraProfile::datlcam2();
        let mut t = car(1, 300);
        t.path = (0..10).map(|i| Point::new(300 + 10 * i, 200)).collect();

        let shapes = track_shapes(std::slice::from_ref(&t), &profile, &opts(4, false));
        let lines: Vec<_> = shapes.iter().filter(|s| matches!(s, Shape::Line(..))).collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(*lines[0], Shape::Line(Point::new(360, 200), Point::new(370, 200), class_color(VehicleClass::Car)));
    }

    #[test]
    fn box_adds_its_edges() {
        let profile = CameraProfile::datlcam2();
        let mut t = car(1, 300);
        t.rect = Rect::new(300, 200, 420, 300);

        let flat = track_shapes(std::slice::from_ref(&t), &profile, &opts(35, false)).len();
        let boxed = track_shapes(std::slice::from_ref(&t), &profile, &opts(35, true)).len();

        assert_eq!(boxed, flat + Box3d::EDGES.len());
    }

    #[test]
    fn panels_list_log_and_totals() {
        let profile = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&profile, 14);

        let mut tracks = vec![car(1, 300), car(2, 300)];
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        for t in &mut tracks {
            t.start_time = Some(at + chrono::Duration::seconds(t.id as i64));
            t.end_time = Some(at);
        }
        ledger.collect(&mut tracks);

        let log = log_lines(&[&ledger]);
        assert_eq!(log.len(), 2);
        assert!(log[0].text.starts_with("car     08:00:02  lane 1"));

        let counts = count_lines(&[&ledger, &ledger]);
        assert_eq!(counts.len(), VehicleClass::ALL.len() + 2);
        assert_eq!(counts[counts.len() - 2].text, "Total : 0");
        assert_eq!(counts[counts.len() - 1].color, WRONG_WAY);
    }

    #[test]
    fn scene_height_is_the_tallest_camera() {
        let a = Array3::<u8>::zeros((540, 960, 3));
        let b = Array3::<u8>::zeros((480, 640, 3));
        let scene = Scene {
            cameras: vec![
                CameraView {
                    image: a.view(),
                    shapes: vec![],
                },
                CameraView {
                    image: b.view(),
                    shapes: vec![],
                },
            ],
            log: vec![],
            counts: vec![],
        };

        assert_eq!(scene.height(), 540);
    }
}
