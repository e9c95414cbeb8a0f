use log::info;
use ndarray::ArrayView3;
use opencv::{
    core::{self, Mat, Scalar, Vector},
    imgproc,
    prelude::*,
    videoio,
};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::overlay::{Color, Scene, Shape, TextLine, PANEL_BG, PANEL_WIDTH};

const FONT_SCALE: f64 = 0.5;

#[inline]
fn scalar(c: Color) -> Scalar {
    Scalar::new(c[0] as f64, c[1] as f64, c[2] as f64, 0.0)
}

#[inline]
fn cv_point(p: crate::geometry::Point) -> core::Point {
    core::Point::new(p.x, p.y)
}

/// Copies a `height x width x 3` image into a BGR `Mat`.
fn to_mat(image: ArrayView3<u8>) -> Result<Mat, Error> {
    let (h, w, _) = image.dim();
    let image = image.as_standard_layout();
    let bytes = image
        .as_slice()
        .ok_or_else(|| Error::Video("image is not contiguous".into()))?;

    let mut mat = Mat::new_rows_cols_with_default(h as i32, w as i32, core::CV_8UC3, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(bytes);

    Ok(mat)
}

fn draw_shapes(frame: &mut Mat, shapes: &[Shape]) -> opencv::Result<()> {
    for shape in shapes {
        match shape {
            Shape::Rect(r, c) => {
                let rect = core::Rect::new(r.x1, r.y1, r.width(), r.height());
                imgproc::rectangle(frame, rect, scalar(*c), 2, imgproc::LINE_8, 0)?;
            }
            Shape::Line(a, b, c) => {
                imgproc::line(frame, cv_point(*a), cv_point(*b), scalar(*c), 2, imgproc::LINE_8, 0)?;
            }
        }
    }

    Ok(())
}

fn panel(height: i32, lines: &[TextLine]) -> opencv::Result<Mat> {
    let mut p = Mat::new_rows_cols_with_default(height, PANEL_WIDTH as i32, core::CV_8UC3, scalar(PANEL_BG))?;
    let mut base_line = 0;

    let mut y = 0;
    for line in lines {
        let size = imgproc::get_text_size(&line.text, imgproc::FONT_HERSHEY_SIMPLEX, FONT_SCALE, 1, &mut base_line)?;
        y += size.height + 10;
        if y > height {
            break;
        }

        imgproc::put_text(
            &mut p,
            &line.text,
            core::Point::new(10, y),
            imgproc::FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            scalar(line.color),
            1,
            imgproc::LINE_AA,
            false,
        )?;
    }

    Ok(p)
}

/// Draws and concatenates the scene into a single BGR frame.
pub fn render(scene: &Scene<'_>) -> Result<Mat, Error> {
    let height = scene.height() as i32;
    let mut parts = Vector::<Mat>::new();

    parts.push(panel(height, &scene.log)?);
    for cam in &scene.cameras {
        let mut frame = to_mat(cam.image)?;
        draw_shapes(&mut frame, &cam.shapes)?;
        parts.push(frame);
    }
    parts.push(panel(height, &scene.counts)?);

    let mut out = Mat::default();
    core::hconcat(&parts, &mut out)?;

    Ok(out)
}

/// XVID `.avi` writer; reopened whenever the path or the frame size changes.
pub struct OpenCvVideoSink {
    writer: Option<videoio::VideoWriter>,
    path: Option<PathBuf>,
    size: Option<(i32, i32)>,
    fps: f64,
}

impl OpenCvVideoSink {
    pub fn new(fps: f64) -> Self {
        Self {
            writer: None,
            path: None,
            size: None,
            fps,
        }
    }

    fn reinit(&mut self, path: &Path, size: (i32, i32)) -> Result<(), Error> {
        self.close()?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let writer = videoio::VideoWriter::new(
            &path.to_string_lossy(),
            videoio::VideoWriter::fourcc(b'X' as _, b'V' as _, b'I' as _, b'D' as _)?,
            self.fps,
            core::Size::new(size.0, size.1),
            true,
        )?;

        if !writer.is_opened()? {
            return Err(Error::Video(format!("cannot open {}", path.display())));
        }

        info!("video: writing {}x{} to {}", size.0, size.1, path.display());
        self.writer = Some(writer);
        self.path = Some(path.to_path_buf());
        self.size = Some(size);

        Ok(())
    }
}

impl crate::overlay::VideoSink for OpenCvVideoSink {
    fn write(&mut self, path: &Path, scene: &Scene<'_>) -> Result<(), Error> {
        let frame = render(scene)?;
        let size = (frame.cols(), frame.rows());

        if self.writer.is_none() || self.size != Some(size) || self.path.as_deref() != Some(path) {
            self.reinit(path, size)?;
        }

        match self.writer.as_mut() {
            Some(w) => Ok(w.write(&frame)?),
            None => Err(Error::Video("no open video".into())),
        }
    }

    fn close(&mut self) -> Result<Option<PathBuf>, Error> {
        self.size = None;

        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(self.path.take())
    }
}
