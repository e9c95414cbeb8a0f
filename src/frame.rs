use chrono::NaiveDateTime;
use ndarray::prelude::*;

use crate::error::Error;

/// Working resolution of the camera frames.
pub const FRAME_WIDTH: usize = 960;
pub const FRAME_HEIGHT: usize = 540;

/// One captured image, `height x width x 3` BGR.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based capture counter, shared by every stage handling the frame.
    pub index: u64,
    pub captured_at: NaiveDateTime,
    pub image: Array3<u8>,
}

impl Frame {
    pub fn new(index: u64, captured_at: NaiveDateTime, image: Array3<u8>) -> Self {
        Self {
            index,
            captured_at,
            image,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.dim().1
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.dim().0
    }
}

/// Video capture seam. Decoding is outside this crate; implementations wrap
/// whatever capture library the deployment uses.
pub trait FrameSource: Send {
    /// Next image, `Ok(None)` when the source delivered nothing.
    fn read(&mut self) -> Result<Option<Array3<u8>>, Error>;

    /// Drops and re-establishes the underlying stream.
    fn reopen(&mut self) -> Result<(), Error>;

    /// Network streams are retried forever, files simply end.
    fn is_network(&self) -> bool;

    fn name(&self) -> &str {
        "source"
    }
}

/// Produces a fixed number of flat grey frames; stands in for a camera when
/// detections come from a replay file.
pub struct BlankSource {
    remaining: usize,
    dims: (usize, usize),
}

impl BlankSource {
    pub fn new(frames: usize) -> Self {
        Self::with_dims(frames, FRAME_WIDTH, FRAME_HEIGHT)
    }

    pub fn with_dims(frames: usize, width: usize, height: usize) -> Self {
        Self {
            remaining: frames,
            dims: (width, height),
        }
    }
}

impl FrameSource for BlankSource {
    fn read(&mut self) -> Result<Option<Array3<u8>>, Error> {
        if self.remaining == 0 {
            return Ok(None);
        }

        self.remaining -= 1;
        let (w, h) = self.dims;

        Ok(Some(Array3::from_elem((h, w, 3), 96)))
    }

    fn reopen(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn is_network(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "blank"
    }
}
