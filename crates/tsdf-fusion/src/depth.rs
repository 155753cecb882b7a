//! Depth frames.
//!
//! A [`DepthFrame`] is a dense row-major image of metric depths tagged with
//! the camera frame it was captured in and its capture time.  Samples that
//! are non-finite or `<= 0` mean "no return" and are never integrated.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Raised when the pixel buffer does not match the declared image size.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("depth buffer holds {actual} samples, {width}x{height} needs {expected}")]
pub struct DepthFrameError {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// One depth image in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    frame_id: String,
    stamp: DateTime<Utc>,
    width: u32,
    height: u32,
    data: Vec<f32>,
}

/// True when `d` is a usable depth measurement.
pub fn is_valid_depth(d: f32) -> bool {
    d.is_finite() && d > 0.0
}

impl DepthFrame {
    /// Wrap a row-major buffer of depths in metres.
    pub fn new(
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
        width: u32,
        height: u32,
        data: Vec<f32>,
    ) -> Result<Self, DepthFrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(DepthFrameError {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            frame_id: frame_id.into(),
            stamp,
            width,
            height,
            data,
        })
    }

    /// Convert a 16-bit millimetre image (`0` = no return), the usual
    /// output of structured-light and ToF sensors.
    pub fn from_millimeters(
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
        width: u32,
        height: u32,
        millimeters: &[u16],
    ) -> Result<Self, DepthFrameError> {
        let data = millimeters
            .iter()
            .map(|&mm| if mm == 0 { f32::NAN } else { mm as f32 * 0.001 })
            .collect();
        Self::new(frame_id, stamp, width, height, data)
    }

    /// A frame reporting the same depth at every pixel.
    pub fn constant(frame_id: impl Into<String>, stamp: DateTime<Utc>, width: u32, height: u32, depth: f32) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
            width,
            height,
            data: vec![depth; width as usize * height as usize],
        }
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Valid depth at `(col, row)`; `None` outside the image or for an
    /// invalid sample.
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let d = self.data[row as usize * self.width as usize + col as usize];
        is_valid_depth(d).then_some(d)
    }

    /// Number of pixels holding a valid measurement.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|d| is_valid_depth(**d)).count()
    }
}
