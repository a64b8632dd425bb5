//! Bounding box geometry.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates (may extend past the frame).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge x-coordinate
    pub x: f64,
    /// Top edge y-coordinate
    pub y: f64,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Build from corners normalized to [0, 1], scaled to a frame.
    pub fn from_normalized_corners(
        corners: [f32; 4],
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let (fw, fh) = (frame_width as f64, frame_height as f64);
        Self::from_corners(
            corners[0] as f64 * fw,
            corners[1] as f64 * fh,
            corners[2] as f64 * fw,
            corners[3] as f64 * fh,
        )
    }

    /// Right edge x-coordinate.
    #[inline]
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge y-coordinate.
    #[inline]
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    /// Box area in pixels.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Clamp to a `frame_width` x `frame_height` frame.
    ///
    /// The origin is truncated to whole pixels and pulled inside the frame,
    /// the size is truncated and cut at the right/bottom edges. Returns `None`
    /// when nothing of the box remains.
    pub fn clamp_to_frame(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        if !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()) {
            return None;
        }

        let x = (self.x as i64).max(0);
        let y = (self.y as i64).max(0);
        let width = (frame_width as i64 - x).min(self.width as i64);
        let height = (frame_height as i64 - y).min(self.height as i64);

        if width <= 0 || height <= 0 {
            return None;
        }

        Some(PixelRect {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }
}

/// Integer rectangle fully inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}
