//! Decoded frames and extracted face crops.

use dfd_models::ChannelOrder;

use crate::error::{MediaError, MediaResult};

/// A single decoded frame, packed BGR24, row-major.
#[derive(Clone)]
pub struct RawFrame {
    /// Position of the frame in decode order (0-based, before stride sampling)
    pub index: u64,
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl RawFrame {
    /// Bytes per pixel of the packed BGR24 layout.
    pub const CHANNELS: usize = 3;

    /// Wrap a decoded buffer, checking it holds exactly one frame.
    pub fn new(index: u64, width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = Self::byte_len(width, height)?;
        if data.len() != expected {
            return Err(MediaError::internal(format!(
                "Frame {} has {} bytes, expected {} for {}x{}",
                index,
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            index,
            width,
            height,
            data,
        })
    }

    /// Number of bytes a `width` x `height` BGR24 frame occupies.
    pub fn byte_len(width: u32, height: u32) -> MediaResult<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(Self::CHANNELS))
            .ok_or_else(|| {
                MediaError::resource_exhausted(format!("Frame size {}x{} overflows", width, height))
            })
    }

    /// Packed BGR bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame and return its buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Square face crop ready for the classifier.
///
/// `pixels` is `size * size * 3` bytes, row-major, channels in `order`.
/// `confidence` is the detector score of the proposal the crop was cut from.
#[derive(Clone, PartialEq)]
pub struct FaceCrop {
    pub frame_index: u64,
    pub size: u32,
    pub order: ChannelOrder,
    pub confidence: f32,
    pixels: Vec<u8>,
}

impl FaceCrop {
    pub fn new(
        frame_index: u64,
        size: u32,
        order: ChannelOrder,
        confidence: f32,
        pixels: Vec<u8>,
    ) -> MediaResult<Self> {
        let expected = RawFrame::byte_len(size, size)?;
        if pixels.len() != expected {
            return Err(MediaError::internal(format!(
                "Crop from frame {} has {} bytes, expected {} for {}x{}",
                frame_index,
                pixels.len(),
                expected,
                size,
                size
            )));
        }
        Ok(Self {
            frame_index,
            size,
            order,
            confidence,
            pixels,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for FaceCrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceCrop")
            .field("frame_index", &self.frame_index)
            .field("size", &self.size)
            .field("order", &self.order)
            .field("confidence", &self.confidence)
            .finish()
    }
}
