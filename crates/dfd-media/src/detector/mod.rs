//! Face detection and crop extraction.
//!
//! A detector looks at one decoded frame and returns at most one face crop.
//! Proposals are consumed in the network's native output order and the first
//! one strictly above the confidence floor wins; there is no re-ranking and
//! no multi-face output.

pub mod ssd;
pub mod yunet;

use std::sync::Arc;

use dfd_models::{AnalysisConfig, ChannelOrder, DetectorBackend};
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

use crate::error::{MediaError, MediaResult};
use crate::frame::{FaceCrop, RawFrame};
use crate::geometry::{BoundingBox, PixelRect};

pub use ssd::SsdFaceDetector;
pub use yunet::YuNetFaceDetector;

/// Finds the face in a frame and returns it as a classifier-ready crop.
pub trait FaceDetector: Send + Sync {
    /// `Ok(None)` when no face clears the confidence floor.
    fn detect(&self, frame: &RawFrame) -> MediaResult<Option<FaceCrop>>;

    fn name(&self) -> &'static str;
}

/// One candidate face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceProposal {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Output geometry of extracted crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropSpec {
    pub size: u32,
    pub order: ChannelOrder,
}

impl From<&AnalysisConfig> for CropSpec {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            size: config.crop_size,
            order: config.channel_order,
        }
    }
}

/// The proposal a detector settled on, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedFace {
    pub rect: PixelRect,
    pub confidence: f32,
}

/// Pick the first proposal strictly above `floor` whose box still covers
/// part of the frame after clamping.
pub fn select_face<I>(proposals: I, floor: f32, frame_width: u32, frame_height: u32) -> Option<SelectedFace>
where
    I: IntoIterator<Item = FaceProposal>,
{
    proposals
        .into_iter()
        .filter(|p| p.confidence > floor)
        .find_map(|p| {
            p.bbox
                .clamp_to_frame(frame_width, frame_height)
                .map(|rect| SelectedFace {
                    rect,
                    confidence: p.confidence,
                })
        })
}

/// Cut `face.rect` out of a BGR frame, resize it to `spec.size` square and
/// emit it in `spec.order`.
pub fn extract_crop(frame: &RawFrame, face: SelectedFace, spec: CropSpec) -> MediaResult<FaceCrop> {
    let rect = face.rect;
    if rect.x + rect.width > frame.width || rect.y + rect.height > frame.height {
        return Err(MediaError::detection_failed(format!(
            "Crop {:?} outside {}x{} frame",
            rect, frame.width, frame.height
        )));
    }

    let stride = frame.width as usize * RawFrame::CHANNELS;
    let row_len = rect.width as usize * RawFrame::CHANNELS;
    let mut region = Vec::with_capacity(row_len * rect.height as usize);
    for y in rect.y..rect.y + rect.height {
        let start = y as usize * stride + rect.x as usize * RawFrame::CHANNELS;
        region.extend_from_slice(&frame.data()[start..start + row_len]);
    }

    // Channels are still BGR here; the Rgb pixel type is only a container
    let region: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(rect.width, rect.height, region)
            .ok_or_else(|| MediaError::internal("Failed to create crop buffer"))?;

    let resized = if rect.width == spec.size && rect.height == spec.size {
        region
    } else {
        image::imageops::resize(&region, spec.size, spec.size, FilterType::Triangle)
    };

    let mut pixels = resized.into_raw();
    if spec.order == ChannelOrder::Rgb {
        for px in pixels.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }

    FaceCrop::new(frame.index, spec.size, spec.order, face.confidence, pixels)
}

/// Load the configured detector.
///
/// `replicas` is the number of detection workers; backends that serialize on
/// a native handle keep one handle per worker.
pub fn create_detector(config: &AnalysisConfig, replicas: usize) -> MediaResult<Arc<dyn FaceDetector>> {
    let crop = CropSpec::from(config);
    match config.detector_backend {
        DetectorBackend::Ssd => Ok(Arc::new(SsdFaceDetector::load(
            &config.face_model_location,
            replicas,
            config.face_confidence_floor,
            crop,
        )?)),
        DetectorBackend::Yunet => Ok(Arc::new(YuNetFaceDetector::load(
            &config.face_model_location,
            replicas,
            config.face_confidence_floor,
            crop,
        )?)),
    }
}
