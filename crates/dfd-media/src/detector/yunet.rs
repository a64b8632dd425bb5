//! OpenCV YuNet face detector.
//!
//! Alternative to the SSD backend for deployments that already ship OpenCV.
//! YuNet returns faces sorted by score after NMS, so "first above the floor"
//! means "best scoring face".
//!
//! # Requirements
//! - the `opencv` cargo feature
//! - OpenCV 4.8+ for the 2023mar models

use std::path::Path;

#[cfg(feature = "opencv")]
use std::sync::Mutex;

#[cfg(feature = "opencv")]
use opencv::core::{Mat, Ptr, Scalar, Size, CV_8UC3};
#[cfg(feature = "opencv")]
use opencv::objdetect::FaceDetectorYN;
#[cfg(feature = "opencv")]
use opencv::prelude::*;
#[cfg(feature = "opencv")]
use tracing::{debug, info, warn};

use super::CropSpec;
#[cfg(feature = "opencv")]
use super::{extract_crop, select_face, FaceDetector, FaceProposal};
use crate::error::{MediaError, MediaResult};
#[cfg(feature = "opencv")]
use crate::frame::{FaceCrop, RawFrame};
#[cfg(feature = "opencv")]
use crate::geometry::BoundingBox;

/// NMS threshold for face detection
#[cfg(feature = "opencv")]
const NMS_THRESHOLD: f32 = 0.3;

/// Top K faces to keep
#[cfg(feature = "opencv")]
const TOP_K: i32 = 10;

/// Calculate the YuNet input size for a frame.
///
/// Keeps the aspect ratio, caps at 960x540 and rounds to multiples of 32.
pub fn calculate_input_size(frame_width: u32, frame_height: u32) -> (i32, i32) {
    let target_width = 960.0;
    let target_height = 540.0;

    let scale = (frame_width as f64 / target_width)
        .max(frame_height as f64 / target_height)
        .max(1.0);

    let mut input_width = (frame_width as f64 / scale).round() as i32;
    let mut input_height = (frame_height as f64 / scale).round() as i32;

    const ALIGNMENT: i32 = 32;
    input_width = ((input_width + ALIGNMENT / 2) / ALIGNMENT) * ALIGNMENT;
    input_height = ((input_height + ALIGNMENT / 2) / ALIGNMENT) * ALIGNMENT;

    input_width = input_width.clamp(160, 960);
    input_height = input_height.clamp(120, 540);

    (input_width, input_height)
}

/// YuNet detector with one OpenCV handle per detection worker.
#[cfg(feature = "opencv")]
pub struct YuNetFaceDetector {
    detectors: Vec<Mutex<Ptr<FaceDetectorYN>>>,
    confidence_floor: f32,
    crop: CropSpec,
}

#[cfg(feature = "opencv")]
impl YuNetFaceDetector {
    pub fn load(
        model_path: &Path,
        replicas: usize,
        confidence_floor: f32,
        crop: CropSpec,
    ) -> MediaResult<Self> {
        let model_metadata = std::fs::metadata(model_path)
            .map_err(|_| MediaError::model_not_found(model_path.display().to_string()))?;
        if model_metadata.len() < 50_000 {
            return Err(MediaError::detection_failed(format!(
                "YuNet model file appears corrupted (size: {} bytes)",
                model_metadata.len()
            )));
        }

        let model = model_path.to_string_lossy().to_string();
        let detectors = (0..replicas.max(1))
            .map(|_| Self::create_detector(&model, confidence_floor).map(Mutex::new))
            .collect::<MediaResult<Vec<_>>>()?;

        info!(model = %model, replicas = detectors.len(), "YuNet face detector loaded");

        Ok(Self {
            detectors,
            confidence_floor,
            crop,
        })
    }

    /// Create the detector, trying the default DNN backend first.
    fn create_detector(model: &str, score_threshold: f32) -> MediaResult<Ptr<FaceDetectorYN>> {
        use opencv::dnn::{DNN_BACKEND_DEFAULT, DNN_BACKEND_OPENCV, DNN_TARGET_CPU};

        let backends = [
            (DNN_BACKEND_DEFAULT, DNN_TARGET_CPU, "default"),
            (DNN_BACKEND_OPENCV, DNN_TARGET_CPU, "opencv"),
        ];

        let mut last_error = String::new();
        for (backend_id, target_id, backend_name) in backends {
            match FaceDetectorYN::create(
                model,
                "",
                Size::new(320, 320),
                score_threshold,
                NMS_THRESHOLD,
                TOP_K,
                backend_id,
                target_id,
            ) {
                Ok(detector) => {
                    debug!("YuNet created with {} backend", backend_name);
                    return Ok(detector);
                }
                Err(e) => {
                    warn!("YuNet {} backend failed: {}", backend_name, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(MediaError::detection_failed(format!(
            "Failed to create YuNet detector with any backend: {}",
            last_error
        )))
    }

    fn slot(&self) -> &Mutex<Ptr<FaceDetectorYN>> {
        let index = rayon::current_thread_index().unwrap_or(0) % self.detectors.len();
        &self.detectors[index]
    }

    fn proposals(&self, frame: &RawFrame) -> MediaResult<Vec<FaceProposal>> {
        let cv = |e: opencv::Error| MediaError::detection_failed(format!("OpenCV: {e}"));

        let mut mat = Mat::new_rows_cols_with_default(
            frame.height as i32,
            frame.width as i32,
            CV_8UC3,
            Scalar::all(0.0),
        )
        .map_err(cv)?;
        mat.data_bytes_mut().map_err(cv)?.copy_from_slice(frame.data());

        let (input_w, input_h) = calculate_input_size(frame.width, frame.height);
        let mut resized = Mat::default();
        opencv::imgproc::resize(
            &mat,
            &mut resized,
            Size::new(input_w, input_h),
            0.0,
            0.0,
            opencv::imgproc::INTER_LINEAR,
        )
        .map_err(cv)?;

        let mut faces = Mat::default();
        {
            let mut detector = self
                .slot()
                .lock()
                .map_err(|_| MediaError::detection_failed("YuNet handle poisoned"))?;
            detector.set_input_size(Size::new(input_w, input_h)).map_err(cv)?;
            detector.detect(&resized, &mut faces).map_err(cv)?;
        }

        if faces.rows() <= 0 || faces.cols() < 15 {
            return Ok(Vec::new());
        }

        let scale_x = frame.width as f64 / input_w as f64;
        let scale_y = frame.height as f64 / input_h as f64;

        let mut proposals = Vec::with_capacity(faces.rows() as usize);
        for i in 0..faces.rows() {
            let x = *faces.at_2d::<f32>(i, 0).map_err(cv)? as f64 * scale_x;
            let y = *faces.at_2d::<f32>(i, 1).map_err(cv)? as f64 * scale_y;
            let w = *faces.at_2d::<f32>(i, 2).map_err(cv)? as f64 * scale_x;
            let h = *faces.at_2d::<f32>(i, 3).map_err(cv)? as f64 * scale_y;
            let score = *faces.at_2d::<f32>(i, 14).map_err(cv)?;
            proposals.push(FaceProposal {
                bbox: BoundingBox::new(x, y, w, h),
                confidence: score,
            });
        }
        Ok(proposals)
    }
}

#[cfg(feature = "opencv")]
impl FaceDetector for YuNetFaceDetector {
    fn detect(&self, frame: &RawFrame) -> MediaResult<Option<FaceCrop>> {
        let proposals = self.proposals(frame)?;
        match select_face(proposals, self.confidence_floor, frame.width, frame.height) {
            Some(face) => extract_crop(frame, face, self.crop).map(Some),
            None => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "yunet"
    }
}

/// Stub for when OpenCV is not available
#[cfg(not(feature = "opencv"))]
pub struct YuNetFaceDetector;

#[cfg(not(feature = "opencv"))]
impl YuNetFaceDetector {
    pub fn load(
        _model_path: &Path,
        _replicas: usize,
        _confidence_floor: f32,
        _crop: CropSpec,
    ) -> MediaResult<Self> {
        Err(MediaError::detection_failed("OpenCV feature not enabled"))
    }
}

#[cfg(not(feature = "opencv"))]
impl super::FaceDetector for YuNetFaceDetector {
    fn detect(&self, _frame: &crate::frame::RawFrame) -> MediaResult<Option<crate::frame::FaceCrop>> {
        Err(MediaError::detection_failed("OpenCV feature not enabled"))
    }

    fn name(&self) -> &'static str {
        "yunet"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_size_is_aligned_and_bounded() {
        assert_eq!(calculate_input_size(1920, 1080), (960, 540));
        let (w, h) = calculate_input_size(640, 480);
        assert_eq!((w % 32, h % 32), (0, 0));
        assert_eq!(calculate_input_size(32, 32), (160, 120));
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_stub_reports_missing_feature() {
        let crop = CropSpec {
            size: 128,
            order: dfd_models::ChannelOrder::Rgb,
        };
        let err = YuNetFaceDetector::load(Path::new("yunet.onnx"), 1, 0.6, crop)
            .err()
            .unwrap();
        assert!(err.to_string().contains("OpenCV feature not enabled"));
    }
}
