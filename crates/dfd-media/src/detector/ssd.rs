//! ResNet-10 SSD face detector (300x300 Caffe model exported to ONNX).
//!
//! Input is the whole frame stretched to 300x300, BGR, mean-subtracted
//! (104, 177, 123), NCHW, no scaling. Output is `[1, 1, N, 7]` with rows
//! `[image_id, label, confidence, x1, y1, x2, y2]`, corners normalized to
//! the frame.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use super::{extract_crop, select_face, CropSpec, FaceDetector, FaceProposal};
use crate::error::{MediaError, MediaResult};
use crate::frame::{FaceCrop, RawFrame};
use crate::geometry::BoundingBox;
use crate::onnx::{create_session, input_names, output_names};

/// Network input edge.
pub const SSD_INPUT_SIZE: u32 = 300;

/// Per-channel mean, BGR order.
pub const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];

const ROW_WIDTH: usize = 7;

/// SSD detector with one ONNX session per detection worker.
pub struct SsdFaceDetector {
    sessions: Vec<Mutex<Session>>,
    input_name: String,
    output_name: String,
    confidence_floor: f32,
    crop: CropSpec,
}

impl SsdFaceDetector {
    pub fn load(
        model_path: &Path,
        replicas: usize,
        confidence_floor: f32,
        crop: CropSpec,
    ) -> MediaResult<Self> {
        let replicas = replicas.max(1);
        let intra_threads = if replicas > 1 { Some(1) } else { None };

        let sessions = (0..replicas)
            .map(|_| create_session(model_path, intra_threads).map(Mutex::new))
            .collect::<MediaResult<Vec<_>>>()?;

        let (input_name, output_name) = {
            let first = sessions[0]
                .lock()
                .map_err(|_| MediaError::internal("SSD session poisoned"))?;
            let input = input_names(&first).into_iter().next();
            let output = output_names(&first).into_iter().next();
            match (input, output) {
                (Some(i), Some(o)) => (i, o),
                _ => {
                    return Err(MediaError::detection_failed(
                        "SSD model must declare one input and one output",
                    ))
                }
            }
        };

        info!(
            model = %model_path.display(),
            replicas,
            input = %input_name,
            output = %output_name,
            "SSD face detector loaded"
        );

        Ok(Self {
            sessions,
            input_name,
            output_name,
            confidence_floor,
            crop,
        })
    }

    fn session_slot(&self) -> &Mutex<Session> {
        let index = rayon::current_thread_index().unwrap_or(0) % self.sessions.len();
        &self.sessions[index]
    }

    fn run(&self, blob: Vec<f32>) -> MediaResult<(Vec<i64>, Vec<f32>)> {
        let shape = vec![1usize, 3, SSD_INPUT_SIZE as usize, SSD_INPUT_SIZE as usize];
        let input: Value = Tensor::from_array((shape, blob.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::detection_failed(format!("ORT tensor: {e}")))?;

        let mut session = self
            .session_slot()
            .lock()
            .map_err(|_| MediaError::detection_failed("SSD session poisoned"))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| MediaError::detection_failed(format!("ORT run failed: {e}")))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MediaError::detection_failed("SSD returned no detections tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("ORT extract: {e}")))?;

        Ok((shape.to_vec(), data.to_vec()))
    }
}

impl FaceDetector for SsdFaceDetector {
    fn detect(&self, frame: &RawFrame) -> MediaResult<Option<FaceCrop>> {
        let blob = blob_from_frame(frame)?;
        let (shape, data) = self.run(blob)?;
        let proposals = parse_detections(&shape, &data, frame.width, frame.height)?;

        let Some(face) = select_face(proposals, self.confidence_floor, frame.width, frame.height)
        else {
            debug!(frame = frame.index, "No face above confidence floor");
            return Ok(None);
        };

        extract_crop(frame, face, self.crop).map(Some)
    }

    fn name(&self) -> &'static str {
        "ssd"
    }
}

/// Stretch a BGR frame to the network input and lay it out NCHW with the
/// channel means subtracted.
pub fn blob_from_frame(frame: &RawFrame) -> MediaResult<Vec<f32>> {
    let view: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data())
            .ok_or_else(|| MediaError::detection_failed("Frame buffer does not match its size"))?;

    let resized = image::imageops::resize(&view, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);

    let plane = (SSD_INPUT_SIZE * SSD_INPUT_SIZE) as usize;
    let mut blob = vec![0.0f32; plane * 3];
    for (i, px) in resized.pixels().enumerate() {
        for c in 0..3 {
            blob[c * plane + i] = px[c] as f32 - SSD_MEAN_BGR[c];
        }
    }
    Ok(blob)
}

/// Decode the `[.., N, 7]` detection tensor into frame-space proposals,
/// keeping network order.
pub fn parse_detections(
    shape: &[i64],
    data: &[f32],
    frame_width: u32,
    frame_height: u32,
) -> MediaResult<Vec<FaceProposal>> {
    if shape.last().copied() != Some(ROW_WIDTH as i64) {
        return Err(MediaError::detection_failed(format!(
            "Unexpected SSD output shape: {:?}",
            shape
        )));
    }

    Ok(data
        .chunks_exact(ROW_WIDTH)
        .map(|row| FaceProposal {
            bbox: BoundingBox::from_normalized_corners(
                [row[3], row[4], row[5], row[6]],
                frame_width,
                frame_height,
            ),
            confidence: row[2],
        })
        .collect())
}
