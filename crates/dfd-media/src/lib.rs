//! Media side of the deepfake detection pipeline.
//!
//! This crate provides:
//! - FFprobe metadata and FFmpeg raw frame decoding behind [`FrameSource`]
//! - Face detection and crop extraction behind [`FaceDetector`]
//! - Temporal block assembly into the classifier tensor
//! - Batched classifier inference behind [`Classifier`]

pub mod batch;
pub mod command;
pub mod detector;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod inference;
pub mod onnx;
pub mod probe;
pub mod source;

pub use batch::{block_count, build_block_tensor, BlockTensor, BLOCK_LEN};
pub use command::RawVideoCommand;
pub use detector::{create_detector, CropSpec, FaceDetector, FaceProposal, SelectedFace};
pub use error::{MediaError, MediaResult};
pub use frame::{FaceCrop, RawFrame};
pub use geometry::{BoundingBox, PixelRect};
pub use inference::{Classifier, ClassifierNames, InferenceEngine, OrtClassifier};
pub use probe::{probe_video, VideoInfo};
pub use source::{
    open_session, DecodingSession, FfmpegFrameSource, FrameSampler, FrameSource, SessionGuard,
    SourceLimits, StreamInfo,
};
