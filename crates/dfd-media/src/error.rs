//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while decoding, detecting or scoring a video.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Video is {duration:.1}s long, limit is {limit:.1}s")]
    DurationExceeded { duration: f64, limit: f64 },

    #[error("Unreadable or corrupt media: {0}")]
    UnreadableMedia(String),

    #[error("Face detection failed: {0}")]
    DetectionFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create an inference failure error.
    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::InferenceFailed(message.into())
    }

    /// Create an unreadable media error.
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self::UnreadableMedia(message.into())
    }

    /// Create a resource exhaustion error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Input was rejected before any decoding work started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_) | Self::FileTooLarge { .. } | Self::DurationExceeded { .. }
        )
    }
}
