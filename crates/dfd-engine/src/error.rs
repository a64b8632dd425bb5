//! Engine error types.

use std::time::Duration;

use dfd_media::MediaError;
use dfd_models::ConfigError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Message surfaced to callers for run faults.
pub const GENERIC_FAILURE_MESSAGE: &str = "analysis failed";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("No face detected in any examined frame")]
    NoFaceDetected,

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Detection worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    pub fn worker_panicked(msg: impl Into<String>) -> Self {
        Self::WorkerPanicked(msg.into())
    }

    /// Stable code for the caller layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Media(MediaError::FileTooLarge { .. }) => "VIDEO_FILE_TOO_LARGE",
            EngineError::Media(MediaError::DurationExceeded { .. }) => "VIDEO_TOO_LONG",
            EngineError::Media(MediaError::FileNotFound(_)) => "VIDEO_NOT_FOUND",
            EngineError::Media(MediaError::UnreadableMedia(_))
            | EngineError::Media(MediaError::FfprobeFailed { .. })
            | EngineError::Media(MediaError::JsonParse(_)) => "INVALID_OR_CORRUPTED_VIDEO",
            EngineError::Media(MediaError::DetectionFailed(_)) => "DETECTION_FAILED",
            EngineError::NoFaceDetected => "NO_FACE_DETECTED",
            _ => "FAILED_TO_ANALYZE_VIDEO",
        }
    }

    /// Rejected input; aborts early and is never retried.
    pub fn is_validation(&self) -> bool {
        match self {
            EngineError::Media(e) => {
                e.is_validation() || matches!(e, MediaError::UnreadableMedia(_))
            }
            EngineError::Config(_) => true,
            _ => false,
        }
    }

    /// Expected outcome of analysing a video without usable faces.
    pub fn is_expected(&self) -> bool {
        matches!(self, EngineError::NoFaceDetected)
    }

    /// Run fault: logged with full context, reported generically.
    pub fn is_fault(&self) -> bool {
        !(self.is_validation()
            || self.is_expected()
            || matches!(self, EngineError::Cancelled | EngineError::ShuttingDown))
    }

    /// Message safe to show outside the process.
    pub fn public_message(&self) -> String {
        if self.is_fault() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            EngineError::Cancelled
        } else {
            EngineError::WorkerPanicked(err.to_string())
        }
    }
}
