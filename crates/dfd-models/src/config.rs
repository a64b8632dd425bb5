//! Analysis configuration.
//!
//! Everything that changes what a single analysis computes lives here. Two
//! fields (`crop_size`, `decision_threshold`) also feed the result cache
//! fingerprint, so changing either invalidates earlier results for a file.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted crop edge in pixels.
pub const MAX_CROP_SIZE: u32 = 1024;

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Channel order of the face crops handed to the classifier.
///
/// The shipped classifier was trained on BGR crops, so `Bgr` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    #[default]
    Bgr,
}

impl ChannelOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelOrder::Rgb => "rgb",
            ChannelOrder::Bgr => "bgr",
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rgb" => Ok(ChannelOrder::Rgb),
            "bgr" => Ok(ChannelOrder::Bgr),
            _ => Err(ConfigError::UnknownVariant {
                kind: "channel order",
                value: s.to_string(),
            }),
        }
    }
}

/// Face detector implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// ResNet-10 SSD (300x300) exported to ONNX, run through ONNX Runtime.
    #[default]
    Ssd,
    /// OpenCV FaceDetectorYN. Requires the `opencv` feature.
    Yunet,
}

impl DetectorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorBackend::Ssd => "ssd",
            DetectorBackend::Yunet => "yunet",
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectorBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ssd" | "res10" => Ok(DetectorBackend::Ssd),
            "yunet" => Ok(DetectorBackend::Yunet),
            _ => Err(ConfigError::UnknownVariant {
                kind: "detector backend",
                value: s.to_string(),
            }),
        }
    }
}

/// Per-analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisConfig {
    /// Square face crop edge in pixels
    pub crop_size: u32,
    /// Fake-ratio cutoff for the FAKE verdict
    pub decision_threshold: f32,
    /// Keep 1 of every N decoded frames
    pub frame_skip_stride: u32,
    /// Hard cap on frames pulled from the decoder
    pub max_frames_examined: usize,
    /// Hard cap on input file size
    pub max_file_size_bytes: u64,
    /// Hard cap on declared container duration
    pub max_duration_seconds: f64,
    /// Pretrained video classifier (ONNX)
    pub model_location: PathBuf,
    /// Face detector network
    pub face_model_location: PathBuf,
    /// Minimum detector confidence for a face to be accepted
    pub face_confidence_floor: f32,
    /// Which face detector to run
    pub detector_backend: DetectorBackend,
    /// Channel order the classifier was trained with
    pub channel_order: ChannelOrder,
    /// Width of the auxiliary feature input (fed as zeros)
    pub secondary_feature_width: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            crop_size: 128,
            decision_threshold: 0.4,
            frame_skip_stride: 1,
            max_frames_examined: 500,
            max_file_size_bytes: 100 * 1024 * 1024, // 100 MiB
            max_duration_seconds: 60.0,
            model_location: PathBuf::from("models/video/deepfake_video.onnx"),
            face_model_location: PathBuf::from("models/face/res10_300x300_ssd_iter_140000.onnx"),
            face_confidence_floor: 0.6,
            detector_backend: DetectorBackend::Ssd,
            channel_order: ChannelOrder::Bgr,
            secondary_feature_width: 140,
        }
    }
}

impl AnalysisConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            crop_size: env_parse("DFD_CROP_SIZE", defaults.crop_size),
            decision_threshold: env_parse("DFD_DECISION_THRESHOLD", defaults.decision_threshold),
            frame_skip_stride: env_parse("DFD_FRAME_SKIP", defaults.frame_skip_stride),
            max_frames_examined: env_parse("DFD_MAX_FRAMES", defaults.max_frames_examined),
            max_file_size_bytes: env_parse("DFD_MAX_FILE_SIZE_BYTES", defaults.max_file_size_bytes),
            max_duration_seconds: env_parse("DFD_MAX_DURATION_SECS", defaults.max_duration_seconds),
            model_location: std::env::var("DFD_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_location),
            face_model_location: std::env::var("DFD_FACE_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.face_model_location),
            face_confidence_floor: env_parse("DFD_FACE_CONFIDENCE", defaults.face_confidence_floor),
            detector_backend: match std::env::var("DFD_DETECTOR_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.detector_backend,
            },
            channel_order: match std::env::var("DFD_CHANNEL_ORDER") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.channel_order,
            },
            secondary_feature_width: env_parse(
                "DFD_SECONDARY_FEATURE_WIDTH",
                defaults.secondary_feature_width,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the crop size.
    pub fn with_crop_size(mut self, crop_size: u32) -> Self {
        self.crop_size = crop_size;
        self
    }

    /// Set the decision threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.decision_threshold = threshold;
        self
    }

    /// Set the frame skip stride.
    pub fn with_frame_skip(mut self, stride: u32) -> Self {
        self.frame_skip_stride = stride;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crop_size == 0 || self.crop_size > MAX_CROP_SIZE {
            return Err(ConfigError::invalid(
                "crop_size",
                format!("must be in 1..={}, got {}", MAX_CROP_SIZE, self.crop_size),
            ));
        }
        // crop * crop * 3 bytes per crop must stay addressable
        let crop = self.crop_size as usize;
        if crop
            .checked_mul(crop)
            .and_then(|px| px.checked_mul(3))
            .is_none()
        {
            return Err(ConfigError::invalid("crop_size", "overflows crop buffer size"));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(ConfigError::invalid(
                "decision_threshold",
                format!("must be in [0, 1], got {}", self.decision_threshold),
            ));
        }
        if self.frame_skip_stride == 0 {
            return Err(ConfigError::invalid("frame_skip_stride", "must be >= 1"));
        }
        if self.max_frames_examined == 0 {
            return Err(ConfigError::invalid("max_frames_examined", "must be > 0"));
        }
        if self.max_file_size_bytes == 0 {
            return Err(ConfigError::invalid("max_file_size_bytes", "must be > 0"));
        }
        if !(self.max_duration_seconds.is_finite() && self.max_duration_seconds > 0.0) {
            return Err(ConfigError::invalid(
                "max_duration_seconds",
                format!("must be a positive number, got {}", self.max_duration_seconds),
            ));
        }
        if !(0.0..=1.0).contains(&self.face_confidence_floor) {
            return Err(ConfigError::invalid(
                "face_confidence_floor",
                format!("must be in [0, 1], got {}", self.face_confidence_floor),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
