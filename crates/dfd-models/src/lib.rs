//! Shared data models for the deepfake detection engine.
//!
//! This crate provides Serde-serializable types for:
//! - Verdict labels (FAKE / REAL / UNKNOWN)
//! - Detection results and their caller-facing report shape
//! - Analysis configuration and its validation
//! - Supported video containers

pub mod config;
pub mod container;
pub mod result;
pub mod verdict;

// Re-export common types
pub use config::{AnalysisConfig, ChannelOrder, ConfigError, DetectorBackend};
pub use container::VideoContainer;
pub use result::{parse_fake_ratio, DetectionReport, DetectionResult, FAKE_SCORE_CUTOFF};
pub use verdict::{Verdict, VerdictParseError};
