//! Detection results.
//!
//! A [`DetectionResult`] is produced once per successful analysis and is
//! immutable afterwards; the constructors enforce the label rules so no
//! caller can assemble an inconsistent result. [`DetectionReport`] is the
//! caller-facing JSON shape with the fake ratio rendered as a percentage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::verdict::Verdict;

/// Block scores strictly above this value count as fake blocks.
///
/// Independent of the configurable decision threshold, which applies to the
/// ratio of fake blocks rather than to individual scores.
pub const FAKE_SCORE_CUTOFF: f32 = 0.5;

/// Outcome of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    label: Verdict,
    max_score: f32,
    fake_ratio: f32,
    processing_time_seconds: f64,
    is_fake: bool,
}

impl DetectionResult {
    /// Result for a video that yielded fewer face crops than one block needs.
    ///
    /// Score and ratio are forced to zero regardless of the threshold.
    pub fn unknown(processing_time_seconds: f64) -> Self {
        Self {
            label: Verdict::Unknown,
            max_score: 0.0,
            fake_ratio: 0.0,
            processing_time_seconds,
            is_fake: false,
        }
    }

    /// Result for a scored video.
    ///
    /// The label is FAKE iff `fake_ratio >= threshold`. Non-finite scores are
    /// reported as zero.
    pub fn scored(fake_ratio: f32, max_score: f32, threshold: f32, processing_time_seconds: f64) -> Self {
        let fake_ratio = if fake_ratio.is_finite() {
            fake_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let max_score = if max_score.is_finite() { max_score } else { 0.0 };
        let is_fake = fake_ratio >= threshold;

        Self {
            label: if is_fake { Verdict::Fake } else { Verdict::Real },
            max_score,
            fake_ratio,
            processing_time_seconds,
            is_fake,
        }
    }

    /// FAKE, REAL or UNKNOWN.
    pub fn label(&self) -> Verdict {
        self.label
    }

    /// Highest block probability seen (0 when no block was scored).
    pub fn max_score(&self) -> f32 {
        self.max_score
    }

    /// Fraction of blocks scored above [`FAKE_SCORE_CUTOFF`].
    pub fn fake_ratio(&self) -> f32 {
        self.fake_ratio
    }

    /// Wall time from request start to verdict.
    pub fn processing_time_seconds(&self) -> f64 {
        self.processing_time_seconds
    }

    /// Whether the label is FAKE.
    pub fn is_fake(&self) -> bool {
        self.is_fake
    }

    /// Fake ratio formatted as a percentage with two decimals, e.g. `"50.00%"`.
    pub fn fake_ratio_percent(&self) -> String {
        format!("{:.2}%", self.fake_ratio * 100.0)
    }

    /// Human-readable summary stored alongside persisted results.
    pub fn processing_details(&self) -> String {
        format!(
            "Processed using ONNX Runtime face and video models - Fake Ratio: {}, Confidence: {:.4}",
            self.fake_ratio_percent(),
            self.max_score
        )
    }

    /// Build the caller-facing report.
    pub fn to_report(&self) -> DetectionReport {
        DetectionReport {
            result: self.label,
            score: self.max_score,
            processing_time: self.processing_time_seconds,
            fake_ratio: self.fake_ratio_percent(),
            fake_ratio_value: self.fake_ratio,
            fake: self.is_fake,
        }
    }
}

/// Report shape handed to the service layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub result: Verdict,
    pub score: f32,
    pub processing_time: f64,
    /// Percentage string, e.g. `"25.00%"`
    pub fake_ratio: String,
    /// Raw fraction in [0, 1]
    pub fake_ratio_value: f32,
    pub fake: bool,
}

/// Parse a fake ratio coming back from storage or an older report.
///
/// Accepts `"50.00%"`, `"50"`, `"0.5"` and returns a fraction clamped to
/// [0, 1]. Values carrying a `%` sign are always treated as percentages; bare
/// numbers above 1 are assumed to be percentages too. Garbage yields 0.
pub fn parse_fake_ratio(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let is_percent = trimmed.ends_with('%');
    let number = trimmed.trim_end_matches('%').trim();

    let Ok(mut ratio) = number.parse::<f64>() else {
        return 0.0;
    };
    if !ratio.is_finite() {
        return 0.0;
    }
    if is_percent || ratio > 1.0 {
        ratio /= 100.0;
    }
    ratio.clamp(0.0, 1.0)
}
