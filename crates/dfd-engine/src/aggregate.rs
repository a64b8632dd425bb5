//! Block score aggregation.

use std::time::Duration;

use dfd_models::{DetectionResult, FAKE_SCORE_CUTOFF};

/// Fold per-block scores into a verdict.
///
/// A block is fake when its score is strictly above [`FAKE_SCORE_CUTOFF`];
/// the video is FAKE when the fraction of fake blocks reaches `threshold`.
/// No scores means UNKNOWN, whatever the threshold.
pub fn aggregate(scores: &[f32], threshold: f32, elapsed: Duration) -> DetectionResult {
    let seconds = elapsed.as_secs_f64();
    if scores.is_empty() {
        return DetectionResult::unknown(seconds);
    }

    let fake_blocks = scores.iter().filter(|s| **s > FAKE_SCORE_CUTOFF).count();
    let fake_ratio = fake_blocks as f32 / scores.len() as f32;
    let max_score = scores.iter().copied().fold(f32::MIN, f32::max);

    DetectionResult::scored(fake_ratio, max_score, threshold, seconds)
}
