//! Analysis metrics.
//!
//! Recorded through the `metrics` facade; the embedding process decides
//! whether and where they are exported.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const ANALYSES_TOTAL: &str = "dfd_analyses_total";
    pub const ANALYSIS_DURATION_SECONDS: &str = "dfd_analysis_duration_seconds";
    pub const ANALYSES_IN_FLIGHT: &str = "dfd_analyses_in_flight";

    pub const CACHE_HITS_TOTAL: &str = "dfd_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "dfd_cache_misses_total";

    pub const FRAMES_PULLED_TOTAL: &str = "dfd_frames_pulled_total";
    pub const FACES_EXTRACTED_TOTAL: &str = "dfd_faces_extracted_total";
    pub const BLOCKS_SCORED_TOTAL: &str = "dfd_blocks_scored_total";
}

/// Record a finished analysis. `outcome` is the verdict or error code.
pub fn record_analysis(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::ANALYSES_TOTAL, &labels).increment(1);
    histogram!(names::ANALYSIS_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_analyses_in_flight(count: usize) {
    gauge!(names::ANALYSES_IN_FLIGHT).set(count as f64);
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record decoding and detection volume for one analysis.
pub fn record_extraction(frames_pulled: usize, faces: usize) {
    counter!(names::FRAMES_PULLED_TOTAL).increment(frames_pulled as u64);
    counter!(names::FACES_EXTRACTED_TOTAL).increment(faces as u64);
}

pub fn record_blocks_scored(blocks: usize) {
    counter!(names::BLOCKS_SCORED_TOTAL).increment(blocks as u64);
}
