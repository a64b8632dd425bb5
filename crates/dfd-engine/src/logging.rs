//! Structured analysis logging.
//!
//! Each analysis owns one `analysis` span carrying `request_id`, `file` and
//! the current `stage`; the stage field starts empty and is filled in as the
//! request moves through the pipeline. Events emitted through
//! [`AnalysisLogger`] land inside that span even when the caller is not
//! instrumented (completion and failure lines are logged after the span's
//! future has finished).

use std::fmt::Display;
use std::path::Path;

use dfd_models::DetectionResult;
use tracing::{error, field, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::EngineError;
use crate::stage::Stage;

/// Span handle for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisLogger {
    span: Span,
}

impl AnalysisLogger {
    pub fn new(request_id: &str, path: &Path) -> Self {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let span = tracing::info_span!(
            "analysis",
            request_id = %request_id,
            file = %file,
            stage = field::Empty,
        );
        Self { span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn started(&self, crop_size: u32, threshold: f32) {
        self.span
            .in_scope(|| info!(crop_size, threshold, "Scanning video for face blocks"));
    }

    pub fn cache_hit(&self, key: &impl Display, waited: bool) {
        self.span
            .in_scope(|| info!(key = %key, waited, "Verdict served from cache"));
    }

    /// One kept frame the detector could not process.
    pub fn frame_rejected(&self, seq: usize, reason: &impl Display) {
        self.span
            .in_scope(|| warn!(seq, "Face detection failed on kept frame: {}", reason));
    }

    pub fn faces_extracted(&self, faces: usize, kept: usize, pulled: usize, detector_errors: usize) {
        self.span.in_scope(|| {
            if detector_errors > 0 {
                warn!(faces, kept, pulled, detector_errors, "Faces extracted with detector errors");
            } else {
                info!(faces, kept, pulled, "Faces extracted");
            }
        });
    }

    pub fn no_full_block(&self, faces: usize) {
        self.span
            .in_scope(|| info!(faces, "Too few face frames for one block, verdict unknown"));
    }

    pub fn verdict(&self, result: &DetectionResult, elapsed_secs: f64) {
        self.span.in_scope(|| {
            info!(
                label = %result.label(),
                fake_ratio = %result.fake_ratio_percent(),
                max_score = result.max_score(),
                elapsed_secs,
                "Verdict reached"
            )
        });
    }

    /// Faults log at error level; rejected input and faceless videos at warn.
    pub fn failed(&self, err: &EngineError, failed_in: Stage) {
        self.span.in_scope(|| {
            if err.is_fault() {
                error!(code = err.code(), failed_in = failed_in.as_str(), "Analysis aborted: {}", err);
            } else {
                warn!(code = err.code(), failed_in = failed_in.as_str(), "Video rejected: {}", err);
            }
        });
    }
}

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, coloured
/// text otherwise. A second call is a no-op.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["dfd=info", "ort=warn", "onnxruntime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        warn!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_is_named_analysis() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let logger = AnalysisLogger::new("req-123", Path::new("/videos/a.mp4"));
            let meta = logger.span().metadata().unwrap();
            assert_eq!(meta.name(), "analysis");
            for name in ["request_id", "file", "stage"] {
                assert!(meta.fields().field(name).is_some(), "missing field {name}");
            }
        });
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
