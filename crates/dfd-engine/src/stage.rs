//! Per-request lifecycle: stage tracking and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, Span};

/// Analysis stages, in order. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Init = 0,
    CacheCheck = 1,
    Decoding = 2,
    Detecting = 3,
    Inferring = 4,
    Aggregating = 5,
    Done = 6,
    Failed = 7,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::CacheCheck => "cache_check",
            Stage::Decoding => "decoding",
            Stage::Detecting => "detecting",
            Stage::Inferring => "inferring",
            Stage::Aggregating => "aggregating",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Stage::Init,
            1 => Stage::CacheCheck,
            2 => Stage::Decoding,
            3 => Stage::Detecting,
            4 => Stage::Inferring,
            5 => Stage::Aggregating,
            6 => Stage::Done,
            _ => Stage::Failed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage of one request, shared with its blocking workers.
///
/// Each transition is also recorded as the `stage` field of the request's
/// span.
#[derive(Debug, Clone)]
pub struct StageTracker {
    span: Span,
    current: Arc<AtomicU8>,
}

impl StageTracker {
    pub fn new(span: Span) -> Self {
        span.record("stage", Stage::Init.as_str());
        Self {
            span,
            current: Arc::new(AtomicU8::new(Stage::Init as u8)),
        }
    }

    pub fn current(&self) -> Stage {
        Stage::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Move to `next`. Terminal stages are final; later transitions are
    /// ignored.
    pub fn advance(&self, next: Stage) {
        let result = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if Stage::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            });
        if let Ok(previous) = result {
            self.span.record("stage", next.as_str());
            self.span.in_scope(|| {
                debug!(
                    from = Stage::from_u8(previous).as_str(),
                    to = next.as_str(),
                    "Stage transition"
                )
            });
        }
    }

    pub fn fail(&self) {
        self.advance(Stage::Failed);
    }
}

/// Cooperative cancellation flag checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Cancels when dropped, so abandoning the request future stops its
    /// blocking work.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progression() {
        let tracker = StageTracker::new(Span::none());
        assert_eq!(tracker.current(), Stage::Init);

        tracker.advance(Stage::CacheCheck);
        tracker.advance(Stage::Decoding);
        assert_eq!(tracker.current(), Stage::Decoding);

        tracker.advance(Stage::Done);
        tracker.fail();
        assert_eq!(tracker.current(), Stage::Done);
    }

    #[test]
    fn test_failed_is_final() {
        let tracker = StageTracker::new(Span::none());
        tracker.advance(Stage::Inferring);
        tracker.fail();
        tracker.advance(Stage::Aggregating);
        assert_eq!(tracker.current(), Stage::Failed);
        assert_eq!(tracker.current().to_string(), "failed");
    }

    #[test]
    fn test_drop_guard_cancels() {
        let flag = CancelFlag::new();
        {
            let _guard = flag.drop_guard();
            assert!(!flag.is_cancelled());
        }
        assert!(flag.is_cancelled());
    }
}
