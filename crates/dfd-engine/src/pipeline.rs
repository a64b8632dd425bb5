//! Blocking half of an analysis: decode, detect and batch.
//!
//! Runs on a tokio blocking thread. Frames are decoded sequentially here and
//! handed to the detection pool one by one; each frame is dropped as soon as
//! its detection finishes. Crops are reassembled in decode order before the
//! block tensor is built, so the result does not depend on which worker
//! finished first.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use dfd_media::{
    build_block_tensor, open_session, BlockTensor, FaceCrop, FaceDetector, FrameSampler,
    FrameSource, MediaError, MediaResult, SourceLimits,
};

use crate::error::{EngineError, EngineResult};
use crate::logging::AnalysisLogger;
use crate::pool::DetectionPool;
use crate::stage::{CancelFlag, Stage, StageTracker};

/// How often the collector re-checks cancellation while waiting on workers.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

type DetectionOutcome = (usize, MediaResult<Option<FaceCrop>>);

/// Everything the blocking extraction needs, owned so it can move onto a
/// blocking thread.
pub struct ExtractionContext {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub pool: Arc<DetectionPool>,
    pub limits: SourceLimits,
    pub crop_size: u32,
    pub cancel: CancelFlag,
    pub stage: StageTracker,
    pub logger: AnalysisLogger,
}

#[derive(Debug)]
pub struct Extraction {
    pub tensor: BlockTensor,
    pub faces: usize,
    pub frames_pulled: usize,
    pub frames_kept: usize,
    pub detector_errors: usize,
}

/// Decode `path`, detect one face per kept frame and assemble the blocks.
///
/// Fails with [`EngineError::NoFaceDetected`] when no kept frame yields a
/// face, and with a detection failure when the detector errored on every
/// kept frame. Individual detector errors otherwise count as "no face".
pub fn extract_blocks(ctx: &ExtractionContext, path: &Path) -> EngineResult<Extraction> {
    ctx.stage.advance(Stage::Decoding);
    let mut session = open_session(ctx.source.as_ref(), path, &ctx.limits)?;

    ctx.stage.advance(Stage::Detecting);
    let (tx, rx) = mpsc::channel::<DetectionOutcome>();
    let mut submitted = 0usize;
    let frames_pulled = {
        let mut sampler = FrameSampler::new(&mut session, &ctx.limits);
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let Some(frame) = sampler.next_kept()? else {
                break;
            };

            let seq = submitted;
            submitted += 1;
            let detector = Arc::clone(&ctx.detector);
            let cancel = ctx.cancel.clone();
            let tx = tx.clone();
            ctx.pool.submit(move || {
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = detector.detect(&frame);
                drop(frame);
                let _ = tx.send((seq, outcome));
            });
        }
        sampler.pulled()
    };
    session.close();
    drop(tx);

    let outcomes = collect_outcomes(&rx, submitted, &ctx.cancel)?;

    let mut crops = Vec::with_capacity(submitted);
    let mut detector_errors = 0usize;
    for (seq, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Some(crop)) => crops.push(crop),
            Ok(None) => {}
            Err(e) => {
                detector_errors += 1;
                ctx.logger.frame_rejected(seq, &e);
            }
        }
    }

    if submitted > 0 && detector_errors == submitted {
        return Err(MediaError::detection_failed(format!(
            "Face detection failed on all {} examined frames",
            submitted
        ))
        .into());
    }
    if crops.is_empty() {
        return Err(EngineError::NoFaceDetected);
    }

    let crop_size = ctx.crop_size;
    let faces = crops.len();
    let tensor = ctx.pool.install(|| build_block_tensor(&crops, crop_size))?;
    drop(crops);

    Ok(Extraction {
        tensor,
        faces,
        frames_pulled,
        frames_kept: submitted,
        detector_errors,
    })
}

/// Wait for one outcome per submitted frame and return them in submission
/// order.
fn collect_outcomes(
    rx: &mpsc::Receiver<DetectionOutcome>,
    submitted: usize,
    cancel: &CancelFlag,
) -> EngineResult<Vec<MediaResult<Option<FaceCrop>>>> {
    let mut slots: Vec<Option<MediaResult<Option<FaceCrop>>>> =
        std::iter::repeat_with(|| None).take(submitted).collect();
    let mut received = 0usize;

    while received < submitted {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok((seq, outcome)) => {
                if let Some(slot) = slots.get_mut(seq) {
                    *slot = Some(outcome);
                    received += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            // every sender is gone: remaining jobs died without reporting
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    if received < submitted {
        return Err(EngineError::worker_panicked(format!(
            "{} of {} detection jobs did not report",
            submitted - received,
            submitted
        )));
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfd_media::{DecodingSession, RawFrame, StreamInfo};
    use dfd_models::ChannelOrder;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSession {
        info: StreamInfo,
        frames: u64,
        next: u64,
    }

    impl DecodingSession for ScriptedSession {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
            if self.next == self.frames {
                return Ok(None);
            }
            let index = self.next;
            self.next += 1;
            RawFrame::new(index, 2, 2, vec![index as u8; 12]).map(Some)
        }

        fn close(&mut self) {}
    }

    struct ScriptedSource(u64);

    impl FrameSource for ScriptedSource {
        fn open(&self, _path: &Path) -> MediaResult<Box<dyn DecodingSession>> {
            Ok(Box::new(ScriptedSession {
                info: StreamInfo {
                    duration_seconds: 1.0,
                    width: 2,
                    height: 2,
                    fps: 25.0,
                },
                frames: self.0,
                next: 0,
            }))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Faces on even frames, errors on frames divisible by 3 when enabled.
    struct EvenFrameDetector {
        fail_every_third: bool,
        calls: AtomicUsize,
    }

    impl FaceDetector for EvenFrameDetector {
        fn detect(&self, frame: &RawFrame) -> MediaResult<Option<FaceCrop>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // uneven work so workers finish out of order
            std::thread::sleep(Duration::from_millis((5 - frame.index % 5) * 2));
            if self.fail_every_third && frame.index % 3 == 0 {
                return Err(MediaError::detection_failed("scripted"));
            }
            if frame.index % 2 == 0 {
                FaceCrop::new(frame.index, 1, ChannelOrder::Bgr, 0.9, vec![frame.index as u8; 3]).map(Some)
            } else {
                Ok(None)
            }
        }

        fn name(&self) -> &'static str {
            "even"
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&self, _frame: &RawFrame) -> MediaResult<Option<FaceCrop>> {
            Err(MediaError::detection_failed("model exploded"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn context(frames: u64, detector: Arc<dyn FaceDetector>) -> ExtractionContext {
        ExtractionContext {
            source: Arc::new(ScriptedSource(frames)),
            detector,
            pool: Arc::new(DetectionPool::new(3, 4).unwrap()),
            limits: SourceLimits {
                max_file_size_bytes: 1024,
                max_duration_seconds: 60.0,
                frame_skip_stride: 1,
                max_frames_examined: 500,
            },
            crop_size: 1,
            cancel: CancelFlag::new(),
            stage: StageTracker::new(tracing::Span::none()),
            logger: AnalysisLogger::new("test", Path::new("clip.mp4")),
        }
    }

    fn video_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        file
    }

    #[test]
    fn test_crops_keep_frame_order() {
        let detector = Arc::new(EvenFrameDetector {
            fail_every_third: false,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(16, detector.clone());
        let file = video_file();

        let extraction = extract_blocks(&ctx, file.path()).unwrap();
        assert_eq!(extraction.faces, 8);
        assert_eq!(extraction.frames_pulled, 16);
        assert_eq!(extraction.frames_kept, 16);
        assert_eq!(extraction.tensor.block_count(), 2);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 16);

        // block 0 holds frames 0, 2, 4, 6 in that order
        let expected: Vec<f32> = [0u8, 2, 4, 6, 8, 10, 12, 14]
            .iter()
            .map(|v| *v as f32 / 255.0)
            .collect();
        let firsts: Vec<f32> = extraction.tensor.data().chunks(3).map(|px| px[0]).collect();
        assert_eq!(firsts, expected);
    }

    #[test]
    fn test_detector_errors_count_as_no_face() {
        let detector = Arc::new(EvenFrameDetector {
            fail_every_third: true,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(12, detector);
        let file = video_file();

        let extraction = extract_blocks(&ctx, file.path()).unwrap();
        // even frames not divisible by 3: 2, 4, 8, 10
        assert_eq!(extraction.faces, 4);
        assert_eq!(extraction.detector_errors, 4);
    }

    #[test]
    fn test_all_detector_errors_fail_the_analysis() {
        let ctx = context(5, Arc::new(FailingDetector));
        let file = video_file();

        let err = extract_blocks(&ctx, file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Media(MediaError::DetectionFailed(_))));
    }

    #[test]
    fn test_no_faces() {
        let detector = Arc::new(EvenFrameDetector {
            fail_every_third: false,
            calls: AtomicUsize::new(0),
        });
        // frame 0 would have a face, so start with an empty stream
        let ctx = context(0, detector);
        let file = video_file();

        let err = extract_blocks(&ctx, file.path()).unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
    }

    #[test]
    fn test_cancelled_before_decoding() {
        let detector = Arc::new(EvenFrameDetector {
            fail_every_third: false,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(8, detector.clone());
        ctx.cancel.cancel();
        let file = video_file();

        let err = extract_blocks(&ctx, file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }
}
