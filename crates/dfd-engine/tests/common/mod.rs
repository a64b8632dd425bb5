//! Test doubles for driving the analyzer without FFmpeg or ONNX models.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dfd_engine::{AnalysisComponents, DeepfakeAnalyzer, EngineConfig};
use dfd_media::{
    BlockTensor, Classifier, DecodingSession, FaceCrop, FaceDetector, FrameSource, MediaError,
    MediaResult, RawFrame, StreamInfo,
};
use dfd_models::{AnalysisConfig, ChannelOrder};

pub const CROP_SIZE: u32 = 2;

/// Decoder counters shared between a source and its sessions.
#[derive(Default)]
pub struct SourceStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub frames_pulled: AtomicUsize,
}

impl SourceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames_pulled(&self) -> usize {
        self.frames_pulled.load(Ordering::SeqCst)
    }
}

pub struct FakeSource {
    pub frames: u64,
    pub duration_seconds: f64,
    pub frame_delay: Duration,
    pub stats: Arc<SourceStats>,
}

impl FakeSource {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            duration_seconds: 10.0,
            frame_delay: Duration::ZERO,
            stats: Arc::new(SourceStats::default()),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

struct FakeSession {
    info: StreamInfo,
    remaining: u64,
    next_index: u64,
    frame_delay: Duration,
    stats: Arc<SourceStats>,
}

impl DecodingSession for FakeSession {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
        self.remaining -= 1;
        self.stats.frames_pulled.fetch_add(1, Ordering::SeqCst);
        let index = self.next_index;
        self.next_index += 1;
        RawFrame::new(index, 4, 4, vec![index as u8; 4 * 4 * 3]).map(Some)
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl FrameSource for FakeSource {
    fn open(&self, _path: &Path) -> MediaResult<Box<dyn DecodingSession>> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            info: StreamInfo {
                duration_seconds: self.duration_seconds,
                width: 4,
                height: 4,
                fps: 25.0,
            },
            remaining: self.frames,
            next_index: 0,
            frame_delay: self.frame_delay,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Finds a face on every frame whose index is below `face_frames`.
pub struct FakeDetector {
    pub face_frames: u64,
    pub calls: AtomicUsize,
}

impl FakeDetector {
    pub fn faces_on_first(face_frames: u64) -> Self {
        Self {
            face_frames,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&self, frame: &RawFrame) -> MediaResult<Option<FaceCrop>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if frame.index >= self.face_frames {
            return Ok(None);
        }
        let len = (CROP_SIZE * CROP_SIZE * 3) as usize;
        FaceCrop::new(frame.index, CROP_SIZE, ChannelOrder::Bgr, 0.9, vec![128; len]).map(Some)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Returns `pattern` cycled over the blocks, or fails when `fail` is set.
pub struct FakeClassifier {
    pub pattern: Vec<f32>,
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub block_counts: Mutex<Vec<usize>>,
}

impl FakeClassifier {
    pub fn scoring(pattern: &[f32]) -> Self {
        Self {
            pattern: pattern.to_vec(),
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            block_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::scoring(&[0.5])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn block_counts(&self) -> Vec<usize> {
        self.block_counts.lock().unwrap().clone()
    }
}

impl Classifier for FakeClassifier {
    fn predict(&self, blocks: BlockTensor) -> MediaResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.block_counts.lock().unwrap().push(blocks.block_count());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail {
            return Err(MediaError::inference_failed("output shape [1, 2]"));
        }
        Ok(self
            .pattern
            .iter()
            .copied()
            .cycle()
            .take(blocks.block_count())
            .collect())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub fn engine_config(threshold: f32) -> EngineConfig {
    let mut config = EngineConfig::default().with_analysis(
        AnalysisConfig::default()
            .with_crop_size(CROP_SIZE)
            .with_threshold(threshold),
    );
    config.detection_workers = 2;
    config.detection_queue_capacity = 4;
    config.max_concurrent_analyses = 4;
    config.request_timeout = Duration::from_secs(10);
    config.shutdown_timeout = Duration::from_secs(1);
    config
}

pub fn analyzer(
    config: EngineConfig,
    source: Arc<FakeSource>,
    detector: Arc<FakeDetector>,
    classifier: Arc<FakeClassifier>,
) -> Arc<DeepfakeAnalyzer> {
    let components = AnalysisComponents::new(source, detector, classifier);
    Arc::new(DeepfakeAnalyzer::new(config, components).unwrap())
}

/// A file of `len` bytes standing in for a video.
pub fn video_file(len: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(&vec![0u8; len]).unwrap();
    file.flush().unwrap();
    file
}
