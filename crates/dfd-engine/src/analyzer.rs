//! The deepfake analyzer: request orchestration around the media pipeline.
//!
//! One call to [`DeepfakeAnalyzer::analyze`] walks
//! `INIT -> CACHE_CHECK -> DECODING -> DETECTING -> INFERRING -> AGGREGATING
//! -> DONE`, or ends in `FAILED` from any stage. Global concurrency is
//! bounded by a semaphore, identical requests are collapsed by the
//! in-flight guard, and every request runs under one overall deadline.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dfd_media::{
    create_detector, Classifier, FaceDetector, FfmpegFrameSource, FrameSource, InferenceEngine,
    MediaError, OrtClassifier, SourceLimits,
};
use dfd_models::{DetectionReport, DetectionResult};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::Fingerprint;
use crate::inflight::InFlight;
use crate::logging::AnalysisLogger;
use crate::metrics;
use crate::pipeline::{extract_blocks, ExtractionContext};
use crate::pool::DetectionPool;
use crate::stage::{CancelFlag, Stage, StageTracker};

/// Loaded model handles and the frame source, injected into the analyzer.
#[derive(Clone)]
pub struct AnalysisComponents {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub classifier: Arc<dyn Classifier>,
}

impl AnalysisComponents {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn FaceDetector>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            source,
            detector,
            classifier,
        }
    }

    /// FFmpeg decoding plus the configured detector and ONNX classifier.
    pub fn load(config: &EngineConfig) -> EngineResult<Self> {
        if !FfmpegFrameSource::is_available() {
            return Err(MediaError::FfmpegNotFound.into());
        }

        let detector = create_detector(&config.analysis, config.detection_workers)?;
        let classifier = OrtClassifier::load(
            &config.analysis.model_location,
            &config.classifier_names,
            config.analysis.secondary_feature_width,
        )?;

        Ok(Self::new(
            Arc::new(FfmpegFrameSource::new()),
            detector,
            Arc::new(classifier),
        ))
    }
}

/// Keeps the in-flight gauge in step with running analyses.
struct ActiveAnalysis<'a>(&'a AtomicUsize);

impl<'a> ActiveAnalysis<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_analyses_in_flight(now);
        Self(counter)
    }
}

impl Drop for ActiveAnalysis<'_> {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_analyses_in_flight(now);
    }
}

/// Entry point for video analysis.
///
/// Owns the detection pool, the classifier engine, the result cache and the
/// admission controls shared by every request. Share it behind an `Arc`;
/// [`DeepfakeAnalyzer::analyze`] takes `&self` and is safe to call
/// concurrently.
pub struct DeepfakeAnalyzer {
    config: EngineConfig,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn FaceDetector>,
    inference: InferenceEngine,
    pool: Arc<DetectionPool>,
    cache: ResultCache,
    in_flight: InFlight,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    shutting_down: AtomicBool,
}

impl DeepfakeAnalyzer {
    pub fn new(config: EngineConfig, components: AnalysisComponents) -> EngineResult<Self> {
        config.validate()?;

        let pool = DetectionPool::new(config.detection_workers, config.detection_queue_capacity)?;
        let inference = InferenceEngine::new(components.classifier, config.inference_workers);

        info!(
            source = components.source.name(),
            detector = components.detector.name(),
            classifier = inference.classifier_name(),
            detection_workers = pool.workers(),
            max_concurrent = config.max_concurrent_analyses,
            "Deepfake analyzer ready"
        );

        Ok(Self {
            source: components.source,
            detector: components.detector,
            inference,
            pool: Arc::new(pool),
            cache: ResultCache::new(config.cache_max_entries, config.cache_ttl),
            in_flight: InFlight::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_analyses)),
            active: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            config,
        })
    }

    /// Build the production component bundle from `config` and wrap it.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let components = AnalysisComponents::load(&config)?;
        Self::new(config, components)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyse the video at `path`.
    ///
    /// Successful results, UNKNOWN included, are cached under the file's
    /// fingerprint; failures never are.
    pub async fn analyze(&self, path: impl AsRef<Path>) -> EngineResult<DetectionResult> {
        let path = path.as_ref();
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let logger = AnalysisLogger::new(&request_id, path);
        let stage = StageTracker::new(logger.span().clone());

        let outcome = self
            .run(path, &logger, &stage, started)
            .instrument(logger.span().clone())
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(result) => {
                stage.advance(Stage::Done);
                metrics::record_analysis(result.label().as_str(), elapsed);
                logger.verdict(result, elapsed);
            }
            Err(e) => {
                let failed_in = stage.current();
                stage.fail();
                metrics::record_analysis(e.code(), elapsed);
                logger.failed(e, failed_in);
            }
        }
        outcome
    }

    /// Analyse and render the caller-facing report.
    pub async fn analyze_report(&self, path: impl AsRef<Path>) -> EngineResult<DetectionReport> {
        Ok(self.analyze(path).await?.to_report())
    }

    async fn run(
        &self,
        path: &Path,
        logger: &AnalysisLogger,
        stage: &StageTracker,
        started: Instant,
    ) -> EngineResult<DetectionResult> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }
        let deadline = started + self.config.request_timeout;
        logger.started(
            self.config.analysis.crop_size,
            self.config.analysis.decision_threshold,
        );

        stage.advance(Stage::CacheCheck);
        let key = Fingerprint::for_file(path, &self.config.analysis)?;
        if let Some(hit) = self.cache.get(&key) {
            metrics::record_cache_hit();
            logger.cache_hit(&key, false);
            return Ok(hit);
        }

        let _slot = self.until(deadline, self.in_flight.acquire(&key)).await?;
        // a concurrent request for the same file may have just finished
        if let Some(hit) = self.cache.get(&key) {
            metrics::record_cache_hit();
            logger.cache_hit(&key, true);
            return Ok(hit);
        }
        metrics::record_cache_miss();

        let _permit = self
            .until(deadline, Arc::clone(&self.permits).acquire_owned())
            .await?
            .map_err(|_| EngineError::ShuttingDown)?;
        let _active = ActiveAnalysis::enter(&self.active);

        let result = self.compute(path, logger, stage, started, deadline).await?;
        self.cache.put(key, result.clone());
        Ok(result)
    }

    async fn compute(
        &self,
        path: &Path,
        logger: &AnalysisLogger,
        stage: &StageTracker,
        started: Instant,
        deadline: Instant,
    ) -> EngineResult<DetectionResult> {
        let cancel = CancelFlag::new();
        let _cancel_on_drop = cancel.drop_guard();

        let ctx = ExtractionContext {
            source: Arc::clone(&self.source),
            detector: Arc::clone(&self.detector),
            pool: Arc::clone(&self.pool),
            limits: SourceLimits::from(&self.config.analysis),
            crop_size: self.config.analysis.crop_size,
            cancel: cancel.clone(),
            stage: stage.clone(),
            logger: logger.clone(),
        };
        let owned_path = path.to_path_buf();
        let mut task = tokio::task::spawn_blocking(move || extract_blocks(&ctx, &owned_path));

        let extraction = match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(joined) => joined??,
            Err(_) => {
                cancel.cancel();
                // let the decode task release its session before reporting
                let _ = task.await;
                return Err(EngineError::Timeout(self.config.request_timeout));
            }
        };

        metrics::record_extraction(extraction.frames_pulled, extraction.faces);
        logger.faces_extracted(
            extraction.faces,
            extraction.frames_kept,
            extraction.frames_pulled,
            extraction.detector_errors,
        );

        let threshold = self.config.analysis.decision_threshold;
        if extraction.tensor.is_empty() {
            stage.advance(Stage::Aggregating);
            logger.no_full_block(extraction.faces);
            return Ok(aggregate(&[], threshold, started.elapsed()));
        }

        stage.advance(Stage::Inferring);
        let blocks = extraction.tensor.block_count();
        let scores = self
            .until(deadline, self.inference.score_blocks(extraction.tensor))
            .await??;
        metrics::record_blocks_scored(blocks);

        stage.advance(Stage::Aggregating);
        Ok(aggregate(&scores, threshold, started.elapsed()))
    }

    async fn until<F: Future>(&self, deadline: Instant, fut: F) -> EngineResult<F::Output> {
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| EngineError::Timeout(self.config.request_timeout))
    }

    /// Accepting work and not shut down.
    pub fn is_healthy(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire) && !self.permits.is_closed()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Analyses currently holding a concurrency permit.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Refuse new work, wait for running analyses up to the shutdown
    /// timeout, then clear the cache.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        info!("Shutting down analyzer, waiting for running analyses");

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while self.permits.available_permits() < self.config.max_concurrent_analyses {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                running = self.in_flight(),
                "Shutdown timeout reached with analyses still running"
            );
        }

        self.permits.close();
        self.cache.clear();
        info!("Analyzer shut down");
    }
}
