//! Engine configuration.

use std::time::Duration;

use dfd_media::ClassifierNames;
use dfd_models::{AnalysisConfig, ConfigError};

/// Engine configuration: per-analysis settings plus pool sizing, timeouts
/// and cache bounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-analysis settings
    pub analysis: AnalysisConfig,
    /// Face detection workers (rayon threads)
    pub detection_workers: usize,
    /// Frames allowed in flight on the detection pool before the decoder runs
    /// detection itself
    pub detection_queue_capacity: usize,
    /// Concurrent classifier calls
    pub inference_workers: usize,
    /// Concurrent analyses across the engine
    pub max_concurrent_analyses: usize,
    /// Overall per-request timeout
    pub request_timeout: Duration,
    /// Result cache capacity
    pub cache_max_entries: usize,
    /// Result cache entry lifetime
    pub cache_ttl: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Classifier graph tensor names
    pub classifier_names: ClassifierNames,
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = available_parallelism();
        Self {
            analysis: AnalysisConfig::default(),
            detection_workers: workers,
            detection_queue_capacity: workers * 4,
            inference_workers: 1,
            max_concurrent_analyses: workers.min(4),
            request_timeout: Duration::from_secs(15 * 60),
            cache_max_entries: 1000,
            cache_ttl: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(30),
            classifier_names: ClassifierNames::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let classifier_names = ClassifierNames {
            video_input: std::env::var("DFD_CLASSIFIER_VIDEO_INPUT")
                .unwrap_or(defaults.classifier_names.video_input),
            aux_input: std::env::var("DFD_CLASSIFIER_AUX_INPUT")
                .unwrap_or(defaults.classifier_names.aux_input),
            output: std::env::var("DFD_CLASSIFIER_OUTPUT")
                .unwrap_or(defaults.classifier_names.output),
        };

        let config = Self {
            analysis: AnalysisConfig::from_env()?,
            detection_workers: env_parse("DFD_DETECTION_WORKERS", defaults.detection_workers),
            detection_queue_capacity: env_parse(
                "DFD_DETECTION_QUEUE",
                defaults.detection_queue_capacity,
            ),
            inference_workers: env_parse("DFD_INFERENCE_WORKERS", defaults.inference_workers),
            max_concurrent_analyses: env_parse(
                "DFD_MAX_CONCURRENT",
                defaults.max_concurrent_analyses,
            ),
            request_timeout: Duration::from_secs(env_parse(
                "DFD_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            cache_max_entries: env_parse("DFD_CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_ttl: Duration::from_secs(env_parse(
                "DFD_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(env_parse(
                "DFD_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
            classifier_names,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;

        let positive = [
            ("detection_workers", self.detection_workers),
            ("detection_queue_capacity", self.detection_queue_capacity),
            ("inference_workers", self.inference_workers),
            ("max_concurrent_analyses", self.max_concurrent_analyses),
            ("cache_max_entries", self.cache_max_entries),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be > 0".to_string(),
                });
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                message: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
