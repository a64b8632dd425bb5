//! Deepfake video analysis engine.
//!
//! Orchestrates the media pipeline from `dfd-media` for one request at a
//! time per file:
//! - result cache lookup by file fingerprint
//! - sequential decoding with parallel face detection
//! - one batched classifier call per request
//! - aggregation into a FAKE / REAL / UNKNOWN verdict

pub mod aggregate;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod stage;

pub use aggregate::aggregate;
pub use analyzer::{AnalysisComponents, DeepfakeAnalyzer};
pub use cache::ResultCache;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use fingerprint::Fingerprint;
pub use inflight::{InFlight, InFlightGuard};
pub use logging::{init_tracing, AnalysisLogger};
pub use pool::DetectionPool;
pub use stage::{CancelFlag, Stage, StageTracker};
