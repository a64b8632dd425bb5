//! Video classifier inference.
//!
//! The classifier scores every temporal block of a request in one batched
//! call. Besides the block tensor it takes a fixed-width auxiliary feature
//! input; the shipped model was trained and deployed with that input all
//! zeros, and it is fed zeros here to reproduce its behavior.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::{Tensor, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::batch::BlockTensor;
use crate::error::{MediaError, MediaResult};
use crate::onnx::{create_session, input_names, output_names};

/// Tensor names of the exported classifier graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierNames {
    pub video_input: String,
    pub aux_input: String,
    pub output: String,
}

impl Default for ClassifierNames {
    fn default() -> Self {
        Self {
            video_input: "serving_default_video_block:0".to_string(),
            aux_input: "serving_default_glcm_lbp:0".to_string(),
            output: "StatefulPartitionedCall:0".to_string(),
        }
    }
}

/// Scores temporal blocks. One probability per block, in block order.
pub trait Classifier: Send + Sync {
    fn predict(&self, blocks: BlockTensor) -> MediaResult<Vec<f32>>;

    fn name(&self) -> &'static str;
}

/// ONNX Runtime classifier. The session is serialized behind a mutex.
pub struct OrtClassifier {
    session: Mutex<Session>,
    video_input: String,
    aux_input: Option<String>,
    output: String,
    aux_width: usize,
}

impl OrtClassifier {
    pub fn load(model_path: &Path, names: &ClassifierNames, aux_width: usize) -> MediaResult<Self> {
        let session = create_session(model_path, None)?;
        let inputs = input_names(&session);
        let outputs = output_names(&session);

        let video_input = resolve_name(&names.video_input, &inputs, 0, "input")?;
        let aux_input = if inputs.contains(&names.aux_input) {
            Some(names.aux_input.clone())
        } else {
            inputs.iter().find(|name| **name != video_input).cloned()
        };
        let output = resolve_name(&names.output, &outputs, 0, "output")?;

        if aux_input.is_none() {
            warn!(model = %model_path.display(), "Classifier has no auxiliary input; feeding blocks only");
        }

        info!(
            model = %model_path.display(),
            video_input = %video_input,
            aux_input = ?aux_input,
            output = %output,
            "Video classifier loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            video_input,
            aux_input,
            output,
            aux_width,
        })
    }
}

/// Use `wanted` when the model declares it, otherwise the name at `fallback`.
fn resolve_name(wanted: &str, declared: &[String], fallback: usize, kind: &str) -> MediaResult<String> {
    if declared.iter().any(|name| name == wanted) {
        return Ok(wanted.to_string());
    }
    match declared.get(fallback) {
        Some(name) => {
            warn!("Classifier {} {} not found, using {}", kind, wanted, name);
            Ok(name.clone())
        }
        None => Err(MediaError::inference_failed(format!(
            "Classifier declares no {} (wanted {})",
            kind, wanted
        ))),
    }
}

impl Classifier for OrtClassifier {
    fn predict(&self, blocks: BlockTensor) -> MediaResult<Vec<f32>> {
        let batch = blocks.block_count();
        let shape = blocks.shape().to_vec();

        let video: Value = Tensor::from_array((shape, blocks.into_data().into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference_failed(format!("ORT tensor: {e}")))?;

        let mut inputs = ort::inputs![self.video_input.as_str() => video];
        if let Some(aux_name) = &self.aux_input {
            let aux_len = batch
                .checked_mul(self.aux_width)
                .ok_or_else(|| MediaError::resource_exhausted("Auxiliary input overflows"))?;
            let aux: Value = Tensor::from_array((
                vec![batch, self.aux_width],
                vec![0.0f32; aux_len].into_boxed_slice(),
            ))
            .map(Value::from)
            .map_err(|e| MediaError::inference_failed(format!("ORT tensor: {e}")))?;
            inputs.extend(ort::inputs![aux_name.as_str() => aux]);
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::inference_failed("Classifier session poisoned"))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| MediaError::inference_failed(format!("ORT run failed: {e}")))?;

        let output = outputs
            .get(self.output.as_str())
            .ok_or_else(|| MediaError::inference_failed(format!("Missing {} tensor", self.output)))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference_failed(format!("ORT extract: {e}")))?;

        // Single probability column: [N, 1] or [N]
        let columns = match shape.len() {
            1 => 1,
            2 => shape[1],
            _ => -1,
        };
        if columns != 1 {
            return Err(MediaError::inference_failed(format!(
                "Unexpected classifier output shape: {:?}",
                &shape[..]
            )));
        }

        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

/// Check the classifier returned exactly one finite score per block.
pub fn validate_scores(scores: Vec<f32>, expected: usize) -> MediaResult<Vec<f32>> {
    if scores.len() != expected {
        return Err(MediaError::inference_failed(format!(
            "Classifier returned {} scores for {} blocks",
            scores.len(),
            expected
        )));
    }
    if let Some(position) = scores.iter().position(|s| !s.is_finite()) {
        return Err(MediaError::inference_failed(format!(
            "Classifier returned non-finite score for block {}",
            position
        )));
    }
    Ok(scores)
}

/// Dispatches batched classifier calls onto blocking workers, bounded by a
/// semaphore.
#[derive(Clone)]
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    permits: Arc<Semaphore>,
}

impl InferenceEngine {
    pub fn new(classifier: Arc<dyn Classifier>, max_concurrent: usize) -> Self {
        Self {
            classifier,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Score every block of `blocks` with a single classifier call.
    ///
    /// Any classifier fault fails the whole call; partial scores are never
    /// returned.
    pub async fn score_blocks(&self, blocks: BlockTensor) -> MediaResult<Vec<f32>> {
        let expected = blocks.block_count();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MediaError::Cancelled)?;

        // The permit travels with the call: a dropped caller cannot free the
        // slot while the classifier is still running.
        let classifier = Arc::clone(&self.classifier);
        let started = std::time::Instant::now();
        let scores = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            classifier.predict(blocks)
        })
        .await
        .map_err(|e| MediaError::inference_failed(format!("Classifier task failed: {e}")))??;

        debug!(
            classifier = self.classifier.name(),
            blocks = expected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Blocks scored"
        );

        validate_scores(scores, expected)
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }
}
