//! ONNX Runtime session loading shared by the face detector and the
//! video classifier.

use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Create an ONNX Runtime session with automatic execution provider selection.
///
/// `intra_threads` pins the operator thread count; replicated sessions use 1
/// so they do not oversubscribe the detection pool.
pub fn create_session(model_path: &Path, intra_threads: Option<usize>) -> MediaResult<Session> {
    if !model_path.exists() {
        return Err(MediaError::model_not_found(model_path.display().to_string()));
    }

    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let mut builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    if let Some(threads) = intra_threads {
        builder = builder
            .with_intra_threads(threads)
            .map_err(|e| MediaError::internal(format!("Failed to set intra threads: {}", e)))?;
    }

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                tracing::info!(model = %model_path.display(), "Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    let session = builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))?;

    debug!(
        model = %model_path.display(),
        inputs = ?input_names(&session),
        outputs = ?output_names(&session),
        "ONNX session ready"
    );
    Ok(session)
}

/// Declared input names, in model order.
pub fn input_names(session: &Session) -> Vec<String> {
    session.inputs.iter().map(|i| i.name.clone()).collect()
}

/// Declared output names, in model order.
pub fn output_names(session: &Session) -> Vec<String> {
    session.outputs.iter().map(|o| o.name.clone()).collect()
}
