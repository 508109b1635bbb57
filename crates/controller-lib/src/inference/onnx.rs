//! Shared tract plumbing for ONNX models

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Maximum inference latency before warning
const MAX_INFERENCE_MS: u128 = 5;

pub(crate) type TractModel =
    SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Load and optimize an ONNX model with a fixed f32 input shape
pub(crate) fn load_model(path: &Path, input_shape: &[usize]) -> Result<TractModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("Failed to parse ONNX model {}", path.display()))?
        .with_input_fact(0, f32::fact(input_shape.to_vec()).into())
        .context("Failed to set input shape")?
        .into_optimized()
        .context("Failed to optimize model")?
        .into_runnable()
        .context("Failed to create runnable model")?;
    Ok(model)
}

/// Run the model on one input tensor and return its first output
pub(crate) fn run(model: &TractModel, input: Tensor, name: &str) -> Result<TValue> {
    let start = Instant::now();
    let mut outputs = model.run(tvec!(input.into()))?;
    if outputs.is_empty() {
        anyhow::bail!("No output from {} model", name);
    }

    let elapsed = start.elapsed();
    if elapsed.as_millis() > MAX_INFERENCE_MS {
        warn!(
            model = name,
            elapsed_ms = elapsed.as_millis(),
            "Inference exceeded {}ms target",
            MAX_INFERENCE_MS
        );
    } else {
        debug!(model = name, elapsed_us = elapsed.as_micros(), "Inference completed");
    }

    Ok(outputs.remove(0))
}
