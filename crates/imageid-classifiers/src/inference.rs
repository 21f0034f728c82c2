//! Forward pass over a preprocessed tensor

use crate::classifier::ModelHandle;
use crate::tensor::InputTensor;
use imageid_core::{ConfidenceVector, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Inference configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Upper bound on one forward pass; unset waits indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Runs the model and extracts the confidence vector
#[derive(Debug, Clone, Default)]
pub struct InferenceEngine {
    config: InferenceConfig,
}

impl InferenceEngine {
    /// Create a new engine
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    /// Classify one preprocessed image
    ///
    /// Consumes `input`; the tensor is released as soon as the forward pass
    /// returns, whatever its outcome.
    pub async fn predict(&self, handle: &ModelHandle, input: InputTensor) -> Result<ConfidenceVector> {
        let expected = handle.expected_dims();
        if input.dims() != expected {
            return Err(Error::inference(format!(
                "input dims {:?} do not match model '{}' dims {:?}",
                input.dims(),
                handle.name(),
                expected
            )));
        }

        let model = handle.model().clone();
        let start = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            let output = model.forward(input.tensor());
            drop(input);
            output
        });

        let joined = match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), task)
                .await
                .map_err(|_| Error::inference(format!("forward pass timed out after {}s", secs)))?,
            None => task.await,
        };
        let output = joined.map_err(|e| Error::inference(format!("inference task failed: {}", e)))??;

        let scores = output
            .flatten_all()
            .and_then(|t| t.to_dtype(candle_core::DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("failed to extract scores: {}", e)))?;

        if scores.len() != handle.num_classes() {
            return Err(Error::inference(format!(
                "model produced {} scores, expected {}",
                scores.len(),
                handle.num_classes()
            )));
        }

        let vector = ConfidenceVector::new(scores);
        if !vector.all_finite() {
            return Err(Error::inference("model produced non-finite scores"));
        }

        debug!(
            "Forward pass on '{}' took {}us",
            handle.name(),
            start.elapsed().as_micros()
        );

        Ok(vector)
    }
}
