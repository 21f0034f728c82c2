//! Image model trait and the loaded model handle

use candle_core::{Device, Tensor};
use imageid_core::{InputShape, InputSpec, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Trait for all image classification models
///
/// Implementations receive a preprocessed batch of one image and return the
/// model's per-class output. The forward pass is CPU/GPU bound and is always
/// invoked from the blocking pool.
pub trait ImageModel: Send + Sync {
    /// Get the model name
    fn name(&self) -> &str;

    /// Run one forward pass over a `[1, ...]` input tensor
    fn forward(&self, input: &Tensor) -> Result<Tensor>;
}

/// A loaded classifier together with the input/output contract it was loaded under
///
/// A handle only exists after a successful load, and is immutable afterwards.
#[derive(Clone)]
pub struct ModelHandle {
    name: String,
    input: InputSpec,
    num_classes: usize,
    device: Device,
    model: Arc<dyn ImageModel>,
}

impl ModelHandle {
    /// Create a new handle
    pub fn new(
        name: impl Into<String>,
        input: InputSpec,
        num_classes: usize,
        device: Device,
        model: Arc<dyn ImageModel>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            num_classes,
            device,
            model,
        }
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected input shape and layout
    pub fn input_spec(&self) -> InputSpec {
        self.input
    }

    /// Expected spatial input shape
    pub fn input_shape(&self) -> InputShape {
        self.input.shape
    }

    /// Output cardinality
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Device the weights live on; input tensors must be created here
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The forward-pass implementation
    pub fn model(&self) -> &Arc<dyn ImageModel> {
        &self.model
    }

    /// Input tensor dims including the batch dimension
    pub fn expected_dims(&self) -> [usize; 4] {
        self.input.batch_dims()
    }

    /// Serializable summary for front ends
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            input: self.input,
            num_classes: self.num_classes,
            device: format!("{:?}", self.device),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("num_classes", &self.num_classes)
            .field("device", &self.device)
            .finish()
    }
}

/// What a loaded model expects and produces
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub input: InputSpec,
    pub num_classes: usize,
    pub device: String,
}
