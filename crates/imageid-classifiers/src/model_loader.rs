//! Model loading for Candle-based image classifiers

use crate::classifier::{ImageModel, ModelHandle};
use crate::loader_plugin::ModelLoader;
use crate::model_config::{
    ArchitectureConfig, DeviceSpec, EfficientNetVariant, ModelDescriptor, ModelSource,
    OutputActivation,
};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::{efficientnet, resnet};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use imageid_core::{Error, InputShape, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Loads a `ModelDescriptor` into a Candle-backed `ModelHandle`
pub struct CandleModelLoader {
    descriptor: ModelDescriptor,
    cache_dir: PathBuf,
}

impl CandleModelLoader {
    /// Create a loader with the default model cache directory
    pub fn new(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor,
            cache_dir: default_cache_dir(),
        }
    }

    /// Override where Hugging Face downloads are cached
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// The descriptor this loader builds from
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// Load synchronously; reads weights and may download, so keep off async threads
    pub fn load_blocking(descriptor: &ModelDescriptor, cache_dir: &Path) -> Result<ModelHandle> {
        descriptor
            .validate()
            .map_err(|e| Error::load(e.to_string()))?;

        let start = Instant::now();
        let weights_path = resolve_model_path(&descriptor.source, cache_dir)?;
        let device = create_device(descriptor.device)?;

        debug!("Loading weights from {}", weights_path.display());
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&weights_path], DType::F32, &device)
                .map_err(|e| Error::load(format!("Failed to load SafeTensors: {}", e)))?
        };

        let model = build_model(descriptor, vb)?;

        info!(
            "Built {} model '{}' in {}ms",
            architecture_name(&descriptor.architecture),
            descriptor.name,
            start.elapsed().as_millis()
        );

        Ok(ModelHandle::new(
            descriptor.name.clone(),
            descriptor.input,
            descriptor.num_classes,
            device,
            Arc::new(model),
        ))
    }
}

#[async_trait::async_trait]
impl ModelLoader for CandleModelLoader {
    async fn load(&self) -> Result<ModelHandle> {
        let descriptor = self.descriptor.clone();
        let cache_dir = self.cache_dir.clone();

        tokio::task::spawn_blocking(move || Self::load_blocking(&descriptor, &cache_dir))
            .await
            .map_err(|e| Error::load(format!("Model loading task failed: {}", e)))?
    }

    fn describe(&self) -> String {
        format!("{} from {}", self.descriptor.name, self.descriptor.source)
    }
}

/// Default cache directory for downloaded weights
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache/imageid/models")
}

/// Resolve model path from source
fn resolve_model_path(source: &ModelSource, cache_dir: &Path) -> Result<PathBuf> {
    match source {
        ModelSource::Local { path } => {
            if !path.exists() {
                return Err(Error::load(format!(
                    "Model file not found: {}",
                    path.display()
                )));
            }
            Ok(path.clone())
        }
        ModelSource::HuggingFace {
            repo,
            revision,
            filename,
        } => {
            info!("Downloading model from HuggingFace: {} @ {}", repo, revision);

            std::fs::create_dir_all(cache_dir).map_err(|e| {
                Error::load(format!(
                    "Failed to create cache directory {}: {}",
                    cache_dir.display(),
                    e
                ))
            })?;

            let api = ApiBuilder::new()
                .with_cache_dir(cache_dir.to_path_buf())
                .build()
                .map_err(|e| Error::load(format!("Failed to initialize HF API: {}", e)))?;

            let repo = api.repo(Repo::with_revision(
                repo.clone(),
                RepoType::Model,
                revision.clone(),
            ));

            repo.get(filename)
                .map_err(|e| Error::load(format!("Failed to download {} from HF: {}", filename, e)))
        }
    }
}

/// Create Candle device from device spec
fn create_device(spec: DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda => Device::new_cuda(0)
            .map_err(|e| Error::load(format!("Failed to create CUDA device: {}", e))),
        DeviceSpec::Metal => Device::new_metal(0)
            .map_err(|e| Error::load(format!("Failed to create Metal device: {}", e))),
    }
}

fn architecture_name(architecture: &ArchitectureConfig) -> &'static str {
    match architecture {
        ArchitectureConfig::Dense => "dense",
        ArchitectureConfig::EfficientNet { .. } => "efficientnet",
        ArchitectureConfig::ResNet { .. } => "resnet",
        ArchitectureConfig::Custom { .. } => "custom",
    }
}

fn build_model(descriptor: &ModelDescriptor, vb: VarBuilder<'static>) -> Result<CandleImageModel> {
    let num_classes = descriptor.num_classes;
    let name = descriptor.name.clone();
    let activation = descriptor.output_activation;
    let to_load_error =
        |e: candle_core::Error| Error::load(format!("Failed to build model '{}': {}", name, e));

    match &descriptor.architecture {
        ArchitectureConfig::Dense => CandleImageModel::dense(
            descriptor.name.clone(),
            descriptor.input.shape,
            num_classes,
            activation,
            vb,
        ),
        ArchitectureConfig::EfficientNet { variant } => {
            let model = efficientnet::EfficientNet::new(vb, efficientnet_configs(*variant), num_classes)
                .map_err(to_load_error)?;
            Ok(CandleImageModel::new(descriptor.name.clone(), model, activation))
        }
        ArchitectureConfig::ResNet { depth } => {
            let model = match depth {
                18 => resnet::resnet18(num_classes, vb),
                34 => resnet::resnet34(num_classes, vb),
                50 => resnet::resnet50(num_classes, vb),
                other => {
                    return Err(Error::load(format!("Unsupported ResNet depth {}", other)));
                }
            }
            .map_err(to_load_error)?;
            Ok(CandleImageModel::new(descriptor.name.clone(), model, activation))
        }
        ArchitectureConfig::Custom { implementation } => Err(Error::load(format!(
            "Custom architecture '{}' requires code implementation",
            implementation
        ))),
    }
}

fn efficientnet_configs(variant: EfficientNetVariant) -> Vec<efficientnet::MBConvConfig> {
    use efficientnet::MBConvConfig;

    match variant {
        EfficientNetVariant::B0 => MBConvConfig::b0(),
        EfficientNetVariant::B1 => MBConvConfig::b1(),
        EfficientNetVariant::B2 => MBConvConfig::b2(),
        EfficientNetVariant::B3 => MBConvConfig::b3(),
        EfficientNetVariant::B4 => MBConvConfig::b4(),
        EfficientNetVariant::B5 => MBConvConfig::b5(),
        EfficientNetVariant::B6 => MBConvConfig::b6(),
        EfficientNetVariant::B7 => MBConvConfig::b7(),
    }
}

/// Flatten + linear classification head
struct DenseHead {
    linear: Linear,
}

impl Module for DenseHead {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = xs.flatten_from(1)?;
        self.linear.forward(&xs)
    }
}

/// Image model backed by any Candle `Module`
pub struct CandleImageModel {
    name: String,
    module: Box<dyn Module + Send + Sync>,
    activation: OutputActivation,
}

impl CandleImageModel {
    /// Wrap a Candle module
    pub fn new(
        name: impl Into<String>,
        module: impl Module + Send + Sync + 'static,
        activation: OutputActivation,
    ) -> Self {
        Self {
            name: name.into(),
            module: Box::new(module),
            activation,
        }
    }

    /// Build a dense head over a flattened input of `shape`
    ///
    /// Weights are read from `classifier.weight` (`[num_classes, H*W*C]`) and
    /// `classifier.bias` (`[num_classes]`).
    pub fn dense(
        name: impl Into<String>,
        shape: InputShape,
        num_classes: usize,
        activation: OutputActivation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let name = name.into();
        let linear = candle_nn::linear(shape.num_elements(), num_classes, vb.pp("classifier"))
            .map_err(|e| Error::load(format!("Failed to build dense model '{}': {}", name, e)))?;

        Ok(Self::new(name, DenseHead { linear }, activation))
    }
}

impl ImageModel for CandleImageModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let logits = self
            .module
            .forward(input)
            .map_err(|e| Error::inference(format!("Model forward pass failed: {}", e)))?;

        match self.activation {
            OutputActivation::Softmax => candle_nn::ops::softmax(&logits, D::Minus1)
                .map_err(|e| Error::inference(format!("Softmax failed: {}", e))),
            OutputActivation::None => Ok(logits),
        }
    }
}
