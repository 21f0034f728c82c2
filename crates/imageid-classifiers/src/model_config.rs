//! Model descriptor: where the weights come from and what contract they satisfy

use imageid_core::{Error, InputShape, InputSpec, Result, TensorLayout};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a single image classification model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDescriptor {
    /// Model name
    pub name: String,

    /// Model description
    pub description: String,

    /// Model source (where to load from)
    pub source: ModelSource,

    /// Model architecture configuration
    pub architecture: ArchitectureConfig,

    /// Expected input shape and layout
    pub input: InputSpec,

    /// Number of output classes
    pub num_classes: usize,

    /// Activation applied to the raw model output
    pub output_activation: OutputActivation,

    /// Device to run on
    pub device: DeviceSpec,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            name: "image-classifier".to_string(),
            description: String::new(),
            source: ModelSource::Local {
                path: PathBuf::from("./models/model.safetensors"),
            },
            architecture: ArchitectureConfig::Dense,
            input: InputSpec::default(),
            num_classes: 3,
            output_activation: OutputActivation::Softmax,
            device: DeviceSpec::Cpu,
        }
    }
}

/// Model source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelSource {
    /// Load a SafeTensors file from the local filesystem
    Local { path: PathBuf },

    /// Download from HuggingFace Hub
    HuggingFace {
        repo: String,
        #[serde(default = "default_revision")]
        revision: String,
        #[serde(default = "default_weights_file")]
        filename: String,
    },
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_weights_file() -> String {
    "model.safetensors".to_string()
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::HuggingFace {
                repo,
                revision,
                filename,
            } => write!(f, "hf://{}@{}/{}", repo, revision, filename),
        }
    }
}

/// Model architecture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArchitectureConfig {
    /// Flatten followed by one linear layer (`classifier.weight`, `classifier.bias`)
    Dense,

    /// EfficientNet image classifier
    EfficientNet { variant: EfficientNetVariant },

    /// ResNet image classifier
    ResNet { depth: usize },

    /// Custom architecture (requires code implementation)
    Custom { implementation: String },
}

/// EfficientNet scaling variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficientNetVariant {
    B0,
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
}

impl EfficientNetVariant {
    /// Input resolution the variant was trained at
    pub fn native_resolution(&self) -> usize {
        match self {
            Self::B0 => 224,
            Self::B1 => 240,
            Self::B2 => 260,
            Self::B3 => 300,
            Self::B4 => 380,
            Self::B5 => 456,
            Self::B6 => 528,
            Self::B7 => 600,
        }
    }
}

/// Activation applied to model output before it becomes a confidence vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Normalize logits into probabilities
    #[default]
    Softmax,
    /// Use the model output as-is (model already ends in an activation)
    None,
}

/// Device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl ModelDescriptor {
    /// Create a descriptor for a local dense model
    pub fn dense(path: impl Into<PathBuf>, shape: InputShape, num_classes: usize) -> Self {
        Self {
            source: ModelSource::Local { path: path.into() },
            input: InputSpec::new(shape, TensorLayout::Nhwc),
            num_classes,
            ..Default::default()
        }
    }

    /// Parse a descriptor from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Invalid model descriptor: {}", e)))
    }

    /// Load a descriptor from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Set model name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set output activation
    pub fn with_activation(mut self, activation: OutputActivation) -> Self {
        self.output_activation = activation;
        self
    }

    /// Set device
    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    /// Check the descriptor is internally consistent
    pub fn validate(&self) -> Result<()> {
        let shape = self.input.shape;
        if shape.height == 0 || shape.width == 0 {
            return Err(Error::config(format!(
                "Model '{}' has a zero-sized input shape {}",
                self.name, shape
            )));
        }
        if shape.channels != 1 && shape.channels != 3 {
            return Err(Error::config(format!(
                "Model '{}' expects {} channels; only 1 or 3 are supported",
                self.name, shape.channels
            )));
        }
        if self.num_classes == 0 {
            return Err(Error::config(format!(
                "Model '{}' must have at least one output class",
                self.name
            )));
        }

        match &self.architecture {
            ArchitectureConfig::EfficientNet { .. } | ArchitectureConfig::ResNet { .. } => {
                if self.input.layout != TensorLayout::Nchw || shape.channels != 3 {
                    return Err(Error::config(format!(
                        "Model '{}': convolutional architectures take 3-channel NCHW input",
                        self.name
                    )));
                }
            }
            ArchitectureConfig::Dense | ArchitectureConfig::Custom { .. } => {}
        }

        if let ArchitectureConfig::ResNet { depth } = self.architecture {
            if ![18, 34, 50].contains(&depth) {
                return Err(Error::config(format!(
                    "Unsupported ResNet depth {} (expected 18, 34 or 50)",
                    depth
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dense_descriptor() {
        let yaml = r#"
name: "teachable-240"
description: "Exported classification head"
source:
  type: local
  path: "./models/teachable.safetensors"
architecture:
  type: dense
input:
  shape:
    height: 240
    width: 240
  layout: nhwc
num_classes: 3
"#;

        let descriptor = ModelDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(descriptor.name, "teachable-240");
        assert_eq!(descriptor.input.shape, InputShape::new(240, 240, 3));
        assert_eq!(descriptor.architecture, ArchitectureConfig::Dense);
        assert_eq!(descriptor.output_activation, OutputActivation::Softmax);
        assert_eq!(descriptor.device, DeviceSpec::Cpu);
        assert!(descriptor.validate().is_ok());

        match &descriptor.source {
            ModelSource::Local { path } => {
                assert_eq!(path.to_str().unwrap(), "./models/teachable.safetensors");
            }
            _ => panic!("Expected local source"),
        }
    }

    #[test]
    fn test_parse_huggingface_efficientnet() {
        let yaml = r#"
name: "efficientnet-b1"
source:
  type: huggingface
  repo: "lmz/candle-efficientnet"
  filename: "efficientnet-b1.safetensors"
architecture:
  type: efficientnet
  variant: b1
input:
  shape: { height: 240, width: 240, channels: 3 }
  layout: nchw
num_classes: 1000
output_activation: softmax
"#;

        let descriptor = ModelDescriptor::from_yaml(yaml).unwrap();
        assert!(descriptor.validate().is_ok());
        assert_eq!(
            descriptor.source.to_string(),
            "hf://lmz/candle-efficientnet@main/efficientnet-b1.safetensors"
        );
        match descriptor.architecture {
            ArchitectureConfig::EfficientNet { variant } => {
                assert_eq!(variant.native_resolution(), 240);
            }
            other => panic!("Expected EfficientNet, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_contracts() {
        let shape = InputShape::square(224);

        let no_classes = ModelDescriptor::dense("m.safetensors", shape, 0);
        assert!(matches!(no_classes.validate(), Err(Error::Config(_))));

        let mut nhwc_resnet = ModelDescriptor::dense("m.safetensors", shape, 10);
        nhwc_resnet.architecture = ArchitectureConfig::ResNet { depth: 18 };
        assert!(nhwc_resnet.validate().is_err());

        let mut odd_depth = nhwc_resnet.clone();
        odd_depth.input.layout = TensorLayout::Nchw;
        odd_depth.architecture = ArchitectureConfig::ResNet { depth: 19 };
        assert!(odd_depth.validate().is_err());

        let rgba = ModelDescriptor::dense("m.safetensors", InputShape::new(8, 8, 4), 2);
        assert!(rgba.validate().is_err());
    }
}
