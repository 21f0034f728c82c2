//! Configuration for the whole classification pipeline

use crate::decoder::DecoderConfig;
use crate::history::HistoryConfig;
use crate::inference::InferenceConfig;
use crate::model_config::ModelDescriptor;
use crate::model_loader::default_cache_dir;
use crate::preprocess::PreprocessConfig;
use imageid_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pipeline configuration, one section per component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model to load
    #[serde(default)]
    pub model: ModelDescriptor,

    /// Normalization constants
    #[serde(default)]
    pub preprocessing: PreprocessConfig,

    /// History retention
    #[serde(default)]
    pub history: HistoryConfig,

    /// Image fetching
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Forward pass limits
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Model cache directory
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_models_dir() -> PathBuf {
    default_cache_dir()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelDescriptor::default(),
            preprocessing: PreprocessConfig::default(),
            history: HistoryConfig::default(),
            decoder: DecoderConfig::default(),
            inference: InferenceConfig::default(),
            models_dir: default_models_dir(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("Invalid configuration: {}", e)))
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if !(self.preprocessing.normalization_scale > 0.0) {
            return Err(Error::config(format!(
                "preprocessing.normalization_scale must be positive, got {}",
                self.preprocessing.normalization_scale
            )));
        }
        if self.history.limit == Some(0) {
            return Err(Error::config("history.limit must be at least 1 when set"));
        }
        if self.decoder.fetch_timeout_secs == Some(0) || self.inference.timeout_secs == Some(0) {
            return Err(Error::config("timeouts must be at least 1 second when set"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_config::ArchitectureConfig;
    use imageid_core::InputShape;

    #[test]
    fn test_pipeline_config_yaml() {
        let yaml = r#"
model:
  name: "teachable"
  source:
    type: local
    path: "./models/teachable.safetensors"
  architecture:
    type: dense
  input:
    shape: { height: 240, width: 240 }
  num_classes: 3

history:
  limit: 50

decoder:
  fetch_timeout_secs: 10
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.model.input.shape, InputShape::square(240));
        assert_eq!(config.model.architecture, ArchitectureConfig::Dense);
        assert_eq!(config.history.limit, Some(50));
        assert_eq!(config.decoder.fetch_timeout_secs, Some(10));
        assert_eq!(config.inference.timeout_secs, None);
        assert_eq!(config.preprocessing.normalization_offset, 127.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.history.limit, None);
        assert_eq!(config.preprocessing, PreprocessConfig::default());
        assert!(config.models_dir.ends_with(".cache/imageid/models"));
        assert!(config.decoder.user_agent.starts_with("imageid/"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = PipelineConfig::default();
        config.history.limit = Some(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.preprocessing.normalization_scale = 0.0;
        assert!(config.validate().is_err());
    }
}
