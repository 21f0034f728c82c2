//! Layered configuration: YAML file, then `IMAGEID__` environment variables,
//! then command line overrides

use crate::cli::Cli;
use anyhow::Context;
use imageid_classifiers::{ModelDescriptor, PipelineConfig};
use std::path::Path;

/// Environment variable prefix; `IMAGEID__HISTORY__LIMIT=50` sets `history.limit`
pub const ENV_PREFIX: &str = "IMAGEID";

/// Load the pipeline configuration for this invocation
pub fn load(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = load_layers(&cli.config)?;

    // Apply CLI overrides
    if let Some(model) = &cli.model {
        config.model = ModelDescriptor::from_file(model)
            .with_context(|| format!("Failed to read model descriptor {}", model.display()))?;
    }

    if let Some(limit) = cli.history_limit {
        config.history.limit = Some(limit);
    }

    config.validate()?;
    Ok(config)
}

/// File and environment layers; a missing file yields defaults
pub fn load_layers(path: &Path) -> anyhow::Result<PipelineConfig> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}
