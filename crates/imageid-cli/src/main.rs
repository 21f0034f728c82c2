//! ImageID
//!
//! Loads an image classification model once, then classifies local files and
//! remote URLs from the command line or an interactive session.

use anyhow::Result;
use clap::Parser;
use imageid_classifiers::{
    CandleModelLoader, IdentifyOutcome, ModelStore, PipelineController,
};
use imageid_cli::cli::{Cli, Commands};
use imageid_cli::{render, Session};
use imageid_telemetry::MetricsCollector;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Initialize metrics
    let metrics_handle = init_metrics()?;

    // Load configuration
    let config = imageid_cli::config::load(&cli)?;
    info!(
        "Configuration loaded: model '{}' from {}",
        config.model.name, config.model.source
    );

    let loader = CandleModelLoader::new(config.model.clone()).with_cache_dir(&config.models_dir);
    let store = Arc::new(ModelStore::new(Arc::new(loader)));
    let controller = Arc::new(PipelineController::new(store.clone(), config)?);

    match cli.command {
        Commands::Classify { images, json } => {
            store.load().await?;
            classify_all(&controller, &images, json).await?;
        }

        Commands::Interactive => {
            let _loading = store.spawn_load();
            Session::new(controller, Some(metrics_handle)).run().await?;
        }

        Commands::Inspect => {
            let handle = store.load().await?;
            print!("{}", render::model_summary(&handle.summary()));
        }
    }

    Ok(())
}

/// Classify each image in turn; a failing image does not stop the rest
async fn classify_all(controller: &PipelineController, images: &[String], json: bool) -> Result<()> {
    let mut failed = 0;
    let mut reports = Vec::with_capacity(images.len());

    for image in images {
        let outcome = classify_one(controller, image).await;

        match &outcome {
            Ok(_) if !json => {
                println!("{}", image);
                print!("{}", render::class_table(&controller.results()));
            }
            Err(e) if !json => {
                println!("{}", image);
                println!("Error: {}", e);
            }
            _ => {}
        }

        if let Err(e) = &outcome {
            warn!("Failed to classify {}: {}", image, e);
            failed += 1;
        }

        reports.push(match outcome {
            Ok(()) => serde_json::json!({ "image": image, "results": controller.results() }),
            Err(e) => serde_json::json!({ "image": image, "error": e.to_string() }),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} images failed to classify", failed, images.len());
    }
    Ok(())
}

async fn classify_one(controller: &PipelineController, image: &str) -> imageid_core::Result<()> {
    if image.starts_with("http://") || image.starts_with("https://") {
        controller.enter_url(image)?;
    } else {
        controller.upload_file(image).await?;
    }

    match controller.identify().await? {
        IdentifyOutcome::Completed(_) => Ok(()),
        IdentifyOutcome::AlreadyRunning => Err(imageid_core::Error::Busy),
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("imageid=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imageid=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    MetricsCollector::describe();

    info!("Metrics recorder installed");
    Ok(handle)
}
