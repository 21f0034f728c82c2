//! Classification pipeline controller
//!
//! The controller owns the session state (current image, URL input, results,
//! history) and drives one classification at a time through
//! decode → preprocess → predict. All mutations go through transition methods;
//! front ends read [`PipelineSnapshot`]s, either on demand or through a
//! `watch` subscription.
//!
//! ```text
//! Idle ──select──▶ ImageSelected ──identify──▶ Classifying ──ok──▶ Results
//!                        ▲                          │                 │
//!                        └─────────── error ────────┘                 │
//!                        └──────────────────── select ────────────────┘
//! ```

use crate::config::PipelineConfig;
use crate::decoder::{BlobStore, ImageDecoder, RemoteFetcher};
use crate::history::{HistoryEntry, HistoryLedger};
use crate::inference::InferenceEngine;
use crate::model_store::{ModelStore, Readiness};
use crate::preprocess::Preprocessor;
use crate::tensor::TensorTracker;
use bytes::Bytes;
use imageid_core::{ClassScore, ConfidenceVector, Error, ImageReference, Result};
use imageid_telemetry::MetricsCollector;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the controller is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// No image selected
    Idle,
    /// An image is selected and can be classified
    ImageSelected,
    /// A classification is in flight
    Classifying,
    /// The last classification of the current image succeeded
    Results,
}

/// Read-only view of the controller state
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub phase: PipelinePhase,
    pub current: Option<ImageReference>,
    pub results: Option<ConfidenceVector>,
    pub url_input: String,
    pub last_error: Option<String>,
    pub history_len: usize,
    pub model: Readiness,
}

impl PipelineSnapshot {
    /// Result rows for display, empty when there are no results
    pub fn class_scores(&self) -> Vec<ClassScore> {
        self.results
            .as_ref()
            .map(ConfidenceVector::to_class_scores)
            .unwrap_or_default()
    }
}

/// Outcome of an `identify` call
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifyOutcome {
    /// Classification finished with these scores
    Completed(ConfidenceVector),
    /// Another classification was already in flight; nothing was done
    AlreadyRunning,
}

struct ControllerState {
    phase: PipelinePhase,
    current: Option<ImageReference>,
    results: Option<ConfidenceVector>,
    url_input: String,
    last_error: Option<String>,
    history: HistoryLedger,
}

/// Orchestrates model readiness, image selection, classification and history
pub struct PipelineController {
    store: Arc<ModelStore>,
    decoder: ImageDecoder,
    preprocessor: Preprocessor,
    engine: InferenceEngine,
    metrics: MetricsCollector,
    state: Mutex<ControllerState>,
    snapshots: watch::Sender<PipelineSnapshot>,
}

impl PipelineController {
    /// Create a controller with default collaborators
    pub fn new(store: Arc<ModelStore>, config: PipelineConfig) -> Result<Self> {
        PipelineBuilder::new(store).config(config).build()
    }

    /// Upload image bytes and select them
    pub fn upload(&self, bytes: impl Into<Bytes>) -> Result<ImageReference> {
        self.ensure_not_classifying()?;
        let reference = self.decoder.blobs().insert(bytes);
        self.select_image(reference.clone())?;
        Ok(reference)
    }

    /// Read a local file into the session and select it
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<ImageReference> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        debug!("Read {} bytes from {}", bytes.len(), path.as_ref().display());
        self.upload(bytes)
    }

    /// Set the URL input text; a non-empty value becomes the current image
    ///
    /// Returns the new reference, or `None` when the input was cleared.
    pub fn enter_url(&self, text: &str) -> Result<Option<ImageReference>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.transition(|state| {
                if state.phase == PipelinePhase::Classifying {
                    return Err(Error::Busy);
                }
                state.url_input = text.to_string();
                state.current = None;
                state.results = None;
                state.last_error = None;
                state.phase = PipelinePhase::Idle;
                Ok(None)
            })
        } else {
            let reference = ImageReference::url(trimmed);
            self.new_selection(reference.clone(), Some(text))?;
            Ok(Some(reference))
        }
    }

    /// Make `reference` the current image and record it in history
    pub fn select_image(&self, reference: ImageReference) -> Result<()> {
        self.new_selection(reference, None)
    }

    /// Replay a past selection without recording it again
    pub fn select_history(&self, index: usize) -> Result<ImageReference> {
        self.transition(|state| {
            if state.phase == PipelinePhase::Classifying {
                return Err(Error::Busy);
            }
            let reference = state.history.select(index)?;
            state.current = Some(reference.clone());
            state.results = None;
            state.last_error = None;
            state.phase = PipelinePhase::ImageSelected;
            Ok(reference)
        })
    }

    /// Classify the current image
    pub async fn identify(&self) -> Result<IdentifyOutcome> {
        let reference = {
            let mut state = self.state.lock();
            match state.phase {
                PipelinePhase::Classifying => {
                    debug!("Classification already running; ignoring request");
                    return Ok(IdentifyOutcome::AlreadyRunning);
                }
                PipelinePhase::Idle => {
                    let err = Error::NoImageSelected;
                    state.last_error = Some(err.to_string());
                    self.publish(&state);
                    return Err(err);
                }
                PipelinePhase::ImageSelected | PipelinePhase::Results => {}
            }

            state.url_input.clear();

            if let Err(err) = self.store.handle() {
                warn!("Cannot classify: {}", err);
                state.last_error = Some(err.to_string());
                self.publish(&state);
                return Err(err);
            }

            let reference = match state.current.clone() {
                Some(reference) => reference,
                None => return Err(Error::internal("image selected without a reference")),
            };

            state.phase = PipelinePhase::Classifying;
            state.results = None;
            state.last_error = None;
            self.publish(&state);
            reference
        };

        let guard = ClassifyingGuard {
            controller: self,
            armed: true,
        };

        let start = Instant::now();
        let outcome = self.run_stages(&reference).await;
        let latency_us = start.elapsed().as_micros() as u64;

        let mut state = self.state.lock();
        let result = match outcome {
            Ok(scores) => {
                info!(
                    "Classified {} in {}us: top class {:?}",
                    reference,
                    latency_us,
                    scores.top().map(|(index, _)| index + 1)
                );
                self.metrics.record_classification(latency_us);
                state.phase = PipelinePhase::Results;
                state.results = Some(scores.clone());
                Ok(IdentifyOutcome::Completed(scores))
            }
            Err(err) => {
                warn!("Classification of {} failed at {}: {}", reference, err.stage(), err);
                self.metrics.record_failure(&err);
                state.phase = PipelinePhase::ImageSelected;
                state.last_error = Some(err.to_string());
                Err(err)
            }
        };
        guard.disarm();
        self.publish(&state);
        result
    }

    async fn run_stages(&self, reference: &ImageReference) -> Result<ConfidenceVector> {
        let handle = self.store.handle()?;

        let image = self.decoder.decode(reference).await?;
        let input = self
            .preprocessor
            .preprocess(&image, &handle.input_spec(), handle.device())?;
        drop(image);

        self.engine.predict(&handle, input).await
    }

    /// Current state
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.build_snapshot(&self.state.lock())
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current phase
    pub fn phase(&self) -> PipelinePhase {
        self.state.lock().phase
    }

    /// Currently selected image
    pub fn current(&self) -> Option<ImageReference> {
        self.state.lock().current.clone()
    }

    /// History, most recent first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.list()
    }

    /// Result rows of the last successful classification
    pub fn results(&self) -> Vec<ClassScore> {
        self.state
            .lock()
            .results
            .as_ref()
            .map(ConfidenceVector::to_class_scores)
            .unwrap_or_default()
    }

    /// Session blob store
    pub fn blob_store(&self) -> &BlobStore {
        self.decoder.blobs()
    }

    /// Model store
    pub fn model_store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Metrics collector
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Tracker counting live input tensors
    pub fn tensor_tracker(&self) -> &TensorTracker {
        self.preprocessor.tracker()
    }

    fn ensure_not_classifying(&self) -> Result<()> {
        if self.state.lock().phase == PipelinePhase::Classifying {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn new_selection(&self, reference: ImageReference, url_text: Option<&str>) -> Result<()> {
        if reference.is_empty() {
            return Err(Error::decode("empty image reference"));
        }

        self.transition(|state| {
            if state.phase == PipelinePhase::Classifying {
                return Err(Error::Busy);
            }
            if let Some(text) = url_text {
                state.url_input = text.to_string();
            }
            let (entry, evicted) = state.history.push(reference.clone());
            debug!("Selected {} (history #{})", reference, entry.sequence);
            for old in evicted {
                let still_listed = state.history.iter().any(|e| e.reference == old.reference);
                if matches!(old.reference, ImageReference::Blob(_)) && !still_listed {
                    self.decoder.blobs().remove(old.reference.locator());
                    debug!("Released {}", old.reference);
                }
            }
            state.current = Some(reference);
            state.results = None;
            state.last_error = None;
            state.phase = PipelinePhase::ImageSelected;
            Ok(())
        })?;

        self.metrics.record_selection();
        Ok(())
    }

    /// Apply a mutation under the lock and publish the result if it succeeded
    fn transition<T>(&self, f: impl FnOnce(&mut ControllerState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let value = f(&mut state)?;
        self.publish(&state);
        Ok(value)
    }

    fn publish(&self, state: &ControllerState) {
        self.snapshots.send_replace(self.build_snapshot(state));
    }

    fn build_snapshot(&self, state: &ControllerState) -> PipelineSnapshot {
        PipelineSnapshot {
            phase: state.phase,
            current: state.current.clone(),
            results: state.results.clone(),
            url_input: state.url_input.clone(),
            last_error: state.last_error.clone(),
            history_len: state.history.len(),
            model: self.store.readiness(),
        }
    }
}

/// Returns the controller to `ImageSelected` if an `identify` future is dropped mid-flight
struct ClassifyingGuard<'a> {
    controller: &'a PipelineController,
    armed: bool,
}

impl ClassifyingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClassifyingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.controller.state.lock();
        if state.phase == PipelinePhase::Classifying {
            warn!("Classification cancelled");
            state.phase = PipelinePhase::ImageSelected;
            self.controller.publish(&state);
        }
    }
}

/// Builder for a [`PipelineController`]
pub struct PipelineBuilder {
    store: Arc<ModelStore>,
    config: PipelineConfig,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    metrics: Option<MetricsCollector>,
    tracker: Option<TensorTracker>,
    blobs: Option<BlobStore>,
}

impl PipelineBuilder {
    /// Start a builder around a model store
    pub fn new(store: Arc<ModelStore>) -> Self {
        Self {
            store,
            config: PipelineConfig::default(),
            fetcher: None,
            metrics: None,
            tracker: None,
            blobs: None,
        }
    }

    /// Use this configuration (the model section is ignored; the store owns the model)
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Fetch remote images with `fetcher` instead of HTTP
    pub fn fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Record into an existing metrics collector
    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Count tensors with an existing tracker
    pub fn tracker(mut self, tracker: TensorTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Share a blob store
    pub fn blobs(mut self, blobs: BlobStore) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Build the controller
    pub fn build(self) -> Result<PipelineController> {
        let config = self.config;
        let blobs = self.blobs.unwrap_or_default();
        let decoder = match self.fetcher {
            Some(fetcher) => ImageDecoder::with_fetcher(config.decoder.clone(), blobs, fetcher),
            None => ImageDecoder::new(config.decoder.clone(), blobs)?,
        };
        let preprocessor =
            Preprocessor::new(config.preprocessing, self.tracker.unwrap_or_default());

        let state = ControllerState {
            phase: PipelinePhase::Idle,
            current: None,
            results: None,
            url_input: String::new(),
            last_error: None,
            history: HistoryLedger::new(&config.history),
        };

        let initial = PipelineSnapshot {
            phase: state.phase,
            current: None,
            results: None,
            url_input: String::new(),
            last_error: None,
            history_len: 0,
            model: self.store.readiness(),
        };
        let (snapshots, _) = watch::channel(initial);
        forward_readiness(&self.store, &snapshots);

        Ok(PipelineController {
            store: self.store,
            decoder,
            preprocessor,
            engine: InferenceEngine::new(config.inference),
            metrics: self.metrics.unwrap_or_default(),
            state: Mutex::new(state),
            snapshots,
        })
    }
}

/// Copy store readiness into published snapshots until the load settles
///
/// Needs a tokio runtime; without one, snapshots pick up readiness on the
/// controller's next transition.
fn forward_readiness(store: &ModelStore, snapshots: &watch::Sender<PipelineSnapshot>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let mut readiness = store.subscribe();
    if *readiness.borrow_and_update() != Readiness::Loading {
        return;
    }

    let snapshots = snapshots.clone();
    runtime.spawn(async move {
        while readiness.changed().await.is_ok() {
            let current = readiness.borrow_and_update().clone();
            let settled = current != Readiness::Loading;
            snapshots.send_modify(|snapshot| snapshot.model = current);
            if settled {
                break;
            }
        }
    });
}
