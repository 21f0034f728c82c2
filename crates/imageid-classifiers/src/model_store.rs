//! One-shot model acquisition with observable readiness
//!
//! The store loads its model at most once. Callers can poll [`ModelStore::readiness`],
//! subscribe to changes, or await [`ModelStore::wait_ready`]. A failed load is
//! terminal for the process: the store never hands out a handle afterwards.

use crate::classifier::ModelHandle;
use crate::loader_plugin::ModelLoader;
use imageid_core::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Load state of the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Readiness {
    /// Load not finished (or not started)
    Loading,
    /// Handle available
    Ready,
    /// Load failed; the message is user-visible
    Failed(String),
}

impl Readiness {
    /// True once a handle is available
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Readiness and handle, shared with the task that performs the load
struct Shared {
    readiness: watch::Sender<Readiness>,
    handle: OnceLock<Arc<ModelHandle>>,
}

impl Shared {
    fn publish(&self, outcome: Result<ModelHandle>) -> Result<Arc<ModelHandle>> {
        match outcome {
            Ok(handle) => {
                let handle = Arc::new(handle);
                let _ = self.handle.set(handle.clone());
                self.readiness.send_replace(Readiness::Ready);
                Ok(handle)
            }
            Err(e) => {
                let reason = match e {
                    Error::Load(msg) => msg,
                    other => other.to_string(),
                };
                self.readiness.send_replace(Readiness::Failed(reason.clone()));
                Err(Error::Load(reason))
            }
        }
    }
}

/// Marks the load failed if the load task ends without publishing
struct PublishGuard(Arc<Shared>);

impl Drop for PublishGuard {
    fn drop(&mut self) {
        self.0.readiness.send_if_modified(|r| {
            if *r == Readiness::Loading {
                *r = Readiness::Failed("model load aborted".to_string());
                true
            } else {
                false
            }
        });
    }
}

/// Owns the single model handle for the pipeline
pub struct ModelStore {
    loader: Arc<dyn ModelLoader>,
    shared: Arc<Shared>,
    attempted: AtomicBool,
}

impl ModelStore {
    /// Create a store that will load through `loader`
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Loading);
        Self {
            loader,
            shared: Arc::new(Shared {
                readiness,
                handle: OnceLock::new(),
            }),
            attempted: AtomicBool::new(false),
        }
    }

    /// Create a store around an already-built handle
    pub fn ready(handle: ModelHandle) -> Self {
        let handle = Arc::new(handle);
        let store = Self::new(Arc::new(Preloaded(handle.clone())));
        store.attempted.store(true, Ordering::SeqCst);
        let _ = store.shared.handle.set(handle);
        store.shared.readiness.send_replace(Readiness::Ready);
        store
    }

    /// Load the model
    ///
    /// Only the first call performs the load; later calls wait for its
    /// outcome and return the same handle or failure. The load runs on its
    /// own task, so dropping the returned future does not abandon it.
    pub async fn load(&self) -> Result<Arc<ModelHandle>> {
        if self.attempted.swap(true, Ordering::SeqCst) {
            return self.wait_ready().await;
        }

        let loader = Arc::clone(&self.loader);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let guard = PublishGuard(shared);
            let description = loader.describe();
            info!("Loading model {}", description);
            let start = Instant::now();

            let outcome = loader.load().await;
            let published = guard.0.publish(outcome);
            match &published {
                Ok(handle) => info!(
                    "Model '{}' ready in {}ms ({} classes, input {})",
                    handle.name(),
                    start.elapsed().as_millis(),
                    handle.num_classes(),
                    handle.input_shape()
                ),
                Err(e) => error!("Failed to load model {}: {}", description, e),
            }
            published
        });

        match task.await {
            Ok(published) => published,
            Err(e) => {
                error!("Model load task did not complete: {}", e);
                self.handle()
            }
        }
    }

    /// Start loading in the background
    pub fn spawn_load(self: &Arc<Self>) -> JoinHandle<Result<Arc<ModelHandle>>> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.load().await })
    }

    /// Current readiness
    pub fn readiness(&self) -> Readiness {
        self.shared.readiness.borrow().clone()
    }

    /// Watch readiness changes
    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.shared.readiness.subscribe()
    }

    /// The loaded handle, or why there is none
    pub fn handle(&self) -> Result<Arc<ModelHandle>> {
        match self.readiness() {
            Readiness::Ready => self
                .shared
                .handle
                .get()
                .cloned()
                .ok_or_else(|| Error::internal("model marked ready without a handle")),
            Readiness::Loading => Err(Error::not_ready("Model Loading...")),
            Readiness::Failed(reason) => Err(Error::Load(reason)),
        }
    }

    /// Wait until the load has finished, successfully or not
    pub async fn wait_ready(&self) -> Result<Arc<ModelHandle>> {
        let mut rx = self.subscribe();
        rx.wait_for(|r| *r != Readiness::Loading)
            .await
            .map_err(|e| Error::internal(format!("readiness channel closed: {}", e)))?;
        self.handle()
    }

    /// What the loader is loading
    pub fn describe(&self) -> String {
        self.loader.describe()
    }
}

struct Preloaded(Arc<ModelHandle>);

#[async_trait::async_trait]
impl ModelLoader for Preloaded {
    async fn load(&self) -> Result<ModelHandle> {
        Ok(self.0.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("{} (preloaded)", self.0.name())
    }
}
