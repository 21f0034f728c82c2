//! Extension point for model acquisition.

use crate::classifier::ModelHandle;
use imageid_core::Result;

/// Pluggable backend that produces the pipeline's single model handle.
///
/// `CandleModelLoader` is the default implementation. Implement this trait to
/// plug in another runtime, or to hand the store a prebuilt model in tests.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    /// Acquire and build the model.
    async fn load(&self) -> Result<ModelHandle>;

    /// Human-readable description of what is being loaded, for logs.
    fn describe(&self) -> String;
}
