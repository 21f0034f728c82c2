//! ImageID Classifiers
//!
//! Model loading, image decoding, preprocessing, inference and the pipeline
//! controller that ties them together.
//!
//! A session looks like this:
//! - `ModelStore` loads one Candle model at startup and reports readiness
//! - the `PipelineController` accepts uploads and URLs, recording each new
//!   selection in the `HistoryLedger`
//! - `identify` runs decode → preprocess → predict on the blocking pool and
//!   publishes a `ConfidenceVector`
//!
//! CPU-bound work (weight loading, decoding, the forward pass) never runs on
//! the async executor threads.

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod history;
pub mod inference;
pub mod loader_plugin;
pub mod model_config;
pub mod model_loader;
pub mod model_store;
pub mod pipeline;
pub mod preprocess;
pub mod tensor;

pub use classifier::{ImageModel, ModelHandle, ModelSummary};
pub use config::PipelineConfig;
pub use decoder::{BlobStore, DecoderConfig, HttpFetcher, ImageDecoder, RemoteFetcher};
pub use history::{HistoryConfig, HistoryEntry, HistoryLedger};
pub use inference::{InferenceConfig, InferenceEngine};
pub use loader_plugin::ModelLoader;
pub use model_config::{
    ArchitectureConfig, DeviceSpec, EfficientNetVariant, ModelDescriptor, ModelSource,
    OutputActivation,
};
pub use model_loader::{CandleImageModel, CandleModelLoader};
pub use model_store::{ModelStore, Readiness};
pub use pipeline::{
    IdentifyOutcome, PipelineBuilder, PipelineController, PipelinePhase, PipelineSnapshot,
};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use tensor::{InputTensor, TensorStats, TensorTracker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{ImageModel, ModelHandle};
    pub use crate::config::PipelineConfig;
    pub use crate::model_config::ModelDescriptor;
    pub use crate::model_loader::CandleModelLoader;
    pub use crate::model_store::{ModelStore, Readiness};
    pub use crate::pipeline::{IdentifyOutcome, PipelineController, PipelinePhase};
}
