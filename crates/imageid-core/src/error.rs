//! Error types for ImageID

/// Result type alias using ImageID's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ImageID operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Model acquisition failed; terminal for the model store
    #[error("model load error: {0}")]
    Load(String),

    /// Model is still loading
    #[error("model not ready: {0}")]
    NotReady(String),

    /// Image bytes could not be fetched or decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Decoded image could not be turned into a model input
    #[error("preprocess error: {0}")]
    Preprocess(String),

    /// Forward pass or output extraction failed
    #[error("inference error: {0}")]
    Inference(String),

    /// Classification requested with no current image
    #[error("no image selected")]
    NoImageSelected,

    /// A classification is in flight
    #[error("classification in progress")]
    Busy,

    /// History selection outside the ledger
    #[error("history index {index} out of range (history has {len} entries)")]
    HistoryIndex { index: usize, len: usize },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new model load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a new not-ready error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new preprocess error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Pipeline stage this error belongs to, used as a log field and metric label
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Load(_) | Self::NotReady(_) => "load",
            Self::Decode(_) => "decode",
            Self::Preprocess(_) => "preprocess",
            Self::Inference(_) => "inference",
            Self::NoImageSelected | Self::Busy | Self::HistoryIndex { .. } => "controller",
            Self::Config(_) => "config",
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => "internal",
        }
    }

    /// Whether the pipeline can keep serving requests after this error.
    ///
    /// Only a failed model load is fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Load(_))
    }
}
