//! ImageID Core
//!
//! Core types and error handling shared across the ImageID crates.
//!
//! This crate provides:
//! - Image references, decoded pixel buffers and model input specs
//! - Confidence vectors and their user-facing rendering
//! - The error taxonomy used by every pipeline stage

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ClassScore, ConfidenceVector, DecodedImage, ImageReference, InputShape, InputSpec,
    TensorLayout,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ClassScore, ConfidenceVector, DecodedImage, ImageReference, InputShape, InputSpec,
        TensorLayout,
    };
}
