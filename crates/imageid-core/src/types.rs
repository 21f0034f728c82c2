//! Core types for ImageID

use serde::{Deserialize, Serialize};
use std::fmt;

/// Locator for image bytes
///
/// Equality and hashing are by locator value, so the same URL selected twice
/// produces two equal references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "locator", rename_all = "lowercase")]
pub enum ImageReference {
    /// Session-scoped locator for uploaded bytes (`blob:<id>`)
    Blob(String),

    /// Remote image URL
    Url(String),
}

impl ImageReference {
    /// Create a blob reference
    pub fn blob(locator: impl Into<String>) -> Self {
        Self::Blob(locator.into())
    }

    /// Create a URL reference
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// The raw locator string
    pub fn locator(&self) -> &str {
        match self {
            Self::Blob(locator) | Self::Url(locator) => locator,
        }
    }

    /// True when the locator is empty or whitespace
    pub fn is_empty(&self) -> bool {
        self.locator().trim().is_empty()
    }

    /// Whether this reference points at a remote resource
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.locator())
    }
}

/// Decoded, interleaved 8-bit pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Channels per pixel (1 = gray, 3 = RGB, 4 = RGBA)
    pub channels: u8,

    /// Row-major interleaved samples
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Create a decoded image from raw samples
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    /// A solid-colour RGB image
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, 3, pixels)
    }

    /// Number of samples the buffer should hold
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// True for zero-area images
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Memory layout of the model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Batch, height, width, channels (Keras/TensorFlow exports)
    #[default]
    Nhwc,
    /// Batch, channels, height, width (PyTorch exports)
    Nchw,
}

/// Spatial input shape a model expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
}

fn default_channels() -> usize {
    3
}

impl InputShape {
    /// Create a new input shape
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Square RGB input, the common case for image classifiers
    pub fn square(size: usize) -> Self {
        Self::new(size, size, 3)
    }

    /// Number of values in one image
    pub fn num_elements(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::square(224)
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Input shape plus layout; everything the preprocessor needs to know about a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputSpec {
    pub shape: InputShape,
    #[serde(default)]
    pub layout: TensorLayout,
}

impl InputSpec {
    /// Create a new input spec
    pub fn new(shape: InputShape, layout: TensorLayout) -> Self {
        Self { shape, layout }
    }

    /// Tensor dims including the leading batch dimension of 1
    pub fn batch_dims(&self) -> [usize; 4] {
        let InputShape {
            height,
            width,
            channels,
        } = self.shape;
        match self.layout {
            TensorLayout::Nhwc => [1, height, width, channels],
            TensorLayout::Nchw => [1, channels, height, width],
        }
    }
}

/// Per-class scores produced by one forward pass, in model output order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceVector(Vec<f32>);

impl ConfidenceVector {
    /// Wrap raw scores
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    /// Scores in class order
    pub fn scores(&self) -> &[f32] {
        &self.0
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no scores are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all scores
    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// True when every score is finite
    pub fn all_finite(&self) -> bool {
        self.0.iter().all(|s| s.is_finite())
    }

    /// Index and score of the highest-scoring class
    pub fn top(&self) -> Option<(usize, f32)> {
        self.0
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Render scores as user-facing rows, index-ordered
    pub fn to_class_scores(&self) -> Vec<ClassScore> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, &score)| ClassScore::new(index, score))
            .collect()
    }

    /// Consume into the raw scores
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for ConfidenceVector {
    fn from(scores: Vec<f32>) -> Self {
        Self::new(scores)
    }
}

/// One row of the result surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// `Class <1-based index>`
    pub label: String,

    /// Percentage with two decimals, e.g. `97.25%`
    pub confidence: String,

    /// Raw score
    pub score: f32,
}

impl ClassScore {
    /// Build the row for the class at a 0-based index
    pub fn new(index: usize, score: f32) -> Self {
        Self {
            label: format!("Class {}", index + 1),
            confidence: format!("{:.2}%", score * 100.0),
            score,
        }
    }
}
