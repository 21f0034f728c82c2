//! Turns decoded pixels into the fixed-shape tensor a model expects
//!
//! Channel conversion goes through `image`; the nearest-neighbour resize to the
//! model's height and width runs on the tensor. Samples are cast to `f32` and
//! normalized as `(x - offset) / scale` with a leading batch dimension of 1.

use crate::tensor::{InputTensor, TensorTracker};
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use imageid_core::{DecodedImage, Error, InputSpec, Result, TensorLayout};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Normalization constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Subtracted from every sample
    #[serde(default = "default_normalization")]
    pub normalization_offset: f64,

    /// Divides every sample after the offset
    #[serde(default = "default_normalization")]
    pub normalization_scale: f64,
}

fn default_normalization() -> f64 {
    127.5
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            normalization_offset: default_normalization(),
            normalization_scale: default_normalization(),
        }
    }
}

/// Image preprocessor
#[derive(Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
    tracker: TensorTracker,
}

impl Preprocessor {
    /// Create a preprocessor that registers tensors with `tracker`
    pub fn new(config: PreprocessConfig, tracker: TensorTracker) -> Self {
        Self { config, tracker }
    }

    /// Normalization constants in use
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Tracker that owns every tensor this preprocessor creates
    pub fn tracker(&self) -> &TensorTracker {
        &self.tracker
    }

    /// Build the model input tensor for `image`
    pub fn preprocess(
        &self,
        image: &DecodedImage,
        spec: &InputSpec,
        device: &Device,
    ) -> Result<InputTensor> {
        if image.is_empty() {
            return Err(Error::preprocess(format!(
                "image has zero area ({}x{})",
                image.width, image.height
            )));
        }
        if !matches!(image.channels, 1 | 3 | 4) {
            return Err(Error::preprocess(format!(
                "unsupported source channel count {}",
                image.channels
            )));
        }
        if image.pixels.len() != image.expected_len() {
            return Err(Error::preprocess(format!(
                "pixel buffer holds {} samples, expected {} for {}x{}x{}",
                image.pixels.len(),
                image.expected_len(),
                image.width,
                image.height,
                image.channels
            )));
        }

        let shape = spec.shape;
        if shape.height == 0 || shape.width == 0 {
            return Err(Error::preprocess(format!("target shape {} has zero area", shape)));
        }
        if !matches!(shape.channels, 1 | 3) {
            return Err(Error::preprocess(format!(
                "unsupported target channel count {}",
                shape.channels
            )));
        }
        if !(self.config.normalization_scale > 0.0) {
            return Err(Error::preprocess(format!(
                "normalization scale must be positive, got {}",
                self.config.normalization_scale
            )));
        }

        let samples = match shape.channels {
            1 => to_dynamic(image)?.to_luma8().into_raw(),
            _ => to_dynamic(image)?.to_rgb8().into_raw(),
        };
        let (src_h, src_w) = (image.height as usize, image.width as usize);

        let scale = self.config.normalization_scale;
        let offset = self.config.normalization_offset;
        let tensor = Tensor::from_vec(samples, (src_h, src_w, shape.channels), device)
            .and_then(|t| t.permute((2, 0, 1)))
            .and_then(|t| t.unsqueeze(0))
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.upsample_nearest2d(shape.height, shape.width))
            .and_then(|t| t.affine(1.0 / scale, -offset / scale))
            .and_then(|t| match spec.layout {
                TensorLayout::Nchw => Ok(t),
                TensorLayout::Nhwc => t.permute((0, 2, 3, 1))?.contiguous(),
            })
            .map_err(|e| Error::preprocess(format!("failed to build input tensor: {}", e)))?;

        debug!(
            "Preprocessed {}x{}x{} image into {:?}",
            image.width,
            image.height,
            image.channels,
            tensor.dims()
        );

        Ok(InputTensor::new(tensor, &self.tracker))
    }
}

/// Wrap raw samples so `image` can handle channel conversion
fn to_dynamic(image: &DecodedImage) -> Result<DynamicImage> {
    let (w, h, pixels) = (image.width, image.height, image.pixels.clone());
    let dynamic = match image.channels {
        1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
        n => {
            return Err(Error::preprocess(format!(
                "unsupported source channel count {}",
                n
            )))
        }
    };
    dynamic.ok_or_else(|| Error::preprocess("pixel buffer does not match image dimensions"))
}
