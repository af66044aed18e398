//! U-Net segmentation model built on the Burn framework.
//!
//! This crate wires Burn's layer primitives (convolution, batch norm,
//! max pooling, transpose convolution) into the U-Net encoder/decoder
//! topology and returns a model generic over any Burn backend.
//!
//! # Building Blocks
//!
//! - [`ConvBlock`] - Two rounds of 3x3 conv, batch norm and `ReLU`
//! - [`EncoderBlock`] - Conv block plus 2x2 max pooling, yields the skip tensor
//! - [`DecoderBlock`] - Transpose-conv up-sampling, skip concatenation, conv block
//!
//! # Model
//!
//! - [`UNet`] / [`UNetConfig`] - The assembled network
//! - [`build_unet`] - Default network (64..1024 filters) for an input shape
//! - [`Topology`] - Tensor-free plan of every stage's output shape
//! - [`ModelSummary`] - Per-stage shapes and parameter counts
//!
//! # Tensor Layout
//!
//! Shapes are described as `(height, width, channels)` with [`InputShape`],
//! but tensors follow Burn's NCHW convention: `[batch, channels, H, W]`.
//!
//! # Backend Support
//!
//! Models are generic over Burn backends. Common choices:
//! - `burn-ndarray` - CPU inference/training
//! - `burn-wgpu` - GPU inference/training
//!
//! # Example
//!
//! ```ignore
//! use burn::tensor::Tensor;
//! use unet_model::{InputShape, build_unet};
//!
//! let device = Default::default();
//! let shape = InputShape::new(512, 512, 3);
//! let model = build_unet::<MyBackend>(shape, &device)?;
//!
//! let mask = model.forward(Tensor::zeros(shape.to_dims(1), &device));
//! assert_eq!(mask.dims(), [1, 1, 512, 512]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod blocks;
mod error;
mod shape;
mod summary;
mod unet;

// Re-export building blocks
pub use blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock,
    EncoderBlockConfig,
};

// Re-export model types
pub use unet::{MODEL_NAME, UNet, UNetConfig, UNetFeatures, build_unet, build_unet_with};

// Re-export shape and summary types
pub use shape::{InputShape, StageKind, StageShape, Topology};
pub use summary::{ModelSummary, SummaryRow};

// Re-export error types
pub use error::{ModelError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        InputShape, ModelError, ModelSummary, Topology, UNet, UNetConfig, UNetFeatures,
        build_unet, build_unet_with,
    };
}
