//! Convolutional building blocks shared by the encoder and decoder paths.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Batch norm epsilon.
const BATCH_NORM_EPSILON: f64 = 1e-3;

/// Weight of the current batch in the running statistics update.
const BATCH_NORM_MOMENTUM: f64 = 0.01;

/// Running mean and variance tracked per normalized channel.
const RUNNING_STATS_PER_CHANNEL: usize = 2;

/// Configuration for a [`ConvBlock`].
///
/// # Example
///
/// ```
/// use unet_model::ConvBlockConfig;
///
/// let config = ConvBlockConfig::new(3, 64);
/// assert_eq!(config.kernel_size, 3);
/// assert!(config.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvBlockConfig {
    /// Channels of the incoming feature map.
    pub in_channels: usize,

    /// Output channels of both convolutions.
    pub filters: usize,

    /// Square kernel size of both convolutions.
    pub kernel_size: usize,
}

impl ConvBlockConfig {
    /// Creates a 3x3 conv block configuration.
    #[must_use]
    pub const fn new(in_channels: usize, filters: usize) -> Self {
        Self {
            in_channels,
            filters,
            kernel_size: 3,
        }
    }

    /// Sets the kernel size.
    #[must_use]
    pub const fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Validates the configuration.
    ///
    /// The kernel must be odd so that "same" padding is symmetric.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.in_channels > 0 && self.filters > 0 && self.kernel_size % 2 == 1
    }
}

/// Two rounds of convolution, batch normalization and `ReLU`.
///
/// Architecture: Conv -> `BatchNorm` -> `ReLU` -> Conv -> `BatchNorm` -> `ReLU`
///
/// Spatial size is preserved; channels go from `in_channels` to `filters`.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    filters: Ignored<usize>,
}

impl<B: Backend> ConvBlock<B> {
    /// Creates a new conv block.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if a channel count is zero or the
    /// kernel size is even.
    pub fn new(config: ConvBlockConfig, device: &B::Device) -> Result<Self> {
        if !config.is_valid() {
            return Err(ModelError::invalid_config(format!(
                "conv block needs non-zero channels and an odd kernel, got {config:?}"
            )));
        }

        let kernel = [config.kernel_size, config.kernel_size];

        let conv1 = Conv2dConfig::new([config.in_channels, config.filters], kernel)
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv2 = Conv2dConfig::new([config.filters, config.filters], kernel)
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Ok(Self {
            conv1,
            norm1: batch_norm(config.filters, device),
            conv2,
            norm2: batch_norm(config.filters, device),
            filters: Ignored(config.filters),
        })
    }

    /// Batch norm running statistics, counted by `num_params` but not trained.
    #[must_use]
    pub fn non_trainable_params(&self) -> usize {
        2 * RUNNING_STATS_PER_CHANNEL * self.filters.0
    }

    /// Runs the forward pass.
    ///
    /// `[batch, in_channels, H, W]` -> `[batch, filters, H, W]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(input)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

fn batch_norm<B: Backend>(features: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(features)
        .with_epsilon(BATCH_NORM_EPSILON)
        .with_momentum(BATCH_NORM_MOMENTUM)
        .init(device)
}

/// Configuration for an [`EncoderBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderBlockConfig {
    /// Channels of the incoming feature map.
    pub in_channels: usize,

    /// Output channels of the conv block.
    pub filters: usize,
}

impl EncoderBlockConfig {
    /// Creates a new encoder block configuration.
    #[must_use]
    pub const fn new(in_channels: usize, filters: usize) -> Self {
        Self {
            in_channels,
            filters,
        }
    }

    /// Validates the configuration.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.in_channels > 0 && self.filters > 0
    }
}

/// Conv block followed by 2x2 max pooling.
#[derive(Debug, Module)]
pub struct EncoderBlock<B: Backend> {
    conv: ConvBlock<B>,
    pool: MaxPool2d,
}

impl<B: Backend> EncoderBlock<B> {
    /// Creates a new encoder block.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if a channel count is zero.
    pub fn new(config: EncoderBlockConfig, device: &B::Device) -> Result<Self> {
        if !config.is_valid() {
            return Err(ModelError::invalid_config(format!(
                "encoder block needs non-zero channels, got {config:?}"
            )));
        }

        let conv = ConvBlock::new(ConvBlockConfig::new(config.in_channels, config.filters), device)?;
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Ok(Self { conv, pool })
    }

    /// Batch norm running statistics of the conv block.
    #[must_use]
    pub fn non_trainable_params(&self) -> usize {
        self.conv.non_trainable_params()
    }

    /// Runs the forward pass.
    ///
    /// # Returns
    ///
    /// Tuple of:
    /// - Skip features: `[batch, filters, H, W]`
    /// - Pooled features: `[batch, filters, H / 2, W / 2]`
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip = self.conv.forward(input);
        let pooled = self.pool.forward(skip.clone());
        (skip, pooled)
    }
}

/// Configuration for a [`DecoderBlock`].
///
/// # Example
///
/// ```
/// use unet_model::DecoderBlockConfig;
///
/// // Deepest decoder of the default network: bottleneck (1024) + skip (512).
/// let config = DecoderBlockConfig::new(1024, 512, 512);
/// assert_eq!(config.concat_channels(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderBlockConfig {
    /// Channels of the tensor being up-sampled.
    pub in_channels: usize,

    /// Channels of the paired skip connection.
    pub skip_channels: usize,

    /// Output channels of the transpose conv and the conv block.
    pub filters: usize,
}

impl DecoderBlockConfig {
    /// Creates a new decoder block configuration.
    #[must_use]
    pub const fn new(in_channels: usize, skip_channels: usize, filters: usize) -> Self {
        Self {
            in_channels,
            skip_channels,
            filters,
        }
    }

    /// Channels entering the conv block after concatenation.
    #[must_use]
    pub const fn concat_channels(&self) -> usize {
        self.filters + self.skip_channels
    }

    /// Validates the configuration.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.in_channels > 0 && self.skip_channels > 0 && self.filters > 0
    }
}

/// Transpose-conv up-sampling, skip concatenation, then a conv block.
#[derive(Debug, Module)]
pub struct DecoderBlock<B: Backend> {
    up: ConvTranspose2d<B>,
    conv: ConvBlock<B>,
}

impl<B: Backend> DecoderBlock<B> {
    /// Creates a new decoder block.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if a channel count is zero.
    pub fn new(config: DecoderBlockConfig, device: &B::Device) -> Result<Self> {
        if !config.is_valid() {
            return Err(ModelError::invalid_config(format!(
                "decoder block needs non-zero channels, got {config:?}"
            )));
        }

        let up = ConvTranspose2dConfig::new([config.in_channels, config.filters], [2, 2])
            .with_stride([2, 2])
            .init(device);
        let conv = ConvBlock::new(
            ConvBlockConfig::new(config.concat_channels(), config.filters),
            device,
        )?;
        Ok(Self { up, conv })
    }

    /// Batch norm running statistics of the conv block.
    #[must_use]
    pub fn non_trainable_params(&self) -> usize {
        self.conv.non_trainable_params()
    }

    /// Runs the forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: `[batch, in_channels, H, W]`
    /// - `skip`: `[batch, skip_channels, 2H, 2W]`
    ///
    /// # Returns
    ///
    /// `[batch, filters, 2H, 2W]`
    pub fn forward(&self, input: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(input);
        let x = Tensor::cat(vec![x, skip], 1);
        self.conv.forward(x)
    }
}
