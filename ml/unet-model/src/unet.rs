//! U-Net encoder/decoder segmentation model.

use burn::module::{Ignored, Module};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock,
    EncoderBlockConfig,
};
use crate::error::{ModelError, Result};
use crate::shape::{InputShape, StageKind, StageShape, Topology, downsample_factor};

/// Name reported by [`UNet::name`] and the model summary.
pub const MODEL_NAME: &str = "UNET";

/// Configuration for the U-Net model.
///
/// The defaults build the classic network: four encoder stages with
/// 64/128/256/512 filters, a 1024-filter bottleneck, four mirrored decoder
/// stages and a single-channel sigmoid head.
///
/// # Example
///
/// ```
/// use unet_model::UNetConfig;
///
/// let config = UNetConfig::default();
/// assert_eq!(config.stage_filters().ok(), Some(vec![64, 128, 256, 512]));
/// assert_eq!(config.bottleneck_filters().ok(), Some(1024));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UNetConfig {
    /// Channels of the input image.
    pub in_channels: usize,

    /// Filters of the first encoder stage; doubled at every stage.
    pub base_filters: usize,

    /// Number of encoder (and decoder) stages.
    pub depth: usize,

    /// Channels of the output map.
    pub out_channels: usize,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            base_filters: 64,
            depth: 4,
            out_channels: 1,
        }
    }
}

impl UNetConfig {
    /// Creates a default configuration for the given input channels.
    #[must_use]
    pub const fn new(in_channels: usize) -> Self {
        Self {
            in_channels,
            base_filters: 64,
            depth: 4,
            out_channels: 1,
        }
    }

    /// Sets the filters of the first stage.
    #[must_use]
    pub const fn with_base_filters(mut self, base_filters: usize) -> Self {
        self.base_filters = base_filters;
        self
    }

    /// Sets the number of encoder/decoder stages.
    #[must_use]
    pub const fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the output channels.
    #[must_use]
    pub const fn with_out_channels(mut self, out_channels: usize) -> Self {
        self.out_channels = out_channels;
        self
    }

    /// Returns the filters of each encoder stage, shallowest first.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if the filter count overflows.
    pub fn stage_filters(&self) -> Result<Vec<usize>> {
        (0..self.depth).map(|i| self.filters_at(i)).collect()
    }

    /// Returns the filters of the bottleneck.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if the filter count overflows.
    pub fn bottleneck_filters(&self) -> Result<usize> {
        self.filters_at(self.depth)
    }

    /// Filters after `level` doublings of `base_filters`.
    fn filters_at(&self, level: usize) -> Result<usize> {
        downsample_factor(level)?
            .checked_mul(self.base_filters)
            .ok_or_else(|| {
                ModelError::invalid_config(format!(
                    "base_filters {} overflows at depth {level}",
                    self.base_filters
                ))
            })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if any channel count is zero or
    /// the filter count at the bottleneck would overflow.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(ModelError::invalid_config("in_channels must be > 0"));
        }
        if self.base_filters == 0 {
            return Err(ModelError::invalid_config("base_filters must be > 0"));
        }
        if self.out_channels == 0 {
            return Err(ModelError::invalid_config("out_channels must be > 0"));
        }
        self.bottleneck_filters()?;
        Ok(())
    }

    /// Computes the shape of every stage for the given input, without tensors.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the input channels
    /// differ from `in_channels`, or the input size is not divisible by
    /// `2^depth`.
    pub fn plan(&self, input: InputShape) -> Result<Topology> {
        input.validate(self.depth)?;
        self.validate()?;
        if input.channels != self.in_channels {
            return Err(ModelError::shape_mismatch(
                format!("{} input channels", self.in_channels),
                format!("{} in {input}", input.channels),
            ));
        }

        let filters = self.stage_filters()?;
        let mut stages = Vec::with_capacity(2 * self.depth + 2);
        let (mut height, mut width) = (input.height, input.width);

        for (i, &filters) in filters.iter().enumerate() {
            let name = format!("encoder_{}", i + 1);
            stages.push(stage(name, StageKind::Encoder, filters, height, width));
            height /= 2;
            width /= 2;
        }

        stages.push(stage(
            "bottleneck".to_string(),
            StageKind::Bottleneck,
            self.bottleneck_filters()?,
            height,
            width,
        ));

        for (i, &filters) in filters.iter().rev().enumerate() {
            height *= 2;
            width *= 2;
            let name = format!("decoder_{}", i + 1);
            stages.push(stage(name, StageKind::Decoder, filters, height, width));
        }

        stages.push(stage(
            "output".to_string(),
            StageKind::Output,
            self.out_channels,
            height,
            width,
        ));

        for s in &stages {
            debug!(
                stage = %s.name,
                channels = s.channels,
                height = s.height,
                width = s.width,
                "Planned stage"
            );
        }

        Ok(Topology { input, stages })
    }
}

fn stage(
    name: String,
    kind: StageKind,
    channels: usize,
    height: usize,
    width: usize,
) -> StageShape {
    StageShape {
        name,
        kind,
        channels,
        height,
        width,
    }
}

/// Intermediate tensors of a full forward pass.
#[derive(Debug, Clone)]
pub struct UNetFeatures<B: Backend> {
    /// Skip tensors of each encoder stage, shallowest first.
    pub skips: Vec<Tensor<B, 4>>,

    /// Bottleneck output.
    pub bottleneck: Tensor<B, 4>,

    /// Output of each decoder stage, deepest first.
    pub decoded: Vec<Tensor<B, 4>>,

    /// Per-pixel probabilities `[batch, out_channels, H, W]` in `[0, 1]`.
    pub output: Tensor<B, 4>,
}

/// Stage outputs of one pass, before the final sigmoid.
struct Stages<B: Backend> {
    skips: Vec<Tensor<B, 4>>,
    bottleneck: Tensor<B, 4>,
    decoded: Vec<Tensor<B, 4>>,
    logits: Tensor<B, 4>,
}

/// U-Net segmentation model.
///
/// Architecture: N Encoder Blocks -> Bottleneck -> N Decoder Blocks -> 1x1 Conv -> Sigmoid
///
/// Each decoder block up-samples by 2 and concatenates the skip tensor of
/// the encoder stage at the same resolution.
///
/// # Type Parameters
///
/// - `B`: The Burn backend (e.g., `NdArray`, `Wgpu`)
///
/// # Example
///
/// ```ignore
/// use unet_model::{InputShape, build_unet};
///
/// let device = Default::default();
/// let model = build_unet::<MyBackend>(InputShape::new(512, 512, 3), &device)?;
///
/// let input = Tensor::zeros([1, 3, 512, 512], &device);
/// let mask = model.forward(input);
/// assert_eq!(mask.dims(), [1, 1, 512, 512]);
/// ```
#[derive(Debug, Module)]
pub struct UNet<B: Backend> {
    encoders: Vec<EncoderBlock<B>>,
    bottleneck: ConvBlock<B>,
    decoders: Vec<DecoderBlock<B>>,
    head: Conv2d<B>,
    config: Ignored<UNetConfig>,
}

impl<B: Backend> UNet<B> {
    /// Creates a new U-Net.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: UNetConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;

        let filters = config.stage_filters()?;
        let bottleneck_filters = config.bottleneck_filters()?;

        let mut encoders = Vec::with_capacity(config.depth);
        let mut in_channels = config.in_channels;
        for &f in &filters {
            encoders.push(EncoderBlock::new(EncoderBlockConfig::new(in_channels, f), device)?);
            in_channels = f;
        }

        let bottleneck =
            ConvBlock::new(ConvBlockConfig::new(in_channels, bottleneck_filters), device)?;

        let mut decoders = Vec::with_capacity(config.depth);
        let mut in_channels = bottleneck_filters;
        for &f in filters.iter().rev() {
            decoders.push(DecoderBlock::new(DecoderBlockConfig::new(in_channels, f, f), device)?);
            in_channels = f;
        }

        let head = Conv2dConfig::new([in_channels, config.out_channels], [1, 1])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Ok(Self {
            encoders,
            bottleneck,
            decoders,
            head,
            config: Ignored(config),
        })
    }

    /// Runs the forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: `[batch, in_channels, H, W]` with `H` and `W` divisible by `2^depth`
    ///
    /// # Returns
    ///
    /// Probabilities of shape `[batch, out_channels, H, W]` in `[0, 1]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        sigmoid(self.forward_logits(input))
    }

    /// Runs the forward pass without the final sigmoid.
    ///
    /// Useful for losses that take logits.
    pub fn forward_logits(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_stages(input).logits
    }

    /// Runs the forward pass and keeps every intermediate stage output.
    pub fn forward_features(&self, input: Tensor<B, 4>) -> UNetFeatures<B> {
        let stages = self.forward_stages(input);
        UNetFeatures {
            skips: stages.skips,
            bottleneck: stages.bottleneck,
            decoded: stages.decoded,
            output: sigmoid(stages.logits),
        }
    }

    fn forward_stages(&self, input: Tensor<B, 4>) -> Stages<B> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input;
        for encoder in &self.encoders {
            let (skip, pooled) = encoder.forward(x);
            skips.push(skip);
            x = pooled;
        }

        let bottleneck = self.bottleneck.forward(x);

        let mut decoded = Vec::with_capacity(self.decoders.len());
        let mut x = bottleneck.clone();
        for (decoder, skip) in self.decoders.iter().zip(skips.iter().rev()) {
            x = decoder.forward(x, skip.clone());
            decoded.push(x.clone());
        }

        Stages {
            skips,
            bottleneck,
            decoded,
            logits: self.head.forward(x),
        }
    }

    /// Runs the forward pass after checking the input dimensions.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ShapeMismatch` if the channel count is wrong and
    /// `ModelError::InvalidInputShape` if the spatial size is not divisible
    /// by `2^depth`.
    pub fn try_forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let [_, channels, height, width] = input.dims();
        if channels != self.config.0.in_channels {
            return Err(ModelError::shape_mismatch(
                format!("{} channels", self.config.0.in_channels),
                format!("{channels} channels"),
            ));
        }
        InputShape::new(height, width, channels).validate(self.config.0.depth)?;
        Ok(self.forward(input))
    }

    /// Returns the model name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        MODEL_NAME
    }

    /// Returns the configuration the model was built from.
    #[must_use]
    pub const fn config(&self) -> &UNetConfig {
        &self.config.0
    }

    /// Returns the number of encoder/decoder stages.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.config.0.depth
    }

    /// Returns the expected input channels.
    #[must_use]
    pub const fn in_channels(&self) -> usize {
        self.config.0.in_channels
    }

    /// Returns the output channels.
    #[must_use]
    pub const fn out_channels(&self) -> usize {
        self.config.0.out_channels
    }

    pub(crate) fn encoders(&self) -> &[EncoderBlock<B>] {
        &self.encoders
    }

    pub(crate) const fn bottleneck(&self) -> &ConvBlock<B> {
        &self.bottleneck
    }

    pub(crate) fn decoders(&self) -> &[DecoderBlock<B>] {
        &self.decoders
    }

    pub(crate) const fn head(&self) -> &Conv2d<B> {
        &self.head
    }
}

/// Builds a U-Net with the default configuration for the given input shape.
///
/// The input channel count is taken from `input_shape`.
///
/// # Errors
///
/// Returns `ModelError::InvalidInputShape` if height or width is not
/// divisible by 16, or either is zero, or there are no channels.
pub fn build_unet<B: Backend>(input_shape: InputShape, device: &B::Device) -> Result<UNet<B>> {
    build_unet_with(UNetConfig::new(input_shape.channels), input_shape, device)
}

/// Builds a U-Net from an explicit configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or does not accept
/// `input_shape`.
pub fn build_unet_with<B: Backend>(
    config: UNetConfig,
    input_shape: InputShape,
    device: &B::Device,
) -> Result<UNet<B>> {
    config.plan(input_shape)?;
    let model = UNet::new(config, device)?;

    info!(
        input = %input_shape,
        depth = config.depth,
        base_filters = config.base_filters,
        params = model.num_params(),
        "Built U-Net"
    );

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    fn small_config() -> UNetConfig {
        UNetConfig::new(3).with_base_filters(4)
    }

    #[test]
    fn config_default() {
        let config = UNetConfig::default();
        assert_eq!(config.in_channels, 3);
        assert_eq!(config.base_filters, 64);
        assert_eq!(config.depth, 4);
        assert_eq!(config.out_channels, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = UNetConfig::new(1)
            .with_base_filters(32)
            .with_depth(3)
            .with_out_channels(2);

        assert_eq!(config.in_channels, 1);
        assert_eq!(config.stage_filters().ok(), Some(vec![32, 64, 128]));
        assert_eq!(config.bottleneck_filters().ok(), Some(256));
        assert_eq!(config.out_channels, 2);
    }

    #[test]
    fn config_invalid() {
        assert!(UNetConfig::new(0).validate().is_err());
        assert!(UNetConfig::new(3).with_base_filters(0).validate().is_err());
        assert!(UNetConfig::new(3).with_out_channels(0).validate().is_err());
        assert!(UNetConfig::new(3).with_depth(70).validate().is_err());
    }

    #[test]
    fn filter_accessors_reject_overflow() {
        let deep = UNetConfig::new(3).with_depth(70);
        assert!(matches!(deep.stage_filters(), Err(ModelError::InvalidConfig(_))));
        assert!(matches!(deep.bottleneck_filters(), Err(ModelError::InvalidConfig(_))));

        let wide = UNetConfig::new(3)
            .with_base_filters(usize::MAX / 2 + 1)
            .with_depth(1);
        assert_eq!(wide.stage_filters().ok(), Some(vec![usize::MAX / 2 + 1]));
        assert!(matches!(wide.bottleneck_filters(), Err(ModelError::InvalidConfig(_))));
        assert!(wide.validate().is_err());
        assert!(UNet::<TestBackend>::new(wide, &device()).is_err());
    }

    #[test]
    fn config_serialization() {
        let config = UNetConfig::default();
        let json = serde_json::to_string(&config);
        assert!(json.is_ok());

        let parsed: std::result::Result<UNetConfig, _> =
            serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), config);
    }

    #[test]
    fn plan_default_512() {
        let topology = UNetConfig::default()
            .plan(InputShape::new(512, 512, 3))
            .unwrap_or_else(|e| panic!("{e}"));

        let skips: Vec<[usize; 3]> = topology.skips().map(StageShape::chw).collect();
        assert_eq!(
            skips,
            vec![[64, 512, 512], [128, 256, 256], [256, 128, 128], [512, 64, 64]]
        );

        let bottleneck = topology.bottleneck().map(StageShape::chw);
        assert_eq!(bottleneck, Some([1024, 32, 32]));

        let decoders: Vec<[usize; 3]> = topology.decoders().map(StageShape::chw).collect();
        assert_eq!(
            decoders,
            vec![[512, 64, 64], [256, 128, 128], [128, 256, 256], [64, 512, 512]]
        );

        assert_eq!(topology.output().map(StageShape::chw), Some([1, 512, 512]));
        assert_eq!(topology.stages.len(), 10);
    }

    #[test]
    fn plan_rejects_channel_mismatch() {
        let result = UNetConfig::new(3).plan(InputShape::new(64, 64, 1));
        assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn plan_rejects_indivisible_input() {
        let result = UNetConfig::default().plan(InputShape::new(520, 512, 3));
        assert!(matches!(result, Err(ModelError::InvalidInputShape { .. })));

        // Divisible by 8 is enough at depth 3.
        let result = UNetConfig::default()
            .with_depth(3)
            .plan(InputShape::new(520, 512, 3));
        assert!(result.is_ok());
    }

    #[test]
    fn model_forward_shape() {
        let model = UNet::<TestBackend>::new(small_config(), &device())
            .unwrap_or_else(|e| panic!("{e}"));

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device());
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 1, 32, 32]);
    }

    #[test]
    fn model_forward_non_square() {
        let model = UNet::<TestBackend>::new(small_config(), &device())
            .unwrap_or_else(|e| panic!("{e}"));

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 48], &device());
        assert_eq!(model.forward(input).dims(), [1, 1, 16, 48]);
    }

    #[test]
    fn model_output_is_probability() {
        let model = UNet::<TestBackend>::new(small_config(), &device())
            .unwrap_or_else(|e| panic!("{e}"));

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 16, 16],
            Distribution::Normal(0.0, 5.0),
            &device(),
        );
        let values = model.forward(input).into_data().to_vec::<f32>().unwrap_or_default();

        assert_eq!(values.len(), 16 * 16);
        for v in values {
            assert!((0.0..=1.0).contains(&v), "{v} outside [0, 1]");
        }
    }

    #[test]
    fn model_features_match_plan() {
        let config = small_config();
        let shape = InputShape::new(32, 32, 3);
        let topology = config.plan(shape).unwrap_or_else(|e| panic!("{e}"));
        let model = UNet::<TestBackend>::new(config, &device()).unwrap_or_else(|e| panic!("{e}"));

        let features = model.forward_features(Tensor::zeros(shape.to_dims(1), &device()));

        let skip_dims: Vec<[usize; 3]> = features
            .skips
            .iter()
            .map(|t| {
                let [_, c, h, w] = t.dims();
                [c, h, w]
            })
            .collect();
        let planned: Vec<[usize; 3]> = topology.skips().map(StageShape::chw).collect();
        assert_eq!(skip_dims, planned);

        let [_, c, h, w] = features.bottleneck.dims();
        assert_eq!(Some([c, h, w]), topology.bottleneck().map(StageShape::chw));

        let decoded_dims: Vec<[usize; 3]> = features
            .decoded
            .iter()
            .map(|t| {
                let [_, c, h, w] = t.dims();
                [c, h, w]
            })
            .collect();
        let planned: Vec<[usize; 3]> = topology.decoders().map(StageShape::chw).collect();
        assert_eq!(decoded_dims, planned);

        assert_eq!(features.output.dims(), [1, 1, 32, 32]);
    }

    #[test]
    fn model_forward_logits_matches_forward() {
        let model = UNet::<TestBackend>::new(small_config().with_depth(2), &device())
            .unwrap_or_else(|e| panic!("{e}"));

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 8, 8],
            Distribution::Uniform(-1.0, 1.0),
            &device(),
        );
        let probs = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap_or_default();
        let logits = sigmoid(model.forward_logits(input.clone()))
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();
        let features = model
            .forward_features(input)
            .output
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();

        assert_eq!(probs.len(), 64);
        assert_eq!(probs.len(), logits.len());
        assert_eq!(probs.len(), features.len());
        for ((a, b), c) in probs.iter().zip(&logits).zip(&features) {
            assert!((a - b).abs() < 1e-6);
            assert!((a - c).abs() < 1e-6);
        }
    }

    #[test]
    fn model_try_forward_checks_input() {
        let model = UNet::<TestBackend>::new(small_config(), &device())
            .unwrap_or_else(|e| panic!("{e}"));

        let wrong_channels = Tensor::<TestBackend, 4>::zeros([1, 1, 16, 16], &device());
        assert!(matches!(
            model.try_forward(wrong_channels),
            Err(ModelError::ShapeMismatch { .. })
        ));

        let wrong_size = Tensor::<TestBackend, 4>::zeros([1, 3, 24, 16], &device());
        assert!(matches!(
            model.try_forward(wrong_size),
            Err(ModelError::InvalidInputShape { .. })
        ));

        let ok = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device());
        assert!(model.try_forward(ok).is_ok());
    }

    #[test]
    fn model_accessors() {
        let config = small_config().with_depth(3).with_out_channels(2);
        let model = UNet::<TestBackend>::new(config, &device()).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(model.name(), "UNET");
        assert_eq!(model.depth(), 3);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.out_channels(), 2);
        assert_eq!(model.config(), &config);
        assert_eq!(model.encoders().len(), 3);
        assert_eq!(model.decoders().len(), 3);
    }

    #[test]
    fn build_unet_uses_input_channels() {
        let model = build_unet::<TestBackend>(InputShape::new(16, 16, 1), &device())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(model.in_channels(), 1);
        assert_eq!(model.config().base_filters, 64);
    }

    #[test]
    fn build_unet_rejects_bad_shape() {
        let result = build_unet::<TestBackend>(InputShape::new(100, 100, 3), &device());
        assert!(matches!(result, Err(ModelError::InvalidInputShape { .. })));
    }

    #[test]
    fn rebuild_has_same_topology() {
        let shape = InputShape::new(32, 32, 3);
        let a = build_unet_with::<TestBackend>(small_config(), shape, &device())
            .unwrap_or_else(|e| panic!("{e}"));
        let b = build_unet_with::<TestBackend>(small_config(), shape, &device())
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(a.num_params(), b.num_params());
        assert_eq!(a.config().plan(shape).ok(), b.config().plan(shape).ok());

        // Same topology, independently initialized weights.
        let input = Tensor::<TestBackend, 4>::ones(shape.to_dims(1), &device());
        let out_a = a.forward_logits(input.clone()).into_data().to_vec::<f32>().unwrap_or_default();
        let out_b = b.forward_logits(input).into_data().to_vec::<f32>().unwrap_or_default();
        assert_eq!(out_a.len(), out_b.len());
        assert!(out_a.iter().zip(&out_b).any(|(x, y)| (x - y).abs() > 1e-6));
    }
}
