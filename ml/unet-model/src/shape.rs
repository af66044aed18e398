//! Input shape descriptors and the per-stage topology plan.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Image shape descriptor in `(height, width, channels)` order.
///
/// Tensors themselves are NCHW; use [`InputShape::to_dims`] to get the
/// tensor dimensions for a batch.
///
/// # Example
///
/// ```
/// use unet_model::InputShape;
///
/// let shape = InputShape::from((512, 512, 3));
/// assert_eq!(shape.to_dims(2), [2, 3, 512, 512]);
/// assert!(shape.validate(4).is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    /// Height in pixels.
    pub height: usize,

    /// Width in pixels.
    pub width: usize,

    /// Number of image channels.
    pub channels: usize,
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(512, 512, 3)
    }
}

impl From<(usize, usize, usize)> for InputShape {
    fn from((height, width, channels): (usize, usize, usize)) -> Self {
        Self::new(height, width, channels)
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

impl InputShape {
    /// Creates a new shape descriptor.
    #[must_use]
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Returns the NCHW tensor dimensions for the given batch size.
    #[must_use]
    pub const fn to_dims(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }

    /// Checks that a network with `depth` pooling stages can process this shape.
    ///
    /// Height and width must be non-zero multiples of `2^depth` so that every
    /// up-sampled decoder tensor lines up with its skip connection.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidInputShape` describing the first violation.
    pub fn validate(&self, depth: usize) -> Result<()> {
        if self.channels == 0 {
            return Err(ModelError::invalid_input_shape(
                self.to_string(),
                "channel count must be > 0",
            ));
        }

        let factor = downsample_factor(depth)?;
        for (name, size) in [("height", self.height), ("width", self.width)] {
            if size == 0 {
                return Err(ModelError::invalid_input_shape(
                    self.to_string(),
                    format!("{name} must be > 0"),
                ));
            }
            if size % factor != 0 {
                return Err(ModelError::invalid_input_shape(
                    self.to_string(),
                    format!("{name} {size} is not divisible by {factor}"),
                ));
            }
        }

        Ok(())
    }
}

/// Total spatial reduction after `depth` stride-2 poolings.
pub(crate) fn downsample_factor(depth: usize) -> Result<usize> {
    u32::try_from(depth)
        .ok()
        .and_then(|d| 1usize.checked_shl(d))
        .ok_or_else(|| ModelError::invalid_config(format!("depth {depth} is too large")))
}

/// Role of a stage in the encoder/decoder graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Conv block followed by 2x2 max pooling.
    Encoder,
    /// Lowest-resolution conv block.
    Bottleneck,
    /// Transpose conv, skip concatenation and conv block.
    Decoder,
    /// 1x1 convolution with sigmoid.
    Output,
}

impl StageKind {
    /// Returns the stage kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Bottleneck => "bottleneck",
            Self::Decoder => "decoder",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Output shape of a single stage.
///
/// For encoder stages `height`/`width` describe the skip tensor (before
/// pooling); the pooled tensor is half that size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageShape {
    /// Stage name, e.g. `encoder_1`.
    pub name: String,

    /// Stage role.
    pub kind: StageKind,

    /// Output channels.
    pub channels: usize,

    /// Output height.
    pub height: usize,

    /// Output width.
    pub width: usize,
}

impl StageShape {
    /// Returns the `[C, H, W]` shape of the stage output.
    #[must_use]
    pub const fn chw(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

/// Ordered plan of every stage in the network, computed without tensors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Shape the plan was computed for.
    pub input: InputShape,

    /// Stages in execution order.
    pub stages: Vec<StageShape>,
}

impl Topology {
    /// Returns the encoder stages, i.e. the skip connection shapes.
    pub fn skips(&self) -> impl Iterator<Item = &StageShape> {
        self.stages_of(StageKind::Encoder)
    }

    /// Returns the decoder stages in execution order.
    pub fn decoders(&self) -> impl Iterator<Item = &StageShape> {
        self.stages_of(StageKind::Decoder)
    }

    /// Returns the bottleneck stage.
    #[must_use]
    pub fn bottleneck(&self) -> Option<&StageShape> {
        self.stages_of(StageKind::Bottleneck).next()
    }

    /// Returns the output stage.
    #[must_use]
    pub fn output(&self) -> Option<&StageShape> {
        self.stages_of(StageKind::Output).next()
    }

    fn stages_of(&self, kind: StageKind) -> impl Iterator<Item = &StageShape> {
        self.stages.iter().filter(move |stage| stage.kind == kind)
    }
}
