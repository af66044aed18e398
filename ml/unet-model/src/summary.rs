//! Layer-by-layer model summary.

use burn::module::Module;
use burn::prelude::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::shape::{InputShape, StageKind};
use crate::unet::UNet;

/// One row of a [`ModelSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Stage name.
    pub name: String,

    /// Stage role.
    pub kind: StageKind,

    /// Output shape `[C, H, W]`.
    pub output_shape: [usize; 3],

    /// Parameters owned by the stage, running statistics included.
    pub params: usize,

    /// Parameters updated by training.
    pub trainable_params: usize,

    /// Batch norm running statistics.
    pub non_trainable_params: usize,
}

/// Stage table of a built model for a given input shape.
///
/// # Example
///
/// ```ignore
/// let summary = model.summary(InputShape::new(512, 512, 3))?;
/// println!("{summary}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model name.
    pub name: String,

    /// Input shape descriptor.
    pub input: InputShape,

    /// One row per stage, in execution order.
    pub rows: Vec<SummaryRow>,

    /// Total parameter count.
    pub total_params: usize,

    /// Parameters updated by training.
    pub trainable_params: usize,

    /// Batch norm running statistics.
    pub non_trainable_params: usize,
}

impl ModelSummary {
    /// Sum of the per-row parameter counts.
    #[must_use]
    pub fn row_params(&self) -> usize {
        self.rows.iter().map(|row| row.params).sum()
    }
}

impl std::fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "─".repeat(64);
        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<16} {:<12} {:<20} {:>12}", "Stage", "Kind", "Output", "Params")?;
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "{:<16} {:<12} {:<20} {:>12}",
            "input",
            "input",
            format!(
                "[{}, {}, {}]",
                self.input.channels, self.input.height, self.input.width
            ),
            0
        )?;
        for row in &self.rows {
            let [c, h, w] = row.output_shape;
            writeln!(
                f,
                "{:<16} {:<12} {:<20} {:>12}",
                row.name,
                row.kind.name(),
                format!("[{c}, {h}, {w}]"),
                row.params
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", self.total_params)?;
        writeln!(f, "Trainable params: {}", self.trainable_params)?;
        write!(f, "Non-trainable params: {}", self.non_trainable_params)
    }
}

impl<B: Backend> UNet<B> {
    /// Summarizes every stage for the given input shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot process `input`.
    pub fn summary(&self, input: InputShape) -> Result<ModelSummary> {
        let topology = self.config().plan(input)?;

        // (all params, running statistics) per stage
        let mut encoders = self
            .encoders()
            .iter()
            .map(|e| (e.num_params(), e.non_trainable_params()));
        let mut decoders = self
            .decoders()
            .iter()
            .map(|d| (d.num_params(), d.non_trainable_params()));
        let bottleneck = self.bottleneck();

        let mut rows = Vec::with_capacity(topology.stages.len());
        for stage in topology.stages {
            let (params, non_trainable_params) = match stage.kind {
                StageKind::Encoder => encoders.next(),
                StageKind::Bottleneck => {
                    Some((bottleneck.num_params(), bottleneck.non_trainable_params()))
                }
                StageKind::Decoder => decoders.next(),
                StageKind::Output => Some((self.head().num_params(), 0)),
            }
            .ok_or_else(|| {
                ModelError::shape_mismatch(
                    format!("{} stages", self.depth()),
                    format!("extra stage {}", stage.name),
                )
            })?;

            rows.push(SummaryRow {
                output_shape: stage.chw(),
                name: stage.name,
                kind: stage.kind,
                params,
                trainable_params: params.saturating_sub(non_trainable_params),
                non_trainable_params,
            });
        }

        let total_params = self.num_params();
        let non_trainable_params = rows.iter().map(|r| r.non_trainable_params).sum();
        Ok(ModelSummary {
            name: self.name().to_string(),
            input,
            rows,
            total_params,
            trainable_params: total_params.saturating_sub(non_trainable_params),
            non_trainable_params,
        })
    }
}
