//! U-Net model inspection tool.
//!
//! Builds the network for a given input shape on the CPU backend and prints
//! its per-stage summary.
//!
//! # Usage
//!
//! - `unet` - Default network for a 512x512 RGB image
//! - `unet --height 256 --width 256 --channels 1` - Grayscale input
//! - `unet --base-filters 32 --depth 3` - Narrower, shallower network
//! - `unet --json` - Machine-readable summary
//!
//! Set `RUST_LOG` (or pass `--verbose`) to see build events.

mod report;

use anyhow::{Context, Result};
use burn_ndarray::NdArray;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use unet_model::{InputShape, UNetConfig, build_unet_with};

type CpuBackend = NdArray<f32>;

/// Build a U-Net and print its stage summary
#[derive(Debug, Parser)]
#[command(name = "unet")]
#[command(about = "Inspect the U-Net segmentation model", long_about = None)]
#[command(version)]
struct Cli {
    /// Input height in pixels
    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Input width in pixels
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Input image channels
    #[arg(long, default_value_t = 3)]
    channels: usize,

    /// Filters of the first encoder stage
    #[arg(long, default_value_t = 64)]
    base_filters: usize,

    /// Number of encoder/decoder stages
    #[arg(long, default_value_t = 4)]
    depth: usize,

    /// Channels of the output map
    #[arg(long, default_value_t = 1)]
    out_channels: usize,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log debug events
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn input_shape(&self) -> InputShape {
        InputShape::new(self.height, self.width, self.channels)
    }

    fn model_config(&self) -> UNetConfig {
        UNetConfig::new(self.channels)
            .with_base_filters(self.base_filters)
            .with_depth(self.depth)
            .with_out_channels(self.out_channels)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(&cli)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let shape = cli.input_shape();
    let config = cli.model_config();
    let device = Default::default();

    let model = build_unet_with::<CpuBackend>(config, shape, &device)
        .with_context(|| format!("failed to build U-Net for input {shape}"))?;
    let summary = model
        .summary(shape)
        .context("failed to summarize model")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("failed to encode summary")?;
        println!("{json}");
    } else {
        report::print(&summary);
    }

    Ok(())
}
