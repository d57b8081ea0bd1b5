//! Nimbus Cloud Preview
//!
//! Renders one frame of a sky scene with a cloud volume through the CPU
//! software backend and writes it to a PNG.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p nimbus-preview -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: JSON cloud configuration (missing fields use defaults)
//! - `-o, --output <PATH>`: Output PNG path (default: `clouds.png`)
//! - `--width <N>` / `--height <N>`: Frame size (default: 640x360)
//! - `--downsample <N>`: Override the configured downsample factor
//! - `--no-marker`: Render without a volume marker (passthrough)
//! - `-h, --help`: Print help message
//!
//! ## Examples
//!
//! ```bash
//! # Default clouds
//! cargo run -p nimbus-preview --release
//!
//! # Full resolution evaluation from a tuned config
//! cargo run -p nimbus-preview --release -- -c clouds.json --downsample 1
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;

use anyhow::{bail, Context};
use glam::Vec3;
use image::Rgba32FImage;
use nimbus_core::MarkerTransform;
use nimbus_gpu::Extent2d;
use nimbus_render::{
    CameraRayBasis, CloudRenderer, CloudVolumeConfig, DownsampleFactor, FrameOutcome,
    FrameRequest, FrameTargets,
};
use nimbus_test::{test_camera, to_rgba8, SkyScene, SoftwareBackend};
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
struct PreviewArgs {
    config: Option<PathBuf>,
    output: PathBuf,
    width: u32,
    height: u32,
    downsample: Option<u32>,
    marker: bool,
}

impl Default for PreviewArgs {
    fn default() -> Self {
        Self {
            config: None,
            output: PathBuf::from("clouds.png"),
            width: WIDTH,
            height: HEIGHT,
            downsample: None,
            marker: true,
        }
    }
}

impl PreviewArgs {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.iter().skip(1);

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .with_context(|| format!("{flag} expects a value"))
            };
            match arg.as_str() {
                "-c" | "--config" => parsed.config = Some(PathBuf::from(value(arg)?)),
                "-o" | "--output" => parsed.output = PathBuf::from(value(arg)?),
                "--width" => parsed.width = parse_number(arg, &value(arg)?)?,
                "--height" => parsed.height = parse_number(arg, &value(arg)?)?,
                "--downsample" => parsed.downsample = Some(parse_number(arg, &value(arg)?)?),
                "--no-marker" => parsed.marker = false,
                other => bail!("Unknown argument: {other}"),
            }
        }

        if parsed.width == 0 || parsed.height == 0 {
            bail!("Frame size must be non-zero");
        }
        Ok(parsed)
    }
}

fn parse_number(flag: &str, value: &str) -> anyhow::Result<u32> {
    value
        .parse()
        .with_context(|| format!("{flag}: '{value}' is not a number"))
}

fn load_config(args: &PreviewArgs) -> anyhow::Result<CloudVolumeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => CloudVolumeConfig::default(),
    };
    if let Some(factor) = args.downsample {
        config.downsample = DownsampleFactor::new(factor)?;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nimbus_render=debug")),
        )
        .init();

    let args = PreviewArgs::parse(&args)?;
    let config = load_config(&args)?;
    let extent = Extent2d::new(args.width, args.height);

    let camera = test_camera(extent);
    let scene = SkyScene::render(&camera, extent);

    let mut backend = SoftwareBackend::new();
    let targets = FrameTargets {
        source_color: backend.add_image(scene.color),
        source_depth: backend.add_image(scene.depth),
        destination: backend.add_image(Rgba32FImage::new(extent.width, extent.height)),
    };

    let marker = args
        .marker
        .then(|| MarkerTransform::new(Vec3::new(0.0, 100.0, 0.0), Vec3::new(1000.0, 200.0, 1000.0)));
    let mut renderer = CloudRenderer::new(marker);

    let basis = CameraRayBasis::from_camera(&camera);
    let request = FrameRequest {
        config: &config,
        camera: &basis,
        screen: extent,
        targets,
    };
    match renderer.render(&request, &mut backend.services())? {
        FrameOutcome::Composited { scratch_extent } => tracing::info!(
            "Composited clouds at {}x{} for a {}x{} frame",
            scratch_extent.width,
            scratch_extent.height,
            extent.width,
            extent.height
        ),
        FrameOutcome::Skipped(reason) => tracing::info!("Clouds skipped: {reason:?}"),
    }

    let output = backend
        .image(targets.destination.id)
        .context("Destination image missing after render")?;
    to_rgba8(&output)
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!("Wrote {}", args.output.display());

    Ok(())
}

fn print_help() {
    eprintln!(
        "Nimbus Cloud Preview

USAGE:
    cargo run -p nimbus-preview -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     JSON cloud configuration (missing fields use defaults)
    -o, --output <PATH>     Output PNG path (default: clouds.png)
    --width <N>             Frame width (default: {WIDTH})
    --height <N>            Frame height (default: {HEIGHT})
    --downsample <N>        Override the downsample factor (1-16)
    --no-marker             Render without a volume marker

OTHER:
    -h, --help              Print this help message

EXAMPLES:
    # Default clouds
    cargo run -p nimbus-preview --release

    # Full resolution evaluation from a tuned config
    cargo run -p nimbus-preview --release -- -c clouds.json --downsample 1

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
