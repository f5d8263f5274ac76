use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use tessera_core::backend::InferenceBackend;
use tessera_core::config::{
    config_path, data_dir, initialize_data_dir, AppConfig, RefinementMode,
};
use tessera_core::extract::OrtPatchExtractor;
use tessera_core::logging::{self, FileSinkPlan, LoggingInitOptions};
use tessera_core::types::RgbImage;
use tessera_core::upscale::{Control, ProgressUpdate, TiledUpscaler, UpscaleSession};

#[derive(Parser)]
#[command(name = "tessera", about = "Semantic-aware tiled image upscaling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    Upscale(UpscaleArgs),
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Input image (PNG/JPEG)")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output image path")]
    output: PathBuf,
    #[arg(long, help = "Scale factor (1.0-4.0)")]
    scale: Option<f64>,
    #[arg(long, help = "Refinement mode: diffusion or direct")]
    mode: Option<String>,
    #[arg(long, help = "Output tile edge budget in pixels (512-2048)")]
    tile_budget: Option<u32>,
    #[arg(long, help = "Denoising strength (0.0-1.0)")]
    denoise: Option<f32>,
    #[arg(long, help = "Sampling step count (1-100)")]
    steps: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long, help = "Condition refinement on semantic patch features (true/false)")]
    semantic_guidance: Option<bool>,
    #[arg(long, help = "ONNX ViT encoder used for semantic guidance")]
    encoder_model: Option<PathBuf>,
    #[arg(long, help = "Inference backend: cuda or tensorrt")]
    backend: Option<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );

    initialize_data_dir(&resolved_data_dir)?;
    let app_config = AppConfig::load_from_path(&config_path(&resolved_data_dir))?;

    match cli.command {
        Commands::Upscale(args) => run_upscale(args, app_config),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let filter = logging::select_log_filter(&options);

    match logging::build_file_sink_plan(&options) {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(parse_env_filter_with_fallback(&filter)),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&filter)),
                );
            if subscriber.try_init().is_err() {
                eprintln!("Warning: logging already initialized");
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(parse_env_filter_with_fallback(&filter)),
            );
            if subscriber.try_init().is_err() {
                eprintln!("Warning: logging already initialized");
            }
            warn!(reason = %fallback.reason, "File logging disabled");
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Warning: invalid log filter '{filter}' ({error}); falling back to '{}'",
            logging::DEFAULT_LOG_FILTER
        );
        tracing_subscriber::EnvFilter::new(logging::DEFAULT_LOG_FILTER)
    })
}

fn run_upscale(args: UpscaleArgs, app_config: AppConfig) -> Result<()> {
    let mut config = app_config.upscale.clone();
    if let Some(scale) = args.scale {
        config.scale_factor = scale;
    }
    if let Some(mode) = args.mode.as_deref() {
        config.mode = RefinementMode::from_str_lossy(mode);
    }
    if let Some(tile_budget) = args.tile_budget {
        config.tile_budget = tile_budget;
    }
    if let Some(denoise) = args.denoise {
        config.denoise = denoise;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(prompt) = args.prompt {
        config.prompt = prompt;
    }
    if let Some(semantic) = args.semantic_guidance {
        config.semantic_guidance = semantic;
    }
    config.validate()?;

    let input_image = load_image(&args.input)?;
    info!(
        input = %args.input.display(),
        width = input_image.width,
        height = input_image.height,
        scale = config.scale_factor,
        mode = %config.mode,
        "Loaded input image"
    );

    let mut session = UpscaleSession::new();
    if config.semantic_guidance {
        let model_path = args
            .encoder_model
            .or_else(|| app_config.models.encoder_model.clone())
            .context(
                "semantic guidance requires an encoder model \
                 (--encoder-model or models.encoder_model in config.toml)",
            )?;
        let backend = InferenceBackend::from_str_lossy(
            args.backend.as_deref().unwrap_or(&app_config.models.backend),
        );
        let extractor = OrtPatchExtractor::load(
            &model_path,
            &backend,
            Some(&app_config.models.trt_cache_dir),
        )?;
        session = session.with_extractor(Box::new(extractor));
    }

    let mut progress = |update: &ProgressUpdate| {
        info!(
            completed = update.tiles_completed,
            total = update.tiles_total,
            "Tile refined"
        );
        Control::Continue
    };

    // Diffusion backbones are host-supplied; this binary only ships the
    // direct strategy, so diffusion mode without one fails fast below.
    let result = TiledUpscaler::new(&mut session)
        .upscale(&input_image, &config, Some(&mut progress))
        .context("upscale failed")?;

    save_image(&result, &args.output)?;
    info!(
        output = %args.output.display(),
        width = result.width,
        height = result.height,
        "Upscale complete"
    );
    Ok(())
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to load image: {}", path.display()))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(RgbImage::from_raw(rgb.into_raw(), width, height)?)
}

fn save_image(result: &RgbImage, path: &Path) -> Result<()> {
    let buffer: image::RgbImage =
        image::ImageBuffer::from_raw(result.width, result.height, result.data.clone())
            .context("image buffer dimensions mismatch")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to save image: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn upscale_args_parse() {
        let cli = Cli::try_parse_from([
            "tessera", "upscale", "in.png", "-o", "out.png", "--scale", "2.0", "--mode", "direct",
            "--seed", "42",
        ])
        .expect("parse");
        let Commands::Upscale(args) = cli.command;
        assert_eq!(args.input, PathBuf::from("in.png"));
        assert_eq!(args.output, PathBuf::from("out.png"));
        assert_eq!(args.scale, Some(2.0));
        assert_eq!(args.mode.as_deref(), Some("direct"));
        assert_eq!(args.seed, Some(42));
    }
}
