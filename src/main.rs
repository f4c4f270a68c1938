use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use hdr_tonemap::io::{load_linear_image, save_bgra8};
use hdr_tonemap::processing::pipeline::{backend_for, compare_backends, run_with, Backend};
use hdr_tonemap::processing::{LinearImage, ToneMapParams};
use hdr_tonemap::utils::{init_logging, ToneMapConfig};
use hdr_tonemap::GpuPipeline;

#[derive(Debug, Parser)]
#[command(version, about = "Extended Reinhard HDR tone mapping on CPU (SIMD) or GPU")]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Print debug information; can be repeated.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file, defaults to `hdr_tonemap.json` next to the executable.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Tone map an image and write the 8-bit result.
    Run(RunArgs),
    /// Tone map on both backends and report timings and byte differences.
    Compare(CompareArgs),
    /// Print the selected GPU adapter and shader location.
    Info,
}

/// Per-invocation overrides of the config values.
#[derive(Debug, clap::Args)]
struct ToneArgs {
    #[arg(long)]
    exposure: Option<f32>,
    #[arg(long)]
    white_point: Option<f32>,
    /// Linear multiplier applied to a copy of the input first.
    #[arg(long)]
    boost: Option<f32>,
    /// Run the CPU kernel on the rayon pool.
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    input: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,
    #[command(flatten)]
    tone: ToneArgs,
}

#[derive(Debug, clap::Args)]
struct CompareArgs {
    /// Image to compare on; a uniform test image is used when omitted.
    input: Option<PathBuf>,
    #[arg(long, default_value_t = 512)]
    width: u32,
    #[arg(long, default_value_t = 512)]
    height: u32,
    #[command(flatten)]
    tone: ToneArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    // Ustaw Rayon thread pool na podstawie CPU cores
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get().max(1))
        .build_global()
    {
        tracing::warn!("rayon pool already initialized: {}", e);
    }

    let result = load_config(args.config.as_deref()).and_then(|config| match args.command {
        Command::Run(run_args) => handle_run(&config, run_args),
        Command::Compare(compare_args) => handle_compare(&config, compare_args),
        Command::Info => handle_info(&config),
    });

    GpuPipeline::lock().teardown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ToneMapConfig> {
    match path {
        Some(path) => ToneMapConfig::load_or_create(path),
        None => ToneMapConfig::load(),
    }
}

/// Merges CLI overrides into the config and range-checks the result.
fn resolve_params(config: &ToneMapConfig, tone: &ToneArgs) -> Result<(ToneMapParams, f32)> {
    let params = ToneMapParams::new(
        tone.exposure.unwrap_or(config.exposure),
        tone.white_point.unwrap_or(config.white_point),
    );
    params.validate()?;
    let boost = tone.boost.unwrap_or(config.boost);
    anyhow::ensure!(boost.is_finite() && boost > 0.0, "boost must be a positive number, got {}", boost);
    Ok((params, boost))
}

fn prepare_image(image: LinearImage, boost: f32) -> LinearImage {
    if boost == 1.0 {
        image
    } else {
        image.boosted(boost)
    }
}

fn handle_run(config: &ToneMapConfig, args: RunArgs) -> Result<()> {
    let (params, boost) = resolve_params(config, &args.tone)?;
    let image = prepare_image(load_linear_image(&args.input)?, boost);

    let kind = args.backend.unwrap_or(config.backend);
    let shaders = (kind == Backend::Gpu).then(|| config.resolve_shader_sources());
    let mut backend = backend_for(kind, args.tone.parallel || config.parallel_cpu, shaders);
    let output = run_with(backend.as_mut(), &image, &params)?;

    tracing::info!(
        "{}x{} tone mapped on {} in {:.2} ms",
        image.width,
        image.height,
        output.backend.name(),
        output.elapsed.as_secs_f64() * 1000.0
    );
    save_bgra8(&args.output, image.width, image.height, &output.bgra)
        .with_context(|| format!("Failed to save result for {}", args.input.display()))
}

fn handle_compare(config: &ToneMapConfig, args: CompareArgs) -> Result<()> {
    let (params, boost) = resolve_params(config, &args.tone)?;
    let image = match &args.input {
        Some(path) => load_linear_image(path)?,
        None => LinearImage::filled(args.width.max(1), args.height.max(1), [1.0, 1.0, 1.0]),
    };
    let image = prepare_image(image, boost);

    let cmp = compare_backends(
        &image,
        &params,
        args.tone.parallel || config.parallel_cpu,
        Some(config.resolve_shader_sources()),
    )?;
    println!("image:     {}x{}", image.width, image.height);
    println!("cpu:       {:.3} ms", cmp.cpu.elapsed.as_secs_f64() * 1000.0);
    println!("gpu:       {:.3} ms", cmp.gpu.elapsed.as_secs_f64() * 1000.0);
    println!("max diff:  {}", cmp.max_abs_diff);
    println!("mean diff: {:.4}", cmp.mean_abs_diff);
    Ok(())
}

fn handle_info(config: &ToneMapConfig) -> Result<()> {
    let mut pipeline = GpuPipeline::lock();
    pipeline.set_shader_sources(config.resolve_shader_sources());
    pipeline.ensure_ready()?;
    if let Some(info) = pipeline.adapter_info() {
        println!("adapter:  {}", info.name);
        println!("backend:  {:?}", info.backend);
        println!("type:     {:?}", info.device_type);
        println!("driver:   {} {}", info.driver, info.driver_info);
    }
    println!("shaders:  {:?}", pipeline.shader_sources().origin);
    println!("cpu threads: {}", rayon::current_num_threads());
    Ok(())
}
