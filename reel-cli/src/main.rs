//! reel CLI entrypoint.
//!
//! ```bash
//! reel process --input in.mp4 --output out.mp4 --interpolate-factor 2
//! reel process -i in.mp4 --dedup --dedup-method mse --upscale --upscale-factor 2
//! reel process -i episodes/ -o renders/ --scenechange --interpolate-factor 2
//! reel benchmark --input in.mp4 --interpolate-factor 2 --json
//! reel benchmark --input in.mp4 --scenechange --progress jsonl
//! reel probe --input in.mp4 --json
//! ```

use std::fs::File;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use reel_core::config::{AppPaths, DEFAULT_QUEUE_CAPACITY};
use reel_core::error::{EngineError, Result};
use reel_core::types::BitDepth;
use reel_ffmpeg::{EncodeMethod, ResizeKernel, TrimWindow, ffprobe_for, probe_video};
use reel_filters::dedup::DEFAULT_SAMPLE_SIZE;
use reel_filters::registry::{
    DedupSettings, DenoiseSettings, FilterSettings, InterpolateSettings, SceneChangeSettings,
    UpscaleSettings,
};
use reel_pipeline::pipeline::{FramePipeline, PipelineMetrics, PipelineReport};
use reel_pipeline::preview::PreviewConfig;
use reel_pipeline::runtime::{
    ResizeRequest, RunRequest, RuntimeSetup, VIDEO_EXTENSIONS, collect_inputs, execute,
    prepare_runtime, probe_input,
};

#[derive(Parser, Debug)]
#[command(
    name = "reel",
    version,
    about = "Frame-level video filter pipeline on top of ffmpeg",
    arg_required_else_help = true,
    after_help = "Examples:\n  reel probe --input in.mp4 --json\n  reel process --input in.mp4 --output out.mp4 --interpolate-factor 2\n  reel benchmark --input in.mp4 --upscale --progress jsonl"
)]
struct Cli {
    /// Directory for logs and previews (defaults to the platform config dir).
    #[arg(long = "config-dir", global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode, filter and re-encode a video.
    Process(ProcessArgs),
    /// Run the filter chain without encoding and report throughput.
    Benchmark(BenchmarkArgs),
    /// Print the input's geometry, frame rate and frame count.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Input video, or a directory of videos for `process`.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// ffmpeg binary; ffprobe is looked up next to it.
    #[arg(long = "ffmpeg", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Trim start in seconds (requires --outpoint).
    #[arg(long = "inpoint", requires = "outpoint")]
    inpoint: Option<f64>,

    /// Trim end in seconds (requires --inpoint).
    #[arg(long = "outpoint", requires = "inpoint")]
    outpoint: Option<f64>,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Output frames per input frame; 1 disables interpolation.
    #[arg(long = "interpolate-factor", default_value_t = 1)]
    interpolate_factor: u32,

    #[arg(long = "interpolate-method", default_value = "blend")]
    interpolate_method: String,

    #[arg(long = "upscale", default_value_t = false)]
    upscale: bool,

    #[arg(long = "upscale-factor", default_value_t = 2)]
    upscale_factor: u32,

    #[arg(long = "upscale-method", default_value = "bilinear")]
    upscale_method: String,

    /// Reuse the previous upscaled frame when the input did not change.
    #[arg(long = "upscale-skip", default_value_t = false)]
    upscale_skip: bool,

    #[arg(long = "dedup", default_value_t = false)]
    dedup: bool,

    #[arg(long = "dedup-method", default_value = "ssim")]
    dedup_method: String,

    #[arg(long = "dedup-sens", default_value_t = 35.0)]
    dedup_sens: f64,

    /// Thumbnail size used for duplicate detection.
    #[arg(long = "sample-size", default_value_t = DEFAULT_SAMPLE_SIZE)]
    sample_size: u32,

    #[arg(long = "scenechange", default_value_t = false)]
    scenechange: bool,

    #[arg(long = "scenechange-method", default_value = "differential")]
    scenechange_method: String,

    #[arg(long = "scenechange-sens", default_value_t = 50.0)]
    scenechange_sens: f64,

    #[arg(long = "denoise", default_value_t = false)]
    denoise: bool,

    #[arg(long = "denoise-method", default_value = "median")]
    denoise_method: String,

    /// Resize in the decoder before any filter runs.
    #[arg(long = "resize", default_value_t = false)]
    resize: bool,

    #[arg(long = "resize-factor", default_value_t = 1.0)]
    resize_factor: f64,

    #[arg(long = "resize-method", default_value = "bicubic")]
    resize_method: String,

    /// Capacity of each inter-stage queue.
    #[arg(long = "buffer-limit", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    buffer_limit: usize,

    #[arg(long = "bit-depth", default_value = "8bit")]
    bit_depth: String,
}

#[derive(Args, Debug, Clone)]
struct ProcessArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    filters: FilterArgs,

    /// Output file or directory; defaults to `<input>_reel.mp4` next to the input.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    #[arg(long = "encode-method", default_value = "x264")]
    encode_method: String,

    /// Raw ffmpeg output arguments replacing the method's codec settings.
    #[arg(long = "custom-encoder", allow_hyphen_values = true)]
    custom_encoder: Option<String>,

    #[arg(long = "sharpen", default_value_t = false)]
    sharpen: bool,

    /// Sharpening strength in percent.
    #[arg(long = "sharpen-sens", default_value_t = 50.0)]
    sharpen_sens: f64,

    #[arg(long = "grayscale", default_value_t = false)]
    grayscale: bool,

    /// Keep an alpha channel (forces ProRes).
    #[arg(long = "transparent", default_value_t = false)]
    transparent: bool,

    /// Do not copy the input's audio track into the output.
    #[arg(long = "no-audio", default_value_t = false)]
    no_audio: bool,

    /// Write a periodic PNG snapshot to `<config-dir>/preview.png`.
    #[arg(long = "preview", default_value_t = false)]
    preview: bool,

    #[arg(long = "json", default_value_t = false)]
    json: bool,

    #[arg(long = "progress", value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,
}

#[derive(Args, Debug, Clone)]
struct BenchmarkArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    filters: FilterArgs,

    #[arg(long = "json", default_value_t = false)]
    json: bool,

    #[arg(long = "progress", value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Jsonl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressMode {
    Off,
    Human,
    Jsonl,
}

struct ProgressReporter {
    notify: Arc<tokio::sync::Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl ProgressReporter {
    async fn stop(self) {
        self.notify.notify_one();
        let _ = self.handle.await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProgressSnapshot {
    decoded: u64,
    written: u64,
    encoded: u64,
    progress: u64,
}

const JSON_SCHEMA_VERSION: u32 = 1;

fn main() {
    let cli = Cli::parse();
    let paths = match resolve_paths(cli.config_dir.as_deref()) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("reel: {err}");
            std::process::exit(err.error_code() as i32);
        }
    };
    init_tracing(&paths);

    let json_error_command = match &cli.command {
        Commands::Process(args) if args.json => Some("process"),
        Commands::Benchmark(args) if args.json => Some("benchmark"),
        Commands::Probe(args) if args.json => Some("probe"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Probe(args) => run_probe(args),
        Commands::Process(args) => build_runtime().and_then(|rt| rt.block_on(run_process(args, &paths))),
        Commands::Benchmark(args) => {
            build_runtime().and_then(|rt| rt.block_on(run_benchmark(args, &paths)))
        }
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err));
            }
            tracing::error!(error = %err, code = err.error_code(), "Command failed");
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn resolve_paths(config_dir: Option<&Path>) -> Result<AppPaths> {
    let paths = match config_dir {
        Some(dir) => AppPaths::at(dir),
        None => AppPaths::resolve()?,
    };
    paths.ensure()?;
    Ok(paths)
}

/// stderr logging plus a plain copy in `AppPaths::log_file`.
fn init_tracing(paths: &AppPaths) {
    use tracing_subscriber::prelude::*;

    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled);
    let file_layer = File::create(&paths.log_file).ok().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

// ─── Request building ───────────────────────────────────────────────────────

fn trim_window(args: &InputArgs) -> Result<Option<TrimWindow>> {
    match (args.inpoint, args.outpoint) {
        (Some(start), Some(end)) => TrimWindow::new(start, end).map(Some),
        (None, None) => Ok(None),
        _ => Err(EngineError::InvalidConfig(
            "--inpoint and --outpoint must be given together".into(),
        )),
    }
}

fn filter_settings(args: &FilterArgs) -> Result<FilterSettings> {
    let mut settings = FilterSettings::default();
    if args.dedup {
        settings.dedup = Some(DedupSettings {
            method: args.dedup_method.parse()?,
            sensitivity: args.dedup_sens,
            sample_size: args.sample_size,
        });
    }
    if args.scenechange {
        settings.scene_change = Some(SceneChangeSettings {
            method: args.scenechange_method.parse()?,
            sensitivity: args.scenechange_sens,
        });
    }
    if args.denoise {
        settings.denoise = Some(DenoiseSettings {
            method: args.denoise_method.parse()?,
        });
    }
    if args.upscale {
        settings.upscale = Some(UpscaleSettings {
            method: args.upscale_method.parse()?,
            factor: args.upscale_factor,
            skip: args.upscale_skip,
        });
    } else if args.upscale_skip {
        tracing::warn!("--upscale-skip has no effect without --upscale");
    }
    if args.interpolate_factor > 1 {
        settings.interpolate = Some(InterpolateSettings {
            method: args.interpolate_method.parse()?,
            factor: args.interpolate_factor,
        });
    }
    Ok(settings)
}

fn base_request(input: &InputArgs, filters: &FilterArgs) -> Result<RunRequest> {
    let mut request = RunRequest::new(&input.ffmpeg, &input.input);
    request.trim = trim_window(input)?;
    request.filters = filter_settings(filters)?;
    request.queue_capacity = filters.buffer_limit;
    request.bit_depth = BitDepth::parse(&filters.bit_depth)?;
    if filters.resize {
        request.resize = Some(ResizeRequest {
            kernel: filters.resize_method.parse::<ResizeKernel>()?,
            factor: filters.resize_factor,
        });
    }
    Ok(request)
}

fn process_request(args: &ProcessArgs, paths: &AppPaths) -> Result<RunRequest> {
    let mut request = base_request(&args.input, &args.filters)?;
    request.output = args.output.clone();
    request.encode_method = args.encode_method.parse::<EncodeMethod>()?;
    request.custom_encoder = args.custom_encoder.clone();
    request.sharpen = args.sharpen.then_some(args.sharpen_sens);
    request.grayscale = args.grayscale;
    request.transparent = args.transparent;
    request.audio = !args.no_audio;
    if args.preview {
        request.preview = Some(PreviewConfig::new(paths.config_dir().join("preview.png")));
    }
    Ok(request)
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn run_probe(args: ProbeArgs) -> Result<()> {
    let trim = trim_window(&args.input)?;
    let ffprobe = ffprobe_for(&args.input.ffmpeg);
    let mut metadata = probe_video(&ffprobe, &args.input.input)?;
    if let Some(window) = trim {
        metadata = metadata.trimmed(window);
    }

    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "probe",
                "ok": true,
                "input": args.input.input.display().to_string(),
                "video": metadata,
            })
        );
    } else {
        println!(
            "probe: input={} resolution={}x{} fps={:.3} frames={}",
            args.input.input.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata
                .total_frames
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
    }
    Ok(())
}

async fn run_process(args: ProcessArgs, paths: &AppPaths) -> Result<()> {
    if !args.input.input.is_dir() {
        let mut request = process_request(&args, paths)?;
        if let Some(dir) = args.output.as_deref().filter(|out| out.is_dir()) {
            request.output = Some(request.output_in(dir));
        }
        return process_file(request, &args, paths).await;
    }

    let dir = &args.input.input;
    let inputs = collect_inputs(dir)?;
    tracing::info!(dir = %dir.display(), files = inputs.len(), "Processing input directory");
    if inputs.is_empty() {
        return Err(EngineError::InvalidConfig(format!(
            "no {} files in {}",
            VIDEO_EXTENSIONS.join("/"),
            dir.display()
        )));
    }
    if let Some(out_dir) = &args.output {
        std::fs::create_dir_all(out_dir)?;
    }

    for input in inputs {
        let mut request = process_request(&args, paths)?;
        request.input = input;
        request.output = args.output.as_deref().map(|out_dir| request.output_in(out_dir));
        tracing::info!(input = %request.input.display(), "Processing file");
        process_file(request, &args, paths).await?;
    }
    Ok(())
}

async fn process_file(request: RunRequest, args: &ProcessArgs, paths: &AppPaths) -> Result<()> {
    let metadata = probe_input(&request)?;
    let setup = prepare_runtime(request, metadata)?;

    let report = run_with_progress("process", &setup, paths, args.progress).await?;
    report.ensure_encoded()?;

    let output = setup
        .run
        .output
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    if args.json {
        println!("{}", summary_json("process", &setup, &report));
    } else {
        println!(
            "process: ok output={} frames_in={} frames_out={} elapsed_s={:.3}",
            output,
            report.counters.processed,
            report.metrics.frames_encoded,
            report.elapsed_secs
        );
    }
    Ok(())
}

async fn run_benchmark(args: BenchmarkArgs, paths: &AppPaths) -> Result<()> {
    let mut request = base_request(&args.input, &args.filters)?;
    request.benchmark = true;
    let metadata = probe_input(&request)?;
    let setup = prepare_runtime(request, metadata)?;

    let report = run_with_progress("benchmark", &setup, paths, args.progress).await?;

    if args.json {
        println!("{}", summary_json("benchmark", &setup, &report));
    } else {
        println!(
            "benchmark: ok frames={} elapsed_s={:.3} fps={:.2} deduplicated={} scene_changes={}",
            report.counters.processed,
            report.elapsed_secs,
            report.throughput_fps(),
            report.counters.deduplicated,
            report.counters.scene_changes
        );
    }
    Ok(())
}

async fn run_with_progress(
    command: &'static str,
    setup: &RuntimeSetup,
    paths: &AppPaths,
    progress: ProgressArg,
) -> Result<PipelineReport> {
    let pipeline = FramePipeline::new(setup.pipeline.clone())?;
    let reporter = spawn_progress_reporter(
        command,
        pipeline.metrics(),
        setup.run.progress_total(),
        resolve_progress_mode(progress),
    );
    let result = execute(setup, &pipeline, paths).await;
    if let Some(reporter) = reporter {
        reporter.stop().await;
    }
    result
}

// ─── Output ─────────────────────────────────────────────────────────────────

fn summary_json(command: &str, setup: &RuntimeSetup, report: &PipelineReport) -> serde_json::Value {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": true,
        "input": setup.run.input.display().to_string(),
        "output": setup.run.output.as_ref().map(|p| p.display().to_string()),
        "video": setup.metadata,
        "run": setup.run,
        "report": report,
        "fps": report.throughput_fps(),
    })
}

fn command_error_json(command: &str, err: &EngineError) -> serde_json::Value {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": err.to_string(),
        "error_code": err.error_code(),
    })
}

fn resolve_progress_mode(progress: ProgressArg) -> ProgressMode {
    match progress {
        ProgressArg::Auto => {
            if std::io::stderr().is_terminal() {
                ProgressMode::Human
            } else {
                ProgressMode::Off
            }
        }
        ProgressArg::Off => ProgressMode::Off,
        ProgressArg::Human => ProgressMode::Human,
        ProgressArg::Jsonl => ProgressMode::Jsonl,
    }
}

fn current_progress_snapshot(metrics: &PipelineMetrics) -> ProgressSnapshot {
    ProgressSnapshot {
        decoded: metrics.frames_decoded.load(Ordering::Relaxed),
        written: metrics.frames_written.load(Ordering::Relaxed),
        encoded: metrics.frames_encoded.load(Ordering::Relaxed),
        progress: metrics.progress.load(Ordering::Relaxed),
    }
}

fn emit_progress_line(
    command: &'static str,
    mode: ProgressMode,
    elapsed: Duration,
    snapshot: ProgressSnapshot,
    total: Option<u64>,
    final_line: bool,
) {
    // Progress goes to stderr only; stdout carries the summary.
    match mode {
        ProgressMode::Off => {}
        ProgressMode::Human => {
            let total = total.map_or_else(|| "?".to_string(), |t| t.to_string());
            eprintln!(
                "progress: command={} elapsed_s={:.3} progress={}/{} decoded={} written={} encoded={} final={}",
                command,
                elapsed.as_secs_f64(),
                snapshot.progress,
                total,
                snapshot.decoded,
                snapshot.written,
                snapshot.encoded,
                final_line
            );
        }
        ProgressMode::Jsonl => {
            eprintln!(
                "{}",
                json!({
                    "schema_version": JSON_SCHEMA_VERSION,
                    "type": "progress",
                    "command": command,
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "progress": snapshot.progress,
                    "total": total,
                    "frames": {
                        "decoded": snapshot.decoded,
                        "written": snapshot.written,
                        "encoded": snapshot.encoded,
                    },
                    "final": final_line,
                })
            );
        }
    }
}

fn spawn_progress_reporter(
    command: &'static str,
    metrics: Arc<PipelineMetrics>,
    total: Option<u64>,
    mode: ProgressMode,
) -> Option<ProgressReporter> {
    if matches!(mode, ProgressMode::Off) {
        return None;
    }

    let notify = Arc::new(tokio::sync::Notify::new());
    let notify_task = notify.clone();
    let handle = tokio::spawn(async move {
        let start = Instant::now();
        let mut last = current_progress_snapshot(&metrics);
        loop {
            tokio::select! {
                _ = notify_task.notified() => {
                    let snapshot = current_progress_snapshot(&metrics);
                    emit_progress_line(command, mode, start.elapsed(), snapshot, total, true);
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    let snapshot = current_progress_snapshot(&metrics);
                    if snapshot != last {
                        emit_progress_line(command, mode, start.elapsed(), snapshot, total, false);
                        last = snapshot;
                    }
                }
            }
        }
    });

    Some(ProgressReporter { notify, handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("reel").chain(args.iter().copied())).unwrap()
    }

    fn process_args(args: &[&str]) -> ProcessArgs {
        let mut full = vec!["process", "-i", "in.mp4"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Commands::Process(a) => a,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults_build_a_plain_request() {
        let args = process_args(&[]);
        let request = process_request(&args, &AppPaths::at("/tmp/reel")).unwrap();
        assert!(request.filters.dedup.is_none());
        assert!(request.filters.interpolate.is_none());
        assert_eq!(request.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(request.encode_method, EncodeMethod::X264);
        assert!(request.audio);
        assert!(request.sharpen.is_none());
    }

    #[test]
    fn filter_flags_map_to_settings() {
        let args = process_args(&[
            "--dedup",
            "--dedup-method",
            "mse",
            "--interpolate-factor",
            "3",
            "--upscale",
            "--upscale-method",
            "nearest",
            "--sharpen",
            "--sharpen-sens",
            "40",
            "--buffer-limit",
            "8",
        ]);
        let request = process_request(&args, &AppPaths::at("/tmp/reel")).unwrap();
        assert_eq!(request.filters.interpolation_factor(), 3);
        assert_eq!(request.filters.upscale_factor(), 2);
        assert!(request.filters.dedup.is_some());
        assert_eq!(request.sharpen, Some(40.0));
        assert_eq!(request.queue_capacity, 8);
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let args = process_args(&["--encode-method", "h266"]);
        let err = process_request(&args, &AppPaths::at("/tmp/reel")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownMethod { .. }));

        let args = process_args(&["--dedup", "--dedup-method", "psnr"]);
        let err = process_request(&args, &AppPaths::at("/tmp/reel")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownMethod { .. }));
    }

    #[test]
    fn trim_requires_both_points() {
        assert!(Cli::try_parse_from(["reel", "probe", "-i", "a.mp4", "--inpoint", "1"]).is_err());
        let args = process_args(&["--inpoint", "1", "--outpoint", "3.5"]);
        let window = trim_window(&args.input).unwrap().unwrap();
        assert_eq!(window.duration(), 2.5);
    }

    #[test]
    fn preview_lands_in_config_dir() {
        let args = process_args(&["--preview"]);
        let request = process_request(&args, &AppPaths::at("/tmp/reel")).unwrap();
        assert_eq!(
            request.preview.unwrap().path,
            PathBuf::from("/tmp/reel/preview.png")
        );
    }

    #[test]
    fn error_json_carries_code() {
        let value = command_error_json("process", &EngineError::ChannelClosed);
        assert_eq!(value["ok"], false);
        assert_eq!(value["error_code"], EngineError::ChannelClosed.error_code());
    }
}
