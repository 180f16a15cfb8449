//! Turn a user request into probed, validated settings, then run them.
//!
//! Split in three steps so each can be tested or reused on its own:
//!
//! 1. [`probe_input`]: ffprobe the input (and apply the trim window);
//! 2. [`prepare_runtime`]: normalise the request and derive every setting
//!    from it and the probed metadata, with no side effects;
//! 3. [`execute`]: build the filters, spawn both ffmpeg processes and run
//!    the pipeline.
//!
//! A directory input is expanded with [`collect_inputs`] into one request
//! per video file.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use reel_core::config::{AppPaths, DEFAULT_QUEUE_CAPACITY, RunConfig};
use reel_core::error::{EngineError, Result};
use reel_core::types::BitDepth;
use reel_ffmpeg::{
    AudioRemux, DecodeSettings, EncodeMethod, EncodeSettings, FfmpegDecoder, FfmpegEncoder,
    ResizeKernel, TrimWindow, VideoMetadata, ffprobe_for, probe_video,
};
use reel_filters::registry::{FilterSettings, build_filter_chain};

use crate::pipeline::{FramePipeline, PipelineConfig, PipelineReport};
use crate::preview::PreviewConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeRequest {
    pub kernel: ResizeKernel,
    /// Linear scale applied by the decoder, e.g. `0.5`.
    pub factor: f64,
}

/// Everything the user asked for, before validation.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub ffmpeg: PathBuf,
    pub input: PathBuf,
    /// Derived from the input name when `None` and not benchmarking.
    pub output: Option<PathBuf>,
    pub trim: Option<TrimWindow>,
    pub resize: Option<ResizeRequest>,
    pub filters: FilterSettings,
    pub encode_method: EncodeMethod,
    pub custom_encoder: Option<String>,
    /// Sharpening strength in percent, `0..=100`.
    pub sharpen: Option<f64>,
    pub grayscale: bool,
    pub transparent: bool,
    pub queue_capacity: usize,
    pub benchmark: bool,
    pub audio: bool,
    pub bit_depth: BitDepth,
    pub preview: Option<PreviewConfig>,
}

impl RunRequest {
    pub fn new(ffmpeg: impl Into<PathBuf>, input: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            input: input.into(),
            output: None,
            trim: None,
            resize: None,
            filters: FilterSettings::default(),
            encode_method: EncodeMethod::X264,
            custom_encoder: None,
            sharpen: None,
            grayscale: false,
            transparent: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            benchmark: false,
            audio: true,
            bit_depth: BitDepth::Eight,
            preview: None,
        }
    }

    /// Resolve combinations that cannot work together.
    ///
    /// - dedup changes timing, so the audio track would drift: audio off;
    /// - the upscaler's skip detector is redundant once dedup runs;
    /// - a benchmark writes no file, so there is nothing to remux into.
    pub fn normalize(&mut self) {
        if self.filters.dedup.is_some() && self.audio {
            warn!("Deduplication changes frame timing; disabling audio");
            self.audio = false;
        }
        if self.filters.dedup.is_some()
            && let Some(up) = self.filters.upscale.as_mut()
            && up.skip
        {
            warn!("Upscale skip is redundant with deduplication; disabling it");
            up.skip = false;
        }
        if self.benchmark {
            self.audio = false;
            self.output = None;
        }
    }

    /// `<dir>/<stem>_reel.<ext>`, `.mov` for ProRes and `.mp4` otherwise.
    pub fn default_output(&self) -> PathBuf {
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let ext = if self.encode_method == EncodeMethod::Prores || self.transparent {
            "mov"
        } else {
            "mp4"
        };
        self.input.with_file_name(format!("{stem}_reel.{ext}"))
    }

    /// [`Self::default_output`]'s file name placed inside `dir`.
    pub fn output_in(&self, dir: &Path) -> PathBuf {
        match self.default_output().file_name() {
            Some(name) => dir.join(name),
            None => dir.join("output_reel.mp4"),
        }
    }
}

/// Container extensions picked up when the input is a directory.
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "mov", "avi", "webm"];

/// Video files directly inside `dir`, sorted by path.
///
/// Subdirectories are not searched.  Extensions match case-insensitively.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_video = path.is_file()
            && path.extension().is_some_and(|ext| {
                let ext = ext.to_string_lossy();
                VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v))
            });
        if is_video {
            inputs.push(path);
        }
    }
    inputs.sort();
    debug!(dir = %dir.display(), files = inputs.len(), "Collected input files");
    Ok(inputs)
}

/// Scale `width x height` by `factor`, keeping the aspect ratio and both
/// sides even.
pub fn resize_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let even = |v: f64| ((v / 2.0).round() as u32 * 2).max(2);
    let w = even(width as f64 * factor);
    let h = even(w as f64 * height as f64 / width as f64);
    (w, h)
}

/// Validated settings for one run.
#[derive(Clone, Debug)]
pub struct RuntimeSetup {
    pub run: RunConfig,
    pub metadata: VideoMetadata,
    pub decode: DecodeSettings,
    pub encode: EncodeSettings,
    pub filters: FilterSettings,
    pub pipeline: PipelineConfig,
    pub remux: Option<AudioRemux>,
}

/// Probe the input with the `ffprobe` next to `request.ffmpeg`.
pub fn probe_input(request: &RunRequest) -> Result<VideoMetadata> {
    let ffprobe = ffprobe_for(&request.ffmpeg);
    let metadata = probe_video(&ffprobe, &request.input)?;
    Ok(match request.trim {
        Some(window) => metadata.trimmed(window),
        None => metadata,
    })
}

/// Derive every setting of a run from `request` and the input's metadata.
pub fn prepare_runtime(mut request: RunRequest, metadata: VideoMetadata) -> Result<RuntimeSetup> {
    request.normalize();
    request.filters.validate()?;

    let (width, height) = match request.resize {
        Some(resize) => {
            if !(resize.factor.is_finite() && resize.factor > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "resize factor must be positive, got {}",
                    resize.factor
                )));
            }
            resize_dimensions(metadata.width, metadata.height, resize.factor)
        }
        None => (metadata.width, metadata.height),
    };
    if let Some(sharpen) = request.sharpen
        && !(0.0..=100.0).contains(&sharpen)
    {
        return Err(EngineError::InvalidConfig(format!(
            "sharpen sensitivity must be within 0..=100, got {sharpen}"
        )));
    }

    let output = match (&request.output, request.benchmark) {
        (_, true) => None,
        (Some(path), false) => Some(path.clone()),
        (None, false) => Some(request.default_output()),
    };

    let run = RunConfig {
        input: request.input.clone(),
        output: output.clone(),
        width,
        height,
        fps: metadata.fps,
        interpolation_factor: request.filters.interpolation_factor(),
        upscale_factor: request.filters.upscale_factor(),
        queue_capacity: request.queue_capacity,
        benchmark: request.benchmark,
        audio: request.audio,
        bit_depth: request.bit_depth,
        total_frames: metadata.total_frames,
    };
    run.validate()?;

    let decode = DecodeSettings {
        ffmpeg: request.ffmpeg.clone(),
        input: request.input.clone(),
        trim: request.trim,
        resize: request.resize.map(|r| r.kernel),
        width,
        height,
        bit_depth: request.bit_depth,
        total_frames: metadata.total_frames,
    };

    let (out_w, out_h) = run.output_dimensions();
    let encode = EncodeSettings {
        ffmpeg: request.ffmpeg.clone(),
        output: output.clone(),
        method: request.encode_method,
        custom_encoder: request.custom_encoder.clone(),
        width: out_w,
        height: out_h,
        fps: run.output_fps(),
        sharpen: request.sharpen.map(|pct| pct / 100.0),
        grayscale: request.grayscale,
        transparent: request.transparent,
        bit_depth: request.bit_depth,
        benchmark: request.benchmark,
    };
    // Surface encoder argument errors before any process starts.
    encode.plan()?;

    let remux = match (&output, run.audio) {
        (Some(out), true) => {
            Some(AudioRemux::new(&request.ffmpeg, &request.input, out).with_trim(request.trim))
        }
        _ => None,
    };

    let mut pipeline = PipelineConfig::from_run_config(&run);
    pipeline.preview = request.preview.clone();

    info!(
        input = %run.input.display(),
        output = ?run.output,
        width,
        height,
        out_width = out_w,
        out_height = out_h,
        fps = run.fps,
        out_fps = run.output_fps(),
        total_frames = ?run.total_frames,
        audio = run.audio,
        "Run prepared"
    );

    Ok(RuntimeSetup {
        run,
        metadata,
        decode,
        encode,
        filters: request.filters,
        pipeline,
        remux,
    })
}

/// Spawn both ffmpeg processes and run `pipeline` to completion.
///
/// Failing to start either process is fatal; everything after that ends
/// gracefully and is described by the report.
pub async fn execute(
    setup: &RuntimeSetup,
    pipeline: &FramePipeline,
    paths: &AppPaths,
) -> Result<PipelineReport> {
    let filters = build_filter_chain(&setup.filters)?;
    let encoder = FfmpegEncoder::spawn(
        &setup.encode,
        Some(paths.encoder_log_file.as_path()),
        setup.remux.clone(),
    )?;
    let decoder = FfmpegDecoder::spawn(&setup.decode)?;
    pipeline.run(decoder, filters, encoder).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_filters::methods::{DedupMethod, InterpolateMethod, UpscaleMethod};
    use reel_filters::registry::{DedupSettings, InterpolateSettings, UpscaleSettings};

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            fps: 24.0,
            total_frames: Some(240),
            duration_secs: Some(10.0),
            pix_fmt: Some("yuv420p".into()),
        }
    }

    fn request() -> RunRequest {
        let mut r = RunRequest::new("/opt/ffmpeg/ffmpeg", "/videos/clip.mkv");
        r.output = Some(PathBuf::from("/videos/out.mp4"));
        r
    }

    #[test]
    fn resize_keeps_even_dimensions() {
        assert_eq!(resize_dimensions(1920, 1080, 0.5), (960, 540));
        assert_eq!(resize_dimensions(1280, 720, 0.3), (384, 216));
        assert_eq!(resize_dimensions(853, 480, 1.0), (854, 480));
        assert_eq!(resize_dimensions(4, 4, 0.01), (2, 2));
    }

    #[test]
    fn dedup_disables_audio_and_upscale_skip() {
        let mut r = request();
        r.filters.dedup = Some(DedupSettings::default());
        r.filters.upscale = Some(UpscaleSettings {
            method: UpscaleMethod::Nearest,
            factor: 2,
            skip: true,
        });
        r.normalize();
        assert!(!r.audio);
        assert!(!r.filters.upscale.as_ref().unwrap().skip);
    }

    #[test]
    fn interpolation_scales_output_fps_and_progress() {
        let mut r = request();
        r.filters.interpolate = Some(InterpolateSettings {
            method: InterpolateMethod::Blend,
            factor: 2,
        });
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert_eq!(setup.encode.fps, 48.0);
        assert_eq!(setup.run.progress_total(), Some(480));
        assert!(setup.remux.is_some());
    }

    #[test]
    fn trim_window_reaches_decoder_and_audio_extract() {
        let mut r = request();
        r.trim = Some(TrimWindow::new(10.0, 20.0).unwrap());
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert_eq!(&setup.decode.args()[..4], ["-ss", "10", "-to", "20"]);
        let extract = setup.remux.expect("audio is on by default").extract_args();
        assert!(
            extract.windows(5).any(|w| w == ["-ss", "10", "-to", "20", "-i"]),
            "{extract:?}"
        );
    }

    #[test]
    fn upscale_and_resize_drive_geometry() {
        let mut r = request();
        r.resize = Some(ResizeRequest {
            kernel: ResizeKernel::Lanczos,
            factor: 0.5,
        });
        r.filters.upscale = Some(UpscaleSettings {
            method: UpscaleMethod::Bilinear,
            factor: 2,
            skip: false,
        });
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert_eq!((setup.decode.width, setup.decode.height), (960, 540));
        assert_eq!(setup.decode.resize, Some(ResizeKernel::Lanczos));
        assert_eq!((setup.encode.width, setup.encode.height), (1920, 1080));
    }

    #[test]
    fn sharpen_percentage_is_normalised() {
        let mut r = request();
        r.sharpen = Some(50.0);
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert_eq!(setup.encode.sharpen, Some(0.5));

        let mut r = request();
        r.sharpen = Some(150.0);
        assert!(matches!(
            prepare_runtime(r, metadata()),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn benchmark_has_no_output_and_no_audio() {
        let mut r = request();
        r.benchmark = true;
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert!(setup.run.output.is_none());
        assert!(setup.remux.is_none());
        assert!(setup.pipeline.benchmark);
    }

    #[test]
    fn missing_output_is_derived_from_input() {
        let mut r = request();
        r.output = None;
        r.filters.dedup = Some(DedupSettings {
            method: DedupMethod::Mse,
            ..Default::default()
        });
        let setup = prepare_runtime(r, metadata()).unwrap();
        assert_eq!(setup.run.output, Some(PathBuf::from("/videos/clip_reel.mp4")));
        assert!(setup.remux.is_none(), "dedup turned audio off");
    }

    #[test]
    fn collect_inputs_keeps_videos_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.MKV", "a.mp4", "notes.txt", "c.webm"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let names: Vec<String> = collect_inputs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.mp4", "b.MKV", "c.webm"]);
    }

    #[test]
    fn output_in_uses_default_name() {
        let r = RunRequest::new("ffmpeg", "/videos/episode.mkv");
        assert_eq!(
            r.output_in(Path::new("/renders")),
            PathBuf::from("/renders/episode_reel.mp4")
        );
    }

    #[test]
    fn prores_defaults_to_mov() {
        let mut r = request();
        r.encode_method = EncodeMethod::Prores;
        assert_eq!(r.default_output(), PathBuf::from("/videos/clip_reel.mov"));
    }
}
