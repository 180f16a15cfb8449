//! Raw-frame encoder backed by an `ffmpeg` subprocess.
//!
//! Every command starts with the raw input description:
//!
//! ```text
//! ffmpeg -y -v warning -stats -f rawvideo -vcodec rawvideo \
//!        -s WxH -pix_fmt IN -r FPS -i -
//! ```
//!
//! followed by one of:
//! - a named [`EncodeMethod`] preset plus optional `-vf` filters,
//!   `-pix_fmt OUT` and the output path;
//! - a custom argument string with the filters spliced into its `-vf`;
//! - `-benchmark -f null -` in benchmark mode.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::str::FromStr;

use reel_core::codec_traits::FrameEncoder;
use reel_core::error::{EngineError, Result};
use reel_core::types::{BitDepth, Frame};

use crate::audio::AudioRemux;
use crate::process;

// ─── Encode methods ──────────────────────────────────────────────────────

/// Named codec/quality presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EncodeMethod {
    #[default]
    X264,
    X264TenBit,
    X264Animation,
    X264AnimationTenBit,
    X265,
    X265TenBit,
    NvencH264,
    NvencH265,
    NvencH265TenBit,
    NvencAv1,
    QsvH264,
    QsvH265,
    QsvH265TenBit,
    Av1,
    H264Amf,
    HevcAmf,
    HevcAmfTenBit,
    Prores,
}

impl EncodeMethod {
    pub const ALL: [EncodeMethod; 18] = [
        Self::X264,
        Self::X264TenBit,
        Self::X264Animation,
        Self::X264AnimationTenBit,
        Self::X265,
        Self::X265TenBit,
        Self::NvencH264,
        Self::NvencH265,
        Self::NvencH265TenBit,
        Self::NvencAv1,
        Self::QsvH264,
        Self::QsvH265,
        Self::QsvH265TenBit,
        Self::Av1,
        Self::H264Amf,
        Self::HevcAmf,
        Self::HevcAmfTenBit,
        Self::Prores,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::X264TenBit => "x264_10bit",
            Self::X264Animation => "x264_animation",
            Self::X264AnimationTenBit => "x264_animation_10bit",
            Self::X265 => "x265",
            Self::X265TenBit => "x265_10bit",
            Self::NvencH264 => "nvenc_h264",
            Self::NvencH265 => "nvenc_h265",
            Self::NvencH265TenBit => "nvenc_h265_10bit",
            Self::NvencAv1 => "nvenc_av1",
            Self::QsvH264 => "qsv_h264",
            Self::QsvH265 => "qsv_h265",
            Self::QsvH265TenBit => "qsv_h265_10bit",
            Self::Av1 => "av1",
            Self::H264Amf => "h264_amf",
            Self::HevcAmf => "hevc_amf",
            Self::HevcAmfTenBit => "hevc_amf_10bit",
            Self::Prores => "prores",
        }
    }

    /// Codec, preset, quantizer and profile arguments.
    pub fn codec_args(self) -> Vec<&'static str> {
        const HIGH10: &[&str] = &["-profile:v", "high10"];
        const MAIN10: &[&str] = &["-profile:v", "main10"];
        const ANIMATION: &[&str] = &["-tune", "animation"];

        fn preset(codec: &'static str, extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = vec!["-c:v", codec];
            args.extend_from_slice(extra);
            args
        }
        fn x264(extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = preset("libx264", &["-preset", "veryfast", "-crf", "15"]);
            args.extend_from_slice(extra);
            args
        }
        fn x265(extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = preset("libx265", &["-preset", "veryfast", "-crf", "15"]);
            args.extend_from_slice(extra);
            args
        }
        fn nvenc(codec: &'static str, extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = preset(codec, &["-preset", "p1", "-cq", "15"]);
            args.extend_from_slice(extra);
            args
        }
        fn qsv(codec: &'static str, extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = preset(codec, &["-preset", "veryfast", "-global_quality", "15"]);
            args.extend_from_slice(extra);
            args
        }
        fn amf(codec: &'static str, extra: &[&'static str]) -> Vec<&'static str> {
            let mut args = preset(codec, &["-quality", "speed", "-rc", "cqp", "-qp", "15"]);
            args.extend_from_slice(extra);
            args
        }

        match self {
            Self::X264 => x264(&[]),
            Self::X264TenBit => x264(HIGH10),
            Self::X264Animation => x264(ANIMATION),
            Self::X264AnimationTenBit => x264(&["-tune", "animation", "-profile:v", "high10"]),
            Self::X265 => x265(&[]),
            Self::X265TenBit => x265(MAIN10),
            Self::NvencH264 => nvenc("h264_nvenc", &[]),
            Self::NvencH265 => nvenc("hevc_nvenc", &[]),
            Self::NvencH265TenBit => nvenc("hevc_nvenc", MAIN10),
            Self::NvencAv1 => nvenc("av1_nvenc", &[]),
            Self::QsvH264 => qsv("h264_qsv", &[]),
            Self::QsvH265 => qsv("hevc_qsv", &[]),
            Self::QsvH265TenBit => qsv("hevc_qsv", MAIN10),
            Self::Av1 => preset("libsvtav1", &["-preset", "8", "-crf", "15"]),
            Self::H264Amf => amf("h264_amf", &[]),
            Self::HevcAmf => amf("hevc_amf", &[]),
            Self::HevcAmfTenBit => amf("hevc_amf", MAIN10),
            Self::Prores => preset("prores_ks", &["-profile:v", "4", "-qscale:v", "15"]),
        }
    }

    /// Software encoders configured for 10-bit output.
    pub const fn is_software_ten_bit(self) -> bool {
        matches!(
            self,
            Self::X264TenBit | Self::X264AnimationTenBit | Self::X265TenBit
        )
    }

    /// Hardware encoders configured for 10-bit output.
    pub const fn is_hardware_ten_bit(self) -> bool {
        matches!(
            self,
            Self::NvencH265TenBit | Self::HevcAmfTenBit | Self::QsvH265TenBit
        )
    }

    pub const fn supports_alpha(self) -> bool {
        matches!(self, Self::Prores)
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }
}

impl FromStr for EncodeMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| EngineError::unknown_method("encode method", s, &Self::names()))
    }
}

impl fmt::Display for EncodeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Pixel formats ───────────────────────────────────────────────────────

/// Layout of the bytes written to the encoder's stdin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputLayout {
    Rgb,
    Rgba,
    Gray,
}

impl InputLayout {
    /// ffmpeg `-pix_fmt` name for this layout at `depth`.
    pub const fn pix_fmt(self, depth: BitDepth) -> &'static str {
        match (self, depth) {
            (Self::Rgb, BitDepth::Eight) => "rgb24",
            (Self::Rgb, BitDepth::Sixteen) => "rgb48le",
            (Self::Rgba, BitDepth::Eight) => "rgba",
            (Self::Rgba, BitDepth::Sixteen) => "rgba64le",
            (Self::Gray, BitDepth::Eight) => "gray",
            (Self::Gray, BitDepth::Sixteen) => "gray16le",
        }
    }

    /// Convert an RGB frame to this layout.
    pub fn pack(self, frame: &Frame) -> Cow<'_, [u8]> {
        match self {
            Self::Rgb => Cow::Borrowed(frame.data()),
            Self::Rgba => {
                let max = frame.depth().max_value();
                let mut out = Vec::with_capacity(frame.data().len() / 3 * 4);
                for px in 0..frame.sample_count() / 3 {
                    for c in 0..3 {
                        push_sample(&mut out, frame.depth(), frame.sample(px * 3 + c));
                    }
                    push_sample(&mut out, frame.depth(), max);
                }
                Cow::Owned(out)
            }
            Self::Gray => {
                let mut out = Vec::with_capacity(frame.data().len() / 3);
                for px in 0..frame.sample_count() / 3 {
                    let r = frame.sample(px * 3) as u32;
                    let g = frame.sample(px * 3 + 1) as u32;
                    let b = frame.sample(px * 3 + 2) as u32;
                    let y = (299 * r + 587 * g + 114 * b + 500) / 1000;
                    push_sample(&mut out, frame.depth(), y as u16);
                }
                Cow::Owned(out)
            }
        }
    }
}

fn push_sample(out: &mut Vec<u8>, depth: BitDepth, value: u16) {
    match depth {
        BitDepth::Eight => out.push(value as u8),
        BitDepth::Sixteen => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Result of the pixel-format decision table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormats {
    /// Method actually used; transparency may force a switch.
    pub method: EncodeMethod,
    pub input: InputLayout,
    pub output: &'static str,
}

/// Choose input and output pixel formats, checked in order:
/// transparency, grayscale, software 10-bit, hardware 10-bit, default.
pub fn select_pixel_formats(
    method: EncodeMethod,
    transparent: bool,
    grayscale: bool,
) -> PixelFormats {
    if transparent {
        if !method.supports_alpha() {
            tracing::warn!(
                requested = %method,
                "Transparency requires an alpha-capable codec, switching to prores"
            );
        }
        return PixelFormats {
            method: EncodeMethod::Prores,
            input: InputLayout::Rgba,
            output: "yuva444p10le",
        };
    }
    let (input, output) = if grayscale {
        (InputLayout::Gray, "yuv420p10le")
    } else if method.is_software_ten_bit() {
        (InputLayout::Rgb, "yuv420p10le")
    } else if method.is_hardware_ten_bit() {
        (InputLayout::Rgb, "p010le")
    } else {
        (InputLayout::Rgb, "yuv420p")
    };
    PixelFormats {
        method,
        input,
        output,
    }
}

// ─── Command construction ────────────────────────────────────────────────

/// Everything needed to start the encoder process.
#[derive(Clone, Debug)]
pub struct EncodeSettings {
    pub ffmpeg: PathBuf,
    /// Output file; ignored in benchmark mode.
    pub output: Option<PathBuf>,
    pub method: EncodeMethod,
    /// Raw argument string replacing the named preset.
    pub custom_encoder: Option<String>,
    /// Geometry of incoming frames.
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Contrast-adaptive sharpening strength in `0.0..=1.0`.
    pub sharpen: Option<f64>,
    pub grayscale: bool,
    pub transparent: bool,
    pub bit_depth: BitDepth,
    pub benchmark: bool,
}

/// A fully resolved encoder invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderPlan {
    pub formats: PixelFormats,
    pub input_pix_fmt: &'static str,
    /// Arguments after the program name.
    pub args: Vec<String>,
}

impl EncodeSettings {
    pub fn plan(&self) -> Result<EncoderPlan> {
        let formats = select_pixel_formats(self.method, self.transparent, self.grayscale);
        let input_pix_fmt = formats.input.pix_fmt(self.bit_depth);

        let mut args: Vec<String> = [
            "-y",
            "-v",
            "warning",
            "-stats",
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-s",
        ]
        .map(String::from)
        .to_vec();
        args.push(format!("{}x{}", self.width, self.height));
        args.extend(["-pix_fmt".to_string(), input_pix_fmt.to_string()]);
        args.extend(["-r".to_string(), self.fps.to_string()]);
        args.extend(["-i".to_string(), "-".to_string()]);

        if self.benchmark {
            args.extend(["-benchmark", "-f", "null", "-"].map(String::from));
            return Ok(EncoderPlan {
                formats,
                input_pix_fmt,
                args,
            });
        }

        let output = self.output.as_ref().ok_or_else(|| {
            EngineError::InvalidConfig("encoder output path is required".into())
        })?;
        args.extend(["-an", "-fps_mode", "cfr"].map(String::from));

        let filters = self.filters();
        match self.custom_encoder.as_deref() {
            Some(custom) => {
                let mut tokens: Vec<String> =
                    custom.split_whitespace().map(String::from).collect();
                if tokens.is_empty() {
                    return Err(EngineError::InvalidConfig(
                        "custom encoder string is empty".into(),
                    ));
                }
                splice_filters(&mut tokens, &filters);
                if !tokens.iter().any(|t| t == "-pix_fmt") {
                    tracing::warn!(
                        pix_fmt = formats.output,
                        "Custom encoder has no -pix_fmt, appending the default"
                    );
                    tokens.extend(["-pix_fmt".to_string(), formats.output.to_string()]);
                }
                args.extend(tokens);
            }
            None => {
                args.extend(formats.method.codec_args().into_iter().map(String::from));
                if !filters.is_empty() {
                    args.extend(["-vf".to_string(), filters.join(",")]);
                }
                args.extend(["-pix_fmt".to_string(), formats.output.to_string()]);
            }
        }
        args.push(output.to_string_lossy().into_owned());

        Ok(EncoderPlan {
            formats,
            input_pix_fmt,
            args,
        })
    }

    fn filters(&self) -> Vec<String> {
        let mut filters = Vec::new();
        if let Some(strength) = self.sharpen {
            filters.push(format!("cas={strength}"));
        }
        if self.grayscale {
            filters.push("format=gray".into());
        }
        if self.transparent {
            filters.push("format=rgba".into());
        }
        filters
    }
}

/// Append `filters` to an existing `-vf` value, or add a new `-vf`.
fn splice_filters(tokens: &mut Vec<String>, filters: &[String]) {
    if filters.is_empty() {
        return;
    }
    let joined = filters.join(",");
    match tokens.iter().position(|t| t == "-vf") {
        Some(i) if i + 1 < tokens.len() => {
            let value = &mut tokens[i + 1];
            value.push(',');
            value.push_str(&joined);
        }
        Some(_) => tokens.push(joined),
        None => tokens.extend(["-vf".to_string(), joined]),
    }
}

// ─── Encoder ─────────────────────────────────────────────────────────────

/// [`FrameEncoder`] writing raw frames to a child process' stdin.
pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    layout: InputLayout,
    width: u32,
    height: u32,
    frames: u64,
    bytes: u64,
    remux: Option<AudioRemux>,
}

impl FfmpegEncoder {
    /// Start `ffmpeg` per `settings`.
    ///
    /// Process stdout/stderr go to `log_file` when given.  `remux` runs in
    /// [`FrameEncoder::post_process`].
    pub fn spawn(
        settings: &EncodeSettings,
        log_file: Option<&Path>,
        remux: Option<AudioRemux>,
    ) -> Result<Self> {
        let plan = settings.plan()?;
        let mut cmd = Command::new(&settings.ffmpeg);
        cmd.args(&plan.args);
        match log_file {
            Some(path) => {
                let log = File::create(path).map_err(|e| {
                    EngineError::Encode(format!(
                        "Failed to create encoder log {}: {e}",
                        path.display()
                    ))
                })?;
                cmd.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        tracing::info!(
            method = %plan.formats.method,
            custom = settings.custom_encoder.is_some(),
            input_pix_fmt = plan.input_pix_fmt,
            output_pix_fmt = plan.formats.output,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            benchmark = settings.benchmark,
            "Starting encoder"
        );
        let mut encoder = Self::from_command(cmd, plan.formats.input, settings.width, settings.height)?;
        encoder.remux = remux;
        Ok(encoder)
    }

    /// Start an arbitrary command reading raw frames on stdin.
    pub fn from_command(
        mut cmd: Command,
        layout: InputLayout,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        cmd.stdin(Stdio::piped());
        let mut child = process::spawn("encoder", &mut cmd)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Encode("encoder stdin was not captured".into()))?;
        Ok(Self {
            child: Some(child),
            stdin: Some(BufWriter::with_capacity(4 * 1024 * 1024, stdin)), // 4 MiB buffer
            layout,
            width,
            height,
            frames: 0,
            bytes: 0,
            remux: None,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn encode(&mut self, frame: Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(EngineError::DimensionMismatch(format!(
                "encoder expects {}x{}, got {}x{}",
                self.width,
                self.height,
                frame.width(),
                frame.height()
            )));
        }
        let stdin = self.stdin.as_mut().ok_or(EngineError::ChannelClosed)?;
        let bytes = self.layout.pack(&frame);
        stdin
            .write_all(&bytes)
            .map_err(|e| EngineError::Encode(format!("Failed to write to encoder: {e}")))?;

        self.frames += 1;
        self.bytes += bytes.len() as u64;
        if self.frames.is_multiple_of(100) {
            tracing::debug!(
                frames = self.frames,
                bytes_mb = self.bytes / (1024 * 1024),
                "Encoder progress"
            );
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| EngineError::Encode(format!("Failed to wait for encoder: {e}")))?;

        flushed.map_err(|e| EngineError::Encode(format!("Failed to flush encoder input: {e}")))?;
        if !status.success() {
            return Err(EngineError::Encode(format!("encoder exited with {status}")));
        }
        tracing::info!(
            frames = self.frames,
            bytes_mb = self.bytes / (1024 * 1024),
            "Encoder finished"
        );
        Ok(())
    }

    fn post_process(&mut self) -> Result<()> {
        match self.remux.take() {
            Some(remux) => remux.run().map(|_| ()),
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            process::reap("encoder", &mut child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncodeSettings {
        EncodeSettings {
            ffmpeg: PathBuf::from("ffmpeg"),
            output: Some(PathBuf::from("out.mp4")),
            method: EncodeMethod::X264,
            custom_encoder: None,
            width: 8,
            height: 4,
            fps: 48.0,
            sharpen: None,
            grayscale: false,
            transparent: false,
            bit_depth: BitDepth::Eight,
            benchmark: false,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn named_method_args() {
        let plan = settings().plan().unwrap();
        assert_eq!(
            plan.args,
            [
                "-y", "-v", "warning", "-stats", "-f", "rawvideo", "-vcodec", "rawvideo", "-s",
                "8x4", "-pix_fmt", "rgb24", "-r", "48", "-i", "-", "-an", "-fps_mode", "cfr",
                "-c:v", "libx264", "-preset", "veryfast", "-crf", "15", "-pix_fmt", "yuv420p",
                "out.mp4"
            ]
        );
    }

    #[test]
    fn pixel_format_table() {
        use EncodeMethod::*;
        // (requested, transparent, grayscale) -> (method, input layout, output pix_fmt)
        let cases = [
            (X264, true, false, Prores, InputLayout::Rgba, "yuva444p10le"),
            (X264, false, true, X264, InputLayout::Gray, "yuv420p10le"),
            (X265TenBit, false, false, X265TenBit, InputLayout::Rgb, "yuv420p10le"),
            (X264AnimationTenBit, false, false, X264AnimationTenBit, InputLayout::Rgb, "yuv420p10le"),
            (NvencH265TenBit, false, false, NvencH265TenBit, InputLayout::Rgb, "p010le"),
            (QsvH265TenBit, false, false, QsvH265TenBit, InputLayout::Rgb, "p010le"),
            (HevcAmfTenBit, false, false, HevcAmfTenBit, InputLayout::Rgb, "p010le"),
            (HevcAmf, false, false, HevcAmf, InputLayout::Rgb, "yuv420p"),
        ];
        for (method, transparent, grayscale, want_method, want_input, want_output) in cases {
            let f = select_pixel_formats(method, transparent, grayscale);
            assert_eq!(f.method, want_method, "{method}");
            assert_eq!(f.input, want_input, "{method}");
            assert_eq!(f.output, want_output, "{method}");
        }
    }

    #[test]
    fn transparency_wins_over_grayscale() {
        let f = select_pixel_formats(EncodeMethod::X265, true, true);
        assert_eq!(f.method, EncodeMethod::Prores);
        assert_eq!(f.output, "yuva444p10le");
    }

    #[test]
    fn ten_bit_profiles() {
        let args = EncodeMethod::X264AnimationTenBit.codec_args();
        assert!(args.windows(2).any(|w| w == ["-tune", "animation"]));
        assert!(args.windows(2).any(|w| w == ["-profile:v", "high10"]));
        let args = EncodeMethod::HevcAmfTenBit.codec_args();
        assert_eq!(args[1], "hevc_amf");
        assert!(args.windows(2).any(|w| w == ["-profile:v", "main10"]));
        assert!(args.windows(2).any(|w| w == ["-rc", "cqp"]));
    }

    #[test]
    fn filters_follow_codec_args() {
        let mut s = settings();
        s.sharpen = Some(0.5);
        s.grayscale = true;
        let plan = s.plan().unwrap();
        assert_eq!(value_after(&plan.args, "-vf"), Some("cas=0.5,format=gray"));
        assert_eq!(plan.input_pix_fmt, "gray");
        assert_eq!(plan.args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn custom_encoder_splices_into_existing_vf() {
        let mut s = settings();
        s.custom_encoder = Some("-c:v libx265 -vf hqdn3d -pix_fmt yuv444p".into());
        s.sharpen = Some(0.3);
        let plan = s.plan().unwrap();
        assert_eq!(value_after(&plan.args, "-vf"), Some("hqdn3d,cas=0.3"));
        assert_eq!(plan.args.iter().filter(|a| *a == "-pix_fmt").count(), 2);
        assert_eq!(value_after(&plan.args[16..], "-pix_fmt"), Some("yuv444p"));
    }

    #[test]
    fn custom_encoder_gets_new_vf_and_pix_fmt() {
        let mut s = settings();
        s.custom_encoder = Some("-c:v libx264 -crf 18".into());
        s.transparent = true;
        let plan = s.plan().unwrap();
        let tail = &plan.args[16..];
        assert_eq!(value_after(tail, "-vf"), Some("format=rgba"));
        assert_eq!(value_after(tail, "-pix_fmt"), Some("yuva444p10le"));
        assert_eq!(plan.input_pix_fmt, "rgba");
    }

    #[test]
    fn benchmark_uses_null_sink() {
        let mut s = settings();
        s.benchmark = true;
        s.output = None;
        let plan = s.plan().unwrap();
        assert_eq!(&plan.args[plan.args.len() - 4..], ["-benchmark", "-f", "null", "-"]);
        assert!(!plan.args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn missing_output_is_rejected() {
        let mut s = settings();
        s.output = None;
        assert!(matches!(s.plan(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn sixteen_bit_input_format() {
        let mut s = settings();
        s.bit_depth = BitDepth::Sixteen;
        assert_eq!(s.plan().unwrap().input_pix_fmt, "rgb48le");
    }

    #[test]
    fn unknown_method_name() {
        assert_eq!("NVENC_H265".parse::<EncodeMethod>().unwrap(), EncodeMethod::NvencH265);
        assert!("h266".parse::<EncodeMethod>().is_err());
    }

    #[test]
    fn pack_layouts() {
        let frame = Frame::new(1, 1, BitDepth::Eight, vec![255, 255, 255]).unwrap();
        assert_eq!(&*InputLayout::Rgb.pack(&frame), &[255, 255, 255]);
        assert_eq!(&*InputLayout::Rgba.pack(&frame), &[255, 255, 255, 255]);
        assert_eq!(&*InputLayout::Gray.pack(&frame), &[255]);
    }

    #[cfg(unix)]
    #[test]
    fn encoder_writes_frames_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("raw.bin");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &format!("cat > '{}'", out.display())]);
        let mut enc = FfmpegEncoder::from_command(cmd, InputLayout::Rgb, 2, 1).unwrap();
        enc.encode(Frame::filled(2, 1, BitDepth::Eight, 7)).unwrap();
        enc.encode(Frame::filled(2, 1, BitDepth::Eight, 9)).unwrap();
        enc.finish().unwrap();
        assert_eq!(enc.frames_written(), 2);
        assert_eq!(std::fs::read(&out).unwrap(), [7, 7, 7, 7, 7, 7, 9, 9, 9, 9, 9, 9]);
    }

    #[cfg(unix)]
    #[test]
    fn encoder_rejects_wrong_geometry() {
        let mut cmd = Command::new("cat");
        cmd.stdout(Stdio::null());
        let mut enc = FfmpegEncoder::from_command(cmd, InputLayout::Rgb, 2, 2).unwrap();
        let err = enc
            .encode(Frame::filled(1, 1, BitDepth::Eight, 0))
            .expect_err("wrong size");
        assert!(matches!(err, EngineError::DimensionMismatch(_)));
    }
}
