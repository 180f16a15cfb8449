//! Raw-frame decoder backed by an `ffmpeg` subprocess.
//!
//! ```text
//! ffmpeg [-ss START -to END] -i INPUT [-vf RESIZE] \
//!        -f image2pipe -pix_fmt rgb24|rgb48le -vcodec rawvideo -
//! ```
//!
//! Frames arrive on stdout without framing; each one is exactly
//! `width * height * 3 * bytes_per_sample` bytes.  A short read means the
//! process ended (or was trimmed) and is reported as end of stream.

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::str::FromStr;

use reel_core::codec_traits::FrameDecoder;
use reel_core::error::{EngineError, Result};
use reel_core::types::{BitDepth, Frame, frame_len};

use crate::process;

// ─── Resize kernels ──────────────────────────────────────────────────────

/// Decoder-side resize kernel.
///
/// `spline16`, `spline36` and `point` go through `zscale` (zimg); every
/// other kernel uses swscale's `scale` filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResizeKernel {
    FastBilinear,
    Bilinear,
    Bicubic,
    Experimental,
    Neighbor,
    Area,
    Bicublin,
    Gauss,
    Sinc,
    Lanczos,
    Spline,
    Point,
    Spline16,
    Spline36,
}

impl ResizeKernel {
    pub const ALL: [ResizeKernel; 14] = [
        Self::FastBilinear,
        Self::Bilinear,
        Self::Bicubic,
        Self::Experimental,
        Self::Neighbor,
        Self::Area,
        Self::Bicublin,
        Self::Gauss,
        Self::Sinc,
        Self::Lanczos,
        Self::Spline,
        Self::Point,
        Self::Spline16,
        Self::Spline36,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastBilinear => "fast_bilinear",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Experimental => "experimental",
            Self::Neighbor => "neighbor",
            Self::Area => "area",
            Self::Bicublin => "bicublin",
            Self::Gauss => "gauss",
            Self::Sinc => "sinc",
            Self::Lanczos => "lanczos",
            Self::Spline => "spline",
            Self::Point => "point",
            Self::Spline16 => "spline16",
            Self::Spline36 => "spline36",
        }
    }

    /// Whether this kernel is only available through `zscale`.
    pub const fn uses_zscale(self) -> bool {
        matches!(self, Self::Point | Self::Spline16 | Self::Spline36)
    }

    /// `-vf` value resizing to `width x height`.
    pub fn filter(self, width: u32, height: u32) -> String {
        if self.uses_zscale() {
            format!("zscale={width}:{height}:filter={}", self.as_str())
        } else {
            format!("scale={width}:{height}:flags={}", self.as_str())
        }
    }
}

impl FromStr for ResizeKernel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                EngineError::unknown_method("resize method", s, &names)
            })
    }
}

impl fmt::Display for ResizeKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Settings ────────────────────────────────────────────────────────────

/// Input seek window in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !(start >= 0.0 && end > start) {
            return Err(EngineError::InvalidConfig(format!(
                "trim window must satisfy 0 <= start < end, got {start}..{end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Everything needed to start the decoder process.
#[derive(Clone, Debug)]
pub struct DecodeSettings {
    pub ffmpeg: PathBuf,
    pub input: PathBuf,
    pub trim: Option<TrimWindow>,
    /// Resize kernel; when set the decoder scales to `width x height`.
    pub resize: Option<ResizeKernel>,
    /// Geometry of the frames written to stdout.
    pub width: u32,
    pub height: u32,
    pub bit_depth: BitDepth,
    /// Stop after this many frames.  `None` reads until EOF.
    pub total_frames: Option<u64>,
}

impl DecodeSettings {
    /// Arguments after the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(trim) = self.trim {
            args.extend([
                "-ss".to_string(),
                trim.start.to_string(),
                "-to".to_string(),
                trim.end.to_string(),
            ]);
        }
        args.push("-i".into());
        args.push(self.input.to_string_lossy().into_owned());
        if let Some(kernel) = self.resize {
            args.push("-vf".into());
            args.push(kernel.filter(self.width, self.height));
        }
        args.extend(
            [
                "-f",
                "image2pipe",
                "-pix_fmt",
                self.bit_depth.rgb_pix_fmt(),
                "-vcodec",
                "rawvideo",
                "-",
            ]
            .map(String::from),
        );
        args
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(self.args());
        cmd
    }
}

// ─── Decoder ─────────────────────────────────────────────────────────────

/// [`FrameDecoder`] reading raw frames from a child process' stdout.
pub struct FfmpegDecoder {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
    depth: BitDepth,
    frame_len: usize,
    limit: Option<u64>,
    decoded: u64,
}

impl FfmpegDecoder {
    /// Start `ffmpeg` with the arguments from `settings`.
    pub fn spawn(settings: &DecodeSettings) -> Result<Self> {
        tracing::info!(
            input = %settings.input.display(),
            width = settings.width,
            height = settings.height,
            depth = %settings.bit_depth,
            resize = ?settings.resize.map(ResizeKernel::as_str),
            "Starting decoder"
        );
        Self::from_command(
            settings.command(),
            settings.width,
            settings.height,
            settings.bit_depth,
            settings.total_frames,
        )
    }

    /// Start an arbitrary command whose stdout carries raw frames.
    pub fn from_command(
        mut cmd: Command,
        width: u32,
        height: u32,
        depth: BitDepth,
        limit: Option<u64>,
    ) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = process::spawn("decoder", &mut cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Decode("decoder stdout was not captured".into()))?;
        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            width,
            height,
            depth,
            frame_len: frame_len(width, height, depth),
            limit,
            decoded: 0,
        })
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn decode_next(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.decoded >= limit) {
            return Ok(None);
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_len];
        let read = process::read_full(stdout, &mut buf)
            .map_err(|e| EngineError::Decode(format!("Failed to read decoder output: {e}")))?;

        if read == self.frame_len {
            self.decoded += 1;
            return Frame::new(self.width, self.height, self.depth, buf).map(Some);
        }
        if read > 0 {
            tracing::warn!(
                bytes = read,
                expected = self.frame_len,
                frame = self.decoded,
                "Discarding partial trailing frame"
            );
        }
        if let Some(limit) = self.limit
            && self.decoded < limit
        {
            tracing::warn!(
                decoded = self.decoded,
                expected = limit,
                "Decoder ended before the expected frame count"
            );
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdout first lets a still-running ffmpeg exit on EPIPE.
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            process::reap("decoder", &mut child);
        }
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
