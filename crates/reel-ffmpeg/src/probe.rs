//! Input probing through `ffprobe`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use reel_core::error::{EngineError, Result};

use crate::decoder::TrimWindow;

/// Video stream metadata needed to size frames and count progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frames in the (possibly trimmed) input, when known.
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    pub pix_fmt: Option<String>,
}

impl VideoMetadata {
    /// Restrict the frame count to a trim window.
    pub fn trimmed(mut self, window: TrimWindow) -> Self {
        self.total_frames = Some((window.duration() * self.fps).round() as u64);
        self.duration_secs = Some(window.duration());
        self
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    pix_fmt: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `ffprobe` next to the given `ffmpeg` binary.
pub fn ffprobe_for(ffmpeg: &Path) -> PathBuf {
    let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
    match ffmpeg.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

pub fn probe_args(input: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,pix_fmt:format=duration",
        "-of",
        "json",
    ]
    .map(String::from)
    .to_vec();
    args.push(input.to_string_lossy().into_owned());
    args
}

/// Probe the first video stream of `input`.
pub fn probe_video(ffprobe: &Path, input: &Path) -> Result<VideoMetadata> {
    let out = Command::new(ffprobe)
        .args(probe_args(input))
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EngineError::ProcessSpawn {
            role: "probe",
            program: ffprobe.to_string_lossy().into_owned(),
            source,
        })?;
    if !out.status.success() {
        return Err(EngineError::Probe(format!(
            "ffprobe failed on {}: {}",
            input.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    let meta = parse_probe_json(&String::from_utf8_lossy(&out.stdout))?;
    tracing::info!(
        input = %input.display(),
        width = meta.width,
        height = meta.height,
        fps = meta.fps,
        frames = ?meta.total_frames,
        "Probed input"
    );
    Ok(meta)
}

/// Parse `ffprobe -of json` output.
pub fn parse_probe_json(json: &str) -> Result<VideoMetadata> {
    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| EngineError::Probe(format!("Invalid ffprobe output: {e}")))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Probe("input has no video stream".into()))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(EngineError::Probe("video stream has no dimensions".into()));
    };
    let fps = [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_rate)
        .ok_or_else(|| EngineError::Probe("video stream has no usable frame rate".into()))?;

    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    let total_frames = stream
        .nb_frames
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration_secs.map(|d| (d * fps).round() as u64));

    Ok(VideoMetadata {
        width,
        height,
        fps,
        total_frames,
        duration_secs,
        pix_fmt: stream.pix_fmt,
    })
}

/// Parse `num/den` or a plain number; `0/0` yields `None`.
pub fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
