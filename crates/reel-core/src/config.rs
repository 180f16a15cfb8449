//! Immutable per-run configuration.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::types::{BitDepth, frame_len};

/// Default capacity of each inter-stage queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Application directory name under the platform config dir.
pub const APP_DIR_NAME: &str = "reel";

/// Parameters fixed for the lifetime of one run.
///
/// Built once by the runtime layer, then shared read-only.
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    pub input: PathBuf,
    /// Final output file.  `None` in benchmark mode.
    pub output: Option<PathBuf>,
    /// Geometry of decoded frames (after any decoder-side resize).
    pub width: u32,
    pub height: u32,
    /// Input frame rate.
    pub fps: f64,
    /// Output frames per input frame; `1` disables interpolation.
    pub interpolation_factor: u32,
    /// Linear upscale factor; `1` disables upscaling.
    pub upscale_factor: u32,
    pub queue_capacity: usize,
    pub benchmark: bool,
    pub audio: bool,
    pub bit_depth: BitDepth,
    /// Frames the decoder is expected to deliver, when known.
    pub total_frames: Option<u64>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "frame dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.interpolation_factor == 0 {
            return Err(EngineError::InvalidConfig(
                "interpolation factor must be at least 1".into(),
            ));
        }
        if self.upscale_factor == 0 {
            return Err(EngineError::InvalidConfig(
                "upscale factor must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        if !self.benchmark && self.output.is_none() {
            return Err(EngineError::InvalidConfig(
                "an output path is required unless benchmarking".into(),
            ));
        }
        Ok(())
    }

    /// Encoder frame rate.
    pub fn output_fps(&self) -> f64 {
        self.fps * self.interpolation_factor as f64
    }

    /// Geometry of frames reaching the encoder.
    pub fn output_dimensions(&self) -> (u32, u32) {
        (
            self.width * self.upscale_factor,
            self.height * self.upscale_factor,
        )
    }

    /// Bytes per decoded frame.
    pub fn frame_len(&self) -> usize {
        frame_len(self.width, self.height, self.bit_depth)
    }

    /// Progress units contributed by one input frame.
    pub fn progress_increment(&self) -> u64 {
        self.interpolation_factor.max(1) as u64
    }

    /// Progress total for the whole run, when the frame count is known.
    pub fn progress_total(&self) -> Option<u64> {
        self.total_frames.map(|n| n * self.progress_increment())
    }
}

/// Filesystem locations shared by the whole process.
///
/// Resolved once at startup and passed explicitly to whoever needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// Application log written alongside stderr output.
    pub log_file: PathBuf,
    /// Destination for the encoder process' stdout and stderr.
    pub encoder_log_file: PathBuf,
}

impl AppPaths {
    /// Platform config directory: `%APPDATA%\reel` on Windows,
    /// `$XDG_CONFIG_HOME/reel` or `~/.config/reel` elsewhere.
    pub fn resolve() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| {
            EngineError::InvalidConfig("could not determine the user config directory".into())
        })?;
        Ok(Self::at(base.join(APP_DIR_NAME)))
    }

    /// Paths rooted at an explicit directory.
    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            log_file: config_dir.join("log.txt"),
            encoder_log_file: config_dir.join("ffmpeg_log.txt"),
            config_dir,
        }
    }

    /// Create the config directory if missing.
    pub fn ensure(&self) -> Result<&Self> {
        std::fs::create_dir_all(&self.config_dir)?;
        Ok(self)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
