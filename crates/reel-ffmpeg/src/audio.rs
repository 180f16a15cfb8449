//! Audio remux onto the muted encoder output.
//!
//! The encoder always writes video only (`-an`).  When audio is requested,
//! this runs after the encoder exits:
//!
//! 1. `ffmpeg -i INPUT` and look for an audio stream in the banner;
//! 2. copy the audio track to `<stem>_audio.aac`, seeking to the same
//!    trim window as the decoder;
//! 3. mux it with the encoded video into `<stem>_merged.<ext>`;
//! 4. rename the merged file over the output;
//! 5. delete the side file and any leftover merged file, on every path.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use reel_core::error::{EngineError, Result};

use crate::decoder::TrimWindow;
use crate::process;

/// What the remux did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemuxOutcome {
    /// The input has no audio stream; the output is left untouched.
    NoAudio,
    /// The output now carries the input's audio.
    Merged,
}

/// Remux plan for one run.
#[derive(Clone, Debug)]
pub struct AudioRemux {
    pub ffmpeg: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Seek window shared with the decoder so audio stays in sync.
    pub trim: Option<TrimWindow>,
}

impl AudioRemux {
    pub fn new(ffmpeg: impl Into<PathBuf>, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            input: input.into(),
            output: output.into(),
            trim: None,
        }
    }

    pub fn with_trim(mut self, trim: Option<TrimWindow>) -> Self {
        self.trim = trim;
        self
    }

    /// Temporary audio track next to the output.
    pub fn side_file(&self) -> PathBuf {
        self.sibling("_audio", "aac")
    }

    /// Temporary muxed file next to the output.
    pub fn merged_file(&self) -> PathBuf {
        let ext = self
            .output
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".into());
        self.sibling("_merged", &ext)
    }

    fn sibling(&self, suffix: &str, ext: &str) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        self.output.with_file_name(format!("{stem}{suffix}.{ext}"))
    }

    pub fn probe_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
        ]
    }

    pub fn extract_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "error", "-stats", "-y"].map(String::from).to_vec();
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
        args.extend(["-vn", "-acodec", "copy"].map(String::from));
        args.push(self.side_file().to_string_lossy().into_owned());
        args
    }

    pub fn mux_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "error", "-stats", "-i"].map(String::from).to_vec();
        args.push(self.side_file().to_string_lossy().into_owned());
        args.push("-i".into());
        args.push(self.output.to_string_lossy().into_owned());
        args.extend(
            [
                "-c:v", "copy", "-c:a", "aac", "-map", "1:v:0", "-map", "0:a:0", "-shortest", "-y",
            ]
            .map(String::from),
        );
        args.push(self.merged_file().to_string_lossy().into_owned());
        args
    }

    /// Run all steps.
    pub fn run(&self) -> Result<RemuxOutcome> {
        let probe = Command::new(&self.ffmpeg)
            .args(self.probe_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| EngineError::ProcessSpawn {
                role: "audio probe",
                program: self.ffmpeg.to_string_lossy().into_owned(),
                source,
            })?;
        if !has_audio_stream(&String::from_utf8_lossy(&probe.stderr)) {
            tracing::info!(input = %self.input.display(), "No audio stream in input, skipping remux");
            return Ok(RemuxOutcome::NoAudio);
        }

        let side = TempFile(self.side_file());
        let merged = TempFile(self.merged_file());
        self.run_step("audio extract", self.extract_args())?;
        self.run_step("audio mux", self.mux_args())?;

        std::fs::rename(&merged.0, &self.output).map_err(|e| {
            EngineError::Remux(format!(
                "Failed to replace {} with {}: {e}",
                self.output.display(),
                merged.0.display()
            ))
        })?;
        drop(side);

        tracing::info!(output = %self.output.display(), "Audio remuxed into output");
        Ok(RemuxOutcome::Merged)
    }

    fn run_step(&self, role: &'static str, args: Vec<String>) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = process::spawn(role, &mut cmd)?;
        let out = child
            .wait_with_output()
            .map_err(|e| EngineError::Remux(format!("{role} did not complete: {e}")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(EngineError::Remux(format!(
                "{role} exited with {}: {}",
                out.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Whether an `ffmpeg -i` banner lists an audio stream.
pub fn has_audio_stream(banner: &str) -> bool {
    banner
        .lines()
        .any(|line| line.contains("Stream #") && line.contains("Audio:"))
}

/// Removes the wrapped path when dropped.
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        remove_if_exists(&self.0);
    }
}

fn remove_if_exists(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed temporary remux file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove temporary file"),
    }
}
