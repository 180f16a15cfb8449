#![doc = include_str!("../README.md")]

/// Audio remux onto the muted encoder output.
pub mod audio;
/// Raw-frame decoder process ([`reel_core::codec_traits::FrameDecoder`]).
pub mod decoder;
/// Raw-frame encoder process ([`reel_core::codec_traits::FrameEncoder`]).
pub mod encoder;
/// `ffprobe` metadata extraction.
pub mod probe;
mod process;

pub use audio::{AudioRemux, RemuxOutcome};
pub use decoder::{DecodeSettings, FfmpegDecoder, ResizeKernel, TrimWindow};
pub use encoder::{EncodeMethod, EncodeSettings, EncoderPlan, FfmpegEncoder, PixelFormats};
pub use probe::{VideoMetadata, ffprobe_for, probe_video};
