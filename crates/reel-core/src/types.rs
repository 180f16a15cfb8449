//! Raw frame representation shared by every stage.
//!
//! A [`Frame`] is a headerless, interleaved, row-major RGB buffer.  Its size
//! is fully determined by `(width, height, depth)`; both the decoder and the
//! encoder processes agree on it out of band.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Number of interleaved channels in every frame.
pub const CHANNELS: usize = 3;

/// Per-sample element width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    /// One byte per sample (`rgb24`).
    #[default]
    Eight,
    /// Two little-endian bytes per sample (`rgb48le`).
    Sixteen,
}

impl BitDepth {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Largest representable sample value.
    pub const fn max_value(self) -> u16 {
        match self {
            Self::Eight => u8::MAX as u16,
            Self::Sixteen => u16::MAX,
        }
    }

    /// ffmpeg pixel format name for raw RGB at this depth.
    pub const fn rgb_pix_fmt(self) -> &'static str {
        match self {
            Self::Eight => "rgb24",
            Self::Sixteen => "rgb48le",
        }
    }

    /// Parse the `8bit` / `16bit` spelling used on the command line.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "8bit" | "8" => Ok(Self::Eight),
            "16bit" | "16" => Ok(Self::Sixteen),
            other => Err(EngineError::unknown_method(
                "bit depth",
                other,
                &["8bit", "16bit"],
            )),
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eight => f.write_str("8bit"),
            Self::Sixteen => f.write_str("16bit"),
        }
    }
}

/// Byte length of one frame with the given geometry.
pub const fn frame_len(width: u32, height: u32, depth: BitDepth) -> usize {
    width as usize * height as usize * CHANNELS * depth.bytes_per_sample()
}

/// One raw video frame.
///
/// Ownership moves through the pipeline; filters that need history keep an
/// explicit [`Clone`].
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    depth: BitDepth,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a raw buffer, validating its length against the geometry.
    pub fn new(width: u32, height: u32, depth: BitDepth, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::DimensionMismatch(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let need = frame_len(width, height, depth);
        if data.len() != need {
            return Err(EngineError::BufferSize {
                need,
                have: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            depth,
            data,
        })
    }

    /// A frame with every byte set to `value`.
    pub fn filled(width: u32, height: u32, depth: BitDepth, value: u8) -> Self {
        Self {
            width,
            height,
            depth,
            data: vec![value; frame_len(width, height, depth)],
        }
    }

    /// Build a frame from per-sample values (`width * height * 3` of them).
    ///
    /// 8-bit frames keep the low byte of each value.
    pub fn from_samples(
        width: u32,
        height: u32,
        depth: BitDepth,
        samples: impl IntoIterator<Item = u16>,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(frame_len(width, height, depth));
        match depth {
            BitDepth::Eight => data.extend(samples.into_iter().map(|s| s.min(255) as u8)),
            BitDepth::Sixteen => {
                for s in samples {
                    data.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
        Self::new(width, height, depth, data)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Total number of samples (`width * height * 3`).
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Sample at flat index `i` (pixel-major, channel-minor).
    #[inline]
    pub fn sample(&self, i: usize) -> u16 {
        match self.depth {
            BitDepth::Eight => self.data[i] as u16,
            BitDepth::Sixteen => u16::from_le_bytes([self.data[2 * i], self.data[2 * i + 1]]),
        }
    }

    /// Sample at pixel `(x, y)`, channel `c`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32, c: usize) -> u16 {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS + c;
        self.sample(idx)
    }

    /// Iterate all samples in storage order.
    pub fn samples(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.sample_count()).map(move |i| self.sample(i))
    }

    /// Rec.601 luma of pixel `(x, y)`, normalised to `0.0..=255.0`.
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let scale = 255.0 / self.depth.max_value() as f32;
        let r = self.pixel(x, y, 0) as f32;
        let g = self.pixel(x, y, 1) as f32;
        let b = self.pixel(x, y, 2) as f32;
        (0.299 * r + 0.587 * g + 0.114 * b) * scale
    }

    /// Whether `other` has the same geometry and depth.
    pub fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height && self.depth == other.depth
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        let err = Frame::new(4, 2, BitDepth::Eight, vec![0; 10]).expect_err("short buffer");
        match err {
            EngineError::BufferSize { need, have } => {
                assert_eq!(need, 24);
                assert_eq!(have, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sixteen_bit_doubles_frame_len() {
        assert_eq!(frame_len(4, 2, BitDepth::Eight), 24);
        assert_eq!(frame_len(4, 2, BitDepth::Sixteen), 48);
        let frame = Frame::filled(4, 2, BitDepth::Sixteen, 0);
        assert_eq!(frame.data().len(), 48);
        assert_eq!(frame.sample_count(), 24);
    }

    #[test]
    fn sixteen_bit_samples_are_little_endian() {
        let frame = Frame::from_samples(1, 1, BitDepth::Sixteen, [0x0102, 0x0304, 0xffff])
            .expect("valid frame");
        assert_eq!(frame.data(), &[0x02, 0x01, 0x04, 0x03, 0xff, 0xff]);
        assert_eq!(frame.pixel(0, 0, 1), 0x0304);
    }

    #[test]
    fn luma_is_depth_independent() {
        let eight = Frame::filled(1, 1, BitDepth::Eight, 255);
        let sixteen = Frame::filled(1, 1, BitDepth::Sixteen, 255);
        assert!((eight.luma(0, 0) - 255.0).abs() < 0.01);
        assert!((sixteen.luma(0, 0) - 255.0).abs() < 0.01);
    }

    #[test]
    fn bit_depth_parses_cli_spelling() {
        assert_eq!(BitDepth::parse("8bit").unwrap(), BitDepth::Eight);
        assert_eq!(BitDepth::parse("16BIT").unwrap(), BitDepth::Sixteen);
        assert!(BitDepth::parse("10bit").is_err());
    }
}
