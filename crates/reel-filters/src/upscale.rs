//! Integer-factor pixel upscalers with optional duplicate skipping.

use reel_core::error::{EngineError, Result};
use reel_core::filter::{Deduplicator, Upscaler};
use reel_core::types::{CHANNELS, Frame};

use crate::dedup::ThumbnailDeduplicator;
use crate::methods::UpscaleMethod;

/// Nearest-neighbour or bilinear upscaler.
///
/// With a skip detector attached, an input judged identical to the last
/// computed one reuses the cached output instead of being rescaled.
pub struct PixelUpscaler {
    method: UpscaleMethod,
    factor: u32,
    skip: Option<ThumbnailDeduplicator>,
    cached: Option<Frame>,
    skipped: u64,
}

impl PixelUpscaler {
    pub fn new(method: UpscaleMethod, factor: u32) -> Result<Self> {
        if factor < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "upscale factor must be at least 2, got {factor}"
            )));
        }
        Ok(Self {
            method,
            factor,
            skip: None,
            cached: None,
            skipped: 0,
        })
    }

    pub fn with_skip_detector(mut self, detector: ThumbnailDeduplicator) -> Self {
        self.skip = Some(detector);
        self
    }

    fn scale_frame(&self, frame: &Frame) -> Result<Frame> {
        let (w, h) = frame.dimensions();
        let (ow, oh) = (w * self.factor, h * self.factor);
        let mut out = Vec::with_capacity(ow as usize * oh as usize * CHANNELS);
        let f = self.factor as f32;

        for oy in 0..oh {
            for ox in 0..ow {
                match self.method {
                    UpscaleMethod::Nearest => {
                        let (sx, sy) = (ox / self.factor, oy / self.factor);
                        for c in 0..CHANNELS {
                            out.push(frame.pixel(sx, sy, c));
                        }
                    }
                    UpscaleMethod::Bilinear => {
                        let fx = ((ox as f32 + 0.5) / f - 0.5).clamp(0.0, (w - 1) as f32);
                        let fy = ((oy as f32 + 0.5) / f - 0.5).clamp(0.0, (h - 1) as f32);
                        let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
                        let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
                        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
                        for c in 0..CHANNELS {
                            let top = lerp(frame.pixel(x0, y0, c), frame.pixel(x1, y0, c), tx);
                            let bottom = lerp(frame.pixel(x0, y1, c), frame.pixel(x1, y1, c), tx);
                            out.push((top + (bottom - top) * ty).round() as u16);
                        }
                    }
                }
            }
        }
        Frame::from_samples(ow, oh, frame.depth(), out)
    }
}

fn lerp(a: u16, b: u16, t: f32) -> f32 {
    a as f32 + (b as f32 - a as f32) * t
}

impl Upscaler for PixelUpscaler {
    fn scale(&self) -> u32 {
        self.factor
    }

    fn run(&mut self, frame: Frame) -> Result<Frame> {
        if let Some(detector) = self.skip.as_mut() {
            let duplicate = detector.run(&frame)?;
            if duplicate && let Some(cached) = &self.cached {
                self.skipped += 1;
                return Ok(cached.clone());
            }
        }
        let out = self.scale_frame(&frame)?;
        if self.skip.is_some() {
            self.cached = Some(out.clone());
        }
        Ok(out)
    }

    fn skipped_frames(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::DedupMethod;
    use reel_core::types::BitDepth;

    fn checker() -> Frame {
        // 2x1: black, white
        Frame::from_samples(2, 1, BitDepth::Eight, [0, 0, 0, 255, 255, 255]).unwrap()
    }

    #[test]
    fn nearest_replicates_pixels() {
        let mut up = PixelUpscaler::new(UpscaleMethod::Nearest, 2).unwrap();
        let out = up.run(checker()).unwrap();
        assert_eq!(out.dimensions(), (4, 2));
        let row: Vec<u16> = (0..4).map(|x| out.pixel(x, 1, 0)).collect();
        assert_eq!(row, [0, 0, 255, 255]);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let mut up = PixelUpscaler::new(UpscaleMethod::Bilinear, 2).unwrap();
        let out = up.run(checker()).unwrap();
        let row: Vec<u16> = (0..4).map(|x| out.pixel(x, 0, 0)).collect();
        // Source centres map to 0.25 and 0.75 of the way across.
        assert_eq!(row, [0, 64, 191, 255]);
    }

    #[test]
    fn factor_below_two_is_rejected() {
        assert!(PixelUpscaler::new(UpscaleMethod::Nearest, 1).is_err());
    }

    #[test]
    fn skip_detector_reuses_cached_output() {
        let detector = ThumbnailDeduplicator::new(DedupMethod::Mse, 1.0, 32);
        let mut up = PixelUpscaler::new(UpscaleMethod::Nearest, 2)
            .unwrap()
            .with_skip_detector(detector);
        let first = up.run(checker()).unwrap();
        let second = up.run(checker()).unwrap();
        assert_eq!(first, second);
        assert_eq!(up.skipped_frames(), 1);

        let other = Frame::filled(2, 1, BitDepth::Eight, 128);
        let third = up.run(other).unwrap();
        assert_ne!(third, first);
        assert_eq!(up.skipped_frames(), 1);
    }
}
