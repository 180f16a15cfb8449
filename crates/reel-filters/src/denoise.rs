//! 3×3 neighbourhood denoisers.

use reel_core::error::Result;
use reel_core::filter::Denoiser;
use reel_core::types::{CHANNELS, Frame};

use crate::methods::DenoiseMethod;

/// Per-channel 3×3 mean or median filter with clamped edges.
#[derive(Debug)]
pub struct KernelDenoiser {
    method: DenoiseMethod,
}

impl KernelDenoiser {
    pub fn new(method: DenoiseMethod) -> Self {
        Self { method }
    }
}

impl Denoiser for KernelDenoiser {
    fn run(&mut self, frame: Frame) -> Result<Frame> {
        let (w, h) = frame.dimensions();
        let mut out = Vec::with_capacity(frame.sample_count());
        let mut window = [0u16; 9];

        for y in 0..h {
            for x in 0..w {
                for c in 0..CHANNELS {
                    let mut n = 0;
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                            let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                            window[n] = frame.pixel(sx, sy, c);
                            n += 1;
                        }
                    }
                    out.push(match self.method {
                        DenoiseMethod::Box => {
                            let sum: u32 = window.iter().map(|v| *v as u32).sum();
                            ((sum + 4) / 9) as u16
                        }
                        DenoiseMethod::Median => {
                            window.sort_unstable();
                            window[4]
                        }
                    });
                }
            }
        }
        Frame::from_samples(w, h, frame.depth(), out)
    }
}
