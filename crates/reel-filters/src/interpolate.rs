//! Linear cross-fade frame interpolation.

use reel_core::codec_traits::FrameWriter;
use reel_core::error::{EngineError, Result};
use reel_core::filter::Interpolator;
use reel_core::types::Frame;

/// Synthesizes `factor - 1` frames between consecutive inputs by blending
/// at `t = i / factor`.
///
/// Output order for each input `C` with cached reference `P`:
///
/// ```text
/// blend(P, C, 1/F), …, blend(P, C, (F-1)/F), C
/// ```
///
/// With no usable reference (first frame, or a geometry change) the blends
/// are replaced by copies of `C`, so every input still yields `F` outputs.
#[derive(Debug)]
pub struct BlendInterpolator {
    factor: u32,
    reference: Option<Frame>,
}

impl BlendInterpolator {
    pub fn new(factor: u32) -> Result<Self> {
        if factor < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "interpolation factor must be at least 2, got {factor}"
            )));
        }
        Ok(Self {
            factor,
            reference: None,
        })
    }

    fn synthesize(&self, current: &Frame) -> Result<Vec<Frame>> {
        let steps = self.factor - 1;
        match &self.reference {
            Some(prev) if prev.same_shape(current) => (1..=steps)
                .map(|i| blend(prev, current, i as f32 / self.factor as f32))
                .collect(),
            _ => Ok(vec![current.clone(); steps as usize]),
        }
    }
}

/// `a * (1 - t) + b * t`, per sample.
pub fn blend(a: &Frame, b: &Frame, t: f32) -> Result<Frame> {
    if !a.same_shape(b) {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot blend {:?} with {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    let samples = a
        .samples()
        .zip(b.samples())
        .map(|(x, y)| (x as f32 * (1.0 - t) + y as f32 * t).round() as u16);
    Frame::from_samples(a.width(), a.height(), a.depth(), samples)
}

impl Interpolator for BlendInterpolator {
    fn factor(&self) -> u32 {
        self.factor
    }

    fn run(&mut self, frame: Frame, benchmark: bool, sink: &mut dyn FrameWriter) -> Result<()> {
        let synthesized = self.synthesize(&frame)?;
        self.reference = Some(frame.clone());
        if benchmark {
            return Ok(());
        }
        for f in synthesized {
            sink.write(f)?;
        }
        sink.write(frame)
    }

    fn cache_frame_reset(&mut self, frame: &Frame) {
        self.reference = Some(frame.clone());
    }
}
