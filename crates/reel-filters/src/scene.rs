//! Histogram-based scene-cut detection.

use reel_core::error::Result;
use reel_core::filter::SceneChangeDetector;
use reel_core::types::Frame;

use crate::thumbnail::Thumbnail;

const BINS: usize = 64;
const SAMPLE_SIZE: u32 = 160;

/// Flags a cut when the luma histogram of a frame moves too far from the
/// previous frame's.
///
/// Distance is half the L1 norm of the histogram difference, so it lies in
/// `[0, 1]`: 0 for identical distributions, 1 for disjoint ones.
#[derive(Debug)]
pub struct HistogramSceneDetector {
    threshold: f32,
    previous: Option<[f32; BINS]>,
}

impl HistogramSceneDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.05, 1.0),
            previous: None,
        }
    }

    /// Threshold `0.65 - sensitivity / 1000`, so higher sensitivity flags
    /// more cuts.
    pub fn from_sensitivity(sensitivity: f64) -> Self {
        Self::new((0.65 - sensitivity / 1000.0) as f32)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn distance(a: &[f32; BINS], b: &[f32; BINS]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>() / 2.0
    }
}

impl SceneChangeDetector for HistogramSceneDetector {
    fn run(&mut self, frame: &Frame) -> Result<bool> {
        let hist = Thumbnail::of(frame, SAMPLE_SIZE).histogram::<BINS>();
        let cut = self
            .previous
            .as_ref()
            .is_some_and(|prev| Self::distance(prev, &hist) > self.threshold);
        if cut {
            tracing::debug!(threshold = self.threshold, "Scene change detected");
        }
        self.previous = Some(hist);
        Ok(cut)
    }
}
