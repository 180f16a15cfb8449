//! Downsampled luma planes used by the comparison filters.

use reel_core::types::Frame;

/// Luma plane of a frame, nearest-sampled so its long side is at most
/// `max_side` pixels.  Values are in `0.0..=255.0` regardless of bit depth.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<f32>,
}

impl Thumbnail {
    pub fn of(frame: &Frame, max_side: u32) -> Self {
        let (w, h) = frame.dimensions();
        let max_side = max_side.max(1);
        let long = w.max(h);
        let (tw, th) = if long <= max_side {
            (w, h)
        } else {
            let scale = max_side as f64 / long as f64;
            (
                ((w as f64 * scale).round() as u32).max(1),
                ((h as f64 * scale).round() as u32).max(1),
            )
        };

        let mut luma = Vec::with_capacity(tw as usize * th as usize);
        for ty in 0..th {
            let y = (ty as u64 * h as u64 / th as u64) as u32;
            for tx in 0..tw {
                let x = (tx as u64 * w as u64 / tw as u64) as u32;
                luma.push(frame.luma(x, y));
            }
        }
        Self {
            width: tw,
            height: th,
            luma,
        }
    }

    pub fn same_size(&self, other: &Thumbnail) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Mean squared error; both thumbnails must be the same size.
    pub fn mse(&self, other: &Thumbnail) -> f64 {
        let n = self.luma.len().max(1) as f64;
        self.luma
            .iter()
            .zip(&other.luma)
            .map(|(a, b)| {
                let d = (*a - *b) as f64;
                d * d
            })
            .sum::<f64>()
            / n
    }

    /// Single-window SSIM over the whole plane.
    pub fn ssim(&self, other: &Thumbnail) -> f64 {
        const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
        const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

        let n = self.luma.len().max(1) as f64;
        let mean_a = self.luma.iter().map(|v| *v as f64).sum::<f64>() / n;
        let mean_b = other.luma.iter().map(|v| *v as f64).sum::<f64>() / n;
        let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
        for (a, b) in self.luma.iter().zip(&other.luma) {
            let da = *a as f64 - mean_a;
            let db = *b as f64 - mean_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
        var_a /= n;
        var_b /= n;
        cov /= n;

        ((2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2))
            / ((mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2))
    }

    /// Normalised luma histogram with `BINS` buckets.
    pub fn histogram<const BINS: usize>(&self) -> [f32; BINS] {
        let mut hist = [0f32; BINS];
        for v in &self.luma {
            let bin = ((*v / 256.0) * BINS as f32) as usize;
            hist[bin.min(BINS - 1)] += 1.0;
        }
        let n = self.luma.len().max(1) as f32;
        for h in &mut hist {
            *h /= n;
        }
        hist
    }
}
