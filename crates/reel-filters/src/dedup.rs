//! Duplicate-frame detection on luma thumbnails.

use reel_core::error::Result;
use reel_core::filter::Deduplicator;
use reel_core::types::Frame;

use crate::methods::DedupMethod;
use crate::thumbnail::Thumbnail;

/// Default thumbnail long side.
pub const DEFAULT_SAMPLE_SIZE: u32 = 224;

/// Compares each frame with the last frame that was kept.
///
/// Comparing against the last *kept* frame rather than the previous input
/// stops a slow fade from being dropped one small step at a time.
#[derive(Debug)]
pub struct ThumbnailDeduplicator {
    method: DedupMethod,
    threshold: f64,
    sample_size: u32,
    reference: Option<Thumbnail>,
}

impl ThumbnailDeduplicator {
    /// `threshold` is compared directly with the metric: MSE below it, or
    /// SSIM above it, marks a duplicate.
    pub fn new(method: DedupMethod, threshold: f64, sample_size: u32) -> Self {
        Self {
            method,
            threshold,
            sample_size: sample_size.max(8),
            reference: None,
        }
    }

    /// Map a user sensitivity to a metric threshold.
    ///
    /// MSE uses the sensitivity as-is; SSIM uses `1 - sensitivity / 1000`.
    pub fn from_sensitivity(method: DedupMethod, sensitivity: f64, sample_size: u32) -> Self {
        let threshold = match method {
            DedupMethod::Mse => sensitivity,
            DedupMethod::Ssim => 1.0 - sensitivity / 1000.0,
        };
        Self::new(method, threshold, sample_size)
    }

    pub fn method(&self) -> DedupMethod {
        self.method
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_duplicate(&self, reference: &Thumbnail, current: &Thumbnail) -> bool {
        if !reference.same_size(current) {
            return false;
        }
        match self.method {
            DedupMethod::Mse => reference.mse(current) < self.threshold,
            DedupMethod::Ssim => reference.ssim(current) > self.threshold,
        }
    }
}

impl Deduplicator for ThumbnailDeduplicator {
    fn run(&mut self, frame: &Frame) -> Result<bool> {
        let current = Thumbnail::of(frame, self.sample_size);
        let duplicate = self
            .reference
            .as_ref()
            .is_some_and(|reference| self.is_duplicate(reference, &current));
        if !duplicate {
            self.reference = Some(current);
        }
        Ok(duplicate)
    }
}
