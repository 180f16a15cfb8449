//! Filter capability contracts.
//!
//! The orchestrator calls these synchronously, in a fixed order, on a single
//! worker thread:
//!
//! ```text
//! dedup → scene change → denoise → upscale → interpolate
//! ```
//!
//! Implementations may keep state between calls (a reference frame, a
//! cached output) but never see more than one frame at a time.

use crate::codec_traits::FrameWriter;
use crate::error::Result;
use crate::types::Frame;

/// Decides whether a frame repeats content already passed downstream.
pub trait Deduplicator: Send {
    /// `true` means the frame is a duplicate and should be dropped.
    fn run(&mut self, frame: &Frame) -> Result<bool>;
}

/// Detects hard cuts between consecutive frames.
pub trait SceneChangeDetector: Send {
    /// `true` when `frame` starts a new scene.
    fn run(&mut self, frame: &Frame) -> Result<bool>;
}

/// Shape-preserving noise reduction.
pub trait Denoiser: Send {
    fn run(&mut self, frame: Frame) -> Result<Frame>;
}

/// Spatial upscaler with a fixed integer factor.
pub trait Upscaler: Send {
    /// Linear scale factor applied to both dimensions.
    fn scale(&self) -> u32;

    fn run(&mut self, frame: Frame) -> Result<Frame>;

    /// Frames whose output was reused instead of recomputed.
    fn skipped_frames(&self) -> u64 {
        0
    }
}

/// Temporal interpolator multiplying the frame rate by [`Interpolator::factor`].
pub trait Interpolator: Send {
    /// Output frames per input frame (≥ 2).
    fn factor(&self) -> u32;

    /// Forward `factor() - 1` synthesized frames followed by `frame` itself.
    ///
    /// With `benchmark` set nothing is forwarded, but the cached reference
    /// still advances to `frame`.
    fn run(&mut self, frame: Frame, benchmark: bool, sink: &mut dyn FrameWriter) -> Result<()>;

    /// Replace the cached reference without synthesizing anything.
    ///
    /// Called on a scene cut so no frame blends content across the cut.
    fn cache_frame_reset(&mut self, frame: &Frame);
}

/// The optional filters of one run, in application order.
#[derive(Default)]
pub struct FilterChain {
    pub dedup: Option<Box<dyn Deduplicator>>,
    pub scene_change: Option<Box<dyn SceneChangeDetector>>,
    pub denoise: Option<Box<dyn Denoiser>>,
    pub upscale: Option<Box<dyn Upscaler>>,
    pub interpolate: Option<Box<dyn Interpolator>>,
}

impl FilterChain {
    pub fn is_empty(&self) -> bool {
        self.dedup.is_none()
            && self.scene_change.is_none()
            && self.denoise.is_none()
            && self.upscale.is_none()
            && self.interpolate.is_none()
    }

    /// Output frames per surviving input frame.
    pub fn interpolation_factor(&self) -> u32 {
        self.interpolate.as_ref().map_or(1, |i| i.factor())
    }

    /// Linear upscale factor, `1` when upscaling is off.
    pub fn upscale_factor(&self) -> u32 {
        self.upscale.as_ref().map_or(1, |u| u.scale())
    }

    /// Names of the enabled stages, for logging.
    pub fn describe(&self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        if self.dedup.is_some() {
            stages.push("dedup");
        }
        if self.scene_change.is_some() {
            stages.push("scene_change");
        }
        if self.denoise.is_some() {
            stages.push("denoise");
        }
        if self.upscale.is_some() {
            stages.push("upscale");
        }
        if self.interpolate.is_some() {
            stages.push("interpolate");
        }
        stages
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.describe())
            .finish()
    }
}
