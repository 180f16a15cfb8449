//! Shared codec traits used across crate boundaries.
//!
//! These traits let `reel-pipeline` drive decoders and encoders without
//! depending on `reel-ffmpeg`, and let tests substitute in-memory mocks.

use crate::error::Result;
use crate::types::Frame;

// ─── Decode side ─────────────────────────────────────────────────────────

/// Producer of raw frames, typically an external decoder process.
pub trait FrameDecoder: Send + 'static {
    /// Read the next frame.
    ///
    /// Returns `None` at end of stream, including a short read at EOF.
    fn decode_next(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resources (close pipes, reap processes).
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ─── Encode side ─────────────────────────────────────────────────────────

/// Consumer of raw frames, typically an external encoder process.
pub trait FrameEncoder: Send + 'static {
    /// Submit one frame.  Ownership ends here.
    fn encode(&mut self, frame: Frame) -> Result<()>;

    /// Close the input, flush and wait for the output to be finalised.
    fn finish(&mut self) -> Result<()>;

    /// Work that runs after `finish`, such as audio remux.
    ///
    /// Failures are reported but never fail the run.
    fn post_process(&mut self) -> Result<()> {
        Ok(())
    }
}

// ─── Frame forwarding ────────────────────────────────────────────────────

/// Destination for frames leaving the filter chain.
///
/// The orchestrator hands one to the interpolator so it can forward
/// synthesized and original frames in presentation order.
pub trait FrameWriter {
    fn write(&mut self, frame: Frame) -> Result<()>;
}

impl FrameWriter for Vec<Frame> {
    fn write(&mut self, frame: Frame) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}
