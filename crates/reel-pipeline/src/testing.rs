//! In-memory codecs and scripted filters for pipeline tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reel_core::codec_traits::{FrameDecoder, FrameEncoder};
use reel_core::error::{EngineError, Result};
use reel_core::filter::{Deduplicator, Denoiser, SceneChangeDetector};
use reel_core::types::{BitDepth, Frame};

/// 4x2 8-bit frame whose every sample is `value`.
pub fn frame(value: u8) -> Frame {
    Frame::filled(4, 2, BitDepth::Eight, value)
}

pub struct MockDecoder {
    frames: VecDeque<Frame>,
    fail_at: Option<usize>,
    produced: usize,
    finished: Arc<AtomicBool>,
}

impl MockDecoder {
    pub fn from_values(values: impl IntoIterator<Item = u8>) -> Self {
        Self {
            frames: values.into_iter().map(frame).collect(),
            fail_at: None,
            produced: 0,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Frames `0, 1, .., n - 1`.
    pub fn counting(n: u8) -> Self {
        Self::from_values(0..n)
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

impl FrameDecoder for MockDecoder {
    fn decode_next(&mut self) -> Result<Option<Frame>> {
        if self.fail_at == Some(self.produced) {
            return Err(EngineError::Decode("short read".into()));
        }
        self.produced += 1;
        Ok(self.frames.pop_front())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Default)]
struct EncoderLog {
    values: Vec<u8>,
    finished: bool,
    post_processed: bool,
}

/// Read side of a [`MockEncoder`], usable after the encoder moved away.
#[derive(Clone, Default)]
pub struct EncoderProbe(Arc<Mutex<EncoderLog>>);

impl EncoderProbe {
    /// First byte of every encoded frame, in order.
    pub fn values(&self) -> Vec<u8> {
        self.0.lock().unwrap().values.clone()
    }

    pub fn finished(&self) -> bool {
        self.0.lock().unwrap().finished
    }

    pub fn post_processed(&self) -> bool {
        self.0.lock().unwrap().post_processed
    }
}

#[derive(Default)]
pub struct MockEncoder {
    log: EncoderProbe,
    fail_at: Option<usize>,
    geometry: Option<(u32, u32)>,
}

impl MockEncoder {
    pub fn probe(&self) -> EncoderProbe {
        self.log.clone()
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn expecting(mut self, width: u32, height: u32) -> Self {
        self.geometry = Some((width, height));
        self
    }
}

impl FrameEncoder for MockEncoder {
    fn encode(&mut self, frame: Frame) -> Result<()> {
        if let Some(expected) = self.geometry
            && frame.dimensions() != expected
        {
            return Err(EngineError::DimensionMismatch(format!(
                "expected {expected:?}, got {:?}",
                frame.dimensions()
            )));
        }
        let mut log = self.log.0.lock().unwrap();
        if self.fail_at == Some(log.values.len()) {
            return Err(EngineError::Encode("broken pipe".into()));
        }
        log.values.push(frame.data()[0]);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.log.0.lock().unwrap().finished = true;
        Ok(())
    }

    fn post_process(&mut self) -> Result<()> {
        self.log.0.lock().unwrap().post_processed = true;
        Ok(())
    }
}

/// Flags frames whose first sample is in the set.
pub struct ValueSet(pub HashSet<u8>);

impl ValueSet {
    pub fn of(values: impl IntoIterator<Item = u8>) -> Self {
        Self(values.into_iter().collect())
    }
}

impl Deduplicator for ValueSet {
    fn run(&mut self, frame: &Frame) -> Result<bool> {
        Ok(self.0.contains(&frame.data()[0]))
    }
}

impl SceneChangeDetector for ValueSet {
    fn run(&mut self, frame: &Frame) -> Result<bool> {
        Ok(self.0.contains(&frame.data()[0]))
    }
}

/// Fails on flagged frames, panics on `panic_on`, passes the rest through.
/// `fatal_on` returns an error the orchestrator cannot recover from.
#[derive(Default)]
pub struct FaultyDenoiser {
    pub fail_on: Option<u8>,
    pub panic_on: Option<u8>,
    pub fatal_on: Option<u8>,
}

impl Denoiser for FaultyDenoiser {
    fn run(&mut self, frame: Frame) -> Result<Frame> {
        let value = frame.data()[0];
        if self.panic_on == Some(value) {
            panic!("denoiser exploded on frame {value}");
        }
        if self.fail_on == Some(value) {
            return Err(EngineError::Filter {
                filter: "denoise",
                message: format!("cannot denoise frame {value}"),
            });
        }
        if self.fatal_on == Some(value) {
            return Err(EngineError::InvalidConfig(format!(
                "denoise model unusable at frame {value}"
            )));
        }
        Ok(frame)
    }
}
