//! The per-frame filter loop between the decode and encode stages.
//!
//! For each decoded frame, in order:
//!
//! 1. dedup: a duplicate is counted and dropped, nothing else runs;
//! 2. scene-change detection;
//! 3. denoise;
//! 4. upscale;
//! 5. interpolation: on a scene change the current frame is replicated
//!    `factor - 1` times and becomes the interpolator's new reference;
//!    otherwise the interpolator emits its own output, the frame included;
//! 6. the frame itself is written unless the interpolator already did or
//!    the run is a benchmark;
//! 7. progress advances by 1, or by the interpolation factor.
//!
//! A recoverable filter error or a panic drops only the frame it happened
//! on.  The loop stops early when the sink is gone or a filter reports an
//! error that is not recoverable.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, trace, warn};

use reel_core::error::{EngineError, Result};
use reel_core::filter::FilterChain;
use reel_core::types::Frame;

use crate::pipeline::PipelineMetrics;
use crate::stages::{SinkWriter, SourceReader};
use crate::state::{RunState, RunStateCell};

/// Orchestrator-owned counters.  Only the orchestrator thread writes them;
/// they are published to [`PipelineMetrics`] after every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Frames taken from the decode stage.
    pub processed: u64,
    pub deduplicated: u64,
    pub scene_changes: u64,
    /// Frames lost to a filter error or panic.
    pub dropped: u64,
    /// Frames handed to the encode stage.
    pub written: u64,
    /// Upscale inputs served from the upscaler's cache.
    pub upscale_skipped: u64,
    /// Progress units, `processed * factor` for an uninterrupted run.
    pub progress: u64,
}

/// What happened to one input frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Duplicate,
    /// Forwarded as this many output frames (0 in benchmark mode).
    Emitted(u64),
}

pub struct Orchestrator {
    filters: FilterChain,
    benchmark: bool,
    progress_increment: u64,
    counters: Counters,
    metrics: Arc<PipelineMetrics>,
    state: Arc<RunStateCell>,
}

impl Orchestrator {
    pub fn new(
        filters: FilterChain,
        benchmark: bool,
        metrics: Arc<PipelineMetrics>,
        state: Arc<RunStateCell>,
    ) -> Self {
        let progress_increment = u64::from(filters.interpolation_factor().max(1));
        Self {
            filters,
            benchmark,
            progress_increment,
            counters: Counters::default(),
            metrics,
            state,
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Consume `source` until end of stream, feeding `sink`.
    ///
    /// The sink is closed exactly once on return, whatever the exit path.
    pub fn run(mut self, mut source: SourceReader, mut sink: SinkWriter) -> Counters {
        while let Some(frame) = source.read() {
            let index = self.counters.processed;
            self.counters.processed += 1;

            let t = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(frame, &mut sink)))
                .unwrap_or_else(|payload| {
                    Err(EngineError::PanicRecovered {
                        stage: "orchestrator",
                        message: panic_message(payload.as_ref()),
                    })
                });
            self.metrics
                .filter_total_us
                .fetch_add(t.elapsed().as_micros() as u64, Ordering::Relaxed);

            let stop = match result {
                Ok(_) => false,
                Err(e) if e.is_recoverable() => {
                    warn!(frame = index, error = %e, code = e.error_code(), "Dropping frame");
                    self.counters.dropped += 1;
                    false
                }
                Err(EngineError::ChannelClosed) => {
                    warn!(frame = index, "Encode stage went away, stopping");
                    self.counters.dropped += 1;
                    true
                }
                Err(e) => {
                    error!(frame = index, error = %e, code = e.error_code(), "Unrecoverable filter error, stopping");
                    self.counters.dropped += 1;
                    true
                }
            };

            self.counters.progress += self.progress_increment;
            self.counters.written = sink.written();
            self.publish();
            trace!(
                frame = index,
                queue_a = source.queued(),
                queue_b = sink.queued(),
                "Frame done"
            );
            if stop {
                break;
            }
        }

        if self.state.get() == RunState::Running
            && let Err(e) = self.state.advance(RunState::Draining)
        {
            warn!(error = %e, "Could not mark the run as draining");
        }
        sink.close();

        self.counters.written = sink.written();
        self.counters.upscale_skipped = self
            .filters
            .upscale
            .as_ref()
            .map_or(0, |u| u.skipped_frames());
        self.publish();

        let c = &self.counters;
        info!(
            processed = c.processed,
            deduplicated = c.deduplicated,
            scene_changes = c.scene_changes,
            upscale_skipped = c.upscale_skipped,
            dropped = c.dropped,
            written = c.written,
            "Orchestrator finished"
        );
        self.counters
    }

    /// Run one frame through the filter chain into `sink`.
    pub fn process_frame(&mut self, frame: Frame, sink: &mut SinkWriter) -> Result<FrameOutcome> {
        let filters = &mut self.filters;

        if let Some(dedup) = filters.dedup.as_mut()
            && dedup.run(&frame)?
        {
            self.counters.deduplicated += 1;
            return Ok(FrameOutcome::Duplicate);
        }

        let scene_change = match filters.scene_change.as_mut() {
            Some(detector) => detector.run(&frame)?,
            None => false,
        };
        if scene_change {
            self.counters.scene_changes += 1;
        }

        let mut frame = frame;
        if let Some(denoiser) = filters.denoise.as_mut() {
            let before = frame.dimensions();
            frame = denoiser.run(frame)?;
            expect_dimensions("denoise", before, frame.dimensions())?;
        }
        if let Some(upscaler) = filters.upscale.as_mut() {
            let (w, h) = frame.dimensions();
            let s = upscaler.scale();
            frame = upscaler.run(frame)?;
            expect_dimensions("upscale", (w * s, h * s), frame.dimensions())?;
        }

        let written_before = sink.written();
        let pending = match filters.interpolate.as_mut() {
            Some(interp) if scene_change => {
                if !self.benchmark {
                    for _ in 1..interp.factor() {
                        sink.write(frame.clone())?;
                    }
                }
                interp.cache_frame_reset(&frame);
                Some(frame)
            }
            Some(interp) => {
                interp.run(frame, self.benchmark, &mut *sink)?;
                None
            }
            None => Some(frame),
        };
        if let Some(frame) = pending
            && !self.benchmark
        {
            sink.write(frame)?;
        }

        Ok(FrameOutcome::Emitted(sink.written() - written_before))
    }

    fn publish(&self) {
        let c = &self.counters;
        let m = &self.metrics;
        m.frames_processed.store(c.processed, Ordering::Relaxed);
        m.frames_deduplicated.store(c.deduplicated, Ordering::Relaxed);
        m.scene_changes.store(c.scene_changes, Ordering::Relaxed);
        m.frames_dropped.store(c.dropped, Ordering::Relaxed);
        m.frames_written.store(c.written, Ordering::Relaxed);
        m.progress.store(c.progress, Ordering::Relaxed);
    }
}

fn expect_dimensions(filter: &'static str, expected: (u32, u32), got: (u32, u32)) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(EngineError::DimensionMismatch(format!(
            "{filter} produced {}x{}, expected {}x{}",
            got.0, got.1, expected.0, expected.1
        )))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{FrameSink, FrameSource};
    use crate::testing::{FaultyDenoiser, MockDecoder, MockEncoder, ValueSet, frame};
    use reel_filters::interpolate::BlendInterpolator;
    use std::thread;

    /// Run `values` through an orchestrator with `filters` and return the
    /// first sample of every encoded frame plus the counters.
    fn drive(values: Vec<u8>, filters: FilterChain, benchmark: bool) -> (Vec<u8>, Counters) {
        let metrics = PipelineMetrics::new();
        let state = Arc::new(RunStateCell::default());
        state.advance(RunState::Running).unwrap();

        let (source, reader) = FrameSource::new(MockDecoder::from_values(values), 2, metrics.clone());
        let encoder = MockEncoder::default();
        let probe = encoder.probe();
        let (sink, writer) = FrameSink::new(encoder, 2, metrics.clone());

        let decode = thread::spawn(move || source.start());
        let encode = thread::spawn(move || sink.start());
        let counters = Orchestrator::new(filters, benchmark, metrics, state.clone()).run(reader, writer);
        decode.join().unwrap();
        encode.join().unwrap();
        assert_eq!(state.get(), RunState::Draining);
        (probe.values(), counters)
    }

    #[test]
    fn passthrough_preserves_order() {
        let (out, c) = drive((0..6).collect(), FilterChain::default(), false);
        assert_eq!(out, [0, 1, 2, 3, 4, 5]);
        assert_eq!(c.processed, 6);
        assert_eq!(c.written, 6);
        assert_eq!(c.progress, 6);
    }

    #[test]
    fn duplicates_are_dropped_but_still_count_progress() {
        let filters = FilterChain {
            dedup: Some(Box::new(ValueSet::of([2, 3]))),
            ..Default::default()
        };
        let (out, c) = drive((0..6).collect(), filters, false);
        assert_eq!(out, [0, 1, 4, 5]);
        assert_eq!(c.deduplicated, 2);
        assert_eq!(c.progress, 6);
    }

    #[test]
    fn scene_change_replicates_and_resets_reference() {
        let filters = FilterChain {
            scene_change: Some(Box::new(ValueSet::of([30]))),
            interpolate: Some(Box::new(BlendInterpolator::new(3).unwrap())),
            ..Default::default()
        };
        let (out, c) = drive(vec![0, 30, 60], filters, false);
        // First frame: two copies (no reference), then itself.
        // Cut at 30: two copies plus 30, no blend from 0.
        // 60 blends from the reset reference 30.
        assert_eq!(out, [0, 0, 0, 30, 30, 30, 40, 50, 60]);
        assert_eq!(c.scene_changes, 1);
        assert_eq!(c.progress, 9);
    }

    #[test]
    fn benchmark_writes_nothing() {
        let filters = FilterChain {
            scene_change: Some(Box::new(ValueSet::of([1]))),
            interpolate: Some(Box::new(BlendInterpolator::new(2).unwrap())),
            ..Default::default()
        };
        let (out, c) = drive((0..4).collect(), filters, true);
        assert!(out.is_empty());
        assert_eq!(c.written, 0);
        assert_eq!(c.progress, 8);
    }

    #[test]
    fn filter_error_drops_only_that_frame() {
        let filters = FilterChain {
            denoise: Some(Box::new(FaultyDenoiser {
                fail_on: Some(2),
                ..Default::default()
            })),
            ..Default::default()
        };
        let (out, c) = drive((0..5).collect(), filters, false);
        assert_eq!(out, [0, 1, 3, 4]);
        assert_eq!(c.dropped, 1);
    }

    #[test]
    fn unrecoverable_filter_error_stops_the_loop() {
        let filters = FilterChain {
            denoise: Some(Box::new(FaultyDenoiser {
                fatal_on: Some(2),
                ..Default::default()
            })),
            ..Default::default()
        };
        let (out, c) = drive((0..6).collect(), filters, false);
        assert_eq!(out, [0, 1]);
        assert_eq!(c.processed, 3);
        assert_eq!(c.dropped, 1);
    }

    #[test]
    fn filter_panic_is_contained() {
        let filters = FilterChain {
            denoise: Some(Box::new(FaultyDenoiser {
                panic_on: Some(1),
                ..Default::default()
            })),
            ..Default::default()
        };
        let (out, c) = drive((0..3).collect(), filters, false);
        assert_eq!(out, [0, 2]);
        assert_eq!(c.dropped, 1);
    }

    #[test]
    fn process_frame_reports_emitted_count() {
        let metrics = PipelineMetrics::new();
        let (_sink, mut writer) = FrameSink::new(MockEncoder::default(), 8, metrics.clone());
        let filters = FilterChain {
            interpolate: Some(Box::new(BlendInterpolator::new(4).unwrap())),
            ..Default::default()
        };
        let mut orch = Orchestrator::new(filters, false, metrics, Arc::new(RunStateCell::default()));
        assert_eq!(orch.process_frame(frame(0), &mut writer).unwrap(), FrameOutcome::Emitted(4));
        assert_eq!(writer.written(), 4);
    }
}
