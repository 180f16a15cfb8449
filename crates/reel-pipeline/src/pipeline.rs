//! Bounded CPU pipeline: decode → filter → encode.
//!
//! # Architecture
//!
//! Three blocking stages connected by two bounded queues:
//!
//! ```text
//! ┌──────────┐  queue A  ┌──────────────┐  queue B  ┌──────────┐
//! │  Source  │──────────►│ Orchestrator │──────────►│   Sink   │
//! │ (ffmpeg) │           │  (filters)   │           │ (ffmpeg) │
//! └──────────┘           └──────────────┘           └──────────┘
//!                                │ watch
//!                                ▼
//!                           preview (async)
//! ```
//!
//! # Backpressure
//!
//! Both queues are bounded.  A full queue suspends its producer thread, so
//! a slow encoder throttles the orchestrator, which throttles the decoder.
//!
//! # Shutdown protocol
//!
//! 1. **Normal EOS**: the source exhausts input and closes queue A; the
//!    orchestrator drains it, then closes queue B; the sink drains that,
//!    finishes the encoder and runs post-processing.
//! 2. **Decoder failure**: logged by the source and treated as EOS.
//! 3. **Encoder failure**: the sink drops queue B.  The orchestrator's next
//!    write fails, it stops and drops queue A, and the source stops on its
//!    next put.
//!
//! `JoinSet` collects every stage.  A panicking stage drops its queue ends
//! during unwinding, so the cascade above still applies.
//!
//! # Metrics
//!
//! [`PipelineMetrics`] holds atomic counters readable from any thread
//! while the run is live.  Each counter has exactly one writing stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use reel_core::codec_traits::{FrameDecoder, FrameEncoder};
use reel_core::config::{DEFAULT_QUEUE_CAPACITY, RunConfig};
use reel_core::error::{EngineError, Result};
use reel_core::filter::FilterChain;

use crate::orchestrator::{Counters, Orchestrator};
use crate::preview::{self, PreviewConfig};
use crate::stages::{FrameSink, FrameSource, StageEnd};
use crate::state::{RunState, RunStateCell};

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic per-stage frame counters and latency tracking.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Frames the source pushed into queue A.
    pub frames_decoded: AtomicU64,
    /// Frames the orchestrator took from queue A.
    pub frames_processed: AtomicU64,
    pub frames_deduplicated: AtomicU64,
    pub scene_changes: AtomicU64,
    /// Frames lost to a filter error or panic.
    pub frames_dropped: AtomicU64,
    /// Frames the orchestrator pushed into queue B.
    pub frames_written: AtomicU64,
    /// Frames the encoder accepted.
    pub frames_encoded: AtomicU64,
    /// Frames the encoder refused for their geometry.
    pub frames_rejected: AtomicU64,
    /// Progress units (input frames × interpolation factor).
    pub progress: AtomicU64,
    pub decode_total_us: AtomicU64,
    pub filter_total_us: AtomicU64,
    pub encode_total_us: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`] counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub frames_processed: u64,
    pub frames_deduplicated: u64,
    pub scene_changes: u64,
    pub frames_dropped: u64,
    pub frames_written: u64,
    pub frames_encoded: u64,
    pub frames_rejected: u64,
    pub progress: u64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Acquire);
        MetricsSnapshot {
            frames_decoded: load(&self.frames_decoded),
            frames_processed: load(&self.frames_processed),
            frames_deduplicated: load(&self.frames_deduplicated),
            scene_changes: load(&self.scene_changes),
            frames_dropped: load(&self.frames_dropped),
            frames_written: load(&self.frames_written),
            frames_encoded: load(&self.frames_encoded),
            frames_rejected: load(&self.frames_rejected),
            progress: load(&self.progress),
        }
    }

    /// Counting invariants.  Should hold at shutdown.
    pub fn validate(&self) -> bool {
        let s = self.snapshot();
        s.frames_decoded >= s.frames_processed
            && s.frames_processed >= s.frames_deduplicated + s.frames_dropped
            && s.frames_written >= s.frames_encoded + s.frames_rejected
    }

    /// Report stage latencies (avg microseconds).
    pub fn report(&self) {
        let s = self.snapshot();
        let avg = |total: &AtomicU64, count: u64| -> u64 {
            if count > 0 {
                total.load(Ordering::Relaxed) / count
            } else {
                0
            }
        };
        info!(
            decode_avg_us = avg(&self.decode_total_us, s.frames_decoded),
            filter_avg_us = avg(&self.filter_total_us, s.frames_processed),
            encode_avg_us = avg(&self.encode_total_us, s.frames_encoded),
            "Stage latencies"
        );
    }
}

fn enforce_metrics_invariants(metrics: &PipelineMetrics) -> Result<()> {
    if metrics.validate() {
        return Ok(());
    }
    let s = metrics.snapshot();
    Err(EngineError::InvariantViolation(format!(
        "Pipeline counting violation: decoded={} processed={} deduplicated={} dropped={} \
         written={} encoded={} rejected={}",
        s.frames_decoded,
        s.frames_processed,
        s.frames_deduplicated,
        s.frames_dropped,
        s.frames_written,
        s.frames_encoded,
        s.frames_rejected
    )))
}

// ─── Configuration & report ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct PipelineConfig {
    /// Capacity of each of the two queues.
    pub queue_capacity: usize,
    /// Run filters but forward nothing to the encoder.
    pub benchmark: bool,
    pub preview: Option<PreviewConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            benchmark: false,
            preview: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_run_config(run: &RunConfig) -> Self {
        Self {
            queue_capacity: run.queue_capacity,
            benchmark: run.benchmark,
            preview: None,
        }
    }
}

/// Outcome of one [`FramePipeline::run`].
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub source: StageEnd,
    pub sink: StageEnd,
    pub counters: Counters,
    pub metrics: MetricsSnapshot,
    pub preview_snapshots: u64,
    pub elapsed_secs: f64,
}

impl PipelineReport {
    /// Input frames per second of wall-clock time.
    pub fn throughput_fps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.counters.processed as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Fail if the encoder did not produce a complete output.
    pub fn ensure_encoded(&self) -> Result<()> {
        match self.sink {
            StageEnd::Failed => Err(EngineError::Encode(format!(
                "encoder stopped after {} of {} frames",
                self.metrics.frames_encoded, self.counters.written
            ))),
            _ => Ok(()),
        }
    }
}

enum StageOutput {
    Source(StageEnd),
    Orchestrator(Counters),
    Sink(StageEnd),
    Preview(u64),
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// One decode → filter → encode run.  A pipeline runs at most once.
pub struct FramePipeline {
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    state: Arc<RunStateCell>,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            config,
            metrics: PipelineMetrics::new(),
            state: Arc::new(RunStateCell::default()),
        })
    }

    /// Live counters, for progress reporting while `run` is in flight.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Run to completion.
    ///
    /// Decoder and encoder failures end the run gracefully and show up in
    /// the report's stage outcomes.  `Err` is reserved for a second call,
    /// a stage panic outside the per-frame guard, or a broken counting
    /// invariant.
    #[instrument(skip_all, fields(capacity = self.config.queue_capacity, benchmark = self.config.benchmark))]
    pub async fn run<D, E>(&self, decoder: D, filters: FilterChain, encoder: E) -> Result<PipelineReport>
    where
        D: FrameDecoder,
        E: FrameEncoder,
    {
        self.state.advance(RunState::Running)?;
        let started = Instant::now();
        let capacity = self.config.queue_capacity;
        info!(stages = ?filters.describe(), "Pipeline starting");

        let (source, reader) = FrameSource::new(decoder, capacity, self.metrics.clone());
        let (sink, mut writer) = FrameSink::new(encoder, capacity, self.metrics.clone());
        let orchestrator = Orchestrator::new(
            filters,
            self.config.benchmark,
            self.metrics.clone(),
            self.state.clone(),
        );

        let mut tasks: JoinSet<Result<StageOutput>> = JoinSet::new();

        // ── Preview (optional, async) ──
        if let Some(config) = self.config.preview.clone() {
            let (feed, worker) = preview::channel(config);
            writer = writer.with_preview(feed);
            tasks.spawn(async move { worker.run().await.map(StageOutput::Preview) });
        }

        // ── Stage 1: Decode (blocking) ──
        tasks.spawn_blocking(move || Ok(StageOutput::Source(source.start())));

        // ── Stage 2: Filter (blocking) ──
        tasks.spawn_blocking(move || Ok(StageOutput::Orchestrator(orchestrator.run(reader, writer))));

        // ── Stage 3: Encode (blocking) ──
        tasks.spawn_blocking(move || Ok(StageOutput::Sink(sink.start())));

        let mut first_error: Option<EngineError> = None;
        let mut source_end = StageEnd::Failed;
        let mut sink_end = StageEnd::Failed;
        let mut counters = Counters::default();
        let mut preview_snapshots = 0;

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(StageOutput::Source(end))) => source_end = end,
                Ok(Ok(StageOutput::Orchestrator(c))) => counters = c,
                Ok(Ok(StageOutput::Sink(end))) => sink_end = end,
                Ok(Ok(StageOutput::Preview(n))) => preview_snapshots = n,
                Ok(Err(e)) => {
                    error!(%e, "Pipeline stage failed");
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    error!(%join_err, "Pipeline task panicked");
                    first_error.get_or_insert(EngineError::PanicRecovered {
                        stage: "pipeline",
                        message: join_err.to_string(),
                    });
                }
            }
        }

        self.state.advance(RunState::Closed)?;
        self.metrics.report();

        if let Some(e) = first_error {
            return Err(e);
        }
        enforce_metrics_invariants(&self.metrics)?;

        let report = PipelineReport {
            source: source_end,
            sink: sink_end,
            counters,
            metrics: self.metrics.snapshot(),
            preview_snapshots,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        if report.source == StageEnd::Failed {
            warn!(frames = report.metrics.frames_decoded, "Input ended early after a decode error");
        }
        info!(
            decoded = report.metrics.frames_decoded,
            written = report.counters.written,
            encoded = report.metrics.frames_encoded,
            elapsed_s = report.elapsed_secs,
            fps = report.throughput_fps(),
            "Pipeline finished"
        );
        Ok(report)
    }
}
