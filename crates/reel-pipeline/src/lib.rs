#![doc = include_str!("../README.md")]

pub mod orchestrator;
pub mod pipeline;
pub mod preview;
pub mod runtime;
pub mod stages;
pub mod state;

#[cfg(test)]
mod testing;

pub use orchestrator::{Counters, FrameOutcome, Orchestrator};
pub use pipeline::{FramePipeline, MetricsSnapshot, PipelineConfig, PipelineMetrics, PipelineReport};
pub use preview::PreviewConfig;
pub use runtime::{
    ResizeRequest, RunRequest, RuntimeSetup, execute, prepare_runtime, probe_input,
    resize_dimensions,
};
pub use stages::{FrameSink, FrameSource, SinkWriter, SourceReader, StageEnd};
pub use state::{RunState, RunStateCell};
