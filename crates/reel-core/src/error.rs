//! Typed error hierarchy for the pipeline.
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! so the CLI can report failures without string parsing.
//!
//! Errors fall into three severities:
//! - **stage-fatal**: the external decoder/encoder process cannot be started;
//!   the run never begins and the caller receives `Err`.
//! - **stage-recoverable**: a short read or a broken encoder pipe ends one
//!   stage early; the stage logs it and closes its queue.
//! - **per-frame**: a filter failure drops one frame; the run continues.

use std::io;

/// All errors originating from the reel engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn {role} process `{program}`: {source}")]
    ProcessSpawn {
        role: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },

    // ── Codecs ────────────────────────────────────────────────────────
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Audio remux error: {0}")]
    Remux(String),

    // ── Filters ──────────────────────────────────────────────────────
    #[error("Filter `{filter}` failed: {message}")]
    Filter {
        filter: &'static str,
        message: String,
    },

    #[error("Unknown {kind} `{name}`. Use one of: {expected}")]
    UnknownMethod {
        kind: &'static str,
        name: String,
        expected: String,
    },

    // ── Pipeline ─────────────────────────────────────────────────────
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Pipeline channel closed unexpectedly")]
    ChannelClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Type contracts ───────────────────────────────────────────────
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Buffer size mismatch: need {need} bytes, have {have}")]
    BufferSize { need: usize, have: usize },

    // ── Invariants ───────────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Panic recovered in {stage}: {message}")]
    PanicRecovered {
        stage: &'static str,
        message: String,
    },
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: I/O and process management
    /// - 3xx: Codecs
    /// - 4xx: Pipeline
    /// - 5xx: Type contracts and filters
    /// - 6xx: Invariants
    /// - 7xx: Recovered panics
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Io(_) => 100,
            Self::ProcessSpawn { .. } => 101,
            Self::Decode(_) => 300,
            Self::Encode(_) => 301,
            Self::Probe(_) => 302,
            Self::Remux(_) => 303,
            Self::ChannelClosed => 400,
            Self::Pipeline(_) => 401,
            Self::InvalidConfig(_) => 402,
            Self::DimensionMismatch(_) => 500,
            Self::BufferSize { .. } => 501,
            Self::Filter { .. } => 502,
            Self::UnknownMethod { .. } => 503,
            Self::InvariantViolation(_) => 600,
            Self::PanicRecovered { .. } => 700,
        }
    }

    /// Whether the pipeline can continue after logging this error.
    ///
    /// Per-frame failures and post-processing failures are recoverable;
    /// configuration and process start failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Filter { .. }
                | Self::DimensionMismatch(_)
                | Self::BufferSize { .. }
                | Self::PanicRecovered { .. }
                | Self::Remux(_)
        )
    }

    /// Build an [`EngineError::UnknownMethod`] listing the accepted names.
    pub fn unknown_method(kind: &'static str, name: &str, expected: &[&str]) -> Self {
        Self::UnknownMethod {
            kind,
            name: name.to_string(),
            expected: expected.join(", "),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        assert_eq!(EngineError::Decode("x".into()).error_code() / 100, 3);
        assert_eq!(EngineError::ChannelClosed.error_code() / 100, 4);
        assert_eq!(
            EngineError::BufferSize { need: 4, have: 2 }.error_code() / 100,
            5
        );
        let spawn = EngineError::ProcessSpawn {
            role: "decoder",
            program: "ffmpeg".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(spawn.error_code(), 101);
    }

    #[test]
    fn spawn_failure_is_not_recoverable() {
        let spawn = EngineError::ProcessSpawn {
            role: "encoder",
            program: "ffmpeg".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(!spawn.is_recoverable());
        assert!(
            EngineError::Filter {
                filter: "denoise",
                message: "bad".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn unknown_method_lists_choices() {
        let err = EngineError::unknown_method("encode method", "h266", &["x264", "x265"]);
        let msg = err.to_string();
        assert!(msg.contains("h266"));
        assert!(msg.contains("x264, x265"));
    }
}
