//! Run lifecycle.
//!
//! ```text
//! NotStarted ─► Running ─► Draining ─► Closed
//! ```
//!
//! Transitions only move forward.  `Draining` is entered when the
//! orchestrator observes end of stream and may be skipped when the sink
//! goes away first.  `Closed` is terminal.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use reel_core::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Draining = 2,
    Closed = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

/// Shared, lock-free holder of a [`RunState`].
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl Default for RunStateCell {
    fn default() -> Self {
        Self(AtomicU8::new(RunState::NotStarted as u8))
    }
}

impl RunStateCell {
    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`, which must be strictly later than the current state.
    pub fn advance(&self, to: RunState) -> Result<RunState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = RunState::from_u8(current);
            if to <= from {
                return Err(EngineError::InvariantViolation(format!(
                    "illegal run state transition {from} -> {to}"
                )));
            }
            match self
                .0
                .compare_exchange(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    tracing::debug!(%from, %to, "Run state changed");
                    return Ok(from);
                }
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions() {
        let cell = RunStateCell::default();
        assert_eq!(cell.get(), RunState::NotStarted);
        cell.advance(RunState::Running).unwrap();
        cell.advance(RunState::Draining).unwrap();
        assert_eq!(cell.advance(RunState::Closed).unwrap(), RunState::Draining);
        assert_eq!(cell.get(), RunState::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let cell = RunStateCell::default();
        cell.advance(RunState::Running).unwrap();
        cell.advance(RunState::Closed).unwrap();
        assert!(cell.advance(RunState::Running).is_err());
        assert!(cell.advance(RunState::Closed).is_err());
    }

    #[test]
    fn draining_may_be_skipped_but_not_repeated() {
        let cell = RunStateCell::default();
        cell.advance(RunState::Running).unwrap();
        assert!(cell.advance(RunState::Running).is_err());
        cell.advance(RunState::Closed).unwrap();
    }
}
