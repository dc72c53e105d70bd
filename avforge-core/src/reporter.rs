//! Structured progress events (§4.6, SPEC_FULL.md §C.3). Modeled on the
//! teacher's `WorkerMessage` enum (`worker.rs`), reshaped into an event enum
//! plus a `Reporter` trait since this crate has no built-in terminal
//! renderer — the caller supplies an implementation.

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundDirection {
  Up,
  Down,
}

#[derive(Debug, Clone)]
pub enum ReporterEvent {
  ProbeStarted {
    chunk_index: usize,
    round: usize,
    crf: u32,
  },
  ProbeFinished {
    chunk_index: usize,
    round: usize,
    crf: u32,
    score: f64,
  },
  BoundExpanded {
    chunk_index: usize,
    direction: BoundDirection,
    new_bound: u32,
  },
  ChunkCompleted {
    chunk_index: usize,
    crf: u32,
    converged: bool,
  },
  ChunkFailed {
    chunk_index: usize,
    error: String,
  },
  CancellationObserved {
    chunk_index: Option<usize>,
  },
}

pub trait Reporter: Send + Sync {
  fn on_event(&self, event: ReporterEvent);
}

/// A reporter that discards every event; the default when the caller does
/// not care about progress.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
  fn on_event(&self, _event: ReporterEvent) {}
}

pub(crate) fn error_message(e: &CoreError) -> String {
  e.to_string()
}
