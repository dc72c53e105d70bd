//! A minimal terminal [`Reporter`], standing in for the teacher's
//! `progress_bar.rs` multi-bar renderer (explicitly out of scope per
//! SPEC_FULL.md §D — this crate logs events through `tracing` instead of
//! drawing bars).

use avforge_core::{BoundDirection, Reporter, ReporterEvent};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct TermReporter;

impl Reporter for TermReporter {
  fn on_event(&self, event: ReporterEvent) {
    match event {
      ReporterEvent::ProbeStarted { chunk_index, round, crf } => {
        info!(chunk_index, round, crf, "probing");
      },
      ReporterEvent::ProbeFinished { chunk_index, round, crf, score } => {
        info!(chunk_index, round, crf, score, "probed");
      },
      ReporterEvent::BoundExpanded { chunk_index, direction, new_bound } => {
        let direction = match direction {
          BoundDirection::Up => "up",
          BoundDirection::Down => "down",
        };
        warn!(chunk_index, direction, new_bound, "target-quality bound expanded");
      },
      ReporterEvent::ChunkCompleted { chunk_index, crf, converged } => {
        info!(chunk_index, crf, converged, "chunk encoded");
      },
      ReporterEvent::ChunkFailed { chunk_index, error } => {
        warn!(chunk_index, error, "chunk failed");
      },
      ReporterEvent::CancellationObserved { chunk_index } => {
        warn!(?chunk_index, "cancellation observed");
      },
    }
  }
}
