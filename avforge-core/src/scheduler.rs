//! The Scheduler component (§4.6) and the concurrency model of §5: two
//! independent counting semaphores (CPU-slot, GPU-slot) acquired lazily per
//! step, cooperative cancellation, and the partial-failure policy from §7.
//!
//! Each chunk runs as one `tokio::task::spawn_blocking` task so that the
//! synchronous `Encoder`/`Metric` capability calls (mirroring the teacher's
//! own pattern of bridging sync subprocess I/O into async code with a
//! current-thread runtime in `target_quality.rs::vmaf_probe`) can block on a
//! semaphore permit via `Handle::block_on` without tying up an async worker
//! thread. Concurrency is bounded purely by the two semaphores, not by a
//! separate worker-count limiter — exactly the model §5 describes.

use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::capabilities::{EncodeOutput, Encoder, FrameRange, Metric, MetricMode};
use crate::chunk_encoder::{ChunkArtifact, ChunkEncoder};
use crate::chunk_plan::ChunkPlan;
use crate::error::{CoreError, ToolError};
use crate::probe::{ProbeRunner, SamplingConfig};
use crate::reporter::{BoundDirection, Reporter, ReporterEvent};
use crate::source_info::SourceInfo;
use crate::target_quality::{Band, TqResult, TqSearch, TqSearchConfig};
use crate::workdir::WorkDir;

pub struct RunContext {
  pub cancel: CancelToken,
  pub workdir: Arc<WorkDir>,
  pub reporter: Arc<dyn Reporter>,
  pub cpu_slots: Arc<Semaphore>,
  pub gpu_slots: Arc<Semaphore>,
  pub band: Band,
  pub crf_range: (u32, u32),
  pub preset: String,
  pub sampling: Option<SamplingConfig>,
  pub metric_mode: MetricMode,
  pub max_rounds: usize,
  pub max_tries: usize,
}

impl RunContext {
  /// `cpu_workers` sizes the CPU-slot semaphore (encoder-worker count);
  /// `gpu_workers` sizes the GPU-slot semaphore (metric-worker count,
  /// typically 1).
  pub fn new(workdir: Arc<WorkDir>, reporter: Arc<dyn Reporter>, cpu_workers: usize, gpu_workers: usize) -> Self {
    Self {
      cancel: CancelToken::new(),
      workdir,
      reporter,
      cpu_slots: Arc::new(Semaphore::new(cpu_workers.max(1))),
      gpu_slots: Arc::new(Semaphore::new(gpu_workers.max(1))),
      band: Band { low: 0.0, high: 100.0 },
      crf_range: (0, 63),
      preset: "medium".to_owned(),
      sampling: None,
      metric_mode: MetricMode::Mean,
      max_rounds: crate::target_quality::DEFAULT_MAX_ROUNDS,
      max_tries: crate::chunk_encoder::DEFAULT_MAX_TRIES,
    }
  }
}

pub struct SchedulerOutcome {
  pub artifacts: Vec<ChunkArtifact>,
  pub tq_results: Vec<TqResult>,
  pub failed_chunks: Vec<usize>,
}

impl SchedulerOutcome {
  pub fn succeeded(&self) -> bool {
    self.failed_chunks.is_empty()
  }
}

pub struct Scheduler {
  ctx: Arc<RunContext>,
  encoder: Arc<dyn Encoder>,
  metric: Arc<dyn Metric>,
}

impl Scheduler {
  pub fn new(ctx: Arc<RunContext>, encoder: Arc<dyn Encoder>, metric: Arc<dyn Metric>) -> Self {
    Self { ctx, encoder, metric }
  }

  #[instrument(skip(self, source, plan))]
  pub async fn run(&self, source: Arc<SourceInfo>, plan: Arc<ChunkPlan>) -> SchedulerOutcome {
    let mut handles = Vec::new();

    for (chunk_index, frame_range) in plan.chunk_ranges().enumerate() {
      let ctx = Arc::clone(&self.ctx);
      let encoder = Arc::clone(&self.encoder);
      let metric = Arc::clone(&self.metric);
      let source = Arc::clone(&source);

      handles.push(tokio::task::spawn_blocking(move || {
        run_chunk_blocking(&ctx, encoder.as_ref(), metric.as_ref(), &source, chunk_index, frame_range)
      }));
    }

    let mut artifacts = Vec::new();
    let mut tq_results = Vec::new();
    let mut failed_chunks = Vec::new();

    for handle in handles {
      match handle.await {
        Ok(ChunkOutcome::Completed { artifact, tq }) => {
          artifacts.push(artifact);
          if let Some(tq) = tq {
            tq_results.push(tq);
          }
        },
        Ok(ChunkOutcome::Failed { chunk_index, .. }) => failed_chunks.push(chunk_index),
        Ok(ChunkOutcome::Canceled) => {},
        Err(_join_error) => {
          // The blocking task panicked; treat as a failed chunk rather than
          // propagating the panic, so siblings still get a verdict.
        },
      }
    }

    artifacts.sort_by_key(|a| a.chunk_index);
    failed_chunks.sort_unstable();

    SchedulerOutcome {
      artifacts,
      tq_results,
      failed_chunks,
    }
  }
}

enum ChunkOutcome {
  Completed {
    artifact: ChunkArtifact,
    tq: Option<TqResult>,
  },
  Failed {
    chunk_index: usize,
    #[allow(dead_code)]
    error: CoreError,
  },
  Canceled,
}

fn run_chunk_blocking(
  ctx: &RunContext,
  encoder: &dyn Encoder,
  metric: &dyn Metric,
  source: &SourceInfo,
  chunk_index: usize,
  frame_range: FrameRange,
) -> ChunkOutcome {
  if ctx.cancel.is_canceled() {
    ctx.reporter.on_event(ReporterEvent::CancellationObserved {
      chunk_index: Some(chunk_index),
    });
    return ChunkOutcome::Canceled;
  }

  if let Some(artifact) = ctx.workdir.existing_chunk_artifact(chunk_index, frame_range.len()) {
    return ChunkOutcome::Completed { artifact, tq: None };
  }

  let gated_encoder = GatedEncoder {
    inner: encoder,
    slots: &ctx.cpu_slots,
    cancel: &ctx.cancel,
  };
  let gated_metric = GatedMetric {
    inner: metric,
    slots: &ctx.gpu_slots,
    cancel: &ctx.cancel,
  };

  let runner = ProbeRunner::new(&gated_encoder, &gated_metric, &ctx.workdir, ctx.reporter.as_ref());
  let tq_config = TqSearchConfig {
    band: ctx.band,
    crf_range: ctx.crf_range,
    max_rounds: ctx.max_rounds,
    metric_mode: ctx.metric_mode,
  };
  let search = TqSearch::new(&runner, &tq_config);

  let tq_result = match search.search(
    chunk_index,
    &source.path,
    frame_range,
    source.frame_rate.as_f64(),
    &ctx.preset,
    ctx.sampling.clone(),
    &ctx.cancel,
  ) {
    Ok(r) => r,
    Err(CoreError::Canceled) => return ChunkOutcome::Canceled,
    Err(error) => {
      ctx.reporter.on_event(ReporterEvent::ChunkFailed {
        chunk_index,
        error: error.to_string(),
      });
      return ChunkOutcome::Failed { chunk_index, error };
    },
  };

  for event in tq_flag_events(chunk_index, &tq_result) {
    ctx.reporter.on_event(event);
  }

  if let Err(e) = ctx.workdir.clear_probes_for_chunk(chunk_index) {
    tracing::warn!(chunk_index, error = %e, "failed to clear transient probe files");
  }

  if ctx.cancel.is_canceled() {
    return ChunkOutcome::Canceled;
  }

  let chunk_encoder = ChunkEncoder::new(&gated_encoder, &ctx.workdir, ctx.max_tries);
  match chunk_encoder.encode(chunk_index, &source.path, frame_range, tq_result.final_crf, &ctx.preset, &ctx.cancel) {
    Ok(artifact) => {
      ctx.reporter.on_event(ReporterEvent::ChunkCompleted {
        chunk_index,
        crf: tq_result.final_crf,
        converged: tq_result.converged,
      });
      ChunkOutcome::Completed {
        artifact,
        tq: Some(tq_result),
      }
    },
    Err(CoreError::Canceled) => ChunkOutcome::Canceled,
    Err(error) => {
      ctx.reporter.on_event(ReporterEvent::ChunkFailed {
        chunk_index,
        error: error.to_string(),
      });
      ChunkOutcome::Failed { chunk_index, error }
    },
  }
}

fn tq_flag_events(chunk_index: usize, tq: &TqResult) -> Vec<ReporterEvent> {
  let mut events = Vec::new();
  if tq.flags.bound_expanded_up {
    events.push(ReporterEvent::BoundExpanded {
      chunk_index,
      direction: BoundDirection::Up,
      new_bound: tq.final_crf,
    });
  }
  if tq.flags.bound_expanded_down {
    events.push(ReporterEvent::BoundExpanded {
      chunk_index,
      direction: BoundDirection::Down,
      new_bound: tq.final_crf,
    });
  }
  events
}

/// Wraps an `Encoder`, acquiring a CPU-slot permit for the duration of each
/// call. Built with `Handle::block_on` so a synchronous call site (the
/// capability traits are deliberately not `async`, to keep test fakes
/// simple) can still wait on a `tokio::sync::Semaphore`.
struct GatedEncoder<'a> {
  inner: &'a dyn Encoder,
  slots: &'a Semaphore,
  cancel: &'a CancelToken,
}

impl Encoder for GatedEncoder<'_> {
  fn encode(
    &self,
    source: &Path,
    frame_range: FrameRange,
    crf: u32,
    preset: &str,
    out_path: &Path,
  ) -> Result<EncodeOutput, ToolError> {
    if self.cancel.is_canceled() {
      return Err(ToolError::canceled());
    }
    let _permit = Handle::current().block_on(self.slots.acquire());
    if self.cancel.is_canceled() {
      return Err(ToolError::canceled());
    }
    self.inner.encode(source, frame_range, crf, preset, out_path)
  }
}

struct GatedMetric<'a> {
  inner: &'a dyn Metric,
  slots: &'a Semaphore,
  cancel: &'a CancelToken,
}

impl Metric for GatedMetric<'_> {
  fn score(&self, reference: &Path, reference_range: FrameRange, encoded_stream: &Path, mode: MetricMode) -> Result<f64, ToolError> {
    if self.cancel.is_canceled() {
      return Err(ToolError::canceled());
    }
    let _permit = Handle::current().block_on(self.slots.acquire());
    if self.cancel.is_canceled() {
      return Err(ToolError::canceled());
    }
    self.inner.score(reference, reference_range, encoded_stream, mode)
  }
}
