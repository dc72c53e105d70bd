//! Thin wiring layer: parses arguments, assembles the process-based
//! capability implementations, and drives one run of `avforge-core`'s
//! pipeline (probe -> plan -> schedule -> assemble). The CLI surface itself
//! is deliberately small (SPEC_FULL.md §A); this crate owns no encoding or
//! search logic.

mod args;
mod process;
mod term_reporter;

use std::sync::Arc;

use anyhow::{bail, Context};
use avforge_core::{
  Assembler, Band, ChunkPlan, ChunkPlanner, ContainerMetadata, MediaProbe, PlanMode, RunContext, Scheduler, WorkDir,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::Args;
use process::{AvScenechangeDetector, FfmpegMuxer, FfprobeDemuxer, MkvmergeConcatenator, SvtAv1Encoder, Ssimulacra2Metric};
use term_reporter::TermReporter;

pub fn run() -> anyhow::Result<()> {
  init_logging();

  let args = Args::parse();
  let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
  runtime.block_on(run_async(args))
}

fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("avforge=info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_async(args: Args) -> anyhow::Result<()> {
  if !args.input.exists() {
    bail!("input file does not exist: {}", args.input.display());
  }
  if args.min_crf >= args.max_crf {
    bail!("min-crf must be less than max-crf");
  }

  let demuxer = FfprobeDemuxer;
  let scene_detector = AvScenechangeDetector::default();
  let encoder: Arc<dyn avforge_core::Encoder> = Arc::new(SvtAv1Encoder::default());
  let metric: Arc<dyn avforge_core::Metric> = Arc::new(Ssimulacra2Metric::default());
  let concatenator = MkvmergeConcatenator;
  let muxer = FfmpegMuxer;

  let workdir = Arc::new(WorkDir::create(&args.temp).context("failed to create working directory")?);
  let reporter = Arc::new(TermReporter::default());

  let probe = MediaProbe::new(&demuxer);
  let source = probe.inspect(&args.input).context("failed to inspect source")?;

  let plan_mode = if args.fixed_interval {
    PlanMode::FixedInterval
  } else {
    PlanMode::SceneDetection {
      chunk_duration_floor_secs: 1.0,
    }
  };
  let planner = ChunkPlanner::new(Some(&scene_detector));
  let cancel_for_plan = avforge_core::CancelToken::new();
  let plan: ChunkPlan = planner
    .plan(&source, &plan_mode, &workdir.boundary_file(), &cancel_for_plan)
    .context("failed to plan chunks")?;

  let cpu_workers = args.workers.unwrap_or_else(num_cpus::get);

  let mut ctx = RunContext::new(Arc::clone(&workdir), reporter, cpu_workers, args.metric_workers);
  ctx.band = Band {
    low: args.target_low,
    high: args.target_high,
  };
  ctx.crf_range = (args.min_crf, args.max_crf);
  ctx.preset = args.preset.clone();

  install_ctrlc_cancellation(ctx.cancel.clone());

  let ctx = Arc::new(ctx);
  let scheduler = Scheduler::new(Arc::clone(&ctx), encoder, metric);
  let outcome = scheduler.run(Arc::new(source.clone()), Arc::new(plan)).await;

  if !outcome.failed_chunks.is_empty() {
    bail!("{} chunk(s) failed to encode: {:?}", outcome.failed_chunks.len(), outcome.failed_chunks);
  }

  let assembler = Assembler::new(&concatenator, &muxer, &workdir);
  assembler
    .assemble(&source, outcome.artifacts, &ContainerMetadata::default(), &args.output)
    .context("failed to assemble final output")?;

  workdir.finalize(args.keep).context("failed to clean up working directory")?;

  Ok(())
}

fn install_ctrlc_cancellation(cancel: avforge_core::CancelToken) {
  let _ = ctrlc::set_handler(move || {
    tracing::warn!("interrupt received, canceling run");
    cancel.cancel();
  });
}
