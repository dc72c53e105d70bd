//! The argument surface (SPEC_FULL.md §A): "a handful of clap flags", not a
//! full re-implementation of the teacher's `StructOpt` surface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "avforge", version, about = "Chunked AV1 transcoding orchestrator")]
pub struct Args {
  /// Source video file.
  pub input: PathBuf,

  /// Destination container.
  #[clap(short, long)]
  pub output: PathBuf,

  /// Working directory for chunk/probe/meta scratch files.
  #[clap(long, default_value = "avforge_tmp")]
  pub temp: PathBuf,

  /// Lower bound of the target-quality score band.
  #[clap(long, default_value_t = 75.0)]
  pub target_low: f64,

  /// Upper bound of the target-quality score band.
  #[clap(long, default_value_t = 80.0)]
  pub target_high: f64,

  /// Minimum CRF considered by target-quality search.
  #[clap(long, default_value_t = 8)]
  pub min_crf: u32,

  /// Maximum CRF considered by target-quality search.
  #[clap(long, default_value_t = 48)]
  pub max_crf: u32,

  /// Encoder preset string, passed through to the Encoder capability.
  #[clap(long, default_value = "medium")]
  pub preset: String,

  /// Number of chunks encoded concurrently (CPU-slot count). Defaults to
  /// the available parallelism when unset.
  #[clap(long)]
  pub workers: Option<usize>,

  /// Number of metric computations run concurrently (GPU-slot count).
  #[clap(long, default_value_t = 1)]
  pub metric_workers: usize,

  /// Use fixed-interval chunking instead of scene detection.
  #[clap(long)]
  pub fixed_interval: bool,

  /// Keep the working directory after a successful run, for inspection.
  #[clap(long)]
  pub keep: bool,
}
