use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::capabilities::{EncodeOutput, Encoder, FrameRange, Metric, MetricMode};
use crate::error::ToolError;
use crate::probe::ProbeRunner;
use crate::reporter::NullReporter;
use crate::target_quality::{Band, TqSearch, TqSearchConfig};
use crate::cancel::CancelToken;
use crate::workdir::WorkDir;

/// A deterministic encoder that never touches a real bitstream; it just
/// records which CRF it last encoded at, for the paired `LinearMetric` to
/// read back.
struct RecordingEncoder {
  last_crf: AtomicU32,
}

impl RecordingEncoder {
  fn new() -> Self {
    Self {
      last_crf: AtomicU32::new(0),
    }
  }
}

impl Encoder for RecordingEncoder {
  fn encode(
    &self,
    _source: &Path,
    frame_range: FrameRange,
    crf: u32,
    _preset: &str,
    out_path: &Path,
  ) -> Result<EncodeOutput, ToolError> {
    self.last_crf.store(crf, Ordering::SeqCst);
    std::fs::write(out_path, b"fake").map_err(|e| ToolError::new(e.to_string()))?;
    Ok(EncodeOutput {
      frames: frame_range.len(),
      bytes: 1,
    })
  }
}

/// `score(crf) = intercept - slope*crf`, read back from the encoder's last
/// recorded CRF so the metric stays in lockstep with what was "encoded".
struct LinearMetric<'a> {
  encoder: &'a RecordingEncoder,
  intercept: f64,
  slope: f64,
}

impl Metric for LinearMetric<'_> {
  fn score(&self, _reference: &Path, _range: FrameRange, _encoded: &Path, _mode: MetricMode) -> Result<f64, ToolError> {
    let crf = self.encoder.last_crf.load(Ordering::SeqCst);
    Ok(self.intercept - self.slope * crf as f64)
  }
}

#[test]
fn converges_via_linear_fallback_prediction() {
  // Scenario 3 (spec.md §8): band 75-80, Q in [8,48], score(crf) = 100 - 1.2*crf.
  let encoder = RecordingEncoder::new();
  let metric = LinearMetric {
    encoder: &encoder,
    intercept: 100.0,
    slope: 1.2,
  };
  let tmp = tempfile::tempdir().unwrap();
  let workdir = WorkDir::create(tmp.path()).unwrap();
  let reporter = NullReporter;
  let runner = ProbeRunner::new(&encoder, &metric, &workdir, &reporter);
  let config = TqSearchConfig {
    band: Band { low: 75.0, high: 80.0 },
    crf_range: (8, 48),
    max_rounds: 10,
    metric_mode: MetricMode::Mean,
  };
  let search = TqSearch::new(&runner, &config);

  let result = search
    .search(0, Path::new("source.mkv"), FrameRange::new(0, 100), 24.0, "medium", None, &CancelToken::new())
    .unwrap();

  assert!(result.converged);
  assert_eq!(result.final_crf, 19);
  assert_eq!(result.rounds, 4);
  assert!((result.final_score - 77.2).abs() < 1e-9);
}

#[test]
fn bound_expansion_is_one_shot_upward() {
  // Scenario 4: same range/band but score(crf) = 100 - 0.2*crf, so every
  // probe in [8,48] lands above T_hi and the search must expand U once.
  let encoder = RecordingEncoder::new();
  let metric = LinearMetric {
    encoder: &encoder,
    intercept: 100.0,
    slope: 0.2,
  };
  let tmp = tempfile::tempdir().unwrap();
  let workdir = WorkDir::create(tmp.path()).unwrap();
  let reporter = NullReporter;
  let runner = ProbeRunner::new(&encoder, &metric, &workdir, &reporter);
  let config = TqSearchConfig {
    band: Band { low: 75.0, high: 80.0 },
    crf_range: (8, 48),
    max_rounds: 10,
    metric_mode: MetricMode::Mean,
  };
  let search = TqSearch::new(&runner, &config);

  let result = search
    .search(0, Path::new("source.mkv"), FrameRange::new(0, 100), 24.0, "medium", None, &CancelToken::new())
    .unwrap();

  assert!(result.flags.bound_expanded_up);
  assert!(!result.flags.bound_expanded_down);
  assert!(result.history.iter().any(|e| e.crf == 56));
  assert!(result.rounds <= 10);
}

#[test]
fn sample_based_convergence_runs_a_full_chunk_cross_check() {
  let encoder = RecordingEncoder::new();
  let metric = LinearMetric {
    encoder: &encoder,
    intercept: 100.0,
    slope: 1.2,
  };
  let tmp = tempfile::tempdir().unwrap();
  let workdir = WorkDir::create(tmp.path()).unwrap();
  let reporter = NullReporter;
  let runner = ProbeRunner::new(&encoder, &metric, &workdir, &reporter);
  let config = TqSearchConfig {
    band: Band { low: 75.0, high: 80.0 },
    crf_range: (8, 48),
    max_rounds: 10,
    metric_mode: MetricMode::Mean,
  };
  let search = TqSearch::new(&runner, &config);

  let sampling = crate::probe::SamplingConfig {
    sample_duration_secs: 1.0,
    min_chunk_duration_for_sampling_secs: 0.5,
  };

  let result = search
    .search(
      0,
      Path::new("source.mkv"),
      FrameRange::new(0, 10_000),
      24.0,
      "medium",
      Some(sampling),
      &CancelToken::new(),
    )
    .unwrap();

  assert!(result.converged);
  assert!(result.flags.used_sampling);
  assert!(result.full_chunk_cross_check.is_some());
}
