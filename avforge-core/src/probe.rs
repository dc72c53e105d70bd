//! The ProbeRunner component (§4.3): encodes a sample or full chunk at a
//! given CRF and scores it. Pure with respect to the filesystem beyond the
//! paths `WorkDir` hands it.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capabilities::{Encoder, FrameRange, Metric, MetricMode};
use crate::error::CoreError;
use crate::reporter::{Reporter, ReporterEvent};
use crate::workdir::WorkDir;

#[derive(Debug, Clone)]
pub struct SamplingConfig {
  pub sample_duration_secs: f64,
  pub min_chunk_duration_for_sampling_secs: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeEntry {
  pub crf: u32,
  pub score: f64,
  pub sampled: bool,
  pub wall_clock: Duration,
}

pub struct ProbeRequest<'a> {
  pub chunk_index: usize,
  pub round: usize,
  pub source: &'a Path,
  pub frame_range: FrameRange,
  pub frame_rate: f64,
  pub crf: u32,
  pub preset: &'a str,
  pub metric_mode: MetricMode,
  pub sampling: Option<&'a SamplingConfig>,
}

pub struct ProbeRunner<'a> {
  encoder: &'a dyn Encoder,
  metric: &'a dyn Metric,
  workdir: &'a WorkDir,
  reporter: &'a dyn Reporter,
}

impl<'a> ProbeRunner<'a> {
  pub fn new(encoder: &'a dyn Encoder, metric: &'a dyn Metric, workdir: &'a WorkDir, reporter: &'a dyn Reporter) -> Self {
    Self {
      encoder,
      metric,
      workdir,
      reporter,
    }
  }

  pub fn run(&self, req: &ProbeRequest) -> Result<ProbeEntry, CoreError> {
    let start = Instant::now();

    self.reporter.on_event(ReporterEvent::ProbeStarted {
      chunk_index: req.chunk_index,
      round: req.round,
      crf: req.crf,
    });

    let sample_window = req.sampling.and_then(|s| {
      let duration_secs = req.frame_range.len() as f64 / req.frame_rate;
      if duration_secs < s.min_chunk_duration_for_sampling_secs {
        None
      } else {
        Some(centered_window(req.frame_range, req.frame_rate, s.sample_duration_secs))
      }
    });

    let (encode_range, sampled) = match sample_window {
      Some(window) => (window, true),
      None => (req.frame_range, false),
    };

    let out_path = self.workdir.probe_path(req.chunk_index, req.round);
    let output = self
      .encoder
      .encode(req.source, encode_range, req.crf, req.preset, &out_path)
      .map_err(|e| to_encode_error(req.chunk_index, e))?;

    if output.frames == 0 {
      return Err(CoreError::MetricFailed {
        chunk: req.chunk_index,
        message: "zero-length probe encode".to_owned(),
        stderr_tail: None,
      });
    }

    let score = self
      .metric
      .score(req.source, encode_range, &out_path, req.metric_mode)
      .map_err(|e| to_metric_error(req.chunk_index, e))?;

    let wall_clock = start.elapsed();
    debug!(chunk = req.chunk_index, crf = req.crf, score, sampled, "probe complete");

    self.reporter.on_event(ReporterEvent::ProbeFinished {
      chunk_index: req.chunk_index,
      round: req.round,
      crf: req.crf,
      score,
    });

    Ok(ProbeEntry {
      crf: req.crf,
      score,
      sampled,
      wall_clock,
    })
  }
}

fn centered_window(range: FrameRange, fps: f64, sample_duration_secs: f64) -> FrameRange {
  let window_frames = ((fps * sample_duration_secs).floor() as usize)
    .max(1)
    .min(range.len());
  let slack = range.len() - window_frames;
  let start = range.start + slack / 2;
  FrameRange::new(start, start + window_frames)
}

fn to_encode_error(chunk: usize, e: crate::error::ToolError) -> CoreError {
  if e.canceled {
    CoreError::Canceled
  } else {
    CoreError::EncodeFailed {
      chunk,
      message: e.message,
      stderr_tail: e.stderr_tail,
    }
  }
}

fn to_metric_error(chunk: usize, e: crate::error::ToolError) -> CoreError {
  if e.canceled {
    CoreError::Canceled
  } else {
    CoreError::MetricFailed {
      chunk,
      message: e.message,
      stderr_tail: e.stderr_tail,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn centered_window_fits_inside_range() {
    let range = FrameRange::new(100, 1000);
    let window = centered_window(range, 24.0, 1.0);
    assert_eq!(window.len(), 24);
    assert!(window.start >= range.start);
    assert!(window.end <= range.end);
  }

  #[test]
  fn centered_window_clamped_to_chunk_length() {
    let range = FrameRange::new(0, 10);
    let window = centered_window(range, 24.0, 5.0);
    assert_eq!(window, range);
  }
}
