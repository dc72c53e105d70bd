//! TQSearch (§4.4) — the hardest algorithm in the system. Finds a CRF whose
//! score lands in `[T_lo, T_hi]` for one chunk, using a three-probe initial
//! bracket, one-shot bound expansion, and monotone-spline-predicted
//! iteration with a binary-midpoint safety fallback.
//!
//! The spline step follows the teacher's `predict_crf` almost exactly
//! (`splines::{Spline, Key, Interpolation::CatmullRom}` over `(score, crf)`
//! keys sorted by score); the binary-midpoint fallback on an
//! out-of-interval or already-probed prediction is this spec's substitute
//! for hand-rolled Fritsch-Carlson tangents — see DESIGN.md.

#[cfg(test)]
mod tests;

use std::path::Path;

use splines::{Interpolation, Key, Spline};
use tracing::{instrument, warn};

use crate::cancel::CancelToken;
use crate::capabilities::{FrameRange, MetricMode};
use crate::error::CoreError;
use crate::probe::{ProbeEntry, ProbeRequest, ProbeRunner, SamplingConfig};

pub const DEFAULT_MAX_ROUNDS: usize = 10;
const CEILING_CRF: u32 = 63;
const FLOOR_CRF: u32 = 0;
const EXPAND_UP_STEP: u32 = 8;
const EXPAND_DOWN_STEP: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
  pub low: f64,
  pub high: f64,
}

impl Band {
  pub fn midpoint(&self) -> f64 {
    (self.low + self.high) / 2.0
  }

  pub fn contains(&self, score: f64) -> bool {
    score >= self.low && score <= self.high
  }

  fn distance(&self, score: f64) -> f64 {
    if score < self.low {
      self.low - score
    } else if score > self.high {
      score - self.high
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TqFlags {
  pub used_sampling: bool,
  pub bound_expanded_up: bool,
  pub bound_expanded_down: bool,
  pub predicted_crf_used: bool,
}

#[derive(Debug, Clone)]
pub struct TqResult {
  pub chunk_index: usize,
  pub final_crf: u32,
  pub final_score: f64,
  pub rounds: usize,
  pub history: Vec<ProbeEntry>,
  pub flags: TqFlags,
  pub converged: bool,
  pub full_chunk_cross_check: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TqSearchConfig {
  pub band: Band,
  pub crf_range: (u32, u32),
  pub max_rounds: usize,
  pub metric_mode: MetricMode,
}

impl Default for TqSearchConfig {
  fn default() -> Self {
    Self {
      band: Band { low: 0.0, high: 0.0 },
      crf_range: (FLOOR_CRF, CEILING_CRF),
      max_rounds: DEFAULT_MAX_ROUNDS,
      metric_mode: MetricMode::Mean,
    }
  }
}

pub struct TqSearch<'a> {
  runner: &'a ProbeRunner<'a>,
  config: &'a TqSearchConfig,
}

impl<'a> TqSearch<'a> {
  pub fn new(runner: &'a ProbeRunner<'a>, config: &'a TqSearchConfig) -> Self {
    Self { runner, config }
  }

  #[instrument(skip(self, source, sampling, cancel), fields(chunk_index))]
  #[allow(clippy::too_many_arguments)]
  pub fn search(
    &self,
    chunk_index: usize,
    source: &Path,
    frame_range: FrameRange,
    frame_rate: f64,
    preset: &str,
    sampling: Option<SamplingConfig>,
    cancel: &CancelToken,
  ) -> Result<TqResult, CoreError> {
    let band = self.config.band;
    let (mut low, mut high) = self.config.crf_range;
    let mut flags = TqFlags::default();
    let mut history: Vec<ProbeEntry> = Vec::new();

    let mid = (low + high) / 2;
    let initial_crfs = [low, high, mid];

    let mut converged: Option<ProbeEntry> = None;
    for crf in initial_crfs {
      if cancel.is_canceled() {
        return Err(CoreError::Canceled);
      }
      let entry = self.probe_at(chunk_index, source, frame_range, frame_rate, preset, crf, &sampling, history.len())?;
      let in_band = band.contains(entry.score);
      history.push(entry);
      if in_band {
        converged = Some(entry);
        break;
      }
    }

    if converged.is_none() {
      if history.iter().all(|e| e.score > band.high) && high < CEILING_CRF {
        let new_high = (high + EXPAND_UP_STEP).min(CEILING_CRF);
        if new_high != high {
          high = new_high;
          if cancel.is_canceled() {
            return Err(CoreError::Canceled);
          }
          let entry = self.probe_at(chunk_index, source, frame_range, frame_rate, preset, high, &sampling, history.len())?;
          flags.bound_expanded_up = true;
          let in_band = band.contains(entry.score);
          history.push(entry);
          if in_band {
            converged = Some(entry);
          }
        }
      } else if history.iter().all(|e| e.score < band.low) && low > FLOOR_CRF {
        let new_low = low.saturating_sub(EXPAND_DOWN_STEP).max(FLOOR_CRF);
        if new_low != low {
          low = new_low;
          if cancel.is_canceled() {
            return Err(CoreError::Canceled);
          }
          let entry = self.probe_at(chunk_index, source, frame_range, frame_rate, preset, low, &sampling, history.len())?;
          flags.bound_expanded_down = true;
          let in_band = band.contains(entry.score);
          history.push(entry);
          if in_band {
            converged = Some(entry);
          }
        }
      }
    }

    while converged.is_none() {
      if history.len() >= self.config.max_rounds {
        break;
      }
      if cancel.is_canceled() {
        return Err(CoreError::Canceled);
      }

      let (c_hi, c_lo) = narrowed_interval(&history, band, low, high);
      let (interval_lo, interval_hi) = (c_hi.min(c_lo), c_hi.max(c_lo));
      let (predicted, used_spline) = predict_crf(&history, band.midpoint(), c_hi, c_lo);

      let already_probed = history.iter().any(|e| e.crf == predicted);
      let out_of_interval = predicted < interval_lo || predicted > interval_hi;
      let predicted = if already_probed || out_of_interval {
        midpoint(c_hi, c_lo)
      } else {
        predicted
      };

      if history.iter().any(|e| e.crf == predicted) {
        // No new candidate left to try; stop rather than loop forever.
        break;
      }

      flags.predicted_crf_used = used_spline || flags.predicted_crf_used;
      let entry = self.probe_at(chunk_index, source, frame_range, frame_rate, preset, predicted, &sampling, history.len())?;
      let in_band = band.contains(entry.score);
      history.push(entry);
      if in_band {
        converged = Some(entry);
      }
    }

    flags.used_sampling = history.iter().any(|e| e.sampled);

    let (final_entry, is_converged) = match converged {
      Some(e) => (e, true),
      None => {
        warn!(chunk_index, "TQSearch failed to converge within max_rounds, picking closest probe");
        let best = history
          .iter()
          .copied()
          .min_by(|a, b| {
            band
              .distance(a.score)
              .partial_cmp(&band.distance(b.score))
              .unwrap()
              .then(b.crf.cmp(&a.crf))
          })
          .expect("at least the initial bracket was probed");
        (best, false)
      },
    };

    let mut final_score = final_entry.score;
    let mut cross_check = None;
    if is_converged && final_entry.sampled {
      if cancel.is_canceled() {
        return Err(CoreError::Canceled);
      }
      let verification = self.runner.run(&ProbeRequest {
        chunk_index,
        round: history.len(),
        source,
        frame_range,
        frame_rate,
        crf: final_entry.crf,
        preset,
        metric_mode: self.config.metric_mode,
        sampling: None,
      })?;
      cross_check = Some(verification.score);
      final_score = verification.score;
      history.push(verification);
    }

    Ok(TqResult {
      chunk_index,
      final_crf: final_entry.crf,
      final_score,
      rounds: history.len(),
      history,
      flags,
      converged: is_converged,
      full_chunk_cross_check: cross_check,
    })
  }

  #[allow(clippy::too_many_arguments)]
  fn probe_at(
    &self,
    chunk_index: usize,
    source: &Path,
    frame_range: FrameRange,
    frame_rate: f64,
    preset: &str,
    crf: u32,
    sampling: &Option<SamplingConfig>,
    round: usize,
  ) -> Result<ProbeEntry, CoreError> {
    self.runner.run(&ProbeRequest {
      chunk_index,
      round,
      source,
      frame_range,
      frame_rate,
      crf,
      preset,
      metric_mode: self.config.metric_mode,
      sampling: sampling.as_ref(),
    })
  }
}

fn midpoint(a: u32, b: u32) -> u32 {
  let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
  lo + (hi - lo) / 2
}

/// `c_hi` = highest CRF whose score is >= T_hi; `c_lo` = lowest CRF whose
/// score is <= T_lo (§4.4). Falls back to the global bounds on the side with
/// no qualifying probe yet.
fn narrowed_interval(history: &[ProbeEntry], band: Band, low: u32, high: u32) -> (u32, u32) {
  let c_hi = history.iter().filter(|e| e.score >= band.high).map(|e| e.crf).max();
  let c_lo = history.iter().filter(|e| e.score <= band.low).map(|e| e.crf).min();
  (c_hi.unwrap_or(low), c_lo.unwrap_or(high))
}

/// Returns `(predicted_crf, used_spline)`. With >= 4 distinct probes, fits a
/// Catmull-Rom spline over `(score, crf)` pairs (the teacher's
/// `predict_crf` technique) and samples it at `target_mid`; otherwise falls
/// back to linear interpolation between the two bracketing points, or the
/// bound midpoint with fewer than two probes.
fn predict_crf(history: &[ProbeEntry], target_mid: f64, low: u32, high: u32) -> (u32, bool) {
  let mut distinct: Vec<(u32, f64)> = Vec::new();
  for e in history {
    if let Some(slot) = distinct.iter_mut().find(|(crf, _)| *crf == e.crf) {
      slot.1 = e.score;
    } else {
      distinct.push((e.crf, e.score));
    }
  }

  if distinct.len() >= 4 {
    let mut by_score = distinct.clone();
    by_score.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    by_score.dedup_by(|a, b| (a.1 - b.1).abs() < f64::EPSILON);
    if by_score.len() >= 4 {
      let keys: Vec<Key<f64, f64>> = by_score
        .iter()
        .map(|(crf, score)| Key::new(*score, *crf as f64, Interpolation::CatmullRom))
        .collect();
      let spline = Spline::from_vec(keys);
      if let Some(predicted) = spline.sample(target_mid) {
        let clamped = predicted.round().clamp(low.min(high) as f64, low.max(high) as f64);
        return (clamped as u32, true);
      }
    }
  }

  if distinct.len() >= 2 {
    let mut by_score = distinct.clone();
    by_score.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let bracket = by_score
      .windows(2)
      .find(|w| (w[0].1 <= target_mid && target_mid <= w[1].1) || (w[1].1 <= target_mid && target_mid <= w[0].1))
      .unwrap_or_else(|| {
        let n = by_score.len();
        if target_mid < by_score[0].1 {
          &by_score[0..2]
        } else {
          &by_score[n - 2..]
        }
      });
    let (crf_a, score_a) = bracket[0];
    let (crf_b, score_b) = bracket[1];
    if (score_b - score_a).abs() < f64::EPSILON {
      return ((crf_a + crf_b) / 2, false);
    }
    let t = (target_mid - score_a) / (score_b - score_a);
    let predicted = crf_a as f64 + t * (crf_b as f64 - crf_a as f64);
    let clamped = predicted.round().clamp(low.min(high) as f64, low.max(high) as f64);
    return (clamped as u32, false);
  }

  (midpoint(low, high), false)
}
