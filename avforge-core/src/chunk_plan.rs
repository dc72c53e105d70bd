//! The ChunkPlanner component (§4.2): two planning modes, post-processing to
//! split long scenes and merge short ones, and the boundary-file cache format
//! from §6. Modeled on the teacher's `split.rs::extra_splits` (the split-long
//! step) and `scenes.rs`/`split.rs`'s `ScenesData` boundary persistence.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use tracing::{debug, instrument};

use crate::capabilities::{FrameRange, SceneDetector};
use crate::cancel::CancelToken;
use crate::error::CoreError;
use crate::source_info::{ResolutionTier, SourceInfo};

/// Runtime-selected chunk-planning mode (§9 open question: the spec resolves
/// this as a RunContext field rather than a compile-time choice).
#[derive(Debug, Clone)]
pub enum PlanMode {
  SceneDetection {
    /// Floor on chunk duration in seconds; 0 disables the merge-short-scenes
    /// step (`MinFrames = 0`).
    chunk_duration_floor_secs: f64,
  },
  FixedInterval,
}

/// An ordered, immutable chunk plan: boundaries `b_0 < b_1 < ... < b_k`, with
/// `b_0 = 0` and an implicit final boundary at `total_frames`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
  boundaries: Vec<usize>,
  total_frames: usize,
}

impl ChunkPlan {
  fn new(boundaries: Vec<usize>, total_frames: usize) -> Self {
    debug_assert_eq!(boundaries.first().copied(), Some(0));
    debug_assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    debug_assert!(boundaries.last().copied().unwrap_or(0) < total_frames);
    Self {
      boundaries,
      total_frames,
    }
  }

  pub fn boundaries(&self) -> &[usize] {
    &self.boundaries
  }

  pub fn total_frames(&self) -> usize {
    self.total_frames
  }

  pub fn len(&self) -> usize {
    self.boundaries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boundaries.is_empty()
  }

  /// The per-chunk frame ranges, in ascending chunk-index order.
  pub fn chunk_ranges(&self) -> impl Iterator<Item = FrameRange> + '_ {
    self
      .boundaries
      .iter()
      .copied()
      .chain(std::iter::once(self.total_frames))
      .collect::<Vec<_>>()
      .windows(2)
      .map(|w| FrameRange::new(w[0], w[1]))
      .collect::<Vec<_>>()
      .into_iter()
  }
}

pub struct ChunkPlanner<'a> {
  detector: Option<&'a dyn SceneDetector>,
}

impl<'a> ChunkPlanner<'a> {
  pub fn new(detector: Option<&'a dyn SceneDetector>) -> Self {
    Self { detector }
  }

  #[instrument(skip(self, source, cancel), fields(total_frames = source.total_frames))]
  pub fn plan(
    &self,
    source: &SourceInfo,
    mode: &PlanMode,
    boundary_file: &Path,
    cancel: &CancelToken,
  ) -> Result<ChunkPlan, CoreError> {
    if source.total_frames == 0 {
      return Err(CoreError::EmptyPlan);
    }

    if let Some(cached) = read_boundary_file(boundary_file).map_err(|e| CoreError::WorkDirFailure(e.to_string()))? {
      debug!(boundaries = cached.len(), "loaded boundary file, skipping detection");
      return Ok(ChunkPlan::new(cached, source.total_frames));
    }

    let boundaries = match mode {
      PlanMode::SceneDetection {
        chunk_duration_floor_secs,
      } => self.plan_scene_detection(source, *chunk_duration_floor_secs, cancel)?,
      PlanMode::FixedInterval => plan_fixed_interval(source),
    };

    write_boundary_file(boundary_file, &boundaries).map_err(|e| CoreError::WorkDirFailure(e.to_string()))?;
    Ok(ChunkPlan::new(boundaries, source.total_frames))
  }

  fn plan_scene_detection(
    &self,
    source: &SourceInfo,
    chunk_duration_floor_secs: f64,
    cancel: &CancelToken,
  ) -> Result<Vec<usize>, CoreError> {
    if cancel.is_canceled() {
      return Err(CoreError::Canceled);
    }
    let detector = self
      .detector
      .expect("scene-detection mode requires a SceneDetector");
    let raw = detector
      .detect(&source.path)
      .map_err(|e| CoreError::ScenesDetectionFailed(e.message))?;

    let mut boundaries: BTreeSet<usize> = raw.into_iter().filter(|&b| b < source.total_frames).collect();
    boundaries.insert(0);
    let mut boundaries: Vec<usize> = boundaries.into_iter().collect();

    let fps = source.frame_rate.as_f64();
    let max_frames = max_frames_for(fps);
    let min_frames = (fps * chunk_duration_floor_secs).floor() as usize;

    split_long_scenes(&mut boundaries, source.total_frames, max_frames);
    if min_frames > 0 {
      merge_short_scenes(&mut boundaries, source.total_frames, min_frames);
    }

    Ok(boundaries)
  }
}

/// `MaxFrames = min(floor(fps*30), 1000)` (§4.2).
fn max_frames_for(fps: f64) -> usize {
  ((fps * 30.0).floor() as usize).min(1000)
}

fn plan_fixed_interval(source: &SourceInfo) -> Vec<usize> {
  let duration_secs = match source.resolution_tier() {
    ResolutionTier::Above1440p => 45.0,
    ResolutionTier::At1080p => 30.0,
    ResolutionTier::Below1080p => 20.0,
  };
  let fps = source.frame_rate.as_f64();
  let step = (fps * duration_secs).floor() as usize;
  let step = step.max(1);

  let mut boundaries = Vec::new();
  let mut b = 0;
  while b < source.total_frames {
    boundaries.push(b);
    b += step;
  }
  boundaries
}

/// Step 3 of §4.2: for each interval longer than `max_frames`, insert evenly
/// spaced intermediate boundaries.
fn split_long_scenes(boundaries: &mut Vec<usize>, total_frames: usize, max_frames: usize) {
  if max_frames == 0 {
    return;
  }
  boundaries.sort_unstable();
  boundaries.dedup();

  let mut extended = boundaries.clone();
  extended.push(total_frames);

  let mut inserted = Vec::new();
  for window in extended.windows(2) {
    let (b_i, b_next) = (window[0], window[1]);
    let length = b_next - b_i;
    if length > max_frames {
      let num_chunks = (length + max_frames - 1) / max_frames;
      let chunk_size = length / num_chunks;
      for j in 1..num_chunks {
        inserted.push(b_i + j * chunk_size);
      }
    }
  }

  boundaries.extend(inserted);
  boundaries.sort_unstable();
  boundaries.dedup();
}

/// Step 4 of §4.2: iteratively merge any chunk shorter than `min_frames` with
/// the smaller of its two neighbors, ties breaking toward the predecessor.
fn merge_short_scenes(boundaries: &mut Vec<usize>, total_frames: usize, min_frames: usize) {
  loop {
    let mut extended = boundaries.clone();
    extended.push(total_frames);

    let violation = extended
      .windows(2)
      .position(|w| w[1] - w[0] < min_frames);

    let i = match violation {
      Some(i) => i,
      None => break,
    };
    let last_chunk_index = extended.len() - 2;

    if extended.len() <= 2 {
      // A single chunk shorter than min_frames has no neighbor to merge
      // with; this is the "except possibly the last" escape hatch in §3.
      break;
    }

    if i == 0 {
      // First chunk: merge with successor by dropping boundary b_1.
      boundaries.remove(1);
    } else if i == last_chunk_index {
      // Last chunk: merge with predecessor by dropping boundary b_i.
      boundaries.remove(i);
    } else {
      let prev_len = extended[i] - extended[i - 1];
      let next_len = extended[i + 2] - extended[i + 1];
      if prev_len <= next_len {
        boundaries.remove(i);
      } else {
        boundaries.remove(i + 1);
      }
    }
  }
}

/// Reads the boundary file format from §6: UTF-8, one non-negative integer
/// per line, strictly ascending, first line `0`. Absence means "plan from
/// scratch", returned here as `Ok(None)`.
pub fn read_boundary_file(path: &Path) -> io::Result<Option<Vec<usize>>> {
  if !path.exists() {
    return Ok(None);
  }
  let file = fs::File::open(path)?;
  let mut boundaries = Vec::new();
  for line in BufReader::new(file).lines() {
    let line = line?;
    if line.is_empty() {
      continue;
    }
    let value: usize = line
      .trim()
      .parse()
      .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "boundary file line is not an integer"))?;
    boundaries.push(value);
  }
  Ok(Some(boundaries))
}

pub fn write_boundary_file(path: &Path, boundaries: &[usize]) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let mut file = fs::File::create(path)?;
  for b in boundaries {
    writeln!(file, "{}", b)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_long_scenes_inserts_even_subdivisions() {
    // Scenario 1 (spec.md §8): scenes [0,600,3500], 24fps, total 4000 frames,
    // MaxFrames = min(floor(24*30),1000) = 720. The interval (600,3500) has
    // length 2900 > 720, so it must be subdivided into 5 equal pieces.
    let mut boundaries = vec![0, 600, 3500];
    split_long_scenes(&mut boundaries, 4000, 720);
    assert_eq!(boundaries, vec![0, 600, 1180, 1760, 2340, 2920, 3500]);
  }

  #[test]
  fn merge_short_scenes_merges_toward_smaller_neighbor() {
    // Scenario 2: scenes [0,100,110,1000], MinFrames = 48, totalFrames 1200
    // (strictly past the last boundary, so [1000,1200) is a real trailing
    // chunk rather than a phantom zero-length one). The chunk [100,110) is
    // 10 frames, shorter than both neighbors; its predecessor (length 100)
    // is shorter than its successor (length 890), so the boundary at 100 is
    // dropped.
    let mut boundaries = vec![0, 100, 110, 1000];
    merge_short_scenes(&mut boundaries, 1200, 48);
    assert_eq!(boundaries, vec![0, 110, 1000]);
  }

  #[test]
  fn max_frames_for_caps_at_1000() {
    assert_eq!(max_frames_for(24.0), 720);
    assert_eq!(max_frames_for(60.0), 1000);
  }

  #[test]
  fn chunk_ranges_cover_the_whole_plan_with_no_gaps() {
    let plan = ChunkPlan::new(vec![0, 10, 25], 40);
    let ranges: Vec<_> = plan.chunk_ranges().collect();
    assert_eq!(ranges, vec![FrameRange::new(0, 10), FrameRange::new(10, 25), FrameRange::new(25, 40)]);
  }

  #[test]
  fn boundary_file_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("scenes.txt");
    assert!(read_boundary_file(&path).unwrap().is_none());

    write_boundary_file(&path, &[0, 100, 250]).unwrap();
    assert_eq!(read_boundary_file(&path).unwrap(), Some(vec![0, 100, 250]));
  }

  use quickcheck::TestResult;
  use quickcheck_macros::quickcheck;

  #[quickcheck]
  fn split_long_scenes_preserves_originals_and_stays_sorted(raw: Vec<u16>, total: u16, max: u16) -> TestResult {
    if total < 2 {
      return TestResult::discard();
    }
    let total_frames = total as usize;
    let max_frames = (max as usize % total_frames).max(1);

    let original: Vec<usize> = raw
      .into_iter()
      .map(|x| x as usize % total_frames)
      .chain(std::iter::once(0))
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    let mut boundaries = original.clone();

    split_long_scenes(&mut boundaries, total_frames, max_frames);

    let sorted = boundaries.windows(2).all(|w| w[0] < w[1]);
    let superset = original.iter().all(|b| boundaries.contains(b));
    let in_range = boundaries.iter().all(|&b| b < total_frames);
    TestResult::from_bool(sorted && superset && in_range)
  }

  #[quickcheck]
  fn merge_short_scenes_only_removes_boundaries_and_keeps_zero(raw: Vec<u16>, total: u16, min: u16) -> TestResult {
    if total < 2 {
      return TestResult::discard();
    }
    let total_frames = total as usize;
    let min_frames = min as usize % (total_frames + 1);

    let original: Vec<usize> = raw
      .into_iter()
      .map(|x| x as usize % total_frames)
      .chain(std::iter::once(0))
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    let mut boundaries = original.clone();

    merge_short_scenes(&mut boundaries, total_frames, min_frames);

    let sorted = boundaries.windows(2).all(|w| w[0] < w[1]);
    let subset = boundaries.iter().all(|b| original.contains(b));
    let starts_at_zero = boundaries.first() == Some(&0);
    TestResult::from_bool(sorted && subset && starts_at_zero)
  }
}
