//! The four external capabilities this crate never implements directly
//! (§1, §6, §9 "Polymorphism over external tools"): `Encoder`, `Metric`,
//! `Demuxer` (the spec's Probe/demux capability), and the two assembly-side
//! collaborators `Concatenator`/`Muxer`. Also `SceneDetector`, used only by
//! scene-detection-mode chunk planning.
//!
//! Every trait here is a thin, synchronous operation set so a test suite can
//! substitute deterministic in-memory fakes (§9) without touching the
//! scheduling or search logic. Concrete process-based implementations live in
//! `avforge-cli`, never in this crate.

use std::path::{Path, PathBuf};

use crate::error::ToolError;
use crate::source_info::{SourceInfo, StreamDescriptor};

/// A half-open frame interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
  pub start: usize,
  pub end: usize,
}

impl FrameRange {
  pub fn new(start: usize, end: usize) -> Self {
    debug_assert!(start < end);
    Self { start, end }
  }

  pub fn len(&self) -> usize {
    self.end - self.start
  }

  pub fn is_empty(&self) -> bool {
    self.end <= self.start
  }
}

/// The aggregation mode a [`Metric`] is asked to apply (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricMode {
  Mean,
  /// Mean of the lowest-scoring `N%` of frames, `1..=99`.
  Percentile(u8),
}

pub struct EncodeOutput {
  pub frames: usize,
  pub bytes: u64,
}

/// `encode(sourcePath, frameRange, crf, preset, outPath) -> {frames, bytes} | Error`.
/// Deterministic given identical inputs; writes a container-free elementary
/// stream to `out_path`.
pub trait Encoder: Send + Sync {
  fn encode(
    &self,
    source: &Path,
    frame_range: FrameRange,
    crf: u32,
    preset: &str,
    out_path: &Path,
  ) -> Result<EncodeOutput, ToolError>;
}

/// `score(referenceRange, encodedStream, mode) -> real | Error`, on the
/// SSIMULACRA2 scale (roughly `(-inf, 100]`). Zero-length input is a
/// `ToolError`, never a score of 100 (§9 open question).
pub trait Metric: Send + Sync {
  fn score(
    &self,
    reference: &Path,
    reference_range: FrameRange,
    encoded_stream: &Path,
    mode: MetricMode,
  ) -> Result<f64, ToolError>;
}

/// The Probe/demux capability: `info(sourcePath) -> SourceInfo | Error`.
pub trait Demuxer: Send + Sync {
  fn info(&self, source: &Path) -> Result<SourceInfo, ToolError>;
}

/// Scene-change detection, consumed only by scene-detection-mode chunk
/// planning. Returns frame indices where a scene change occurs; frame 0 is
/// not guaranteed to be included (`ChunkPlanner` adds it if missing).
pub trait SceneDetector: Send + Sync {
  fn detect(&self, source: &Path) -> Result<Vec<usize>, ToolError>;
}

/// Concatenates chunk elementary streams, in the order given, into a single
/// video-only file at `out_path`. The first step of Assembler (§4.7).
pub trait Concatenator: Send + Sync {
  fn concat(&self, chunk_paths: &[PathBuf], out_path: &Path) -> Result<(), ToolError>;
}

/// Title and tags carried from the source into the final container (§4.7).
#[derive(Debug, Clone, Default)]
pub struct ContainerMetadata {
  pub title: Option<String>,
  pub tags: Vec<(String, String)>,
}

/// `mux(videoConcatList, passthroughStreams, outPath) -> Error`, split here
/// into the concatenated-video input plus the passthrough stream descriptors
/// to pull from the original source.
pub trait Muxer: Send + Sync {
  fn mux(
    &self,
    concatenated_video: &Path,
    source: &Path,
    passthrough: &[StreamDescriptor],
    metadata: &ContainerMetadata,
    out_path: &Path,
  ) -> Result<(), ToolError>;
}
