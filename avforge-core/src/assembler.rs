//! The Assembler component (§4.7): verifies the total frame count, hands the
//! ordered chunk streams to a [`Concatenator`], then muxes the result with
//! the source's passthrough streams via a [`Muxer`]. Modeled on the
//! teacher's `concat.rs` (the verify-then-concat shape) and
//! `project.rs::encode`'s final muxing step.

use std::path::Path;

use tracing::instrument;

use crate::capabilities::{Concatenator, ContainerMetadata, Muxer};
use crate::chunk_encoder::ChunkArtifact;
use crate::error::CoreError;
use crate::source_info::SourceInfo;
use crate::workdir::WorkDir;

pub struct Assembler<'a> {
  concatenator: &'a dyn Concatenator,
  muxer: &'a dyn Muxer,
  workdir: &'a WorkDir,
}

impl<'a> Assembler<'a> {
  pub fn new(concatenator: &'a dyn Concatenator, muxer: &'a dyn Muxer, workdir: &'a WorkDir) -> Self {
    Self {
      concatenator,
      muxer,
      workdir,
    }
  }

  #[instrument(skip(self, source, artifacts, metadata, out_path))]
  pub fn assemble(
    &self,
    source: &SourceInfo,
    mut artifacts: Vec<ChunkArtifact>,
    metadata: &ContainerMetadata,
    out_path: &Path,
  ) -> Result<(), CoreError> {
    artifacts.sort_by_key(|a| a.chunk_index);

    let assembled_frames: usize = artifacts.iter().map(|a| a.frames).sum();
    if assembled_frames != source.total_frames {
      return Err(CoreError::FrameCountMismatch {
        expected: source.total_frames,
        actual: assembled_frames,
      });
    }

    let chunk_paths: Vec<_> = artifacts.iter().map(|a| a.path.clone()).collect();
    let concatenated = self.workdir.root().join("meta").join("concatenated.video");

    self
      .concatenator
      .concat(&chunk_paths, &concatenated)
      .map_err(|e| CoreError::ConcatFailed(e.message))?;

    let passthrough: Vec<_> = source
      .audio_streams
      .iter()
      .chain(source.subtitle_streams.iter())
      .cloned()
      .collect();

    self
      .muxer
      .mux(&concatenated, &source.path, &passthrough, metadata, out_path)
      .map_err(|e| CoreError::MuxFailed(e.message))
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Mutex;

  use super::*;
  use crate::error::ToolError;
  use crate::source_info::{FrameRate, StreamDescriptor};

  struct RecordingConcatenator {
    calls: Mutex<Vec<Vec<PathBuf>>>,
  }

  impl Concatenator for RecordingConcatenator {
    fn concat(&self, chunk_paths: &[PathBuf], out_path: &Path) -> Result<(), ToolError> {
      self.calls.lock().unwrap().push(chunk_paths.to_vec());
      std::fs::write(out_path, b"fake").map_err(|e| ToolError::new(e.to_string()))
    }
  }

  struct NoopMuxer;

  impl Muxer for NoopMuxer {
    fn mux(
      &self,
      _concatenated_video: &Path,
      _source: &Path,
      _passthrough: &[StreamDescriptor],
      _metadata: &ContainerMetadata,
      out_path: &Path,
    ) -> Result<(), ToolError> {
      std::fs::write(out_path, b"fake").map_err(|e| ToolError::new(e.to_string()))
    }
  }

  fn source_with_frames(total_frames: usize) -> SourceInfo {
    SourceInfo {
      path: PathBuf::from("source.mkv"),
      total_frames,
      frame_rate: FrameRate { num: 24, den: 1 },
      width: 1920,
      height: 1080,
      audio_streams: Vec::new(),
      subtitle_streams: Vec::new(),
    }
  }

  fn artifact(chunk_index: usize, frames: usize) -> ChunkArtifact {
    ChunkArtifact {
      chunk_index,
      crf: 20,
      path: PathBuf::from(format!("{:05}.ivf", chunk_index)),
      frames,
      bytes: 1,
    }
  }

  #[test]
  fn frame_count_mismatch_is_rejected_before_concatenation() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::create(tmp.path()).unwrap();
    let concatenator = RecordingConcatenator { calls: Mutex::new(Vec::new()) };
    let muxer = NoopMuxer;
    let assembler = Assembler::new(&concatenator, &muxer, &workdir);

    let source = source_with_frames(100);
    let artifacts = vec![artifact(0, 60), artifact(1, 39)];

    let err = assembler
      .assemble(&source, artifacts, &ContainerMetadata::default(), tmp.path().join("out.mkv").as_path())
      .unwrap_err();

    match err {
      CoreError::FrameCountMismatch { expected, actual } => {
        assert_eq!(expected, 100);
        assert_eq!(actual, 99);
      },
      other => panic!("expected FrameCountMismatch, got {other:?}"),
    }
    assert!(concatenator.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn matching_frame_count_concatenates_in_chunk_order() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::create(tmp.path()).unwrap();
    let concatenator = RecordingConcatenator { calls: Mutex::new(Vec::new()) };
    let muxer = NoopMuxer;
    let assembler = Assembler::new(&concatenator, &muxer, &workdir);

    let source = source_with_frames(100);
    // Out of order on purpose; Assembler must sort before concatenating.
    let artifacts = vec![artifact(1, 40), artifact(0, 60)];

    assembler
      .assemble(&source, artifacts, &ContainerMetadata::default(), tmp.path().join("out.mkv").as_path())
      .unwrap();

    let calls = concatenator.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], PathBuf::from("00000.ivf"));
    assert_eq!(calls[0][1], PathBuf::from("00001.ivf"));
  }
}
