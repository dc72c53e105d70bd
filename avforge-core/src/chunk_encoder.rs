//! The ChunkEncoder component (§4.5): runs the final encode of a chunk at
//! its converged CRF, with idempotent restart-skip and the bounded
//! retry-on-crash policy from SPEC_FULL.md §C.4 (modeled on the teacher's
//! `broker.rs::encode_chunk` / `worker.rs::encode_chunk`, `MAX_TRIES`).

use std::path::Path;

use tracing::{instrument, warn};

use crate::cancel::CancelToken;
use crate::capabilities::{Encoder, FrameRange};
use crate::error::CoreError;
use crate::workdir::{DoneEntry, WorkDir};

pub const DEFAULT_MAX_TRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct ChunkArtifact {
  pub chunk_index: usize,
  pub crf: u32,
  pub path: std::path::PathBuf,
  pub frames: usize,
  pub bytes: u64,
}

pub struct ChunkEncoder<'a> {
  encoder: &'a dyn Encoder,
  workdir: &'a WorkDir,
  max_tries: usize,
}

impl<'a> ChunkEncoder<'a> {
  pub fn new(encoder: &'a dyn Encoder, workdir: &'a WorkDir, max_tries: usize) -> Self {
    Self {
      encoder,
      workdir,
      max_tries: max_tries.max(1),
    }
  }

  #[instrument(skip(self, source, cancel), fields(chunk_index, crf))]
  pub fn encode(
    &self,
    chunk_index: usize,
    source: &Path,
    frame_range: FrameRange,
    crf: u32,
    preset: &str,
    cancel: &CancelToken,
  ) -> Result<ChunkArtifact, CoreError> {
    if let Some(existing) = self.workdir.existing_chunk_artifact(chunk_index, frame_range.len()) {
      return Ok(existing);
    }

    let out_path = self.workdir.chunk_path(chunk_index);
    let mut last_message = String::new();
    let mut last_stderr = None;

    for attempt in 1..=self.max_tries {
      if cancel.is_canceled() {
        return Err(CoreError::Canceled);
      }

      match self.encoder.encode(source, frame_range, crf, preset, &out_path) {
        Ok(output) => {
          self
            .workdir
            .record_done(
              chunk_index,
              DoneEntry {
                frames: output.frames,
                bytes: output.bytes,
              },
            )
            .map_err(|e| CoreError::WorkDirFailure(e.to_string()))?;

          return Ok(ChunkArtifact {
            chunk_index,
            crf,
            path: out_path,
            frames: output.frames,
            bytes: output.bytes,
          });
        },
        Err(e) if e.canceled => return Err(CoreError::Canceled),
        Err(e) => {
          warn!(chunk_index, attempt, max_tries = self.max_tries, "encode attempt failed");
          last_message = e.message;
          last_stderr = e.stderr_tail;
        },
      }
    }

    Err(CoreError::EncodeFailed {
      chunk: chunk_index,
      message: last_message,
      stderr_tail: last_stderr,
    })
  }
}
