//! The WorkDir component (§4.8): owns the per-run scratch directory, its
//! `chunks/`/`probes/`/`meta/` subdirectories, and the restart cache.
//! Modeled on the teacher's `done.json`/`get_done` resume pattern
//! (`context.rs`, `broker.rs`) and `scenes.rs`'s `ScenesData` JSON
//! persistence, generalized from a single `done.json` blob to the
//! `meta/done.json` map described in SPEC_FULL.md §C.1.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::chunk_encoder::ChunkArtifact;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DoneEntry {
  pub frames: usize,
  pub bytes: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DoneMap {
  #[serde(default)]
  done: HashMap<String, DoneEntry>,
}

pub struct WorkDir {
  root: PathBuf,
  done_cache: Mutex<DoneMap>,
}

impl WorkDir {
  /// Creates `chunks/`, `probes/` and `meta/` under `root` and loads any
  /// existing `meta/done.json` for restart.
  pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
    let root = root.into();
    fs::create_dir_all(root.join("chunks"))?;
    fs::create_dir_all(root.join("probes"))?;
    fs::create_dir_all(root.join("meta"))?;

    let done_cache = load_done(&root.join("meta").join("done.json")).unwrap_or_default();

    Ok(Self {
      root,
      done_cache: Mutex::new(done_cache),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn chunk_path(&self, chunk_index: usize) -> PathBuf {
    self.root.join("chunks").join(format!("{:05}.ivf", chunk_index))
  }

  pub fn probe_path(&self, chunk_index: usize, round: usize) -> PathBuf {
    self
      .root
      .join("probes")
      .join(format!("{}_r{}.probe", chunk_index, round))
  }

  pub fn boundary_file(&self) -> PathBuf {
    self.root.join("meta").join("scenes.txt")
  }

  pub fn plan_file(&self) -> PathBuf {
    self.root.join("meta").join("plan.json")
  }

  fn done_file(&self) -> PathBuf {
    self.root.join("meta").join("done.json")
  }

  /// Removes every transient probe file for a chunk; called when that
  /// chunk's TQSearch has finished.
  pub fn clear_probes_for_chunk(&self, chunk_index: usize) -> io::Result<()> {
    let probes_dir = self.root.join("probes");
    let prefix = format!("{}_r", chunk_index);
    if let Ok(entries) = fs::read_dir(&probes_dir) {
      for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
          let _ = fs::remove_file(entry.path());
        }
      }
    }
    Ok(())
  }

  /// Returns a reusable artifact for `chunk_index` if one exists on disk
  /// with a recorded frame count matching `expected_frames` (§4.5
  /// idempotence).
  pub fn existing_chunk_artifact(&self, chunk_index: usize, expected_frames: usize) -> Option<ChunkArtifact> {
    let path = self.chunk_path(chunk_index);
    if !path.exists() {
      return None;
    }
    let cache = self.done_cache.lock().unwrap();
    let entry = cache.done.get(&chunk_index.to_string())?;
    if entry.frames != expected_frames {
      return None;
    }
    Some(ChunkArtifact {
      chunk_index,
      crf: 0,
      path,
      frames: entry.frames,
      bytes: entry.bytes,
    })
  }

  pub fn record_done(&self, chunk_index: usize, entry: DoneEntry) -> io::Result<()> {
    let mut cache = self.done_cache.lock().unwrap();
    cache.done.insert(chunk_index.to_string(), entry);
    let serialized = serde_json::to_string_pretty(&*cache)?;
    fs::write(self.done_file(), serialized)
  }

  /// Removes the entire run directory unless `retain` is set; called after
  /// the final output has been muxed. On cancellation or chunk failure the
  /// caller should not invoke this, leaving the directory for resumption.
  pub fn finalize(&self, retain: bool) -> io::Result<()> {
    if !retain {
      fs::remove_dir_all(&self.root)?;
    }
    Ok(())
  }
}

fn load_done(path: &Path) -> io::Result<DoneMap> {
  let contents = fs::read_to_string(path)?;
  serde_json::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_workdir_has_no_existing_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::create(tmp.path().join("run")).unwrap();
    assert!(workdir.existing_chunk_artifact(0, 100).is_none());
  }

  #[test]
  fn record_done_then_reload_recognizes_matching_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let run_root = tmp.path().join("run");
    let workdir = WorkDir::create(&run_root).unwrap();
    fs::write(workdir.chunk_path(3), b"fake-stream").unwrap();
    workdir.record_done(3, DoneEntry { frames: 120, bytes: 11 }).unwrap();

    let reopened = WorkDir::create(&run_root).unwrap();
    let artifact = reopened.existing_chunk_artifact(3, 120).unwrap();
    assert_eq!(artifact.frames, 120);
    assert_eq!(artifact.bytes, 11);

    assert!(reopened.existing_chunk_artifact(3, 121).is_none());
  }
}
