//! `SourceInfo` and the `MediaProbe` component (§4.1). `MediaProbe` itself
//! does no I/O; it validates the path and delegates to a [`Demuxer`]
//! capability, translating its outcome into the error taxonomy.

use std::fs;
use std::path::{Path, PathBuf};

use crate::capabilities::Demuxer;
use crate::error::CoreError;

/// A non-video stream carried through untouched by the Assembler. Opaque to
/// the core beyond what is needed to pass it through in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
  pub index: usize,
  pub codec: String,
  pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRate {
  pub num: u64,
  pub den: u64,
}

impl FrameRate {
  pub fn as_f64(self) -> f64 {
    self.num as f64 / self.den as f64
  }
}

/// Immutable description of a source file, created once by [`MediaProbe`] and
/// never mutated afterward.
#[derive(Debug, Clone)]
pub struct SourceInfo {
  pub path: PathBuf,
  pub total_frames: usize,
  pub frame_rate: FrameRate,
  pub width: u32,
  pub height: u32,
  pub audio_streams: Vec<StreamDescriptor>,
  pub subtitle_streams: Vec<StreamDescriptor>,
}

impl SourceInfo {
  /// `1440p` boundary, `1080p` boundary — used by fixed-interval chunk
  /// planning (§4.2) to pick a chunk duration from resolution.
  pub fn resolution_tier(&self) -> ResolutionTier {
    if self.height > 1440 {
      ResolutionTier::Above1440p
    } else if self.height >= 1080 {
      ResolutionTier::At1080p
    } else {
      ResolutionTier::Below1080p
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
  Above1440p,
  At1080p,
  Below1080p,
}

/// The MediaProbe component (§4.1): validates the source path, then
/// delegates the actual query to a [`Demuxer`] capability.
pub struct MediaProbe<'a> {
  demuxer: &'a dyn Demuxer,
}

impl<'a> MediaProbe<'a> {
  pub fn new(demuxer: &'a dyn Demuxer) -> Self {
    Self { demuxer }
  }

  pub fn inspect(&self, source: &Path) -> Result<SourceInfo, CoreError> {
    if !source.exists() {
      return Err(CoreError::SourceMissing(source.to_path_buf()));
    }
    let metadata = fs::metadata(source).map_err(|_| CoreError::SourceUnreadable(source.to_path_buf()))?;
    if metadata.len() == 0 {
      return Err(CoreError::SourceUnreadable(source.to_path_buf()));
    }

    self.demuxer.info(source).map_err(|e| {
      if e.canceled {
        CoreError::MediaQueryFailed {
          path: source.to_path_buf(),
          message: "canceled".to_owned(),
        }
      } else {
        CoreError::MediaQueryFailed {
          path: source.to_path_buf(),
          message: e.message,
        }
      }
    })
  }
}
