//! The error taxonomy shared by every component: environmental, external-tool,
//! planning, search and control errors. `FailedConvergence` never appears here
//! because it is non-fatal and recorded on [`crate::target_quality::TqResult`]
//! instead of propagated.

use std::path::PathBuf;

use thiserror::Error;

/// Kind discriminant, independent of the chunk/message payload carried by
/// [`CoreError`]. Used by callers that want to branch on taxonomy rather than
/// match every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Environmental,
  ExternalTool,
  Planning,
  Control,
}

#[derive(Debug, Error)]
pub enum CoreError {
  #[error("source file not found: {0}")]
  SourceMissing(PathBuf),

  #[error("source file is unreadable: {0}")]
  SourceUnreadable(PathBuf),

  #[error("working directory failure: {0}")]
  WorkDirFailure(String),

  #[error("encode failed for chunk {chunk}: {message}")]
  EncodeFailed {
    chunk: usize,
    message: String,
    stderr_tail: Option<String>,
  },

  #[error("metric computation failed for chunk {chunk}: {message}")]
  MetricFailed {
    chunk: usize,
    message: String,
    stderr_tail: Option<String>,
  },

  #[error("scene detection failed: {0}")]
  ScenesDetectionFailed(String),

  #[error("media query failed for {path}: {message}")]
  MediaQueryFailed { path: PathBuf, message: String },

  #[error("source format is unsupported: {0}")]
  UnsupportedFormat(String),

  #[error("concatenation failed: {0}")]
  ConcatFailed(String),

  #[error("muxing failed: {0}")]
  MuxFailed(String),

  #[error("chunk plan is empty: source has no frames")]
  EmptyPlan,

  #[error("frame count mismatch: expected {expected}, got {actual}")]
  FrameCountMismatch { expected: usize, actual: usize },

  #[error("run was canceled")]
  Canceled,
}

impl CoreError {
  pub fn kind(&self) -> ErrorKind {
    use CoreError::*;
    match self {
      SourceMissing(_) | SourceUnreadable(_) | WorkDirFailure(_) => ErrorKind::Environmental,
      EncodeFailed { .. }
      | MetricFailed { .. }
      | ScenesDetectionFailed(_)
      | MediaQueryFailed { .. }
      | UnsupportedFormat(_)
      | ConcatFailed(_)
      | MuxFailed(_) => ErrorKind::ExternalTool,
      EmptyPlan | FrameCountMismatch { .. } => ErrorKind::Planning,
      Canceled => ErrorKind::Control,
    }
  }

  /// The chunk this error is attributable to, if any. Environmental, planning
  /// and control errors are run-global.
  pub fn chunk_index(&self) -> Option<usize> {
    match self {
      CoreError::EncodeFailed { chunk, .. } | CoreError::MetricFailed { chunk, .. } => {
        Some(*chunk)
      },
      _ => None,
    }
  }
}

/// A tool-level failure reported by a capability implementation (Encoder,
/// Metric, SceneDetector, Demuxer, Concatenator, Muxer). Kept separate from
/// [`CoreError`] so capability traits stay agnostic of which component called
/// them; the calling component attaches the chunk index and taxonomy kind.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
  pub message: String,
  pub stderr_tail: Option<String>,
  /// Set by a capability implementation when it observed the run's
  /// cancellation signal mid-operation, so the caller can report `Canceled`
  /// instead of a generic tool failure.
  pub canceled: bool,
}

impl ToolError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      stderr_tail: None,
      canceled: false,
    }
  }

  pub fn with_stderr(message: impl Into<String>, stderr_tail: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      stderr_tail: Some(stderr_tail.into()),
      canceled: false,
    }
  }

  pub fn canceled() -> Self {
    Self {
      message: "canceled".to_owned(),
      stderr_tail: None,
      canceled: true,
    }
  }
}
