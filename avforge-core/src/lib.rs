//! Chunked AV1 transcoding orchestration: scene-aware chunk planning,
//! per-chunk target-quality CRF search, bounded concurrent scheduling, and
//! deterministic container assembly.
//!
//! This crate never links an encoder, metric, demuxer, or muxer directly —
//! every external tool is addressed through the capability traits in
//! [`capabilities`]. Concrete process-based implementations live in
//! `avforge-cli`.

pub mod assembler;
pub mod cancel;
pub mod capabilities;
pub mod chunk_encoder;
pub mod chunk_plan;
pub mod error;
pub mod probe;
pub mod reporter;
pub mod scheduler;
pub mod source_info;
pub mod target_quality;
pub mod workdir;

pub use assembler::Assembler;
pub use cancel::CancelToken;
pub use capabilities::{Concatenator, ContainerMetadata, Demuxer, EncodeOutput, Encoder, FrameRange, Metric, MetricMode, Muxer, SceneDetector};
pub use chunk_encoder::{ChunkArtifact, ChunkEncoder, DEFAULT_MAX_TRIES};
pub use chunk_plan::{ChunkPlan, ChunkPlanner, PlanMode};
pub use error::{CoreError, ErrorKind, ToolError};
pub use probe::{ProbeEntry, ProbeRequest, ProbeRunner, SamplingConfig};
pub use reporter::{BoundDirection, NullReporter, Reporter, ReporterEvent};
pub use scheduler::{RunContext, Scheduler, SchedulerOutcome};
pub use source_info::{FrameRate, MediaProbe, ResolutionTier, SourceInfo, StreamDescriptor};
pub use target_quality::{Band, TqFlags, TqResult, TqSearch, TqSearchConfig, DEFAULT_MAX_ROUNDS};
pub use workdir::{DoneEntry, WorkDir};
