//! Process-based implementations of `avforge-core`'s capability traits.
//! Grounded on the teacher's subprocess conventions: `encoder.rs`'s
//! `compose_1_1_pass` argument assembly, `ffmpeg.rs`'s
//! `compose_ffmpeg_pipe`/`num_frames`, `vmaf.rs`'s piped libvmaf invocation,
//! `concat.rs`'s mkvmerge/ffmpeg dispatch, and `scene_detect.rs`'s
//! `av-scenechange` subprocess call — reshaped so each external tool sits
//! behind one capability trait instead of being called from the core
//! directly.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use avforge_core::{
  Concatenator, ContainerMetadata, Demuxer, EncodeOutput, Encoder, FrameRange, Metric, MetricMode, Muxer, SceneDetector,
  SourceInfo, StreamDescriptor, ToolError,
};
use tracing::{debug, warn};

fn run_to_tool_error(mut child: Child, label: &str) -> Result<Vec<u8>, ToolError> {
  let mut stdout = Vec::new();
  if let Some(mut out) = child.stdout.take() {
    out.read_to_end(&mut stdout).map_err(|e| ToolError::new(e.to_string()))?;
  }

  let status = child.wait().map_err(|e| ToolError::new(e.to_string()))?;
  if status.success() {
    return Ok(stdout);
  }

  let mut stderr = String::new();
  if let Some(mut err) = child.stderr.take() {
    let _ = err.read_to_string(&mut stderr);
  }
  let tail: String = stderr.lines().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
  warn!(label, status = %status, "subprocess exited with failure");
  Err(ToolError::with_stderr(format!("{label} exited with {status}"), tail))
}

/// SvtAv1EncApp-backed [`Encoder`]: 1-pass CRF encode of one frame range to
/// an elementary IVF stream, mirroring the teacher's `compose_1_1_pass` for
/// `Encoder::svt_av1`.
pub struct SvtAv1Encoder {
  pub binary: String,
}

impl Default for SvtAv1Encoder {
  fn default() -> Self {
    Self {
      binary: "SvtAv1EncApp".to_owned(),
    }
  }
}

impl Encoder for SvtAv1Encoder {
  fn encode(&self, source: &Path, frame_range: FrameRange, crf: u32, preset: &str, out_path: &Path) -> Result<EncodeOutput, ToolError> {
    if frame_range.is_empty() {
      return Err(ToolError::new("empty frame range"));
    }

    let mut ffmpeg = Command::new("ffmpeg")
      .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
      .arg(source)
      .args([
        "-vf",
        &format!("select='between(n\\,{}\\,{})',setpts=PTS-STARTPTS", frame_range.start, frame_range.end - 1),
        "-pix_fmt",
        "yuv420p10le",
        "-f",
        "yuv4mpegpipe",
        "-",
      ])
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| ToolError::new(format!("failed to spawn ffmpeg: {e}")))?;

    let ffmpeg_stdout = ffmpeg.stdout.take().ok_or_else(|| ToolError::new("ffmpeg stdout unavailable"))?;

    let encoder = Command::new(&self.binary)
      .args(["-i", "stdin", "--progress", "2", "--preset", preset, "--crf", &crf.to_string()])
      .arg("-b")
      .arg(out_path)
      .stdin(ffmpeg_stdout)
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| ToolError::new(format!("failed to spawn {}: {e}", self.binary)))?;

    run_to_tool_error(encoder, &self.binary)?;
    let _ = ffmpeg.wait();

    let bytes = std::fs::metadata(out_path).map_err(|e| ToolError::new(e.to_string()))?.len();
    Ok(EncodeOutput {
      frames: frame_range.len(),
      bytes,
    })
  }
}

/// libvmaf/SSIMULACRA2-style [`Metric`], piped through ffmpeg the way the
/// teacher's `vmaf.rs` composes its libvmaf filter invocation.
pub struct Ssimulacra2Metric {
  pub binary: String,
}

impl Default for Ssimulacra2Metric {
  fn default() -> Self {
    Self {
      binary: "ssimulacra2_rs".to_owned(),
    }
  }
}

impl Metric for Ssimulacra2Metric {
  fn score(&self, reference: &Path, reference_range: FrameRange, encoded_stream: &Path, mode: MetricMode) -> Result<f64, ToolError> {
    if reference_range.is_empty() {
      return Err(ToolError::new("zero-length probe cannot be scored"));
    }

    let mut cmd = Command::new(&self.binary);
    cmd
      .arg("video")
      .arg(reference)
      .arg(encoded_stream)
      .args(["--frame-start", &reference_range.start.to_string(), "--frame-end", &reference_range.end.to_string()]);
    match mode {
      MetricMode::Mean => {},
      MetricMode::Percentile(p) => {
        cmd.args(["--percentile", &p.to_string()]);
      },
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| ToolError::new(format!("failed to spawn {}: {e}", self.binary)))?;
    let stdout = run_to_tool_error(child, &self.binary)?;
    let text = String::from_utf8_lossy(&stdout);
    let score: f64 = text
      .lines()
      .last()
      .unwrap_or_default()
      .trim()
      .parse()
      .map_err(|_| ToolError::new(format!("could not parse score from: {text}")))?;
    Ok(score)
  }
}

/// ffprobe-backed [`Demuxer`], the Probe/demux capability (§4.1).
pub struct FfprobeDemuxer;

impl Demuxer for FfprobeDemuxer {
  fn info(&self, source: &Path) -> Result<SourceInfo, ToolError> {
    let output = Command::new("ffprobe")
      .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
      .arg(source)
      .output()
      .map_err(|e| ToolError::new(format!("failed to spawn ffprobe: {e}")))?;

    if !output.status.success() {
      return Err(ToolError::new(format!("ffprobe exited with {}", output.status)));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| ToolError::new(e.to_string()))?;
    parse_ffprobe_json(&json, source)
  }
}

fn parse_ffprobe_json(json: &serde_json::Value, source: &Path) -> Result<SourceInfo, ToolError> {
  let streams = json
    .get("streams")
    .and_then(|s| s.as_array())
    .ok_or_else(|| ToolError::new("ffprobe output missing streams"))?;

  let video = streams
    .iter()
    .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
    .ok_or_else(|| ToolError::new("no video stream found"))?;

  let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
  let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
  let (num, den) = video
    .get("r_frame_rate")
    .and_then(|v| v.as_str())
    .and_then(parse_fraction)
    .unwrap_or((24000, 1001));

  let total_frames = video
    .get("nb_frames")
    .and_then(|v| v.as_str())
    .and_then(|s| s.parse::<usize>().ok())
    .unwrap_or(0);

  let mut audio_streams = Vec::new();
  let mut subtitle_streams = Vec::new();
  for (idx, stream) in streams.iter().enumerate() {
    let codec_type = stream.get("codec_type").and_then(|t| t.as_str()).unwrap_or_default();
    let codec = stream.get("codec_name").and_then(|c| c.as_str()).unwrap_or_default().to_owned();
    let language = stream
      .get("tags")
      .and_then(|t| t.get("language"))
      .and_then(|l| l.as_str())
      .map(str::to_owned);

    let descriptor = StreamDescriptor { index: idx, codec, language };
    match codec_type {
      "audio" => audio_streams.push(descriptor),
      "subtitle" => subtitle_streams.push(descriptor),
      _ => {},
    }
  }

  Ok(SourceInfo {
    path: source.to_path_buf(),
    total_frames,
    frame_rate: avforge_core::FrameRate { num, den },
    width,
    height,
    audio_streams,
    subtitle_streams,
  })
}

fn parse_fraction(s: &str) -> Option<(u64, u64)> {
  let mut parts = s.split('/');
  let num = parts.next()?.parse().ok()?;
  let den = parts.next().unwrap_or("1").parse().ok()?;
  Some((num, den))
}

/// `av-scenechange`-style [`SceneDetector`], run as a subprocess that prints
/// one frame index per line (the shape of the teacher's `scene_detect.rs`).
pub struct AvScenechangeDetector {
  pub binary: String,
}

impl Default for AvScenechangeDetector {
  fn default() -> Self {
    Self {
      binary: "av-scenechange".to_owned(),
    }
  }
}

impl SceneDetector for AvScenechangeDetector {
  fn detect(&self, source: &Path) -> Result<Vec<usize>, ToolError> {
    let child = Command::new(&self.binary)
      .arg(source)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| ToolError::new(format!("failed to spawn {}: {e}", self.binary)))?;

    let stdout = run_to_tool_error(child, &self.binary)?;
    let text = String::from_utf8_lossy(&stdout);
    let mut scenes = Vec::new();
    for line in text.lines() {
      if let Ok(n) = line.trim().parse::<usize>() {
        scenes.push(n);
      }
    }
    debug!(count = scenes.len(), "scene detection complete");
    Ok(scenes)
  }
}

/// mkvmerge-backed [`Concatenator`], following the teacher's
/// `concat.rs::mkvmerge` argument shape.
pub struct MkvmergeConcatenator;

impl Concatenator for MkvmergeConcatenator {
  fn concat(&self, chunk_paths: &[PathBuf], out_path: &Path) -> Result<(), ToolError> {
    if chunk_paths.is_empty() {
      return Err(ToolError::new("no chunks to concatenate"));
    }

    let mut cmd = Command::new("mkvmerge");
    cmd.args(["-o"]).arg(out_path).arg(&chunk_paths[0]);
    for path in &chunk_paths[1..] {
      cmd.arg("+").arg(path);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| ToolError::new(format!("failed to spawn mkvmerge: {e}")))?;
    run_to_tool_error(child, "mkvmerge")?;
    Ok(())
  }
}

/// ffmpeg-backed [`Muxer`]: mux the concatenated video against passthrough
/// audio/subtitle streams pulled straight from `source`, mirroring the
/// teacher's final muxing invocation in `project.rs`.
pub struct FfmpegMuxer;

impl Muxer for FfmpegMuxer {
  fn mux(&self, concatenated_video: &Path, source: &Path, passthrough: &[StreamDescriptor], metadata: &ContainerMetadata, out_path: &Path) -> Result<(), ToolError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.arg("-i").arg(concatenated_video);
    cmd.arg("-i").arg(source);
    cmd.args(["-map", "0:v:0"]);
    for stream in passthrough {
      cmd.args(["-map", &format!("1:{}", stream.index)]);
    }
    cmd.args(["-c", "copy"]);
    if let Some(title) = &metadata.title {
      cmd.args(["-metadata", &format!("title={title}")]);
    }
    for (key, value) in &metadata.tags {
      cmd.args(["-metadata", &format!("{key}={value}")]);
    }
    cmd.arg(out_path);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| ToolError::new(format!("failed to spawn ffmpeg: {e}")))?;
    run_to_tool_error(child, "ffmpeg")?;
    Ok(())
  }
}

