//! Remux and transcode collaborator boundaries.
//!
//! The pipeline only depends on the two trait contracts here; the actual
//! container and codec work is done by an external media tool. A default
//! ffmpeg-backed implementation is provided. Both operations must leave
//! their inputs untouched on failure so the caller can retry assembly
//! without re-downloading.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::TimeRange;
use crate::error::DownloadError;

/// Combines 1–2 single-stream files into one container without re-encoding.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DownloadError>;
}

/// Re-encodes a file into the target codec/container, optionally trimming
/// to a time range and capping the video bit rate.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        time_range: Option<TimeRange>,
        bit_rate: Option<f64>,
    ) -> Result<(), DownloadError>;
}

/// Default collaborator: shells out to ffmpeg.
///
/// The child is spawned with `kill_on_drop`, so dropping the in-flight
/// future (the orchestrator does this on cancellation) aborts the tool.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    program: PathBuf,
}

impl FfmpegConverter {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: Vec<OsString>, operation: &'static str) -> Result<(), DownloadError> {
        debug!(program = %self.program.display(), ?args, "spawning media tool");
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match operation {
                "remux" => DownloadError::remux_failed(format!("failed to spawn ffmpeg: {e}")),
                _ => DownloadError::transcode_failed(format!("failed to spawn ffmpeg: {e}")),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.lines().last().unwrap_or("no output")
        );
        Err(match operation {
            "remux" => DownloadError::remux_failed(reason),
            _ => DownloadError::transcode_failed(reason),
        })
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Remuxer for FfmpegConverter {
    #[instrument(skip(self), level = "debug")]
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DownloadError> {
        if inputs.is_empty() || inputs.len() > 2 {
            return Err(DownloadError::remux_failed(format!(
                "expected 1 or 2 input streams, got {}",
                inputs.len()
            )));
        }

        let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into()];
        for input in inputs {
            args.push("-i".into());
            args.push(input.as_os_str().to_owned());
        }
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.as_os_str().to_owned());

        self.run(args, "remux").await
    }
}

#[async_trait]
impl Transcoder for FfmpegConverter {
    #[instrument(skip(self), level = "debug")]
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        time_range: Option<TimeRange>,
        bit_rate: Option<f64>,
    ) -> Result<(), DownloadError> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into()];
        if let Some(range) = &time_range {
            args.push("-ss".into());
            args.push(format!("{}", range.start).into());
            args.push("-to".into());
            args.push(format!("{}", range.end).into());
        }
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-c:a".into());
        args.push("aac".into());
        if let Some(rate) = bit_rate {
            args.push("-b:v".into());
            args.push(format!("{}k", rate.round() as u64).into());
        }
        args.push(output.as_os_str().to_owned());

        self.run(args, "transcode").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remux_rejects_bad_input_counts() {
        let converter = FfmpegConverter::new();
        let err = converter
            .remux(&[], Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::RemuxFailed { .. }));

        let too_many = vec![
            PathBuf::from("a.mp4"),
            PathBuf::from("b.m4a"),
            PathBuf::from("c.m4a"),
        ];
        let err = converter
            .remux(&too_many, Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::RemuxFailed { .. }));
    }

    #[tokio::test]
    async fn missing_program_surfaces_as_collaborator_error() {
        let converter = FfmpegConverter::with_program("/nonexistent/ffmpeg-for-tests");
        let err = converter
            .transcode(
                Path::new("/tmp/in.webm"),
                Path::new("/tmp/out.mp4"),
                Some(1.0..2.5),
                Some(1200.0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TranscodeFailed { .. }));
    }
}
