//! # ffmpeg Concatenation
//!
//! The service never touches audio data itself. It hands an ordered
//! manifest to ffmpeg's concat demuxer and asks for a stream copy, so the
//! inputs are joined without re-encoding. That only works when all inputs
//! share codec parameters; when they don't, ffmpeg says so on stderr and the
//! text is passed back to the caller.
//!
//! The run is bounded by a timeout, and the child is spawned with
//! `kill_on_drop` so that dropping the future (request cancelled, timeout
//! hit) also kills the process.

use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegConcatenator {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Concatenate the files listed in `manifest` into `output`.
    ///
    /// # Errors
    /// - [`AppError::Concatenation`] with ffmpeg's stderr on a non-zero exit,
    ///   or with the spawn error when the binary cannot be started
    /// - [`AppError::Timeout`] when ffmpeg runs longer than the timeout
    pub async fn concat(&self, manifest: &Path, output: &Path) -> AppResult<()> {
        let started = Instant::now();

        let mut command = Command::new(&self.binary);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .args(["-c", "copy", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.binary.display(), manifest = %manifest.display(), output = %output.display(), "Running ffmpeg");

        let result = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "ffmpeg timed out");
                return Err(AppError::Timeout(self.timeout.as_secs()));
            }
        };

        let output_status = result.map_err(|e| {
            error!(binary = %self.binary.display(), error = %e, "Failed to execute ffmpeg");
            AppError::Concatenation(format!("Failed to execute {}: {}", self.binary.display(), e))
        })?;

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr).trim().to_string();
            error!(status = %output_status.status, stderr = %stderr, "ffmpeg error");
            let diagnostic = if stderr.is_empty() {
                format!("ffmpeg exited with {}", output_status.status)
            } else {
                stderr
            };
            return Err(AppError::Concatenation(diagnostic));
        }

        debug!(duration_ms = started.elapsed().as_millis() as u64, "ffmpeg finished");
        Ok(())
    }

    /// Check that the binary can be started at all (`ffmpeg -version`).
    ///
    /// Returns the first line of the version banner.
    pub async fn probe(&self) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(Duration::from_secs(10), output).await {
            Ok(Ok(output)) if output.status.success() => Some(
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => None,
        }
    }
}
