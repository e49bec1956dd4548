// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! [`MediaResolver`] backed by the `yt-dlp` command line tool.
//!
//! Every invocation runs as a child process with a hard timeout. The child is
//! spawned with `kill_on_drop`, so a timed out or abandoned request (client
//! disconnect) terminates the process instead of leaving it running.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use super::{AuthContext, MediaInfo, MediaResolver, UpstreamError, VideoQuality};

/// Seconds `yt-dlp` waits on an idle socket before giving up on it.
const SOCKET_TIMEOUT_SECS: &str = "30";

pub struct YtDlpResolver {
    binary: PathBuf,
    lookup_timeout: Duration,
    download_timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: PathBuf, lookup_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            binary,
            lookup_timeout,
            download_timeout,
        }
    }

    /// Runs `yt-dlp` with `args` and returns its output if it exited cleanly.
    ///
    /// A non-zero exit is classified from stderr.
    async fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<Output, UpstreamError> {
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                UpstreamError::generic(format!("yt-dlp timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| UpstreamError::generic(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpstreamError::classify(stderr.trim()));
        }

        Ok(output)
    }
}

fn common_args(auth: AuthContext<'_>) -> Vec<OsString> {
    vec![
        "--no-warnings".into(),
        "--no-progress".into(),
        "--no-playlist".into(),
        "--socket-timeout".into(),
        SOCKET_TIMEOUT_SECS.into(),
        "--cookies".into(),
        auth.cookie_file.into(),
    ]
}

/// The format selector used for downloads: best mp4 video up to the requested
/// height merged with the best m4a audio, or a pre-merged mp4 fallback.
pub fn format_selector(quality: VideoQuality) -> String {
    let height = quality.height;
    format!("bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/best[height<={height}][ext=mp4]")
}

fn parse_metadata(stdout: &[u8]) -> anyhow::Result<MediaInfo> {
    serde_json::from_slice(stdout).context("yt-dlp returned invalid JSON")
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    #[tracing::instrument(skip(self, auth))]
    async fn resolve_metadata(
        &self,
        url: &str,
        auth: AuthContext<'_>,
    ) -> Result<MediaInfo, UpstreamError> {
        let mut args = common_args(auth);
        args.extend(
            ["--dump-single-json", "--skip-download", "--", url].map(OsString::from),
        );

        let output = self.run(args, self.lookup_timeout).await?;

        let info = parse_metadata(&output.stdout)
            .map_err(|e| UpstreamError::generic(format!("{e:#}")))?;

        tracing::debug!(
            "[gateway] resolved metadata with {} formats",
            info.formats.len()
        );

        Ok(info)
    }

    #[tracing::instrument(skip(self, auth))]
    async fn fetch_and_package(
        &self,
        url: &str,
        quality: VideoQuality,
        auth: AuthContext<'_>,
        output_path: &Path,
    ) -> Result<(), UpstreamError> {
        let mut args = common_args(auth);
        args.extend(["--quiet", "--format"].map(OsString::from));
        args.push(format_selector(quality).into());
        args.extend(["--merge-output-format", "mp4", "--output"].map(OsString::from));
        args.push(output_path.into());
        args.extend(["--", url].map(OsString::from));

        self.run(args, self.download_timeout).await?;

        Ok(())
    }
}
