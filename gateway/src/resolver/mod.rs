// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The seam to the external extraction library.
//!
//! [`MediaResolver`] is the only way the gateway talks to the upstream
//! provider. The production implementation drives `yt-dlp` as a child process
//! ([`ytdlp::YtDlpResolver`]); tests substitute in-process fakes.

pub mod ytdlp;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ytdlp::YtDlpResolver;

/// Authentication handed to the resolver for one call.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub cookie_file: &'a Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorKind {
    BotDetection,
    Unavailable,
    AgeRestricted,
    TooManyRequests,
    Generic,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BotDetection => "bot detection",
            Self::Unavailable => "unavailable",
            Self::AgeRestricted => "age restricted",
            Self::TooManyRequests => "too many requests",
            Self::Generic => "generic",
        };
        f.write_str(label)
    }
}

/// A failed lookup or fetch, classified from the upstream error text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub detail: String,
}

impl UpstreamError {
    pub fn classify(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind: classify(&detail),
            detail,
        }
    }

    pub fn generic(detail: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Generic,
            detail: detail.into(),
        }
    }
}

/// Maps upstream error text to a kind by looking for known phrases.
pub fn classify(text: &str) -> UpstreamErrorKind {
    let lower = text.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if mentions(&["http error 429", "too many requests"]) {
        UpstreamErrorKind::TooManyRequests
    } else if mentions(&[
        "confirm your age",
        "age-restricted",
        "age restricted",
        "inappropriate for some users",
    ]) {
        UpstreamErrorKind::AgeRestricted
    } else if mentions(&["not a bot", "sign in to confirm", "bot detection"]) {
        UpstreamErrorKind::BotDetection
    } else if mentions(&[
        "private video",
        "video unavailable",
        "is not available",
        "has been removed",
        "does not exist",
        "http error 404",
    ]) {
        UpstreamErrorKind::Unavailable
    } else {
        UpstreamErrorKind::Generic
    }
}

/// Cuts `text` to at most `limit` characters for logging.
pub fn truncate_for_log(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Metadata for one media resource, as reported by the extraction library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
}

/// One downloadable stream variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    /// Average audio bitrate in kbit/s.
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
}

impl MediaFormat {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    /// A stream carrying video with a `WxH` resolution.
    pub fn video_quality(&self) -> Option<VideoQuality> {
        if !self.has_video() {
            return None;
        }
        self.resolution.as_deref()?.parse().ok()
    }

    pub fn is_audio_only(&self) -> bool {
        !self.has_video() && self.has_audio()
    }
}

/// A `WIDTHxHEIGHT` quality label such as `1080x1920`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoQuality {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("quality must look like WIDTHxHEIGHT")]
pub struct InvalidQuality;

impl FromStr for VideoQuality {
    type Err = InvalidQuality;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (width, height) = value.trim().split_once('x').ok_or(InvalidQuality)?;
        let width = width.parse().map_err(|_| InvalidQuality)?;
        let height = height.parse().map_err(|_| InvalidQuality)?;
        if width == 0 || height == 0 {
            return Err(InvalidQuality);
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The two capabilities the gateway consumes from the extraction library.
///
/// Both calls block on the network and must be bounded by the implementation.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Looks up title, thumbnail and available formats without downloading.
    async fn resolve_metadata(
        &self,
        url: &str,
        auth: AuthContext<'_>,
    ) -> Result<MediaInfo, UpstreamError>;

    /// Downloads the best variant not taller than `quality`, merged with the
    /// best audio, and writes the final artifact to `output_path`.
    async fn fetch_and_package(
        &self,
        url: &str,
        quality: VideoQuality,
        auth: AuthContext<'_>,
        output_path: &Path,
    ) -> Result<(), UpstreamError>;
}
